//! Error taxonomy shared by the analyzer, the transformer, the runtime engine and the
//! interpreter.
//!
//! Every failure belongs to exactly one [`ErrorKind`]; tests and callers branch on the
//! kind (or on the failure variant) rather than on message text.

use thiserror::Error;

use crate::bytecode::{Kind, Label, MethodId};
use crate::frame::ValueCategory;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed classification of every error the crate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input or an analysis limitation; the method cannot be rewritten.
    Analysis,
    /// The analysis succeeded but the rewrite would violate a structural rule.
    Transform,
    /// Misuse of the coroutine API, detected at run time.
    RuntimeInvariant,
    /// Interpreter fault (unknown method, ill-typed operand, ...).
    Execution,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("analysis of {method} failed at instruction {index}: {failure}")]
    Analysis {
        method: MethodId,
        index: usize,
        failure: AnalysisFailure,
    },

    #[error("cannot transform {method}: {failure}")]
    Transform {
        method: MethodId,
        failure: TransformFailure,
    },

    #[error("coroutine invariant violated: {0}")]
    Invariant(#[from] Invariant),

    #[error("execution fault: {0}")]
    Execution(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Analysis { .. } => ErrorKind::Analysis,
            Error::Transform { .. } => ErrorKind::Transform,
            Error::Invariant(_) => ErrorKind::RuntimeInvariant,
            Error::Execution(_) => ErrorKind::Execution,
        }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution(msg.into())
    }
}

/// Why the dataflow analysis of a method was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisFailure {
    #[error("local {slot} holds a reference whose type is never resolved")]
    UnresolvedReference { slot: u16 },

    #[error("operand stack entries {left} and {right} cannot be merged")]
    MergeConflict {
        left: ValueCategory,
        right: ValueCategory,
    },

    #[error("operand stack heights {left} and {right} differ at a join")]
    StackHeightMismatch { left: usize, right: usize },

    #[error("subroutines (jsr/ret) are not supported")]
    Subroutine,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("expected {expected} but found {found}")]
    TypeMismatch {
        expected: String,
        found: ValueCategory,
    },

    #[error("local {slot} is outside the frame")]
    LocalOutOfRange { slot: u16 },

    #[error("control falls off the end of the code")]
    FallOffEnd,

    #[error("jump to undefined label {0}")]
    UnknownLabel(Label),

    #[error("malformed descriptor {0:?}")]
    BadDescriptor(String),
}

/// Why a rewrite was refused after a successful analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformFailure {
    #[error("exception region [{start}, {end}) lies entirely inside injected code")]
    RegionInsideInjectedCode { start: Label, end: Label },

    #[error("method has no restore point calls")]
    NothingToInstrument,

    #[error("analysis result does not describe this method body")]
    StaleAnalysis,

    #[error("exception region refers to undefined label {0}")]
    UnknownLabel(Label),

    #[error("malformed descriptor {0:?}")]
    BadDescriptor(String),
}

/// Contract violations detected by the runtime engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Invariant {
    #[error("yield called while coroutine {id} is already yielding")]
    DoubleYield { id: u64 },

    #[error("coroutine {id} has terminated and cannot be resumed")]
    ResumeTerminal { id: u64 },

    #[error("coroutine {id} is already running")]
    AlreadyRunning { id: u64 },

    #[error("coroutine {id} is not running")]
    NotRunning { id: u64 },

    #[error("no coroutine is active on this thread")]
    NoActiveCoroutine,

    #[error("saved state does not match any restore point of {method}")]
    InvalidDispatch { method: String },

    #[error("{kind} storage is empty")]
    StorageUnderflow { kind: Kind },

    #[error("staged {kind} value at depth {depth} does not exist")]
    StagingUnderflow { kind: Kind, depth: usize },

    #[error("no staging frame is open")]
    NoStagingFrame,

    #[error("cannot store {found} in {kind} storage")]
    StorageTypeMismatch { kind: Kind, found: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let method = MethodId::new("demo/A", "run", "()V");
        let analysis = Error::Analysis {
            method: method.clone(),
            index: 3,
            failure: AnalysisFailure::Subroutine,
        };
        assert_eq!(analysis.kind(), ErrorKind::Analysis);
        assert!(analysis.to_string().contains("demo/A.run()V"));
        assert!(analysis.to_string().contains("instruction 3"));

        let transform = Error::Transform {
            method,
            failure: TransformFailure::NothingToInstrument,
        };
        assert_eq!(transform.kind(), ErrorKind::Transform);

        let invariant: Error = Invariant::NoActiveCoroutine.into();
        assert_eq!(invariant.kind(), ErrorKind::RuntimeInvariant);

        assert_eq!(Error::execution("boom").kind(), ErrorKind::Execution);
    }
}
