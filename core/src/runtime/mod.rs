//! Runtime engine: coroutine state, the active-coroutine registry and the storage
//! accessors called by rewritten code.

use thiserror::Error;

pub mod abi;
pub mod accessors;
mod coro;
pub mod dispatcher;
pub mod registry;
mod storage;
pub mod value;

pub use coro::{Continuation, Coro, Entry, Status};
pub use dispatcher::Dispatcher;
pub use value::{Obj, ObjRef, Value};

use crate::error::{Error, ErrorKind, Invariant};

#[cfg(test)]
mod tests;

/// Abrupt completion of running code.
#[derive(Debug, Error)]
pub enum Throw {
    /// Application exception, catchable by exception handlers.
    #[error("uncaught exception {0}")]
    Exception(ObjRef),
    /// Engine or interpreter failure; never caught by application code.
    #[error(transparent)]
    Fault(#[from] Error),
}

impl Throw {
    pub fn exception(&self) -> Option<&ObjRef> {
        match self {
            Throw::Exception(obj) => Some(obj),
            Throw::Fault(_) => None,
        }
    }

    /// Error kind of a fault, `None` for application exceptions.
    pub fn fault_kind(&self) -> Option<ErrorKind> {
        match self {
            Throw::Exception(_) => None,
            Throw::Fault(e) => Some(e.kind()),
        }
    }

    pub fn into_error(self) -> Error {
        match self {
            Throw::Exception(obj) => Error::execution(format!("uncaught exception {}", obj)),
            Throw::Fault(e) => e,
        }
    }
}

impl From<Invariant> for Throw {
    fn from(invariant: Invariant) -> Self {
        Throw::Fault(Error::Invariant(invariant))
    }
}
