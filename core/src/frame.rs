//! Abstract frame model: value categories and per-instruction frame snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytecode::{FieldType, Kind, MethodDesc, TypeOracle};
use crate::error::AnalysisFailure;

/// Abstract category of one local slot or operand-stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum ValueCategory {
    /// Empty slot, or the second half of a long/double.
    Uninitialized,
    Int,
    Long,
    Float,
    Double,
    /// A reference of unknown type; only the null constant produces it.
    Null,
    /// A reference of a concrete type (internal name or array descriptor).
    Reference(String),
    /// Address pushed by `jsr`. Never accepted by the analyzer.
    ReturnAddress,
}

impl ValueCategory {
    pub fn reference(type_name: impl Into<String>) -> Self {
        ValueCategory::Reference(type_name.into())
    }

    pub fn width(&self) -> usize {
        match self {
            ValueCategory::Long | ValueCategory::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ValueCategory::Null | ValueCategory::Reference(_))
    }

    /// Storage kind, `None` for slots that hold no value.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            ValueCategory::Int => Some(Kind::Int),
            ValueCategory::Long => Some(Kind::Long),
            ValueCategory::Float => Some(Kind::Float),
            ValueCategory::Double => Some(Kind::Double),
            ValueCategory::Null | ValueCategory::Reference(_) => Some(Kind::Ref),
            ValueCategory::Uninitialized | ValueCategory::ReturnAddress => None,
        }
    }

    /// Category of a primitive kind. References need a type, so `Kind::Ref` maps to
    /// `java/lang/Object`.
    pub fn of_kind(kind: Kind) -> Self {
        match kind {
            Kind::Int => ValueCategory::Int,
            Kind::Long => ValueCategory::Long,
            Kind::Float => ValueCategory::Float,
            Kind::Double => ValueCategory::Double,
            Kind::Ref => ValueCategory::Reference(crate::bytecode::OBJECT.to_string()),
        }
    }

    pub fn matches_kind(&self, kind: Kind) -> bool {
        self.kind() == Some(kind)
    }

    /// Concrete type name of a reference category.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ValueCategory::Reference(t) => Some(t),
            _ => None,
        }
    }
}

impl From<&FieldType> for ValueCategory {
    fn from(ty: &FieldType) -> Self {
        match ty {
            FieldType::Int => ValueCategory::Int,
            FieldType::Long => ValueCategory::Long,
            FieldType::Float => ValueCategory::Float,
            FieldType::Double => ValueCategory::Double,
            FieldType::Ref(name) => ValueCategory::Reference(name.clone()),
        }
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueCategory::Uninitialized => write!(f, "top"),
            ValueCategory::Int => write!(f, "int"),
            ValueCategory::Long => write!(f, "long"),
            ValueCategory::Float => write!(f, "float"),
            ValueCategory::Double => write!(f, "double"),
            ValueCategory::Null => write!(f, "null"),
            ValueCategory::Reference(t) => write!(f, "{}", t),
            ValueCategory::ReturnAddress => write!(f, "return-address"),
        }
    }
}

/// Locals and operand stack at one instruction. Long and double locals occupy their
/// slot plus an `Uninitialized` slot after it; on the stack they are one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub locals: Vec<ValueCategory>,
    pub stack: Vec<ValueCategory>,
}

impl Frame {
    /// Frame at method entry: receiver (if any) and parameters, the rest empty.
    pub fn entry(owner: &str, is_static: bool, desc: &MethodDesc, max_locals: usize) -> Frame {
        let mut locals = Vec::with_capacity(max_locals);
        if !is_static {
            locals.push(ValueCategory::reference(owner));
        }
        for param in &desc.params {
            let category = ValueCategory::from(param);
            let width = category.width();
            locals.push(category);
            if width == 2 {
                locals.push(ValueCategory::Uninitialized);
            }
        }
        if locals.len() < max_locals {
            locals.resize(max_locals, ValueCategory::Uninitialized);
        }
        Frame {
            locals,
            stack: Vec::new(),
        }
    }

    pub fn push(&mut self, value: ValueCategory) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<ValueCategory, AnalysisFailure> {
        self.stack.pop().ok_or(AnalysisFailure::StackUnderflow)
    }

    /// Pop a value that must be of `kind`.
    pub fn pop_kind(&mut self, kind: Kind) -> Result<ValueCategory, AnalysisFailure> {
        let value = self.pop()?;
        if value.matches_kind(kind) {
            Ok(value)
        } else {
            Err(AnalysisFailure::TypeMismatch {
                expected: kind.to_string(),
                found: value,
            })
        }
    }

    pub fn peek(&self) -> Result<&ValueCategory, AnalysisFailure> {
        self.stack.last().ok_or(AnalysisFailure::StackUnderflow)
    }

    pub fn local(&self, slot: u16) -> Result<&ValueCategory, AnalysisFailure> {
        self.locals
            .get(slot as usize)
            .ok_or(AnalysisFailure::LocalOutOfRange { slot })
    }

    /// Store into `slot`, invalidating any wide value this write overlaps.
    pub fn set_local(&mut self, slot: u16, value: ValueCategory) -> Result<(), AnalysisFailure> {
        let index = slot as usize;
        let width = value.width();
        if index + width > self.locals.len() {
            return Err(AnalysisFailure::LocalOutOfRange { slot });
        }
        if index > 0 && self.locals[index - 1].width() == 2 {
            self.locals[index - 1] = ValueCategory::Uninitialized;
        }
        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = ValueCategory::Uninitialized;
        }
        Ok(())
    }

    /// Least upper bound of two frames reaching the same instruction.
    pub fn merge(&self, other: &Frame, oracle: &dyn TypeOracle) -> Result<Frame, AnalysisFailure> {
        if self.stack.len() != other.stack.len() {
            return Err(AnalysisFailure::StackHeightMismatch {
                left: self.stack.len(),
                right: other.stack.len(),
            });
        }
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(a, b)| {
                merge_value(a, b, oracle).ok_or_else(|| AnalysisFailure::MergeConflict {
                    left: a.clone(),
                    right: b.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let width = self.locals.len().max(other.locals.len());
        let locals = (0..width)
            .map(|i| match (self.locals.get(i), other.locals.get(i)) {
                (Some(a), Some(b)) => {
                    merge_value(a, b, oracle).unwrap_or(ValueCategory::Uninitialized)
                }
                _ => ValueCategory::Uninitialized,
            })
            .collect();
        Ok(Frame { locals, stack })
    }
}

/// Merge two categories, `None` when they are incompatible.
pub fn merge_value(
    a: &ValueCategory,
    b: &ValueCategory,
    oracle: &dyn TypeOracle,
) -> Option<ValueCategory> {
    use ValueCategory::*;
    match (a, b) {
        _ if a == b => Some(a.clone()),
        (Null, Reference(t)) | (Reference(t), Null) => Some(Reference(t.clone())),
        (Reference(x), Reference(y)) => Some(Reference(oracle.common_supertype(x, y))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Program;

    #[test]
    fn test_entry_frame_layout() {
        let desc = MethodDesc::parse("(JLjava/lang/String;)V").unwrap();
        let frame = Frame::entry("demo/A", false, &desc, 6);
        assert_eq!(
            frame.locals,
            vec![
                ValueCategory::reference("demo/A"),
                ValueCategory::Long,
                ValueCategory::Uninitialized,
                ValueCategory::reference("java/lang/String"),
                ValueCategory::Uninitialized,
                ValueCategory::Uninitialized,
            ]
        );
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_set_local_clobbers_wide_values() {
        let desc = MethodDesc::parse("(D)V").unwrap();
        let mut frame = Frame::entry("demo/A", true, &desc, 3);
        frame.set_local(1, ValueCategory::Int).unwrap();
        assert_eq!(frame.locals[0], ValueCategory::Uninitialized);
        assert_eq!(frame.locals[1], ValueCategory::Int);
        assert!(frame.set_local(2, ValueCategory::Long).is_err());
    }

    #[test]
    fn test_merge_rules() {
        let program = Program::new();
        let left = Frame {
            locals: vec![ValueCategory::Int, ValueCategory::Null],
            stack: vec![ValueCategory::reference("java/lang/IllegalStateException")],
        };
        let right = Frame {
            locals: vec![ValueCategory::Float, ValueCategory::reference("demo/B")],
            stack: vec![ValueCategory::reference("java/lang/NullPointerException")],
        };
        let merged = left.merge(&right, &program).unwrap();
        assert_eq!(
            merged.locals,
            vec![ValueCategory::Uninitialized, ValueCategory::reference("demo/B")]
        );
        assert_eq!(
            merged.stack,
            vec![ValueCategory::reference("java/lang/RuntimeException")]
        );

        let conflict = Frame {
            locals: vec![],
            stack: vec![ValueCategory::Int],
        };
        assert!(matches!(
            left.merge(&conflict, &program),
            Err(AnalysisFailure::MergeConflict { .. })
        ));
        let taller = Frame {
            locals: vec![],
            stack: vec![ValueCategory::Int, ValueCategory::Int],
        };
        assert!(matches!(
            conflict.merge(&taller, &program),
            Err(AnalysisFailure::StackHeightMismatch { left: 1, right: 2 })
        ));
    }
}
