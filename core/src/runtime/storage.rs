//! Typed storage stacks backing a suspended coroutine.

use super::value::{ObjRef, Value};
use crate::bytecode::Kind;
use crate::error::Invariant;

/// Saved reference. References to the owning coroutine are kept as `Own` so that a
/// suspended coroutine never holds a strong reference to itself.
#[derive(Clone)]
pub(crate) enum SavedRef {
    Value(Option<ObjRef>),
    Own,
}

/// Depth of each typed stack, used to delimit staging frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Marks {
    refs: usize,
    ints: usize,
    longs: usize,
    floats: usize,
    doubles: usize,
}

#[derive(Clone, Default)]
pub(crate) struct Storage {
    refs: Vec<SavedRef>,
    ints: Vec<i32>,
    longs: Vec<i64>,
    floats: Vec<f32>,
    doubles: Vec<f64>,
}

fn mismatch(kind: Kind, found: &Value) -> Invariant {
    Invariant::StorageTypeMismatch {
        kind,
        found: format!("{:?}", found),
    }
}

impl Storage {
    pub fn push_ref(&mut self, saved: SavedRef) {
        self.refs.push(saved);
    }

    /// Push a non-reference value.
    pub fn push_primitive(&mut self, value: &Value) -> Result<(), Invariant> {
        match *value {
            Value::Int(v) => self.ints.push(v),
            Value::Long(v) => self.longs.push(v),
            Value::Float(v) => self.floats.push(v),
            Value::Double(v) => self.doubles.push(v),
            ref other => return Err(mismatch(Kind::Int, other)),
        }
        Ok(())
    }

    pub fn pop_ref(&mut self) -> Result<SavedRef, Invariant> {
        self.refs
            .pop()
            .ok_or(Invariant::StorageUnderflow { kind: Kind::Ref })
    }

    pub fn pop_primitive(&mut self, kind: Kind) -> Result<Value, Invariant> {
        let value = match kind {
            Kind::Int => self.ints.pop().map(Value::Int),
            Kind::Long => self.longs.pop().map(Value::Long),
            Kind::Float => self.floats.pop().map(Value::Float),
            Kind::Double => self.doubles.pop().map(Value::Double),
            Kind::Ref => return Err(Invariant::StorageUnderflow { kind }),
        };
        value.ok_or(Invariant::StorageUnderflow { kind })
    }

    pub fn peek_ref(&self, depth: usize, floor: &Marks) -> Option<&SavedRef> {
        peek(&self.refs, depth, floor.refs)
    }

    pub fn peek_primitive(&self, kind: Kind, depth: usize, floor: &Marks) -> Option<Value> {
        match kind {
            Kind::Int => peek(&self.ints, depth, floor.ints).copied().map(Value::Int),
            Kind::Long => peek(&self.longs, depth, floor.longs).copied().map(Value::Long),
            Kind::Float => peek(&self.floats, depth, floor.floats).copied().map(Value::Float),
            Kind::Double => peek(&self.doubles, depth, floor.doubles).copied().map(Value::Double),
            Kind::Ref => None,
        }
    }

    pub fn marks(&self) -> Marks {
        Marks {
            refs: self.refs.len(),
            ints: self.ints.len(),
            longs: self.longs.len(),
            floats: self.floats.len(),
            doubles: self.doubles.len(),
        }
    }

    /// Drop everything above `marks`.
    pub fn truncate(&mut self, marks: &Marks) {
        self.refs.truncate(marks.refs);
        self.ints.truncate(marks.ints);
        self.longs.truncate(marks.longs);
        self.floats.truncate(marks.floats);
        self.doubles.truncate(marks.doubles);
    }

    /// Move everything above `marks` onto `target`, preserving order.
    pub fn move_above(&mut self, marks: &Marks, target: &mut Storage) {
        target.refs.extend(self.refs.drain(marks.refs.min(self.refs.len())..));
        target.ints.extend(self.ints.drain(marks.ints.min(self.ints.len())..));
        target.longs.extend(self.longs.drain(marks.longs.min(self.longs.len())..));
        target.floats.extend(self.floats.drain(marks.floats.min(self.floats.len())..));
        target
            .doubles
            .extend(self.doubles.drain(marks.doubles.min(self.doubles.len())..));
    }

    pub fn depth(&self, kind: Kind) -> usize {
        match kind {
            Kind::Ref => self.refs.len(),
            Kind::Int => self.ints.len(),
            Kind::Long => self.longs.len(),
            Kind::Float => self.floats.len(),
            Kind::Double => self.doubles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Kind::ALL.iter().all(|k| self.depth(*k) == 0)
    }
}

/// Element `depth` positions below the top, not reaching under `floor`.
fn peek<T>(stack: &[T], depth: usize, floor: usize) -> Option<&T> {
    let index = stack.len().checked_sub(depth + 1)?;
    if index < floor {
        return None;
    }
    stack.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_stacks_are_independent() {
        let mut storage = Storage::default();
        storage.push_primitive(&Value::Int(1)).unwrap();
        storage.push_primitive(&Value::Long(2)).unwrap();
        storage.push_primitive(&Value::Int(3)).unwrap();
        assert_eq!(storage.pop_primitive(Kind::Long).unwrap(), Value::Long(2));
        assert_eq!(storage.pop_primitive(Kind::Int).unwrap(), Value::Int(3));
        assert_eq!(storage.pop_primitive(Kind::Int).unwrap(), Value::Int(1));
        assert_eq!(
            storage.pop_primitive(Kind::Int),
            Err(Invariant::StorageUnderflow { kind: Kind::Int })
        );
        assert!(storage.push_primitive(&Value::Top).is_err());
    }

    #[test]
    fn test_marks_peek_and_move() {
        let mut staging = Storage::default();
        staging.push_primitive(&Value::Int(9)).unwrap();
        let floor = staging.marks();
        staging.push_primitive(&Value::Int(10)).unwrap();
        staging.push_primitive(&Value::Double(1.5)).unwrap();
        staging.push_primitive(&Value::Int(11)).unwrap();

        assert_eq!(staging.peek_primitive(Kind::Int, 0, &floor), Some(Value::Int(11)));
        assert_eq!(staging.peek_primitive(Kind::Int, 1, &floor), Some(Value::Int(10)));
        assert_eq!(staging.peek_primitive(Kind::Int, 2, &floor), None);

        let mut main = Storage::default();
        staging.move_above(&floor, &mut main);
        assert_eq!(main.depth(Kind::Int), 2);
        assert_eq!(main.depth(Kind::Double), 1);
        assert_eq!(main.pop_primitive(Kind::Int).unwrap(), Value::Int(11));
        assert_eq!(staging.marks(), floor);
    }
}
