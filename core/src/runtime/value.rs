//! Run-time values and heap objects.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Coro;
use crate::bytecode::{FieldType, Kind, OBJECT};

pub type ObjRef = Arc<Obj>;

/// One local slot or operand-stack entry.
#[derive(Clone)]
pub enum Value {
    /// Empty slot, or the upper half of a long/double local.
    Top,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Option<ObjRef>),
}

impl Value {
    pub fn null() -> Value {
        Value::Ref(None)
    }

    pub fn obj(obj: ObjRef) -> Value {
        Value::Ref(Some(obj))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::obj(Obj::string(s))
    }

    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Top => None,
            Value::Int(_) => Some(Kind::Int),
            Value::Long(_) => Some(Kind::Long),
            Value::Float(_) => Some(Kind::Float),
            Value::Double(_) => Some(Kind::Double),
            Value::Ref(_) => Some(Kind::Ref),
        }
    }

    /// Stack-entry width (longs and doubles count double for `pop2`/`dup2`).
    pub fn width(&self) -> usize {
        self.kind().map(Kind::width).unwrap_or(1)
    }

    /// Zero value of a storage kind.
    pub fn zero(kind: Kind) -> Value {
        match kind {
            Kind::Int => Value::Int(0),
            Kind::Long => Value::Long(0),
            Kind::Float => Value::Float(0.0),
            Kind::Double => Value::Double(0.0),
            Kind::Ref => Value::Ref(None),
        }
    }

    /// Zero value for a field descriptor; unknown descriptors default to null.
    pub fn default_for(desc: &str) -> Value {
        FieldType::parse(desc)
            .map(|ty| Value::zero(ty.kind()))
            .unwrap_or(Value::Ref(None))
    }

    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Ref(Some(obj)) => Some(obj),
            _ => None,
        }
    }

    /// Reference identity; two nulls are the same reference.
    pub fn same_ref(a: &Option<ObjRef>, b: &Option<ObjRef>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => Arc::ptr_eq(x, y) || x.same_coro(y),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Top, Value::Top) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => Value::same_ref(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Top => write!(f, "top"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{:?}f", v),
            Value::Double(v) => write!(f, "{:?}d", v),
            Value::Ref(None) => write!(f, "null"),
            Value::Ref(Some(obj)) => write!(f, "{:?}", obj),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Top => write!(f, "top"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::Ref(None) => write!(f, "null"),
            Value::Ref(Some(obj)) => write!(f, "{}", obj),
        }
    }
}

/* ===================== Heap Objects ===================== */

pub enum Obj {
    Instance {
        class: String,
        fields: Mutex<HashMap<String, Value>>,
    },
    Str(String),
    Array {
        /// Array descriptor, e.g. `[I`.
        desc: String,
        elems: Mutex<Vec<Value>>,
    },
    Coro(Arc<Coro>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Obj {
    pub fn instance(class: impl Into<String>) -> ObjRef {
        Arc::new(Obj::Instance {
            class: class.into(),
            fields: Mutex::new(HashMap::new()),
        })
    }

    pub fn string(s: impl Into<String>) -> ObjRef {
        Arc::new(Obj::Str(s.into()))
    }

    pub fn array(elem_desc: &str, len: usize) -> ObjRef {
        let zero = Value::default_for(elem_desc);
        Arc::new(Obj::Array {
            desc: format!("[{}", elem_desc),
            elems: Mutex::new(vec![zero; len]),
        })
    }

    pub fn coro(coro: Arc<Coro>) -> ObjRef {
        Arc::new(Obj::Coro(coro))
    }

    /// Runtime class name.
    pub fn class_name(&self) -> &str {
        match self {
            Obj::Instance { class, .. } => class,
            Obj::Str(_) => "java/lang/String",
            Obj::Array { desc, .. } => desc,
            Obj::Coro(_) => super::abi::CORO_CLASS,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Obj::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_coro(&self) -> Option<&Arc<Coro>> {
        match self {
            Obj::Coro(c) => Some(c),
            _ => None,
        }
    }

    /// Two wrappers of the same coroutine are the same reference.
    fn same_coro(&self, other: &Obj) -> bool {
        match (self, other) {
            (Obj::Coro(a), Obj::Coro(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Field value, or the zero value of `desc` when never written.
    pub fn get_field(&self, name: &str, desc: &str) -> Option<Value> {
        match self {
            Obj::Instance { fields, .. } => Some(
                lock(fields)
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(desc)),
            ),
            _ => None,
        }
    }

    /// Returns `false` when the object has no fields.
    pub fn set_field(&self, name: &str, value: Value) -> bool {
        match self {
            Obj::Instance { fields, .. } => {
                lock(fields).insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn array_len(&self) -> Option<usize> {
        match self {
            Obj::Array { elems, .. } => Some(lock(elems).len()),
            _ => None,
        }
    }

    pub fn array_get(&self, index: i32) -> Option<Option<Value>> {
        match self {
            Obj::Array { elems, .. } => Some(
                usize::try_from(index)
                    .ok()
                    .and_then(|i| lock(elems).get(i).cloned()),
            ),
            _ => None,
        }
    }

    /// `None` when not an array, `Some(false)` when out of bounds.
    pub fn array_set(&self, index: i32, value: Value) -> Option<bool> {
        match self {
            Obj::Array { elems, .. } => {
                let mut elems = lock(elems);
                match usize::try_from(index).ok().and_then(|i| elems.get_mut(i)) {
                    Some(slot) => {
                        *slot = value;
                        Some(true)
                    }
                    None => Some(false),
                }
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => write!(f, "{:?}", s),
            Obj::Coro(c) => write!(f, "Coro#{}", c.id()),
            other => write!(f, "{}@{:p}", other.class_name(), other),
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => write!(f, "{}", s),
            Obj::Coro(c) => write!(f, "Coro#{}", c.id()),
            Obj::Instance { class, .. } if class != OBJECT => {
                match self.get_field("message", "Ljava/lang/String;") {
                    Some(Value::Ref(Some(msg))) => write!(f, "{}: {}", class, msg),
                    _ => write!(f, "{}@{:p}", class, self),
                }
            }
            other => write!(f, "{}@{:p}", other.class_name(), other),
        }
    }
}
