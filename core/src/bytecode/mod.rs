//! Program model: classes, methods, exception tables and instructions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod descriptor;
pub mod hierarchy;
pub mod insn;

pub use descriptor::{FieldType, MethodDesc};
pub use hierarchy::{TypeOracle, OBJECT, THROWABLE};
pub use insn::{ArithOp, CompareOp, Cond, Insn, InvokeKind, Kind};

/* ===================== Identifiers ===================== */

/// Symbolic code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identity of a method: owner type, name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MethodId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// Parse `owner.name(desc)ret`, the format produced by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        let paren = text.find('(')?;
        let (qualified, desc) = text.split_at(paren);
        let dot = qualified.rfind('.')?;
        let (owner, name) = (&qualified[..dot], &qualified[dot + 1..]);
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(owner, name, desc))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

/* ===================== Method Body ===================== */

/// Protected range `[start, end)` whose exceptions of `catch_type` go to `handler`.
/// `catch_type == None` catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_type: Option<String>,
}

/// Local-variable range hint: `slot` holds a value of `desc` within `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub slot: u16,
    pub name: String,
    pub desc: String,
    pub start: Label,
    pub end: Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub is_static: bool,
    pub max_locals: u16,
    pub code: Vec<Insn>,
    #[serde(default)]
    pub try_catches: Vec<TryCatch>,
    #[serde(default)]
    pub local_vars: Vec<LocalVar>,
}

impl Method {
    pub fn id(&self, owner: &str) -> MethodId {
        MethodId::new(owner, &self.name, &self.desc)
    }

    /// First label number not used by the code, the exception table or the hints.
    pub fn next_label(&self) -> u32 {
        let code = self.code.iter().flat_map(|insn| {
            insn.as_label()
                .into_iter()
                .chain(insn.branch_targets())
                .collect::<Vec<_>>()
        });
        let tables = self
            .try_catches
            .iter()
            .flat_map(|tc| [tc.start, tc.end, tc.handler])
            .chain(self.local_vars.iter().flat_map(|lv| [lv.start, lv.end]));
        code.chain(tables).map(|l| l.0 + 1).max().unwrap_or(0)
    }

    /// Smallest `max_locals` that covers the parameters and every local access.
    pub fn required_locals(&self) -> u16 {
        let params = MethodDesc::parse(&self.desc)
            .map(|d| d.param_slots())
            .unwrap_or(0)
            + usize::from(!self.is_static);
        let accessed = self
            .code
            .iter()
            .filter_map(|insn| match insn {
                Insn::Load(k, slot) | Insn::Store(k, slot) => Some(*slot as usize + k.width()),
                Insn::Iinc(slot, _) | Insn::Ret(slot) => Some(*slot as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        params.max(accessed) as u16
    }
}

/* ===================== Classes ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: Some(OBJECT.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn method(&self, name: &str, desc: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.desc == desc)
    }
}

/// A set of classes rewritten and executed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub classes: BTreeMap<String, Class>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: Class) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    pub fn method(&self, id: &MethodId) -> Option<&Method> {
        self.class(&id.owner)?.method(&id.name, &id.desc)
    }

    /// Every method of the program, with its identity.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &Method)> {
        self.classes
            .values()
            .flat_map(|c| c.methods.iter().map(move |m| (m.id(&c.name), m)))
    }
}
