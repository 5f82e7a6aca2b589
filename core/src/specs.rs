//! Restore-point declarations.
//!
//! A [`SpecTable`] lists, per method pattern, the call sites that may suspend the
//! running coroutine. Tables are plain data (TOML or JSON) and can also be built from
//! `.await` directives in assembly sources.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bytecode::MethodId;

/* ===================== Restore Point Patterns ===================== */

fn default_patchable() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Pattern a call site must match to count as a restore point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestorePointSpec {
    /// Callee name, always required.
    pub name: String,
    /// Callee descriptor; empty matches any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Callee owner type; empty matches any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Whether the callee's own body is rewritten.
    #[serde(default = "default_patchable", skip_serializing_if = "is_true")]
    pub patchable: bool,
}

impl RestorePointSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            owner: String::new(),
            patchable: true,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn unpatchable(mut self) -> Self {
        self.patchable = false;
        self
    }

    pub fn matches(&self, callee: &MethodId) -> bool {
        self.name == callee.name
            && (self.desc.is_empty() || self.desc == callee.desc)
            && (self.owner.is_empty() || self.owner == callee.owner)
    }

    /// Number of optional fields pinned down by this pattern.
    pub fn specificity(&self) -> u8 {
        u8::from(!self.owner.is_empty()) + u8::from(!self.desc.is_empty())
    }
}

/// The spec deciding how `callee` is treated: the most specific match, ties going to
/// the one listed first.
pub fn select<'a>(specs: &'a [RestorePointSpec], callee: &MethodId) -> Option<&'a RestorePointSpec> {
    specs
        .iter()
        .filter(|spec| spec.matches(callee))
        .fold(None, |best: Option<&RestorePointSpec>, spec| match best {
            Some(b) if b.specificity() >= spec.specificity() => Some(b),
            _ => Some(spec),
        })
}

/* ===================== Provider ===================== */

/// Supplies restore-point declarations to the analyzer.
pub trait SpecProvider {
    /// Declared restore points of `method`, `None` when it declares nothing.
    fn restore_points(&self, method: &MethodId) -> Option<Vec<RestorePointSpec>>;

    /// Whether `method` is the root entry of a coroutine.
    fn is_entry(&self, method: &MethodId) -> bool;
}

/* ===================== Table ===================== */

fn default_entry_names() -> Vec<String> {
    vec!["run".to_string()]
}

/// Declarations attached to the methods matching `owner.name[desc]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub owner: String,
    pub name: String,
    /// Empty applies to every overload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Overrides the table's `entry_names` rule for this method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<bool>,
    #[serde(default)]
    pub restore_points: Vec<RestorePointSpec>,
}

impl MethodDecl {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: String::new(),
            entry: None,
            restore_points: Vec::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn entry(mut self, entry: bool) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn restore_point(mut self, spec: RestorePointSpec) -> Self {
        self.restore_points.push(spec);
        self
    }

    pub fn applies_to(&self, method: &MethodId) -> bool {
        self.owner == method.owner
            && self.name == method.name
            && (self.desc.is_empty() || self.desc == method.desc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecTable {
    /// Method names treated as coroutine entries unless a declaration says otherwise;
    /// `None` means the built-in default (`run`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_names: Option<Vec<String>>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl SpecTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: MethodDecl) -> &mut Self {
        self.methods.push(decl);
        self
    }

    pub fn with_entry_names(mut self, names: Vec<String>) -> Self {
        self.entry_names = Some(names);
        self
    }

    /// Entry names in effect.
    pub fn entry_names(&self) -> Vec<String> {
        self.entry_names.clone().unwrap_or_else(default_entry_names)
    }

    /// Append the declarations of `other`. Entry names are merged only when `other`
    /// lists them.
    pub fn extend(&mut self, other: SpecTable) {
        if let Some(names) = other.entry_names {
            let own = self.entry_names.get_or_insert_with(default_entry_names);
            for name in names {
                if !own.contains(&name) {
                    own.push(name);
                }
            }
        }
        self.methods.extend(other.methods);
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid restore point table (TOML)")
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source).context("invalid restore point table (JSON)")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize restore point table")
    }

    /// Load a table, choosing the format by file extension (`.json`, otherwise TOML).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_toml_str(&source)
        }
        .with_context(|| format!("in {}", path.display()))
    }
}

impl SpecProvider for SpecTable {
    fn restore_points(&self, method: &MethodId) -> Option<Vec<RestorePointSpec>> {
        let mut declared = self
            .methods
            .iter()
            .filter(|decl| decl.applies_to(method))
            .peekable();
        declared.peek()?;
        Some(
            declared
                .flat_map(|decl| decl.restore_points.iter().cloned())
                .collect(),
        )
    }

    fn is_entry(&self, method: &MethodId) -> bool {
        self.methods
            .iter()
            .filter(|decl| decl.applies_to(method))
            .find_map(|decl| decl.entry)
            .unwrap_or_else(|| match &self.entry_names {
                Some(names) => names.iter().any(|n| *n == method.name),
                None => default_entry_names().contains(&method.name),
            })
    }
}
