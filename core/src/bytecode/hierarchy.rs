//! Class relationships: the common-supertype oracle used by dataflow merges and the
//! assignability checks used by the interpreter.

use std::collections::HashSet;

use super::Program;

pub const OBJECT: &str = "java/lang/Object";
pub const THROWABLE: &str = "java/lang/Throwable";

/// Answers common-supertype queries during dataflow merges.
///
/// Implementations must not fail: when ancestry cannot be resolved they return
/// [`OBJECT`].
pub trait TypeOracle {
    fn common_supertype(&self, a: &str, b: &str) -> String;
}

/// Classes every program can use without declaring them.
const BUILTIN_SUPERS: &[(&str, Option<&str>)] = &[
    (OBJECT, None),
    ("java/lang/String", Some(OBJECT)),
    ("java/lang/Runnable", Some(OBJECT)),
    (THROWABLE, Some(OBJECT)),
    ("java/lang/Exception", Some(THROWABLE)),
    ("java/lang/Error", Some(THROWABLE)),
    ("java/lang/RuntimeException", Some("java/lang/Exception")),
    ("java/lang/IllegalArgumentException", Some("java/lang/RuntimeException")),
    ("java/lang/IllegalStateException", Some("java/lang/RuntimeException")),
    ("java/lang/NullPointerException", Some("java/lang/RuntimeException")),
    ("java/lang/ArithmeticException", Some("java/lang/RuntimeException")),
    ("java/lang/ClassCastException", Some("java/lang/RuntimeException")),
    ("java/lang/IndexOutOfBoundsException", Some("java/lang/RuntimeException")),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        Some("java/lang/IndexOutOfBoundsException"),
    ),
    ("java/lang/NegativeArraySizeException", Some("java/lang/RuntimeException")),
    ("corofy/Coro", Some(OBJECT)),
    ("corofy/Console", Some(OBJECT)),
];

/// Built-in types that behave as interfaces (never a superclass of anything).
const BUILTIN_INTERFACES: &[&str] = &["java/lang/Runnable"];

impl Program {
    /// Direct superclass of `name`, or `None` for the root and for unknown types.
    pub fn super_of(&self, name: &str) -> Option<String> {
        if name.starts_with('[') {
            return Some(OBJECT.to_string());
        }
        if let Some(class) = self.class(name) {
            return class.super_name.clone();
        }
        BUILTIN_SUPERS
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, s)| s.map(str::to_string))
    }

    pub fn is_known_type(&self, name: &str) -> bool {
        name.starts_with('[')
            || self.class(name).is_some()
            || BUILTIN_SUPERS.iter().any(|(n, _)| *n == name)
    }

    /// `name` followed by its superclasses, nearest first.
    pub fn superclass_chain(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut seen: HashSet<String> = chain.iter().cloned().collect();
        while let Some(parent) = chain.last().and_then(|c| self.super_of(c)) {
            if !seen.insert(parent.clone()) {
                break;
            }
            chain.push(parent);
        }
        chain
    }

    fn interfaces_of(&self, name: &str) -> Vec<String> {
        self.class(name)
            .map(|c| c.interfaces.clone())
            .unwrap_or_default()
    }

    /// Whether a value of runtime type `from` may be used where `to` is expected.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if from == to || to == OBJECT {
            return true;
        }
        if from.starts_with('[') || to.starts_with('[') {
            return false;
        }
        let mut pending: Vec<String> = self.superclass_chain(from);
        let mut seen = HashSet::new();
        while let Some(ty) = pending.pop() {
            if ty == to {
                return true;
            }
            if seen.insert(ty.clone()) {
                pending.extend(self.interfaces_of(&ty));
            }
        }
        false
    }
}

impl TypeOracle for Program {
    fn common_supertype(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if BUILTIN_INTERFACES.contains(&a) || BUILTIN_INTERFACES.contains(&b) {
            return OBJECT.to_string();
        }
        let ancestors: HashSet<String> = self.superclass_chain(a).into_iter().collect();
        self.superclass_chain(b)
            .into_iter()
            .find(|candidate| ancestors.contains(candidate))
            .unwrap_or_else(|| OBJECT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Class;

    fn program() -> Program {
        let mut program = Program::new();
        let mut animal = Class::new("zoo/Animal");
        animal.interfaces.push("java/lang/Runnable".into());
        program.insert(animal);
        let mut dog = Class::new("zoo/Dog");
        dog.super_name = Some("zoo/Animal".into());
        program.insert(dog);
        let mut cat = Class::new("zoo/Cat");
        cat.super_name = Some("zoo/Animal".into());
        program.insert(cat);
        program
    }

    #[test]
    fn test_common_supertype() {
        let program = program();
        assert_eq!(program.common_supertype("zoo/Dog", "zoo/Cat"), "zoo/Animal");
        assert_eq!(program.common_supertype("zoo/Dog", "zoo/Dog"), "zoo/Dog");
        assert_eq!(program.common_supertype("zoo/Dog", "java/lang/String"), OBJECT);
        assert_eq!(
            program.common_supertype("java/lang/IllegalArgumentException", "java/lang/NullPointerException"),
            "java/lang/RuntimeException"
        );
        // unknown types fall back to the root
        assert_eq!(program.common_supertype("zoo/Dog", "nowhere/Unknown"), OBJECT);
        assert_eq!(program.common_supertype("[I", "[J"), OBJECT);
    }

    #[test]
    fn test_assignability() {
        let program = program();
        assert!(program.is_assignable("zoo/Dog", "zoo/Animal"));
        assert!(program.is_assignable("zoo/Dog", "java/lang/Runnable"));
        assert!(!program.is_assignable("zoo/Animal", "zoo/Dog"));
        assert!(program.is_assignable(
            "java/lang/ArrayIndexOutOfBoundsException",
            "java/lang/RuntimeException"
        ));
        assert!(program.is_assignable("[I", OBJECT));
        assert!(!program.is_assignable("[I", "[J"));
    }
}
