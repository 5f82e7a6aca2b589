//! Typed code generation for saving and restoring one value.
//!
//! Every save/restore decision that depends on a value's category goes through a
//! [`TypedAccessor`], one implementation per storage kind.

use crate::bytecode::{Insn, Kind, OBJECT};
use crate::frame::ValueCategory;
use crate::runtime::abi;

pub trait TypedAccessor: Sync {
    fn kind(&self) -> Kind;

    /// Zero value pushed in place of an argument or returned by an unwinding frame.
    fn default_value(&self) -> Insn;

    fn load(&self, slot: u16) -> Insn {
        Insn::Load(self.kind(), slot)
    }

    fn store(&self, slot: u16) -> Insn {
        Insn::Store(self.kind(), slot)
    }

    /// Drop a value of this kind from the operand stack.
    fn discard(&self) -> Insn {
        match self.kind().width() {
            2 => Insn::Pop2,
            _ => Insn::Pop,
        }
    }

    /// Move the top of the operand stack into main storage.
    fn push(&self) -> Vec<Insn> {
        vec![Insn::invoke_static(abi::push(self.kind()))]
    }

    /// Push the top of main storage onto the operand stack as `category`.
    fn pop(&self, _category: &ValueCategory) -> Vec<Insn> {
        vec![Insn::invoke_static(abi::pop(self.kind()))]
    }

    /// Move the top of the operand stack into the current staging frame.
    fn stage(&self) -> Vec<Insn> {
        vec![Insn::invoke_static(abi::stage(self.kind()))]
    }

    /// Copy the staged value `depth` positions below the top of its typed stack.
    fn peek_staged(&self, depth: usize, _category: &ValueCategory) -> Vec<Insn> {
        vec![
            Insn::IConst(depth as i32),
            Insn::invoke_static(abi::peek_staged(self.kind())),
        ]
    }
}

pub struct IntAccessor;
pub struct LongAccessor;
pub struct FloatAccessor;
pub struct DoubleAccessor;
pub struct RefAccessor;

impl TypedAccessor for IntAccessor {
    fn kind(&self) -> Kind {
        Kind::Int
    }

    fn default_value(&self) -> Insn {
        Insn::IConst(0)
    }
}

impl TypedAccessor for LongAccessor {
    fn kind(&self) -> Kind {
        Kind::Long
    }

    fn default_value(&self) -> Insn {
        Insn::LConst(0)
    }
}

impl TypedAccessor for FloatAccessor {
    fn kind(&self) -> Kind {
        Kind::Float
    }

    fn default_value(&self) -> Insn {
        Insn::FConst(0.0)
    }
}

impl TypedAccessor for DoubleAccessor {
    fn kind(&self) -> Kind {
        Kind::Double
    }

    fn default_value(&self) -> Insn {
        Insn::DConst(0.0)
    }
}

/// Storage hands references back as `Object`; restoring casts them to the frame type.
fn cast_to(category: &ValueCategory) -> Option<Insn> {
    match category.type_name() {
        Some(name) if name != OBJECT => Some(Insn::CheckCast(name.to_string())),
        _ => None,
    }
}

impl TypedAccessor for RefAccessor {
    fn kind(&self) -> Kind {
        Kind::Ref
    }

    fn default_value(&self) -> Insn {
        Insn::AConstNull
    }

    fn pop(&self, category: &ValueCategory) -> Vec<Insn> {
        let mut code = vec![Insn::invoke_static(abi::pop(Kind::Ref))];
        code.extend(cast_to(category));
        code
    }

    fn peek_staged(&self, depth: usize, category: &ValueCategory) -> Vec<Insn> {
        let mut code = vec![
            Insn::IConst(depth as i32),
            Insn::invoke_static(abi::peek_staged(Kind::Ref)),
        ];
        code.extend(cast_to(category));
        code
    }
}

pub fn accessor(kind: Kind) -> &'static dyn TypedAccessor {
    match kind {
        Kind::Int => &IntAccessor,
        Kind::Long => &LongAccessor,
        Kind::Float => &FloatAccessor,
        Kind::Double => &DoubleAccessor,
        Kind::Ref => &RefAccessor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_restore_casts_to_frame_type() {
        let code = accessor(Kind::Ref).pop(&ValueCategory::reference("java/lang/String"));
        assert_eq!(
            code,
            vec![
                Insn::invoke_static(abi::pop(Kind::Ref)),
                Insn::CheckCast("java/lang/String".into()),
            ]
        );
        // no cast needed for Object
        assert_eq!(
            accessor(Kind::Ref).pop(&ValueCategory::reference(OBJECT)).len(),
            1
        );
    }

    #[test]
    fn test_wide_kinds_discard_with_pop2() {
        assert_eq!(accessor(Kind::Long).discard(), Insn::Pop2);
        assert_eq!(accessor(Kind::Double).discard(), Insn::Pop2);
        assert_eq!(accessor(Kind::Float).discard(), Insn::Pop);
        assert_eq!(accessor(Kind::Double).default_value(), Insn::DConst(0.0));
    }

    #[test]
    fn test_peek_staged_passes_depth() {
        let code = accessor(Kind::Int).peek_staged(2, &ValueCategory::Int);
        assert_eq!(code[0], Insn::IConst(2));
        assert_eq!(code[1], Insn::invoke_static(abi::peek_staged(Kind::Int)));
    }
}
