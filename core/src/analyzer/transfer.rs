//! Effect of a single instruction on an abstract frame.

use crate::bytecode::{FieldType, Insn, Kind, MethodDesc, OBJECT};
use crate::error::AnalysisFailure;
use crate::frame::{Frame, ValueCategory};

fn field_category(desc: &str) -> Result<ValueCategory, AnalysisFailure> {
    FieldType::parse(desc)
        .map(|ty| ValueCategory::from(&ty))
        .map_err(|e| AnalysisFailure::BadDescriptor(e.0))
}

fn pop_reference(frame: &mut Frame) -> Result<ValueCategory, AnalysisFailure> {
    frame.pop_kind(Kind::Ref)
}

fn pop_narrow(frame: &mut Frame) -> Result<ValueCategory, AnalysisFailure> {
    let value = frame.pop()?;
    if value.width() == 1 {
        Ok(value)
    } else {
        Err(AnalysisFailure::TypeMismatch {
            expected: "single-width value".to_string(),
            found: value,
        })
    }
}

/// Element category of an array reference (`[I` -> int).
fn component_of(array: &ValueCategory, kind: Kind) -> ValueCategory {
    match (kind, array.type_name()) {
        (Kind::Ref, Some(name)) if name.starts_with('[') => FieldType::parse(&name[1..])
            .map(|ty| ValueCategory::from(&ty))
            .unwrap_or_else(|_| ValueCategory::reference(OBJECT)),
        _ => ValueCategory::of_kind(kind),
    }
}

/// Apply `insn` to `frame`.
pub fn execute(frame: &mut Frame, insn: &Insn) -> Result<(), AnalysisFailure> {
    match insn {
        Insn::Label(_) | Insn::Nop | Insn::Goto(_) => {}

        Insn::AConstNull => frame.push(ValueCategory::Null),
        Insn::IConst(_) => frame.push(ValueCategory::Int),
        Insn::LConst(_) => frame.push(ValueCategory::Long),
        Insn::FConst(_) => frame.push(ValueCategory::Float),
        Insn::DConst(_) => frame.push(ValueCategory::Double),
        Insn::Ldc(_) => frame.push(ValueCategory::reference("java/lang/String")),

        Insn::Load(kind, slot) => {
            let value = frame.local(*slot)?.clone();
            if !value.matches_kind(*kind) {
                return Err(AnalysisFailure::TypeMismatch {
                    expected: kind.to_string(),
                    found: value,
                });
            }
            frame.push(value);
        }
        Insn::Store(kind, slot) => {
            let value = frame.pop_kind(*kind)?;
            frame.set_local(*slot, value)?;
        }
        Insn::Iinc(slot, _) => {
            let value = frame.local(*slot)?;
            if *value != ValueCategory::Int {
                return Err(AnalysisFailure::TypeMismatch {
                    expected: Kind::Int.to_string(),
                    found: value.clone(),
                });
            }
        }

        Insn::Arith(_, kind) => {
            frame.pop_kind(*kind)?;
            frame.pop_kind(*kind)?;
            frame.push(ValueCategory::of_kind(*kind));
        }
        Insn::Neg(kind) => {
            frame.pop_kind(*kind)?;
            frame.push(ValueCategory::of_kind(*kind));
        }
        Insn::Convert(from, to) => {
            frame.pop_kind(*from)?;
            frame.push(ValueCategory::of_kind(*to));
        }
        Insn::Compare(op) => {
            frame.pop_kind(op.operand_kind())?;
            frame.pop_kind(op.operand_kind())?;
            frame.push(ValueCategory::Int);
        }

        Insn::If(_, _) | Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
            frame.pop_kind(Kind::Int)?;
        }
        Insn::IfICmp(_, _) => {
            frame.pop_kind(Kind::Int)?;
            frame.pop_kind(Kind::Int)?;
        }
        Insn::IfACmpEq(_) | Insn::IfACmpNe(_) => {
            pop_reference(frame)?;
            pop_reference(frame)?;
        }
        Insn::IfNull(_) | Insn::IfNonNull(_) => {
            pop_reference(frame)?;
        }
        Insn::Jsr(_) | Insn::Ret(_) => return Err(AnalysisFailure::Subroutine),
        Insn::Return(kind) => {
            if let Some(kind) = kind {
                frame.pop_kind(*kind)?;
            }
        }
        Insn::AThrow => {
            pop_reference(frame)?;
        }

        Insn::GetStatic(field) => frame.push(field_category(&field.desc)?),
        Insn::PutStatic(field) => {
            let kind = field_category(&field.desc)?.kind().unwrap_or(Kind::Ref);
            frame.pop_kind(kind)?;
        }
        Insn::GetField(field) => {
            pop_reference(frame)?;
            frame.push(field_category(&field.desc)?);
        }
        Insn::PutField(field) => {
            let kind = field_category(&field.desc)?.kind().unwrap_or(Kind::Ref);
            frame.pop_kind(kind)?;
            pop_reference(frame)?;
        }
        Insn::Invoke(kind, method) => {
            let desc = MethodDesc::parse(&method.desc)
                .map_err(|e| AnalysisFailure::BadDescriptor(e.0))?;
            for param in desc.params.iter().rev() {
                frame.pop_kind(param.kind())?;
            }
            if kind.has_receiver() {
                pop_reference(frame)?;
            }
            if let Some(ret) = &desc.ret {
                frame.push(ValueCategory::from(ret));
            }
        }
        Insn::New(type_name) => frame.push(ValueCategory::reference(type_name.clone())),
        Insn::NewArray(elem) => {
            FieldType::parse(elem).map_err(|e| AnalysisFailure::BadDescriptor(e.0))?;
            frame.pop_kind(Kind::Int)?;
            frame.push(ValueCategory::reference(format!("[{}", elem)));
        }
        Insn::ArrayLength => {
            pop_reference(frame)?;
            frame.push(ValueCategory::Int);
        }
        Insn::ArrayLoad(kind) => {
            frame.pop_kind(Kind::Int)?;
            let array = pop_reference(frame)?;
            frame.push(component_of(&array, *kind));
        }
        Insn::ArrayStore(kind) => {
            frame.pop_kind(*kind)?;
            frame.pop_kind(Kind::Int)?;
            pop_reference(frame)?;
        }
        Insn::CheckCast(type_name) => {
            let value = pop_reference(frame)?;
            if value == ValueCategory::Null {
                frame.push(ValueCategory::Null);
            } else {
                frame.push(ValueCategory::reference(type_name.clone()));
            }
        }
        Insn::InstanceOf(_) => {
            pop_reference(frame)?;
            frame.push(ValueCategory::Int);
        }

        Insn::Pop => {
            pop_narrow(frame)?;
        }
        Insn::Pop2 => {
            if frame.peek()?.width() == 2 {
                frame.pop()?;
            } else {
                pop_narrow(frame)?;
                pop_narrow(frame)?;
            }
        }
        Insn::Dup => {
            let top = pop_narrow(frame)?;
            frame.push(top.clone());
            frame.push(top);
        }
        Insn::DupX1 => {
            let v1 = pop_narrow(frame)?;
            let v2 = pop_narrow(frame)?;
            frame.push(v1.clone());
            frame.push(v2);
            frame.push(v1);
        }
        Insn::Dup2 => {
            if frame.peek()?.width() == 2 {
                let top = frame.pop()?;
                frame.push(top.clone());
                frame.push(top);
            } else {
                let v1 = pop_narrow(frame)?;
                let v2 = pop_narrow(frame)?;
                frame.push(v2.clone());
                frame.push(v1.clone());
                frame.push(v2);
                frame.push(v1);
            }
        }
        Insn::Swap => {
            let v1 = pop_narrow(frame)?;
            let v2 = pop_narrow(frame)?;
            frame.push(v1);
            frame.push(v2);
        }
    }
    Ok(())
}
