//! Execution loop for one method activation.

use std::collections::HashMap;

use super::{fault, NativeResult, Vm};
use crate::analyzer::label_positions;
use crate::bytecode::{ArithOp, CompareOp, Insn, Kind, Label, Method, MethodDesc};
use crate::runtime::{Obj, ObjRef, Throw, Value};

/// Outcome of one instruction.
enum Step {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

/// Locals and operand stack of one activation.
struct Activation {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Activation {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Throw> {
        self.stack
            .pop()
            .ok_or_else(|| fault("operand stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i32, Throw> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(ill_typed(Kind::Int, &other)),
        }
    }

    fn pop_ref(&mut self) -> Result<Option<ObjRef>, Throw> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            other => Err(ill_typed(Kind::Ref, &other)),
        }
    }

    fn local(&self, slot: u16) -> Result<&Value, Throw> {
        self.locals
            .get(slot as usize)
            .ok_or_else(|| fault(format!("local {} is outside the frame", slot)))
    }

    fn set_local(&mut self, slot: u16, value: Value) -> Result<(), Throw> {
        let slot = slot as usize;
        let width = value.width();
        if slot + width > self.locals.len() {
            return Err(fault(format!("local {} is outside the frame", slot)));
        }
        self.locals[slot] = value;
        if width == 2 {
            self.locals[slot + 1] = Value::Top;
        }
        Ok(())
    }
}

fn ill_typed(expected: Kind, found: &Value) -> Throw {
    fault(format!("expected {} operand, found {:?}", expected, found))
}

/// Lay out arguments in local slots; longs and doubles take two.
fn entry_locals(method: &Method, args: Vec<Value>) -> Vec<Value> {
    let mut locals = Vec::with_capacity(method.max_locals as usize);
    for arg in args {
        let width = arg.width();
        locals.push(arg);
        if width == 2 {
            locals.push(Value::Top);
        }
    }
    if locals.len() < method.max_locals as usize {
        locals.resize(method.max_locals as usize, Value::Top);
    }
    locals
}

impl Vm {
    /// Run `method` with `args` (receiver first for instance methods).
    pub(super) fn execute(&self, method: &Method, args: Vec<Value>) -> NativeResult {
        let labels = label_positions(&method.code);
        let mut frame = Activation {
            locals: entry_locals(method, args),
            stack: Vec::new(),
        };

        let mut pc = 0;
        loop {
            let insn = method
                .code
                .get(pc)
                .ok_or_else(|| fault(format!("control fell off the end of {}", method.name)))?;
            match self.step(&mut frame, insn) {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(label)) => pc = position(&labels, label)?,
                Ok(Step::Return(value)) => return Ok(value),
                Err(Throw::Exception(exception)) => {
                    let Some(handler) = self.find_handler(method, pc, &exception, &labels)? else {
                        return Err(Throw::Exception(exception));
                    };
                    frame.stack.clear();
                    frame.push(Value::obj(exception));
                    pc = handler;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// First handler in table order that covers `pc` and accepts `exception`.
    fn find_handler(
        &self,
        method: &Method,
        pc: usize,
        exception: &ObjRef,
        labels: &HashMap<Label, usize>,
    ) -> Result<Option<usize>, Throw> {
        for tc in &method.try_catches {
            let (start, end) = (position(labels, tc.start)?, position(labels, tc.end)?);
            if pc < start || pc >= end {
                continue;
            }
            let accepts = match &tc.catch_type {
                None => true,
                Some(ty) => self.program.is_assignable(exception.class_name(), ty),
            };
            if accepts {
                return position(labels, tc.handler).map(Some);
            }
        }
        Ok(None)
    }

    fn step(&self, frame: &mut Activation, insn: &Insn) -> Result<Step, Throw> {
        match insn {
            Insn::Label(_) | Insn::Nop => {}

            /* ===== Constants ===== */
            Insn::AConstNull => frame.push(Value::null()),
            Insn::IConst(v) => frame.push(Value::Int(*v)),
            Insn::LConst(v) => frame.push(Value::Long(*v)),
            Insn::FConst(v) => frame.push(Value::Float(*v)),
            Insn::DConst(v) => frame.push(Value::Double(*v)),
            Insn::Ldc(s) => frame.push(Value::string(s.clone())),

            /* ===== Locals ===== */
            Insn::Load(kind, slot) => {
                let value = frame.local(*slot)?.clone();
                if value.kind() != Some(*kind) {
                    return Err(ill_typed(*kind, &value));
                }
                frame.push(value);
            }
            Insn::Store(kind, slot) => {
                let value = frame.pop()?;
                if value.kind() != Some(*kind) {
                    return Err(ill_typed(*kind, &value));
                }
                frame.set_local(*slot, value)?;
            }
            Insn::Iinc(slot, delta) => match frame.local(*slot)?.clone() {
                Value::Int(v) => frame.set_local(*slot, Value::Int(v.wrapping_add(*delta)))?,
                other => return Err(ill_typed(Kind::Int, &other)),
            },

            /* ===== Arithmetic ===== */
            Insn::Arith(op, kind) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(self.arith(*op, *kind, a, b)?);
            }
            Insn::Neg(kind) => {
                let value = match frame.pop()? {
                    Value::Int(v) if *kind == Kind::Int => Value::Int(v.wrapping_neg()),
                    Value::Long(v) if *kind == Kind::Long => Value::Long(v.wrapping_neg()),
                    Value::Float(v) if *kind == Kind::Float => Value::Float(-v),
                    Value::Double(v) if *kind == Kind::Double => Value::Double(-v),
                    other => return Err(ill_typed(*kind, &other)),
                };
                frame.push(value);
            }
            Insn::Convert(from, to) => {
                let value = frame.pop()?;
                frame.push(convert(*from, *to, value)?);
            }
            Insn::Compare(op) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(Value::Int(compare(*op, a, b)?));
            }

            /* ===== Control flow ===== */
            Insn::If(cond, target) => {
                if cond.test(frame.pop_int()?, 0) {
                    return Ok(Step::Jump(*target));
                }
            }
            Insn::IfICmp(cond, target) => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if cond.test(a, b) {
                    return Ok(Step::Jump(*target));
                }
            }
            Insn::IfACmpEq(target) | Insn::IfACmpNe(target) => {
                let b = frame.pop_ref()?;
                let a = frame.pop_ref()?;
                let same = Value::same_ref(&a, &b);
                if same == matches!(insn, Insn::IfACmpEq(_)) {
                    return Ok(Step::Jump(*target));
                }
            }
            Insn::IfNull(target) | Insn::IfNonNull(target) => {
                let is_null = frame.pop_ref()?.is_none();
                if is_null == matches!(insn, Insn::IfNull(_)) {
                    return Ok(Step::Jump(*target));
                }
            }
            Insn::Goto(target) => return Ok(Step::Jump(*target)),
            Insn::Jsr(_) | Insn::Ret(_) => return Err(fault("subroutines are not supported")),
            Insn::TableSwitch {
                low,
                default,
                targets,
            } => {
                let index = frame.pop_int()?;
                let target = index
                    .checked_sub(*low)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                return Ok(Step::Jump(*target));
            }
            Insn::LookupSwitch { default, pairs } => {
                let key = frame.pop_int()?;
                let target = pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, l)| l)
                    .unwrap_or(default);
                return Ok(Step::Jump(*target));
            }
            Insn::Return(None) => return Ok(Step::Return(None)),
            Insn::Return(Some(kind)) => {
                let value = frame.pop()?;
                if value.kind() != Some(*kind) {
                    return Err(ill_typed(*kind, &value));
                }
                return Ok(Step::Return(Some(value)));
            }
            Insn::AThrow => {
                let exception = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe("cannot throw null"))?;
                return Err(Throw::Exception(exception));
            }

            /* ===== Objects ===== */
            Insn::GetStatic(field) => {
                let key = format!("{}.{}", field.owner, field.name);
                frame.push(self.get_static(&key, &field.desc));
            }
            Insn::PutStatic(field) => {
                let value = frame.pop()?;
                self.put_static(format!("{}.{}", field.owner, field.name), value);
            }
            Insn::GetField(field) => {
                let obj = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe(&format!("cannot read field {}", field.name)))?;
                let value = obj
                    .get_field(&field.name, &field.desc)
                    .ok_or_else(|| fault(format!("{} has no fields", obj.class_name())))?;
                frame.push(value);
            }
            Insn::PutField(field) => {
                let value = frame.pop()?;
                let obj = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe(&format!("cannot write field {}", field.name)))?;
                if !obj.set_field(&field.name, value) {
                    return Err(fault(format!("{} has no fields", obj.class_name())));
                }
            }
            Insn::Invoke(kind, id) => {
                let desc = MethodDesc::parse(&id.desc).map_err(|e| fault(e.0))?;
                let count = desc.params.len() + usize::from(kind.has_receiver());
                let split = frame
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or_else(|| fault("operand stack underflow"))?;
                let args = frame.stack.split_off(split);
                if let Some(result) = self.invoke(*kind, id, args)? {
                    frame.push(result);
                }
            }
            Insn::New(class) => frame.push(Value::obj(Obj::instance(class.clone()))),
            Insn::NewArray(elem) => {
                let len = frame.pop_int()?;
                let len = usize::try_from(len).map_err(|_| {
                    self.exception("java/lang/NegativeArraySizeException", &len.to_string())
                })?;
                frame.push(Value::obj(Obj::array(elem, len)));
            }
            Insn::ArrayLength => {
                let array = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe("cannot read the length of null"))?;
                let len = array
                    .array_len()
                    .ok_or_else(|| fault(format!("{} is not an array", array.class_name())))?;
                frame.push(Value::Int(len as i32));
            }
            Insn::ArrayLoad(_) => {
                let index = frame.pop_int()?;
                let array = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe("cannot load from null array"))?;
                let value = array
                    .array_get(index)
                    .ok_or_else(|| fault(format!("{} is not an array", array.class_name())))?
                    .ok_or_else(|| self.out_of_bounds(index))?;
                frame.push(value);
            }
            Insn::ArrayStore(_) => {
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame
                    .pop_ref()?
                    .ok_or_else(|| self.npe("cannot store to null array"))?;
                match array.array_set(index, value) {
                    Some(true) => {}
                    Some(false) => return Err(self.out_of_bounds(index)),
                    None => return Err(fault(format!("{} is not an array", array.class_name()))),
                }
            }
            Insn::CheckCast(ty) => {
                let value = frame.pop_ref()?;
                if let Some(obj) = &value {
                    if !self.program.is_assignable(obj.class_name(), ty) {
                        return Err(self.exception(
                            "java/lang/ClassCastException",
                            &format!("{} cannot be cast to {}", obj.class_name(), ty),
                        ));
                    }
                }
                frame.push(Value::Ref(value));
            }
            Insn::InstanceOf(ty) => {
                let is_instance = frame
                    .pop_ref()?
                    .is_some_and(|obj| self.program.is_assignable(obj.class_name(), ty));
                frame.push(Value::Int(i32::from(is_instance)));
            }

            /* ===== Stack ===== */
            Insn::Pop => {
                frame.pop()?;
            }
            Insn::Pop2 => {
                if frame.pop()?.width() == 1 {
                    frame.pop()?;
                }
            }
            Insn::Dup => {
                let top = frame.pop()?;
                frame.push(top.clone());
                frame.push(top);
            }
            Insn::DupX1 => {
                let top = frame.pop()?;
                let below = frame.pop()?;
                frame.push(top.clone());
                frame.push(below);
                frame.push(top);
            }
            Insn::Dup2 => {
                let top = frame.pop()?;
                if top.width() == 2 {
                    frame.push(top.clone());
                    frame.push(top);
                } else {
                    let below = frame.pop()?;
                    frame.push(below.clone());
                    frame.push(top.clone());
                    frame.push(below);
                    frame.push(top);
                }
            }
            Insn::Swap => {
                let top = frame.pop()?;
                let below = frame.pop()?;
                frame.push(top);
                frame.push(below);
            }
        }
        Ok(Step::Next)
    }

    fn arith(&self, op: ArithOp, kind: Kind, a: Value, b: Value) -> Result<Value, Throw> {
        let value = match (a, b) {
            (Value::Int(a), Value::Int(b)) if kind == Kind::Int => Value::Int(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div | ArithOp::Rem if b == 0 => return Err(self.divide_by_zero()),
                ArithOp::Div => a.wrapping_div(b),
                ArithOp::Rem => a.wrapping_rem(b),
            }),
            (Value::Long(a), Value::Long(b)) if kind == Kind::Long => Value::Long(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div | ArithOp::Rem if b == 0 => return Err(self.divide_by_zero()),
                ArithOp::Div => a.wrapping_div(b),
                ArithOp::Rem => a.wrapping_rem(b),
            }),
            (Value::Float(a), Value::Float(b)) if kind == Kind::Float => Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Rem => a % b,
            }),
            (Value::Double(a), Value::Double(b)) if kind == Kind::Double => {
                Value::Double(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Rem => a % b,
                })
            }
            (a, _) => return Err(ill_typed(kind, &a)),
        };
        Ok(value)
    }

    fn npe(&self, message: &str) -> Throw {
        self.exception("java/lang/NullPointerException", message)
    }

    fn divide_by_zero(&self) -> Throw {
        self.exception("java/lang/ArithmeticException", "/ by zero")
    }

    fn out_of_bounds(&self, index: i32) -> Throw {
        self.exception(
            "java/lang/ArrayIndexOutOfBoundsException",
            &format!("index {} out of bounds", index),
        )
    }
}

fn position(labels: &HashMap<Label, usize>, label: Label) -> Result<usize, Throw> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| fault(format!("undefined label {}", label)))
}

fn convert(from: Kind, to: Kind, value: Value) -> Result<Value, Throw> {
    let converted = match (from, to, value) {
        (Kind::Int, Kind::Long, Value::Int(v)) => Value::Long(v as i64),
        (Kind::Int, Kind::Float, Value::Int(v)) => Value::Float(v as f32),
        (Kind::Int, Kind::Double, Value::Int(v)) => Value::Double(v as f64),
        (Kind::Long, Kind::Int, Value::Long(v)) => Value::Int(v as i32),
        (Kind::Long, Kind::Float, Value::Long(v)) => Value::Float(v as f32),
        (Kind::Long, Kind::Double, Value::Long(v)) => Value::Double(v as f64),
        (Kind::Float, Kind::Int, Value::Float(v)) => Value::Int(v as i32),
        (Kind::Float, Kind::Long, Value::Float(v)) => Value::Long(v as i64),
        (Kind::Float, Kind::Double, Value::Float(v)) => Value::Double(v as f64),
        (Kind::Double, Kind::Int, Value::Double(v)) => Value::Int(v as i32),
        (Kind::Double, Kind::Long, Value::Double(v)) => Value::Long(v as i64),
        (Kind::Double, Kind::Float, Value::Double(v)) => Value::Float(v as f32),
        (from, to, value) => {
            return Err(fault(format!(
                "cannot convert {:?} from {} to {}",
                value, from, to
            )))
        }
    };
    Ok(converted)
}

/// `-1`, `0` or `1`; a NaN operand yields `nan`.
fn ordering<T: PartialOrd>(a: T, b: T, nan: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => nan,
    }
}

fn compare(op: CompareOp, a: Value, b: Value) -> Result<i32, Throw> {
    let result = match (op, a, b) {
        (CompareOp::Lcmp, Value::Long(a), Value::Long(b)) => ordering(a, b, 0),
        (CompareOp::Fcmpl, Value::Float(a), Value::Float(b)) => ordering(a, b, -1),
        (CompareOp::Fcmpg, Value::Float(a), Value::Float(b)) => ordering(a, b, 1),
        (CompareOp::Dcmpl, Value::Double(a), Value::Double(b)) => ordering(a, b, -1),
        (CompareOp::Dcmpg, Value::Double(a), Value::Double(b)) => ordering(a, b, 1),
        (op, a, _) => return Err(ill_typed(op.operand_kind(), &a)),
    };
    Ok(result)
}
