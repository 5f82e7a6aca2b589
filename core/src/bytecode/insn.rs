//! Stack-machine instruction set.
//!
//! Jump targets are symbolic [`Label`]s; a label is itself a pseudo-instruction marking a
//! position in the code, so rewriting never has to patch offsets.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{FieldRef, Label, MethodId};

/// Operand kind of typed instructions and of the runtime storage stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Kind {
    pub const ALL: [Kind; 5] = [Kind::Ref, Kind::Int, Kind::Long, Kind::Float, Kind::Double];

    /// Mnemonic prefix (`i`, `l`, `f`, `d`, `a`).
    pub fn prefix(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Long => 'l',
            Kind::Float => 'f',
            Kind::Double => 'd',
            Kind::Ref => 'a',
        }
    }

    pub fn from_prefix(c: char) -> Option<Kind> {
        match c {
            'i' => Some(Kind::Int),
            'l' => Some(Kind::Long),
            'f' => Some(Kind::Float),
            'd' => Some(Kind::Double),
            'a' => Some(Kind::Ref),
            _ => None,
        }
    }

    /// Number of local-variable slots a value of this kind occupies.
    pub fn width(self) -> usize {
        match self {
            Kind::Long | Kind::Double => 2,
            _ => 1,
        }
    }

    pub fn is_numeric(self) -> bool {
        self != Kind::Ref
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Int => "int",
            Kind::Long => "long",
            Kind::Float => "float",
            Kind::Double => "double",
            Kind::Ref => "reference",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    pub fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Ge => "ge",
            Cond::Gt => "gt",
            Cond::Le => "le",
        }
    }

    pub fn from_suffix(s: &str) -> Option<Cond> {
        match s {
            "eq" => Some(Cond::Eq),
            "ne" => Some(Cond::Ne),
            "lt" => Some(Cond::Lt),
            "ge" => Some(Cond::Ge),
            "gt" => Some(Cond::Gt),
            "le" => Some(Cond::Le),
            _ => None,
        }
    }

    pub fn test(self, a: i32, b: i32) -> bool {
        match self {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => a < b,
            Cond::Ge => a >= b,
            Cond::Gt => a > b,
            Cond::Le => a <= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
        }
    }

    pub fn from_name(s: &str) -> Option<ArithOp> {
        match s {
            "add" => Some(ArithOp::Add),
            "sub" => Some(ArithOp::Sub),
            "mul" => Some(ArithOp::Mul),
            "div" => Some(ArithOp::Div),
            "rem" => Some(ArithOp::Rem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
}

impl CompareOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Lcmp => "lcmp",
            CompareOp::Fcmpl => "fcmpl",
            CompareOp::Fcmpg => "fcmpg",
            CompareOp::Dcmpl => "dcmpl",
            CompareOp::Dcmpg => "dcmpg",
        }
    }

    pub fn operand_kind(self) -> Kind {
        match self {
            CompareOp::Lcmp => Kind::Long,
            CompareOp::Fcmpl | CompareOp::Fcmpg => Kind::Float,
            CompareOp::Dcmpl | CompareOp::Dcmpg => Kind::Double,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Virtual,
    Static,
    Special,
    Interface,
}

impl InvokeKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            InvokeKind::Virtual => "invokevirtual",
            InvokeKind::Static => "invokestatic",
            InvokeKind::Special => "invokespecial",
            InvokeKind::Interface => "invokeinterface",
        }
    }

    pub fn has_receiver(self) -> bool {
        self != InvokeKind::Static
    }
}

/// One instruction (or label pseudo-instruction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Insn {
    Label(Label),
    Nop,

    /* ===== Constants ===== */
    AConstNull,
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    Ldc(String),

    /* ===== Locals ===== */
    Load(Kind, u16),
    Store(Kind, u16),
    Iinc(u16, i32),

    /* ===== Arithmetic ===== */
    Arith(ArithOp, Kind),
    Neg(Kind),
    Convert(Kind, Kind),
    Compare(CompareOp),

    /* ===== Control flow ===== */
    If(Cond, Label),
    IfICmp(Cond, Label),
    IfACmpEq(Label),
    IfACmpNe(Label),
    IfNull(Label),
    IfNonNull(Label),
    Goto(Label),
    Jsr(Label),
    Ret(u16),
    TableSwitch {
        low: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    Return(Option<Kind>),
    AThrow,

    /* ===== Objects ===== */
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeKind, MethodId),
    New(String),
    NewArray(String),
    ArrayLength,
    ArrayLoad(Kind),
    ArrayStore(Kind),
    CheckCast(String),
    InstanceOf(String),

    /* ===== Stack ===== */
    Pop,
    Pop2,
    Dup,
    DupX1,
    Dup2,
    Swap,
}

impl Insn {
    pub fn invoke_static(method: MethodId) -> Insn {
        Insn::Invoke(InvokeKind::Static, method)
    }

    pub fn as_label(&self) -> Option<Label> {
        match self {
            Insn::Label(l) => Some(*l),
            _ => None,
        }
    }

    /// Pseudo-instructions that emit no executable code.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Insn::Label(_))
    }

    /// Explicit jump targets of this instruction.
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Insn::If(_, l)
            | Insn::IfICmp(_, l)
            | Insn::IfACmpEq(l)
            | Insn::IfACmpNe(l)
            | Insn::IfNull(l)
            | Insn::IfNonNull(l)
            | Insn::Goto(l)
            | Insn::Jsr(l) => vec![*l],
            Insn::TableSwitch {
                default, targets, ..
            } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            Insn::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, l)| *l));
                all
            }
            _ => Vec::new(),
        }
    }

    /// Whether control can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Insn::Goto(_)
                | Insn::Return(_)
                | Insn::AThrow
                | Insn::TableSwitch { .. }
                | Insn::LookupSwitch { .. }
                | Insn::Ret(_)
        )
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Label(l) => write!(f, "{}:", l),
            Insn::Nop => write!(f, "nop"),
            Insn::AConstNull => write!(f, "aconst_null"),
            Insn::IConst(v) => write!(f, "iconst {}", v),
            Insn::LConst(v) => write!(f, "lconst {}", v),
            Insn::FConst(v) => write!(f, "fconst {:?}", v),
            Insn::DConst(v) => write!(f, "dconst {:?}", v),
            Insn::Ldc(s) => write!(f, "ldc {:?}", s),
            Insn::Load(k, slot) => write!(f, "{}load {}", k.prefix(), slot),
            Insn::Store(k, slot) => write!(f, "{}store {}", k.prefix(), slot),
            Insn::Iinc(slot, delta) => write!(f, "iinc {} {}", slot, delta),
            Insn::Arith(op, k) => write!(f, "{}{}", k.prefix(), op.name()),
            Insn::Neg(k) => write!(f, "{}neg", k.prefix()),
            Insn::Convert(from, to) => write!(f, "{}2{}", from.prefix(), to.prefix()),
            Insn::Compare(op) => write!(f, "{}", op.mnemonic()),
            Insn::If(c, l) => write!(f, "if{} {}", c.suffix(), l),
            Insn::IfICmp(c, l) => write!(f, "if_icmp{} {}", c.suffix(), l),
            Insn::IfACmpEq(l) => write!(f, "if_acmpeq {}", l),
            Insn::IfACmpNe(l) => write!(f, "if_acmpne {}", l),
            Insn::IfNull(l) => write!(f, "ifnull {}", l),
            Insn::IfNonNull(l) => write!(f, "ifnonnull {}", l),
            Insn::Goto(l) => write!(f, "goto {}", l),
            Insn::Jsr(l) => write!(f, "jsr {}", l),
            Insn::Ret(slot) => write!(f, "ret {}", slot),
            Insn::TableSwitch {
                low,
                default,
                targets,
            } => {
                write!(f, "tableswitch {} {}", low, default)?;
                for t in targets {
                    write!(f, " {}", t)?;
                }
                Ok(())
            }
            Insn::LookupSwitch { default, pairs } => {
                write!(f, "lookupswitch {}", default)?;
                for (key, t) in pairs {
                    write!(f, " {}:{}", key, t)?;
                }
                Ok(())
            }
            Insn::Return(None) => write!(f, "return"),
            Insn::Return(Some(k)) => write!(f, "{}return", k.prefix()),
            Insn::AThrow => write!(f, "athrow"),
            Insn::GetStatic(r) => write!(f, "getstatic {}.{} {}", r.owner, r.name, r.desc),
            Insn::PutStatic(r) => write!(f, "putstatic {}.{} {}", r.owner, r.name, r.desc),
            Insn::GetField(r) => write!(f, "getfield {}.{} {}", r.owner, r.name, r.desc),
            Insn::PutField(r) => write!(f, "putfield {}.{} {}", r.owner, r.name, r.desc),
            Insn::Invoke(kind, m) => {
                write!(f, "{} {}.{} {}", kind.mnemonic(), m.owner, m.name, m.desc)
            }
            Insn::New(t) => write!(f, "new {}", t),
            Insn::NewArray(elem) => write!(f, "newarray {}", elem),
            Insn::ArrayLength => write!(f, "arraylength"),
            Insn::ArrayLoad(k) => write!(f, "{}aload", k.prefix()),
            Insn::ArrayStore(k) => write!(f, "{}astore", k.prefix()),
            Insn::CheckCast(t) => write!(f, "checkcast {}", t),
            Insn::InstanceOf(t) => write!(f, "instanceof {}", t),
            Insn::Pop => write!(f, "pop"),
            Insn::Pop2 => write!(f, "pop2"),
            Insn::Dup => write!(f, "dup"),
            Insn::DupX1 => write!(f, "dup_x1"),
            Insn::Dup2 => write!(f, "dup2"),
            Insn::Swap => write!(f, "swap"),
        }
    }
}
