//! Assembler for `.jasm` sources.
//!
//! A source file declares classes, their fields and methods, and per-method restore
//! point declarations:
//!
//! ```text
//! class demo/Counter implements java/lang/Runnable {
//!     method run ()V locals 2 {
//!         .await step
//!         iconst 5
//!         istore 1
//!         aload 0
//!         invokevirtual demo/Counter.step ()V
//!         return
//!     }
//! }
//! ```

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::bytecode::{
    ArithOp, Class, CompareOp, Cond, Field, FieldRef, Insn, InvokeKind, Kind, Label, LocalVar,
    Method, MethodId, Program, TryCatch, OBJECT,
};
use crate::specs::{MethodDecl, RestorePointSpec, SpecTable};

mod disasm;

pub use disasm::disassemble;


/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "asm/jasm.pest"]
struct JasmParser;

/* ===================== Error Types ===================== */

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug)]
pub enum ParseError {
    PestError(String, Option<Position>),
    BuildError(String, Option<Position>),
}

impl ParseError {
    pub fn position(&self) -> Option<Position> {
        match self {
            ParseError::PestError(_, pos) => *pos,
            ParseError::BuildError(_, pos) => *pos,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::PestError(msg, _) => msg,
            ParseError::BuildError(msg, _) => msg,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::PestError(msg, _) => write!(f, "{}", msg),
            ParseError::BuildError(msg, Some(pos)) => {
                write!(f, "{}:{}: {}", pos.line, pos.col, msg)
            }
            ParseError::BuildError(msg, None) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, col) = match err.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        ParseError::PestError(err.to_string(), Some(Position { line, col }))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

fn position(pair: &Pair<Rule>) -> Position {
    let (line, col) = pair.as_span().start_pos().line_col();
    Position { line, col }
}

fn build_error(pair: &Pair<Rule>, msg: impl Into<String>) -> ParseError {
    ParseError::BuildError(msg.into(), Some(position(pair)))
}

/* ===================== Public API ===================== */

/// Assembled program with the restore-point declarations found in it.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub program: Program,
    pub specs: SpecTable,
}

pub fn assemble(source: &str) -> ParseResult<Assembly> {
    let pairs = JasmParser::parse(Rule::file, source)?;

    let mut assembly = Assembly::default();
    for pair in pairs.flatten().filter(|p| p.as_rule() == Rule::class_decl) {
        let at = pair.clone();
        let class = build_class(pair, &mut assembly.specs)?;
        if assembly.program.class(&class.name).is_some() {
            return Err(build_error(&at, format!("class {} defined twice", class.name)));
        }
        assembly.program.insert(class);
    }
    Ok(assembly)
}

/* ===================== Declarations ===================== */

/// Children of a declaration, with a leading `static` keyword split off.
fn split_static<'i>(pairs: Pairs<'i, Rule>) -> (bool, Vec<Pair<'i, Rule>>) {
    let mut children: Vec<_> = pairs.collect();
    let is_static = children
        .first()
        .is_some_and(|p| p.as_rule() == Rule::static_kw);
    if is_static {
        children.remove(0);
    }
    (is_static, children)
}

fn text_at(children: &[Pair<Rule>], index: usize, parent: &Pair<Rule>, what: &str) -> ParseResult<String> {
    children
        .get(index)
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| build_error(parent, format!("expected {}", what)))
}

fn build_class(pair: Pair<Rule>, specs: &mut SpecTable) -> ParseResult<Class> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| build_error(&outer, "expected class name"))?;
    let mut class = Class::new(&name);
    if name == OBJECT {
        class.super_name = None;
    }

    for pair in inner {
        match pair.as_rule() {
            Rule::extends_clause => {
                class.super_name = Some(pair.into_inner().as_str().to_string());
            }
            Rule::implements_clause => {
                class.interfaces = pair.into_inner().map(|p| p.as_str().to_string()).collect();
            }
            Rule::field_decl => class.fields.push(build_field(pair)?),
            Rule::method_decl => {
                let at = pair.clone();
                let (method, decl) = build_method(pair, &name)?;
                if class.method(&method.name, &method.desc).is_some() {
                    return Err(build_error(
                        &at,
                        format!("method {}.{}{} defined twice", name, method.name, method.desc),
                    ));
                }
                if let Some(decl) = decl {
                    specs.declare(decl);
                }
                class.methods.push(method);
            }
            other => return Err(build_error(&pair, format!("unexpected {:?}", other))),
        }
    }
    Ok(class)
}

fn build_field(pair: Pair<Rule>) -> ParseResult<Field> {
    let outer = pair.clone();
    let (is_static, children) = split_static(pair.into_inner());
    Ok(Field {
        name: text_at(&children, 0, &outer, "field name")?,
        desc: text_at(&children, 1, &outer, "field descriptor")?,
        is_static,
    })
}

fn build_method(pair: Pair<Rule>, owner: &str) -> ParseResult<(Method, Option<MethodDecl>)> {
    let outer = pair.clone();
    let (is_static, children) = split_static(pair.into_inner());
    let name = text_at(&children, 0, &outer, "method name")?;
    let desc = text_at(&children, 1, &outer, "method descriptor")?;

    let mut body = BodyBuilder::new(MethodId::new(owner, &name, &desc));
    let mut max_locals = None;
    for pair in children.into_iter().skip(2) {
        match pair.as_rule() {
            Rule::locals_clause => {
                let text = pair.clone().into_inner().as_str().to_string();
                max_locals = Some(
                    text.parse::<u16>()
                        .map_err(|_| build_error(&pair, format!("bad locals count {}", text)))?,
                );
            }
            Rule::label_def => {
                let name = pair.clone().into_inner().as_str().to_string();
                body.define(&pair, &name)?;
            }
            Rule::directive => body.directive(Line::new(pair)?)?,
            Rule::insn => {
                let line = Line::new(pair)?;
                let insn = body.insn(&line)?;
                body.code.push(insn);
            }
            other => return Err(build_error(&pair, format!("unexpected {:?}", other))),
        }
    }
    body.check_labels(&outer)?;

    let mut method = Method {
        name,
        desc,
        is_static,
        max_locals: 0,
        code: body.code,
        try_catches: body.try_catches,
        local_vars: body.local_vars,
    };
    method.max_locals = max_locals.unwrap_or_else(|| method.required_locals());
    Ok((method, body.decl))
}

/* ===================== Method Bodies ===================== */

enum Operand {
    Word(String),
    Str(String),
}

/// One instruction or directive with its operands.
struct Line<'i> {
    pair: Pair<'i, Rule>,
    opcode: String,
    operands: Vec<Operand>,
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                // \u{XXXX}
                let code: String = chars
                    .by_ref()
                    .skip_while(|c| *c == '{')
                    .take_while(|c| *c != '}')
                    .collect();
                if let Some(ch) = u32::from_str_radix(&code, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

impl<'i> Line<'i> {
    fn new(pair: Pair<'i, Rule>) -> ParseResult<Self> {
        let mut inner = pair.clone().into_inner();
        let opcode = inner
            .next()
            .map(|p| p.as_str().to_string())
            .ok_or_else(|| build_error(&pair, "expected opcode"))?;
        let operands = inner
            .map(|p| match p.as_rule() {
                Rule::string => Operand::Str(unescape(p.into_inner().as_str())),
                _ => Operand::Word(p.as_str().to_string()),
            })
            .collect();
        Ok(Line {
            pair,
            opcode,
            operands,
        })
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        build_error(&self.pair, format!("{}: {}", self.opcode, msg.into()))
    }

    fn arity(&self, expected: usize) -> ParseResult<()> {
        if self.operands.len() == expected {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {} operand(s), found {}",
                expected,
                self.operands.len()
            )))
        }
    }

    fn word(&self, index: usize) -> ParseResult<&str> {
        match self.operands.get(index) {
            Some(Operand::Word(w)) => Ok(w),
            Some(Operand::Str(_)) => Err(self.error(format!("operand {} must not be a string", index + 1))),
            None => Err(self.error(format!("missing operand {}", index + 1))),
        }
    }

    fn string(&self, index: usize) -> ParseResult<&str> {
        match self.operands.get(index) {
            Some(Operand::Str(s)) => Ok(s),
            _ => Err(self.error(format!("operand {} must be a string literal", index + 1))),
        }
    }

    fn number<T: FromStr>(&self, index: usize) -> ParseResult<T> {
        let word = self.word(index)?;
        word.parse()
            .map_err(|_| self.error(format!("bad number {}", word)))
    }

    /// `owner.name` operand.
    fn member(&self, index: usize) -> ParseResult<(String, String)> {
        let word = self.word(index)?;
        match word.rsplit_once('.') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok((owner.to_string(), name.to_string()))
            }
            _ => Err(self.error(format!("expected Owner.name, found {}", word))),
        }
    }

    fn keyword(&self, index: usize, expected: &str) -> ParseResult<()> {
        match self.word(index)? {
            w if w == expected => Ok(()),
            w => Err(self.error(format!("expected '{}', found '{}'", expected, w))),
        }
    }
}

struct BodyBuilder {
    method: MethodId,
    labels: HashMap<String, Label>,
    defined: HashSet<String>,
    code: Vec<Insn>,
    try_catches: Vec<TryCatch>,
    local_vars: Vec<LocalVar>,
    decl: Option<MethodDecl>,
}

impl BodyBuilder {
    fn new(method: MethodId) -> Self {
        Self {
            method,
            labels: HashMap::new(),
            defined: HashSet::new(),
            code: Vec::new(),
            try_catches: Vec::new(),
            local_vars: Vec::new(),
            decl: None,
        }
    }

    /// Labels are numbered in order of first mention.
    fn label(&mut self, name: &str) -> Label {
        let next = Label(self.labels.len() as u32);
        *self.labels.entry(name.to_string()).or_insert(next)
    }

    fn define(&mut self, pair: &Pair<Rule>, name: &str) -> ParseResult<()> {
        if !self.defined.insert(name.to_string()) {
            return Err(build_error(pair, format!("label {} defined twice", name)));
        }
        let label = self.label(name);
        self.code.push(Insn::Label(label));
        Ok(())
    }

    fn label_operand(&mut self, line: &Line, index: usize) -> ParseResult<Label> {
        let name = line.word(index)?.to_string();
        Ok(self.label(&name))
    }

    fn check_labels(&self, pair: &Pair<Rule>) -> ParseResult<()> {
        let mut undefined: Vec<&String> = self
            .labels
            .keys()
            .filter(|name| !self.defined.contains(*name))
            .collect();
        undefined.sort();
        match undefined.first() {
            Some(name) => Err(build_error(
                pair,
                format!("undefined label {} in {}", name, self.method),
            )),
            None => Ok(()),
        }
    }

    fn decl(&mut self) -> &mut MethodDecl {
        let method = &self.method;
        self.decl.get_or_insert_with(|| {
            MethodDecl::new(&method.owner, &method.name).with_desc(&method.desc)
        })
    }

    /* ===== Directives ===== */

    fn directive(&mut self, line: Line) -> ParseResult<()> {
        match line.opcode.as_str() {
            "await" => {
                let mut spec = RestorePointSpec::new(line.word(0)?);
                for i in 1..line.operands.len() {
                    let option = line.word(i)?;
                    spec = match option.split_once('=') {
                        Some(("owner", owner)) => spec.with_owner(owner),
                        Some(("desc", desc)) => spec.with_desc(desc),
                        None if option == "unpatchable" => spec.unpatchable(),
                        _ => return Err(line.error(format!("unknown option {}", option))),
                    };
                }
                self.decl().restore_points.push(spec);
            }
            "entry" => {
                let entry = match line.operands.len() {
                    0 => true,
                    _ => line.number::<bool>(0)?,
                };
                self.decl().entry = Some(entry);
            }
            "catch" => {
                line.arity(7)?;
                let catch_type = match line.word(0)? {
                    "any" => None,
                    other => Some(other.to_string()),
                };
                line.keyword(1, "from")?;
                line.keyword(3, "to")?;
                line.keyword(5, "using")?;
                let try_catch = TryCatch {
                    start: self.label_operand(&line, 2)?,
                    end: self.label_operand(&line, 4)?,
                    handler: self.label_operand(&line, 6)?,
                    catch_type,
                };
                self.try_catches.push(try_catch);
            }
            "var" => {
                line.arity(7)?;
                line.keyword(3, "from")?;
                line.keyword(5, "to")?;
                let local = LocalVar {
                    slot: line.number(0)?,
                    name: line.word(1)?.to_string(),
                    desc: line.word(2)?.to_string(),
                    start: self.label_operand(&line, 4)?,
                    end: self.label_operand(&line, 6)?,
                };
                self.local_vars.push(local);
            }
            other => return Err(line.error(format!("unknown directive .{}", other))),
        }
        Ok(())
    }

    /* ===== Instructions ===== */

    fn insn(&mut self, line: &Line) -> ParseResult<Insn> {
        let op = line.opcode.as_str();
        let nullary = |insn: Insn| line.arity(0).map(|_| insn);
        let insn = match op {
            "nop" => nullary(Insn::Nop)?,
            "aconst_null" => nullary(Insn::AConstNull)?,
            "iconst" => Insn::IConst(line.number(0)?),
            "lconst" => Insn::LConst(line.number(0)?),
            "fconst" => Insn::FConst(line.number(0)?),
            "dconst" => Insn::DConst(line.number(0)?),
            "ldc" => Insn::Ldc(line.string(0)?.to_string()),
            "iinc" => Insn::Iinc(line.number(0)?, line.number(1)?),
            "lcmp" => nullary(Insn::Compare(CompareOp::Lcmp))?,
            "fcmpl" => nullary(Insn::Compare(CompareOp::Fcmpl))?,
            "fcmpg" => nullary(Insn::Compare(CompareOp::Fcmpg))?,
            "dcmpl" => nullary(Insn::Compare(CompareOp::Dcmpl))?,
            "dcmpg" => nullary(Insn::Compare(CompareOp::Dcmpg))?,
            "if_acmpeq" => Insn::IfACmpEq(self.label_operand(line, 0)?),
            "if_acmpne" => Insn::IfACmpNe(self.label_operand(line, 0)?),
            "ifnull" => Insn::IfNull(self.label_operand(line, 0)?),
            "ifnonnull" => Insn::IfNonNull(self.label_operand(line, 0)?),
            "goto" => Insn::Goto(self.label_operand(line, 0)?),
            "jsr" => Insn::Jsr(self.label_operand(line, 0)?),
            "ret" => Insn::Ret(line.number(0)?),
            "tableswitch" => {
                let low = line.number(0)?;
                let default = self.label_operand(line, 1)?;
                let targets = (2..line.operands.len())
                    .map(|i| self.label_operand(line, i))
                    .collect::<ParseResult<Vec<_>>>()?;
                Insn::TableSwitch {
                    low,
                    default,
                    targets,
                }
            }
            "lookupswitch" => {
                let default = self.label_operand(line, 0)?;
                let mut pairs = Vec::new();
                for i in 1..line.operands.len() {
                    let word = line.word(i)?;
                    let (key, target) = word
                        .split_once(':')
                        .ok_or_else(|| line.error(format!("expected key:label, found {}", word)))?;
                    let key = key
                        .parse::<i32>()
                        .map_err(|_| line.error(format!("bad key {}", key)))?;
                    let target = target.to_string();
                    pairs.push((key, self.label(&target)));
                }
                Insn::LookupSwitch { default, pairs }
            }
            "return" => nullary(Insn::Return(None))?,
            "athrow" => nullary(Insn::AThrow)?,
            "getstatic" | "putstatic" | "getfield" | "putfield" => {
                line.arity(2)?;
                let (owner, name) = line.member(0)?;
                let field = FieldRef::new(owner, name, line.word(1)?);
                match op {
                    "getstatic" => Insn::GetStatic(field),
                    "putstatic" => Insn::PutStatic(field),
                    "getfield" => Insn::GetField(field),
                    _ => Insn::PutField(field),
                }
            }
            "invokevirtual" | "invokestatic" | "invokespecial" | "invokeinterface" => {
                line.arity(2)?;
                let kind = match op {
                    "invokevirtual" => InvokeKind::Virtual,
                    "invokestatic" => InvokeKind::Static,
                    "invokespecial" => InvokeKind::Special,
                    _ => InvokeKind::Interface,
                };
                let (owner, name) = line.member(0)?;
                Insn::Invoke(kind, MethodId::new(owner, name, line.word(1)?))
            }
            "new" => Insn::New(line.word(0)?.to_string()),
            "newarray" => Insn::NewArray(line.word(0)?.to_string()),
            "arraylength" => nullary(Insn::ArrayLength)?,
            "checkcast" => Insn::CheckCast(line.word(0)?.to_string()),
            "instanceof" => Insn::InstanceOf(line.word(0)?.to_string()),
            "pop" => nullary(Insn::Pop)?,
            "pop2" => nullary(Insn::Pop2)?,
            "dup" => nullary(Insn::Dup)?,
            "dup_x1" => nullary(Insn::DupX1)?,
            "dup2" => nullary(Insn::Dup2)?,
            "swap" => nullary(Insn::Swap)?,
            _ => self.typed_insn(line)?,
        };
        Ok(insn)
    }

    /// Conditional jumps and the kind-prefixed families (`iload`, `ladd`, `d2i`, ...).
    fn typed_insn(&mut self, line: &Line) -> ParseResult<Insn> {
        let op = line.opcode.as_str();
        let unknown = || line.error("unknown instruction");

        if let Some(cond) = op.strip_prefix("if_icmp").and_then(Cond::from_suffix) {
            return Ok(Insn::IfICmp(cond, self.label_operand(line, 0)?));
        }
        if let Some(cond) = op.strip_prefix("if").and_then(Cond::from_suffix) {
            return Ok(Insn::If(cond, self.label_operand(line, 0)?));
        }

        let mut chars = op.chars();
        let kind = chars.next().and_then(Kind::from_prefix).ok_or_else(unknown)?;
        let rest = chars.as_str();
        let insn = match rest {
            "load" => Insn::Load(kind, line.number(0)?),
            "store" => Insn::Store(kind, line.number(0)?),
            "return" => Insn::Return(Some(kind)),
            "aload" => Insn::ArrayLoad(kind),
            "astore" => Insn::ArrayStore(kind),
            "neg" if kind.is_numeric() => Insn::Neg(kind),
            _ if kind.is_numeric() => {
                if let Some(op) = ArithOp::from_name(rest) {
                    Insn::Arith(op, kind)
                } else {
                    let to = rest
                        .strip_prefix('2')
                        .filter(|t| t.len() == 1)
                        .and_then(|t| t.chars().next())
                        .and_then(Kind::from_prefix)
                        .filter(|to| to.is_numeric() && *to != kind)
                        .ok_or_else(unknown)?;
                    Insn::Convert(kind, to)
                }
            }
            _ => return Err(unknown()),
        };
        Ok(insn)
    }
}
