//! Method transformer.
//!
//! Rewrites a method so that every restore-point call site can unwind on suspension and
//! be re-entered on resumption. The rewritten method keeps its original code, labels
//! and locals; injected code only adds labels numbered after the method's own.

use tracing::debug;

use crate::analyzer::MethodAnalyzeResult;
use crate::bytecode::{
    Cond, FieldType, Insn, InvokeKind, Kind, Label, Method, MethodDesc, MethodId, TryCatch,
};
use crate::error::{Error, Result, TransformFailure};
use crate::frame::{Frame, ValueCategory};
use crate::runtime::abi;

pub mod accessor;
pub mod regions;

pub use accessor::{accessor, TypedAccessor};
pub use regions::{split_regions, Exclusion};


/// One matched call site.
struct Site<'a> {
    index: i32,
    position: usize,
    kind: InvokeKind,
    callee: &'a MethodId,
    unpatchable: bool,
    /// Frame before the call; `None` when the call is unreachable.
    frame: Option<&'a Frame>,
    resume: Label,
}

/// Labels of the code injected around one reachable call site.
struct SiteLabels {
    pre: Label,
    call: Label,
    staged: Label,
    invoke: Label,
    invoke_end: Label,
    handler: Label,
    rethrow: Label,
    after: Label,
    no_yield: Label,
    post: Label,
}

/// Operand-stack layout at a call site.
struct CallShape<'a> {
    below: &'a [ValueCategory],
    /// Receiver (if any) followed by the arguments, bottom to top.
    window: &'a [ValueCategory],
    has_receiver: bool,
    result: Option<Kind>,
}

impl CallShape<'_> {
    fn receiver(&self) -> Option<&ValueCategory> {
        self.has_receiver.then(|| &self.window[0])
    }

    fn args(&self) -> &[ValueCategory] {
        &self.window[usize::from(self.has_receiver)..]
    }
}

struct Emitter<'a> {
    analysis: &'a MethodAnalyzeResult,
    is_static: bool,
    ret: Option<Kind>,
    next_label: u32,
    code: Vec<Insn>,
    handlers: Vec<TryCatch>,
    exclusions: Vec<Exclusion>,
}

/// Rewrite `method` using its analysis.
///
/// Fails with [`TransformFailure::NothingToInstrument`] when no call site matched and
/// with [`TransformFailure::StaleAnalysis`] when `analysis` was computed for other code.
pub fn transform_method(method: &Method, analysis: &MethodAnalyzeResult) -> Result<Method> {
    let id = &analysis.method;
    let fail = |failure: TransformFailure| Error::Transform {
        method: id.clone(),
        failure,
    };

    if !analysis.needs_transform() {
        return Err(fail(TransformFailure::NothingToInstrument));
    }
    if analysis.insns != method.code
        || analysis.frames.len() != method.code.len()
        || id.name != method.name
        || id.desc != method.desc
        || analysis.is_static != method.is_static
    {
        return Err(fail(TransformFailure::StaleAnalysis));
    }
    let desc = MethodDesc::parse(&method.desc)
        .map_err(|e| fail(TransformFailure::BadDescriptor(e.0)))?;

    let mut emitter = Emitter {
        analysis,
        is_static: method.is_static,
        ret: desc.ret.as_ref().map(FieldType::kind),
        next_label: method.next_label(),
        code: Vec::with_capacity(method.code.len() * 2),
        handlers: Vec::new(),
        exclusions: Vec::new(),
    };

    let mut sites = Vec::new();
    for (position, insn) in method.code.iter().enumerate() {
        let Insn::Invoke(kind, callee) = insn else {
            continue;
        };
        if !analysis.is_restore_point(callee) {
            continue;
        }
        let resume = emitter.label();
        sites.push(Site {
            index: sites.len() as i32,
            position,
            kind: *kind,
            callee,
            unpatchable: analysis.is_unpatchable(callee),
            frame: analysis.frames[position].as_ref(),
            resume,
        });
    }

    emitter.prologue(&sites);
    let mut pending = sites.iter().filter(|s| s.frame.is_some()).peekable();
    for (position, insn) in method.code.iter().enumerate() {
        match pending.peek() {
            Some(site) if site.position == position => {
                emitter.site(site, insn).map_err(fail)?;
                pending.next();
            }
            _ => emitter.emit(insn.clone()),
        }
    }

    let Emitter {
        code,
        mut handlers,
        exclusions,
        ..
    } = emitter;
    handlers.extend(split_regions(&code, &method.try_catches, &exclusions).map_err(fail)?);

    debug!(
        method = %id,
        sites = sites.len(),
        unpatchable = sites.iter().filter(|s| s.unpatchable).count(),
        before = method.code.len(),
        after = code.len(),
        regions = handlers.len(),
        "transformed method"
    );

    Ok(Method {
        name: method.name.clone(),
        desc: method.desc.clone(),
        is_static: method.is_static,
        max_locals: method.max_locals,
        code,
        try_catches: handlers,
        local_vars: method.local_vars.clone(),
    })
}

impl Emitter<'_> {
    fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn emit(&mut self, insn: Insn) {
        self.code.push(insn);
    }

    fn emit_all(&mut self, insns: impl IntoIterator<Item = Insn>) {
        self.code.extend(insns);
    }

    fn call(&mut self, method: MethodId) {
        self.emit(Insn::invoke_static(method));
    }

    /// Return the zero value of the method's return type.
    fn default_return(&mut self) {
        match self.ret {
            None => self.emit(Insn::Return(None)),
            Some(kind) => {
                self.emit(accessor(kind).default_value());
                self.emit(Insn::Return(Some(kind)));
            }
        }
    }

    /* ===================== Prologue ===================== */

    fn prologue(&mut self, sites: &[Site<'_>]) {
        let body = self.label();
        let no_state = self.label();
        let unreachable: Vec<Label> = sites
            .iter()
            .filter(|s| s.frame.is_none())
            .map(|s| s.resume)
            .collect();
        let invalid = (sites.len() > 1 || !unreachable.is_empty()).then(|| self.label());

        self.call(abi::exists());
        self.emit(Insn::If(Cond::Eq, body));
        self.call(abi::pop_state());
        self.emit(Insn::Dup);
        self.emit(Insn::If(Cond::Lt, no_state));
        match (sites, invalid) {
            ([only], _) => {
                self.emit(Insn::Pop);
                self.emit(Insn::Goto(only.resume));
            }
            (_, Some(invalid)) => self.emit(Insn::TableSwitch {
                low: 0,
                default: invalid,
                targets: sites.iter().map(|s| s.resume).collect(),
            }),
            (_, None) => self.emit(Insn::Goto(no_state)),
        }

        if let Some(invalid) = invalid {
            self.emit(Insn::Label(invalid));
            self.emit_all(unreachable.into_iter().map(Insn::Label));
            self.emit(Insn::Ldc(self.analysis.method.to_string()));
            self.call(abi::invalid_dispatch());
            self.default_return();
        }

        self.emit(Insn::Label(no_state));
        self.emit(Insn::Pop);
        self.emit(Insn::Label(body));
    }

    /* ===================== Call Sites ===================== */

    fn site(&mut self, site: &Site<'_>, insn: &Insn) -> std::result::Result<(), TransformFailure> {
        let Some(frame) = site.frame else {
            self.emit(insn.clone());
            return Ok(());
        };
        let desc = MethodDesc::parse(&site.callee.desc)
            .map_err(|e| TransformFailure::BadDescriptor(e.0))?;
        let has_receiver = site.kind.has_receiver();
        let width = desc.params.len() + usize::from(has_receiver);
        let split = frame
            .stack
            .len()
            .checked_sub(width)
            .ok_or(TransformFailure::StaleAnalysis)?;
        let (below, window) = frame.stack.split_at(split);
        let shape = CallShape {
            below,
            window,
            has_receiver,
            result: desc.ret.as_ref().map(FieldType::kind),
        };
        let labels = SiteLabels {
            pre: self.label(),
            call: self.label(),
            staged: self.label(),
            invoke: self.label(),
            invoke_end: self.label(),
            handler: self.label(),
            rethrow: self.label(),
            after: self.label(),
            no_yield: self.label(),
            post: self.label(),
        };

        self.emit(Insn::Label(labels.pre));
        self.emit(Insn::Goto(labels.call));
        self.emit(Insn::Label(site.resume));
        self.restore(site, frame, &shape);

        self.emit(Insn::Label(labels.call));
        if site.unpatchable {
            self.stage_arguments(&shape, labels.staged);
        }
        self.emit(Insn::Label(labels.invoke));
        self.emit(insn.clone());
        self.emit(Insn::Label(labels.invoke_end));
        if site.unpatchable {
            self.emit(Insn::Goto(labels.after));
            self.emit(Insn::Label(labels.handler));
            self.end_staging_guarded(labels.rethrow);
            self.emit(Insn::AThrow);
            self.handlers.push(TryCatch {
                start: labels.invoke,
                end: labels.invoke_end,
                handler: labels.handler,
                catch_type: None,
            });
        }

        self.emit(Insn::Label(labels.after));
        self.call(abi::is_yielding());
        self.emit(Insn::If(Cond::Eq, labels.no_yield));
        self.save(site, frame, &shape);
        self.emit(Insn::Label(labels.no_yield));
        if site.unpatchable {
            // binds `post`
            self.end_staging_guarded(labels.post);
        } else {
            self.emit(Insn::Label(labels.post));
        }

        self.exclusions.push(Exclusion {
            start: labels.pre,
            end: labels.invoke,
        });
        self.exclusions.push(Exclusion {
            start: labels.after,
            end: labels.post,
        });
        Ok(())
    }

    /// Push a value restored from main storage, or a null constant for exact nulls.
    fn restore_value(&mut self, category: &ValueCategory) {
        match category {
            ValueCategory::Null => self.emit(Insn::AConstNull),
            other => {
                if let Some(kind) = other.kind() {
                    self.emit_all(accessor(kind).pop(other));
                }
            }
        }
    }

    fn restore(&mut self, site: &Site<'_>, frame: &Frame, shape: &CallShape<'_>) {
        for (slot, category) in frame.locals.iter().enumerate().rev() {
            let Some(kind) = category.kind() else { continue };
            let access = accessor(kind);
            self.emit_all(access.pop(category));
            self.emit(access.store(slot as u16));
        }
        for category in shape.below {
            self.restore_value(category);
        }
        if let Some(receiver) = shape.receiver() {
            self.restore_value(receiver);
        }
        for arg in shape.args() {
            if site.unpatchable {
                self.restore_value(arg);
            } else if let Some(kind) = arg.kind() {
                self.emit(accessor(kind).default_value());
            }
        }
    }

    /// Copy the receiver and arguments into a fresh staging frame, then back onto the
    /// operand stack.
    fn stage_arguments(&mut self, shape: &CallShape<'_>, staged: Label) {
        self.call(abi::exists());
        self.emit(Insn::If(Cond::Eq, staged));
        self.call(abi::begin_staging());
        // exact nulls are rematerialized, never staged
        for category in shape.window.iter().rev() {
            match category.kind() {
                Some(_) if *category == ValueCategory::Null => self.emit(Insn::Pop),
                Some(kind) => self.emit_all(accessor(kind).stage()),
                None => {}
            }
        }
        for (i, category) in shape.window.iter().enumerate() {
            let Some(kind) = category.kind() else { continue };
            if *category == ValueCategory::Null {
                self.emit(Insn::AConstNull);
                continue;
            }
            // values staged after this one sit above it in its typed stack
            let depth = shape.window[..i]
                .iter()
                .filter(|c| c.kind() == Some(kind) && **c != ValueCategory::Null)
                .count();
            self.emit_all(accessor(kind).peek_staged(depth, category));
        }
        self.emit(Insn::Label(staged));
    }

    fn end_staging_guarded(&mut self, skip: Label) {
        self.call(abi::exists());
        self.emit(Insn::If(Cond::Eq, skip));
        self.call(abi::end_staging());
        self.emit(Insn::Label(skip));
    }

    fn save(&mut self, site: &Site<'_>, frame: &Frame, shape: &CallShape<'_>) {
        if let Some(result) = shape.result {
            self.emit(accessor(result).discard());
        }
        if site.unpatchable {
            self.call(abi::discard_companion());
            self.call(abi::commit_staging());
        }
        for category in shape.below.iter().rev() {
            match category.kind() {
                Some(_) if *category == ValueCategory::Null => self.emit(Insn::Pop),
                Some(kind) => self.emit_all(accessor(kind).push()),
                None => {}
            }
        }
        for (slot, category) in frame.locals.iter().enumerate() {
            let Some(kind) = category.kind() else { continue };
            let access = accessor(kind);
            self.emit(access.load(slot as u16));
            self.emit_all(access.push());
        }
        self.emit(Insn::IConst(site.index));
        self.call(abi::push_state());

        if self.analysis.root_entry {
            self.emit(if self.is_static {
                Insn::AConstNull
            } else {
                Insn::Load(Kind::Ref, 0)
            });
            self.call(abi::push_companion());
        } else if !self.is_static {
            self.emit(Insn::Load(Kind::Ref, 0));
            self.call(abi::push_companion());
        }
        self.default_return();
    }
}
