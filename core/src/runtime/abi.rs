//! Names and descriptors of the `corofy/Coro` methods that rewritten code calls.

use crate::bytecode::{Kind, MethodId};

pub const CORO_CLASS: &str = "corofy/Coro";
pub const CORO_DESC: &str = "Lcorofy/Coro;";
pub const RUNNABLE: &str = "java/lang/Runnable";

fn coro(name: &str, desc: &str) -> MethodId {
    MethodId::new(CORO_CLASS, name, desc)
}

fn suffix(kind: Kind) -> &'static str {
    match kind {
        Kind::Int => "Int",
        Kind::Long => "Long",
        Kind::Float => "Float",
        Kind::Double => "Double",
        Kind::Ref => "Ref",
    }
}

/// Descriptor of a stored value of `kind`. References are stored as `Object`.
pub fn value_desc(kind: Kind) -> &'static str {
    match kind {
        Kind::Int => "I",
        Kind::Long => "J",
        Kind::Float => "F",
        Kind::Double => "D",
        Kind::Ref => "Ljava/lang/Object;",
    }
}

pub fn exists() -> MethodId {
    coro("exists", "()Z")
}

pub fn get() -> MethodId {
    coro("get", "()Lcorofy/Coro;")
}

pub fn is_yielding() -> MethodId {
    coro("isYielding", "()Z")
}

pub fn pop_state() -> MethodId {
    coro("popState", "()I")
}

pub fn push_state() -> MethodId {
    coro("pushState", "(I)V")
}

pub fn push(kind: Kind) -> MethodId {
    coro(&format!("push{}", suffix(kind)), &format!("({})V", value_desc(kind)))
}

pub fn pop(kind: Kind) -> MethodId {
    coro(&format!("pop{}", suffix(kind)), &format!("(){}", value_desc(kind)))
}

pub fn push_companion() -> MethodId {
    coro("pushCompanion", "(Ljava/lang/Object;)V")
}

pub fn discard_companion() -> MethodId {
    coro("discardCompanion", "()V")
}

pub fn begin_staging() -> MethodId {
    coro("beginStaging", "()V")
}

pub fn stage(kind: Kind) -> MethodId {
    coro(&format!("stage{}", suffix(kind)), &format!("({})V", value_desc(kind)))
}

pub fn peek_staged(kind: Kind) -> MethodId {
    coro(
        &format!("peekStaged{}", suffix(kind)),
        &format!("(I){}", value_desc(kind)),
    )
}

pub fn commit_staging() -> MethodId {
    coro("commitStaging", "()V")
}

pub fn end_staging() -> MethodId {
    coro("endStaging", "()V")
}

pub fn invalid_dispatch() -> MethodId {
    coro("invalidDispatch", "(Ljava/lang/String;)V")
}

/* ===== Application-facing surface ===== */

pub fn init_suspended() -> MethodId {
    coro("initSuspended", "(Ljava/lang/Runnable;)Lcorofy/Coro;")
}

pub fn start() -> MethodId {
    coro("start", "()V")
}

pub fn resume() -> MethodId {
    coro("resume", "()V")
}

pub fn yield_now() -> MethodId {
    coro("yield", "()V")
}

pub fn yield_with() -> MethodId {
    coro("yield", "(Ljava/lang/Runnable;)V")
}

pub fn is_done() -> MethodId {
    coro("isDone", "()Z")
}
