//! Storage operations on the active coroutine.
//!
//! These are what rewritten code calls (through the `corofy/Coro` natives). Apart from
//! the two queries, they fail with [`Invariant::NoActiveCoroutine`] when no coroutine
//! runs on this thread.

use super::registry;
use super::value::{ObjRef, Value};
use crate::bytecode::Kind;
use crate::error::Invariant;

pub fn exists() -> bool {
    registry::exists()
}

/// `false` outside a coroutine, so rewritten code called normally takes the fresh path.
pub fn is_yielding() -> bool {
    registry::current().is_some_and(|coro| coro.is_yielding())
}

pub fn push_state(index: i32) -> Result<(), Invariant> {
    registry::require()?.push_state(index);
    Ok(())
}

/// Saved restore-point index of the calling frame, `-1` when it starts fresh.
pub fn pop_state() -> Result<i32, Invariant> {
    Ok(registry::require()?.pop_state())
}

pub fn push(value: Value) -> Result<(), Invariant> {
    registry::require()?.push(value)
}

pub fn pop(kind: Kind) -> Result<Value, Invariant> {
    registry::require()?.pop(kind)
}

pub fn push_companion(receiver: Option<ObjRef>) -> Result<(), Invariant> {
    registry::require()?.push_companion(receiver);
    Ok(())
}

pub fn discard_companion() -> Result<(), Invariant> {
    registry::require()?.discard_companion()
}

pub fn begin_staging() -> Result<(), Invariant> {
    registry::require()?.begin_staging();
    Ok(())
}

pub fn stage(value: Value) -> Result<(), Invariant> {
    registry::require()?.stage(value)
}

pub fn peek_staged(kind: Kind, depth: usize) -> Result<Value, Invariant> {
    registry::require()?.peek_staged(kind, depth)
}

pub fn commit_staging() -> Result<(), Invariant> {
    registry::require()?.commit_staging()
}

pub fn end_staging() -> Result<(), Invariant> {
    registry::require()?.end_staging()
}
