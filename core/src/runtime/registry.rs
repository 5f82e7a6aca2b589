//! Thread-scoped stack of running coroutines.
//!
//! The top entry is the coroutine that typed accessors operate on. Starting a coroutine
//! from inside another pushes a new entry; returning from `resume()` pops it.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use super::Coro;
use crate::error::Invariant;

thread_local! {
    static ACTIVE: RefCell<Vec<Weak<Coro>>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a coroutine registered as active; dropping it unregisters the coroutine.
pub(crate) struct Activation {
    // must be dropped on the thread that created it
    _not_send: PhantomData<*const ()>,
}

impl Drop for Activation {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

pub(crate) fn activate(coro: &Arc<Coro>) -> Activation {
    ACTIVE.with(|active| active.borrow_mut().push(Arc::downgrade(coro)));
    Activation {
        _not_send: PhantomData,
    }
}

/// The innermost running coroutine on this thread.
pub fn current() -> Option<Arc<Coro>> {
    ACTIVE.with(|active| active.borrow().last().and_then(Weak::upgrade))
}

pub fn exists() -> bool {
    ACTIVE.with(|active| !active.borrow().is_empty())
}

/// Number of coroutines nested on this thread.
pub fn depth() -> usize {
    ACTIVE.with(|active| active.borrow().len())
}

pub(crate) fn require() -> Result<Arc<Coro>, Invariant> {
    current().ok_or(Invariant::NoActiveCoroutine)
}
