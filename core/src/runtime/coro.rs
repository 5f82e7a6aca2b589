use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use super::registry;
use super::storage::{Marks, SavedRef, Storage};
use super::value::{Obj, ObjRef, Value};
use super::Throw;
use crate::bytecode::Kind;
use crate::error::Invariant;

/// Body of a coroutine. Called once per `resume()`; rewritten code inside it restores
/// its own position from the coroutine's saved state.
pub type Entry = Box<dyn FnMut() -> Result<(), Throw> + Send>;

/// Work scheduled by `yield_with`, run once `resume()` has fully unwound.
pub type Continuation = Box<dyn FnOnce() -> Result<(), Throw> + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, never run.
    Initial,
    Running,
    /// Stopped at a yield, waiting for `resume()`.
    Suspended,
    /// Entry returned (or threw) without a pending yield.
    Terminal,
}

struct CoroState {
    status: Status,
    states: Vec<i32>,
    storage: Storage,
    staging: Storage,
    staging_frames: Vec<Marks>,
    is_yielding: bool,
    suspended_after_yield: bool,
    /// Last storage operation pushed a receiver companion.
    companion_on_top: bool,
    deferred: Option<Continuation>,
}

/// One suspendable execution.
pub struct Coro {
    id: u64,
    state: Mutex<CoroState>,
    entry: Mutex<Option<Entry>>,
}

impl fmt::Debug for Coro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coro")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Coro {
    /// Create a coroutine that runs `entry` on its first `start()`/`resume()`.
    pub fn init_suspended<F>(entry: F) -> Arc<Coro>
    where
        F: FnMut() -> Result<(), Throw> + Send + 'static,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        trace!(coro = id, "created");
        Arc::new(Coro {
            id,
            state: Mutex::new(CoroState {
                status: Status::Initial,
                states: Vec::new(),
                storage: Storage::default(),
                staging: Storage::default(),
                staging_frames: Vec::new(),
                is_yielding: false,
                suspended_after_yield: false,
                companion_on_top: false,
                deferred: None,
            }),
            entry: Mutex::new(Some(Box::new(entry))),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoroState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn is_done(&self) -> bool {
        self.status() == Status::Terminal
    }

    /// Saved restore-point indices, outermost last.
    pub fn saved_states(&self) -> Vec<i32> {
        self.lock().states.clone()
    }

    /// Whether any value is held in main storage or in a staging frame.
    pub fn has_saved_values(&self) -> bool {
        let state = self.lock();
        !state.storage.is_empty() || !state.staging.is_empty()
    }

    pub fn start(self: &Arc<Self>) -> Result<(), Throw> {
        self.resume()
    }

    /// Run the coroutine until it yields or finishes.
    pub fn resume(self: &Arc<Self>) -> Result<(), Throw> {
        {
            let mut state = self.lock();
            match state.status {
                Status::Terminal => return Err(Invariant::ResumeTerminal { id: self.id }.into()),
                Status::Running => return Err(Invariant::AlreadyRunning { id: self.id }.into()),
                Status::Suspended => {
                    // root placeholder left by the outermost frame
                    state.storage.pop_ref()?;
                }
                Status::Initial => {}
            }
            state.status = Status::Running;
        }
        let Some(mut entry) = self.take_entry() else {
            self.lock().status = Status::Terminal;
            return Err(Invariant::AlreadyRunning { id: self.id }.into());
        };

        trace!(coro = self.id, "resuming");
        let outcome = {
            let _active = registry::activate(self);
            entry()
        };
        *self.entry.lock().unwrap_or_else(|p| p.into_inner()) = Some(entry);

        let deferred = {
            let mut state = self.lock();
            let yielded = outcome.is_ok() && state.is_yielding;
            state.is_yielding = false;
            if yielded {
                state.suspended_after_yield = true;
                state.status = Status::Suspended;
                state.deferred.take()
            } else {
                state.status = Status::Terminal;
                state.deferred = None;
                None
            }
        };
        trace!(coro = self.id, status = ?self.status(), "resume returned");

        outcome?;
        if let Some(continuation) = deferred {
            continuation()?;
        }
        Ok(())
    }

    fn take_entry(&self) -> Option<Entry> {
        self.entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Suspend the coroutine. Rewritten callers observe `is_yielding()` and unwind.
    pub fn yield_now(self: &Arc<Self>) -> Result<(), Invariant> {
        self.yield_inner(None)
    }

    /// Suspend and run `continuation` once the current `resume()` has returned.
    pub fn yield_with(self: &Arc<Self>, continuation: Continuation) -> Result<(), Invariant> {
        self.yield_inner(Some(continuation))
    }

    fn yield_inner(self: &Arc<Self>, continuation: Option<Continuation>) -> Result<(), Invariant> {
        let mut state = self.lock();
        if state.suspended_after_yield {
            // re-executed yield on the resume path
            state.suspended_after_yield = false;
            return Ok(());
        }
        if state.status != Status::Running {
            return Err(Invariant::NotRunning { id: self.id });
        }
        if state.is_yielding {
            return Err(Invariant::DoubleYield { id: self.id });
        }
        trace!(coro = self.id, "yield");
        state.is_yielding = true;
        state.deferred = continuation;
        state.storage.push_ref(SavedRef::Own);
        state.companion_on_top = true;
        Ok(())
    }

    pub fn is_yielding(&self) -> bool {
        self.lock().is_yielding
    }

    /* ===================== Storage ===================== */

    fn save_ref(self: &Arc<Self>, value: Option<ObjRef>) -> SavedRef {
        let own = value
            .as_ref()
            .and_then(|obj| obj.as_coro())
            .is_some_and(|c| Arc::ptr_eq(c, self));
        if own {
            SavedRef::Own
        } else {
            SavedRef::Value(value)
        }
    }

    fn load_ref(self: &Arc<Self>, saved: &SavedRef) -> Value {
        match saved {
            SavedRef::Value(value) => Value::Ref(value.clone()),
            SavedRef::Own => Value::obj(Obj::coro(self.clone())),
        }
    }

    pub(crate) fn push_state(&self, index: i32) {
        let mut state = self.lock();
        state.states.push(index);
        state.companion_on_top = false;
    }

    /// Innermost saved index, `-1` when none is left.
    pub(crate) fn pop_state(&self) -> i32 {
        self.lock().states.pop().unwrap_or(-1)
    }

    pub(crate) fn push(self: &Arc<Self>, value: Value) -> Result<(), Invariant> {
        let saved = match &value {
            Value::Ref(r) => Some(self.save_ref(r.clone())),
            _ => None,
        };
        let mut state = self.lock();
        match saved {
            Some(saved) => state.storage.push_ref(saved),
            None => state.storage.push_primitive(&value)?,
        }
        state.companion_on_top = false;
        Ok(())
    }

    pub(crate) fn pop(self: &Arc<Self>, kind: Kind) -> Result<Value, Invariant> {
        let mut state = self.lock();
        state.companion_on_top = false;
        if kind == Kind::Ref {
            let saved = state.storage.pop_ref()?;
            drop(state);
            Ok(self.load_ref(&saved))
        } else {
            state.storage.pop_primitive(kind)
        }
    }

    pub(crate) fn push_companion(self: &Arc<Self>, value: Option<ObjRef>) {
        let saved = self.save_ref(value);
        let mut state = self.lock();
        state.storage.push_ref(saved);
        state.companion_on_top = true;
    }

    /// Drop the companion left by a callee that suspended inside unpatchable code.
    pub(crate) fn discard_companion(&self) -> Result<(), Invariant> {
        let mut state = self.lock();
        if state.companion_on_top {
            state.storage.pop_ref()?;
            state.companion_on_top = false;
        }
        Ok(())
    }

    pub(crate) fn begin_staging(&self) {
        let mut state = self.lock();
        let marks = state.staging.marks();
        state.staging_frames.push(marks);
    }

    pub(crate) fn stage(self: &Arc<Self>, value: Value) -> Result<(), Invariant> {
        let saved = match &value {
            Value::Ref(r) => Some(self.save_ref(r.clone())),
            _ => None,
        };
        let mut state = self.lock();
        if state.staging_frames.is_empty() {
            return Err(Invariant::NoStagingFrame);
        }
        match saved {
            Some(saved) => state.staging.push_ref(saved),
            None => state.staging.push_primitive(&value)?,
        }
        Ok(())
    }

    /// Value `depth` positions below the top of the current staging frame.
    pub(crate) fn peek_staged(self: &Arc<Self>, kind: Kind, depth: usize) -> Result<Value, Invariant> {
        let state = self.lock();
        let floor = *state.staging_frames.last().ok_or(Invariant::NoStagingFrame)?;
        let underflow = Invariant::StagingUnderflow { kind, depth };
        if kind == Kind::Ref {
            let saved = state
                .staging
                .peek_ref(depth, &floor)
                .cloned()
                .ok_or(underflow)?;
            drop(state);
            Ok(self.load_ref(&saved))
        } else {
            state
                .staging
                .peek_primitive(kind, depth, &floor)
                .ok_or(underflow)
        }
    }

    /// Move the current staging frame into main storage and close it.
    pub(crate) fn commit_staging(&self) -> Result<(), Invariant> {
        let mut state = self.lock();
        let floor = state.staging_frames.pop().ok_or(Invariant::NoStagingFrame)?;
        let CoroState {
            staging, storage, ..
        } = &mut *state;
        staging.move_above(&floor, storage);
        state.companion_on_top = false;
        Ok(())
    }

    /// Discard the current staging frame.
    pub(crate) fn end_staging(&self) -> Result<(), Invariant> {
        let mut state = self.lock();
        let floor = state.staging_frames.pop().ok_or(Invariant::NoStagingFrame)?;
        state.staging.truncate(&floor);
        Ok(())
    }
}
