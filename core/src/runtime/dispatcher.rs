//! Resumes coroutines on a tokio blocking pool.
//!
//! A coroutine keeps no state on the thread that suspended it, so any pool thread can
//! resume it. `resume()` never blocks, but it runs arbitrary application code, which is
//! why it goes to the blocking pool rather than onto an async worker.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Coro, Throw};
use crate::error::Error;

/// Posts `resume()` calls onto a runtime's blocking pool.
#[derive(Clone)]
pub struct Dispatcher {
    handle: Handle,
}

impl Dispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher for the runtime this is called from.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Resume `coro` on a pool thread; the handle resolves to the resume outcome.
    pub fn post(&self, coro: Arc<Coro>) -> JoinHandle<Result<(), Throw>> {
        debug!(coro = coro.id(), "posting resume");
        self.handle.spawn_blocking(move || coro.resume())
    }

    /// Resume `coro` on a pool thread and wait for it to yield or finish.
    pub async fn resume(&self, coro: Arc<Coro>) -> Result<(), Throw> {
        self.post(coro)
            .await
            .map_err(|e| Throw::Fault(Error::execution(format!("resume task failed: {}", e))))?
    }
}
