//! Trailing-edge debouncing on the tokio runtime.
//!
//! Each [`Debouncer::schedule`] replaces whatever was scheduled before: the
//! previous task is aborted while it is still waiting out its delay, and only
//! the last scheduled future runs. A future that has already started (the
//! delay elapsed) is left to finish; callers that care about staleness check
//! a generation counter when the result comes back.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    handle: JoinHandle<()>,
    started: Arc<AtomicBool>,
}

pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn slot(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `task` once the delay passes without another `schedule` call.
    /// Outside a tokio runtime the task is dropped with a warning.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("No tokio runtime, debounced task dropped");
            return;
        };

        let mut slot = self.slot();
        if let Some(previous) = slot.take() {
            Self::abort_if_waiting(previous);
        }

        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let delay = self.delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            task.await;
        });

        *slot = Some(Pending { handle, started });
    }

    /// Drop whatever is still waiting. Returns true if a task was cancelled.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(pending) => Self::abort_if_waiting(pending),
            None => false,
        }
    }

    /// True while a scheduled task has not yet started running.
    pub fn is_pending(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|p| !p.started.load(Ordering::SeqCst) && !p.handle.is_finished())
    }

    fn abort_if_waiting(pending: Pending) -> bool {
        if pending.started.load(Ordering::SeqCst) {
            return false;
        }
        pending.handle.abort();
        true
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
