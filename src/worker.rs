//! Dedicated analysis thread with a Stopped / Running / Paused lifecycle.
//!
//! The thread repeatedly runs one iteration closure while the run flag is
//! set. Stopping clears the flag, runs the `on_stopping` hook (which must wake
//! anything the iteration may be blocked on) and joins the thread. No
//! timeouts are involved; termination is driven by that wake-up.
//!
//! `start` and a joining `stop` are serialized, so a start that races a stop
//! runs its `on_starting` hook only after the old thread is gone.

use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Paused,
}

/// What the loop should do after an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit,
}

/// Transition hooks, run on the thread that requested the transition.
pub trait WorkerHooks: Send + Sync {
    fn on_starting(&self) {}
    fn on_pausing(&self) {}
    fn on_resuming(&self) {}
    /// Must unblock any wait the iteration can be suspended in.
    fn on_stopping(&self) {}
}

/// Hooks that do nothing.
pub struct NoHooks;

impl WorkerHooks for NoHooks {}

/// Flags observed by the running iteration.
#[derive(Debug, Default)]
pub struct WorkerControl {
    running: AtomicBool,
    paused: AtomicBool,
}

impl WorkerControl {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

struct Active {
    control: Arc<WorkerControl>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

struct Inner {
    state: WorkerState,
    active: Option<Active>,
}

pub struct Worker {
    name: String,
    hooks: Arc<dyn WorkerHooks>,
    inner: Mutex<Inner>,
    transition: Mutex<()>,
}

impl Worker {
    pub fn new(name: impl Into<String>, hooks: Arc<dyn WorkerHooks>) -> Self {
        Self {
            name: name.into(),
            hooks,
            inner: Mutex::new(Inner {
                state: WorkerState::Stopped,
                active: None,
            }),
            transition: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Spawn the thread and start looping `iteration`.
    ///
    /// Errors and panics from one iteration are logged and the loop goes on;
    /// `Ok(Step::Exit)` ends it.
    pub fn start<F>(&self, mut iteration: F) -> Result<()>
    where
        F: FnMut(&WorkerControl) -> Result<Step> + Send + 'static,
    {
        let _transition = self.lock_transition();
        let mut inner = self.lock();
        if inner.state != WorkerState::Stopped {
            return Err(anyhow!(
                "worker '{}' cannot start from {:?}",
                self.name,
                inner.state
            ));
        }
        self.hooks.on_starting();

        let control = Arc::new(WorkerControl::default());
        control.running.store(true, Ordering::SeqCst);
        let thread_control = control.clone();
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                log::debug!("worker '{}' started", name);
                while thread_control.is_running() {
                    match catch_unwind(AssertUnwindSafe(|| iteration(&thread_control))) {
                        Ok(Ok(Step::Continue)) => {}
                        Ok(Ok(Step::Exit)) => break,
                        Ok(Err(e)) => log::error!("worker '{}' iteration failed: {:#}", name, e),
                        Err(_) => log::error!("worker '{}' iteration panicked", name),
                    }
                }
                log::debug!("worker '{}' exited", name);
            })
            .map_err(|e| anyhow!("failed to spawn worker '{}': {}", self.name, e))?;

        inner.active = Some(Active {
            control,
            thread_id: handle.thread().id(),
            handle,
        });
        inner.state = WorkerState::Running;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let mut inner = self.lock();
        match (inner.state, inner.active.as_ref()) {
            (WorkerState::Running, Some(active)) => {
                active.control.paused.store(true, Ordering::SeqCst);
                self.hooks.on_pausing();
                inner.state = WorkerState::Paused;
                Ok(())
            }
            (state, _) => Err(anyhow!("worker '{}' cannot pause from {:?}", self.name, state)),
        }
    }

    pub fn resume(&self) -> Result<()> {
        let mut inner = self.lock();
        match (inner.state, inner.active.as_ref()) {
            (WorkerState::Paused, Some(active)) => {
                active.control.paused.store(false, Ordering::SeqCst);
                self.hooks.on_resuming();
                inner.state = WorkerState::Running;
                Ok(())
            }
            (state, _) => Err(anyhow!("worker '{}' cannot resume from {:?}", self.name, state)),
        }
    }

    /// Stop the thread and wait for it. Safe to call repeatedly and from any
    /// thread; called from the worker itself it only signals.
    pub fn stop(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            let on_own_thread = inner
                .active
                .as_ref()
                .is_some_and(|active| active.thread_id == std::thread::current().id());
            if on_own_thread {
                if let Some(active) = self.signal_stop(&mut inner) {
                    log::debug!("worker '{}' stop requested from its own thread", self.name);
                    drop(active.handle);
                }
                return Ok(());
            }
        }

        let _transition = self.lock_transition();
        let active = {
            let mut inner = self.lock();
            self.signal_stop(&mut inner)
        };
        let Some(active) = active else {
            return Ok(());
        };
        active
            .handle
            .join()
            .map_err(|_| anyhow!("worker '{}' thread panicked", self.name))
    }

    /// Mark the worker stopped and wake the iteration, all under the state
    /// lock. Returns the thread to join, if there was one.
    fn signal_stop(&self, inner: &mut Inner) -> Option<Active> {
        inner.state = WorkerState::Stopped;
        let active = inner.active.take()?;
        active.control.running.store(false, Ordering::SeqCst);
        self.hooks.on_stopping();
        Some(active)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
    }
}
