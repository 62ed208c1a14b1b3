//! Shared run record mutated by the stage loop and by remote commands.
//!
//! A single mutex guards every field. Observers are called with a snapshot
//! after each mutation, outside the state lock; they must not mutate the
//! state themselves.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{CancelToken, Clock};
use crate::types::{RunStatus, StageId};

#[derive(Debug, Clone)]
pub struct RunState {
    /// `None` until the first run enters a stage.
    pub stage: Option<StageId>,
    pub status: String,
    pub stage_entered: Instant,
    pub running: bool,
    pub paused: bool,
    pub timeout_notified: bool,
    pub last_notification: Option<Instant>,
}

impl RunState {
    pub fn run_status(&self) -> RunStatus {
        match (self.running, self.paused, self.stage) {
            (true, true, _) => RunStatus::Paused,
            (true, false, _) => RunStatus::Running,
            (false, _, None) => RunStatus::NotStarted,
            (false, _, Some(_)) => RunStatus::Stopped,
        }
    }
}

/// Outcome of a pause / resume / stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Applied,
    Unchanged,
    NotRunning,
}

/// Watchdog claim on the current stage occupancy.
#[derive(Debug, Clone)]
pub struct TimeoutClaim {
    pub stage: Option<StageId>,
    pub status: String,
    pub elapsed: Duration,
}

pub type Observer = Box<dyn Fn(&RunState) + Send + Sync>;

pub struct SharedState {
    inner: Mutex<RunState>,
    clock: Arc<dyn Clock>,
    cancel: Mutex<Option<CancelToken>>,
    observers: Mutex<Vec<Observer>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Mutex::new(RunState {
                stage: None,
                status: "idle".to_string(),
                stage_entered: now,
                running: false,
                paused: false,
                timeout_notified: false,
                last_notification: None,
            }),
            clock,
            cancel: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn snapshot(&self) -> RunState {
        lock(&self.inner).clone()
    }

    pub fn observe(&self, f: impl Fn(&RunState) + Send + Sync + 'static) {
        lock(&self.observers).push(Box::new(f));
    }

    fn update<R>(&self, f: impl FnOnce(&mut RunState, Instant) -> R) -> R {
        let now = self.clock.now();
        let (result, snapshot) = {
            let mut s = lock(&self.inner);
            let result = f(&mut s, now);
            (result, s.clone())
        };
        for observer in lock(&self.observers).iter() {
            observer(&snapshot);
        }
        result
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).running
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner).paused
    }

    pub fn stage(&self) -> Option<StageId> {
        lock(&self.inner).stage
    }

    pub fn elapsed_in_stage(&self) -> Duration {
        let entered = lock(&self.inner).stage_entered;
        self.clock.now().saturating_duration_since(entered)
    }

    /// Mark a run as started and remember its token. False if one is active.
    /// A new run always begins a new stage occupancy.
    pub fn begin_run(&self, token: CancelToken) -> bool {
        let started = self.update(|s, now| {
            if s.running {
                return false;
            }
            s.running = true;
            s.paused = false;
            s.stage_entered = now;
            s.timeout_notified = false;
            true
        });
        if started {
            *lock(&self.cancel) = Some(token);
        }
        started
    }

    /// Move to `stage`. Timestamps reset only on an actual change.
    pub fn enter_stage(&self, stage: StageId) -> bool {
        self.update(|s, now| {
            if s.stage == Some(stage) {
                return false;
            }
            s.stage = Some(stage);
            s.stage_entered = now;
            s.timeout_notified = false;
            true
        })
    }

    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s, _| s.status = text);
    }

    pub fn pause(&self) -> FlagChange {
        self.update(|s, _| {
            if !s.running {
                FlagChange::NotRunning
            } else if s.paused {
                FlagChange::Unchanged
            } else {
                s.paused = true;
                FlagChange::Applied
            }
        })
    }

    pub fn resume(&self) -> FlagChange {
        self.update(|s, _| {
            if !s.running {
                FlagChange::NotRunning
            } else if !s.paused {
                FlagChange::Unchanged
            } else {
                s.paused = false;
                FlagChange::Applied
            }
        })
    }

    /// Clear the run flags and cancel the active loop.
    pub fn stop(&self) -> FlagChange {
        let change = self.update(|s, _| {
            if !s.running {
                return FlagChange::Unchanged;
            }
            s.running = false;
            s.paused = false;
            FlagChange::Applied
        });
        if let Some(token) = lock(&self.cancel).take() {
            token.cancel();
        }
        change
    }

    /// Claim the one timeout notification allowed for the current stage
    /// occupancy, if `threshold` has been exceeded.
    pub fn claim_timeout(&self, threshold: Duration) -> Option<TimeoutClaim> {
        self.update(|s, now| {
            if s.timeout_notified {
                return None;
            }
            let elapsed = now.saturating_duration_since(s.stage_entered);
            if elapsed <= threshold {
                return None;
            }
            s.timeout_notified = true;
            s.last_notification = Some(now);
            Some(TimeoutClaim { stage: s.stage, status: s.status.clone(), elapsed })
        })
    }
}
