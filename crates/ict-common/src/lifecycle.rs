//! # Component Lifecycle
//!
//! Every long-running component (dispatch bus, receive loop, send loop,
//! node, facade) owns a [`Lifecycle`] and drives it through the fixed cycle
//!
//! ```text
//! terminated → starting → running → terminating → terminated
//! ```
//!
//! `start()` is legal only from `Terminated`, `terminate()` only from
//! `Running`. Any other call is a programming error and is reported as
//! [`LifecycleError::IllegalTransition`] — never a silent no-op.
//!
//! Components with sub-components follow the same ordering everywhere:
//! `start` runs the component's own pre-start hook, then starts its
//! sub-components, then spawns its own task; `terminate` runs the
//! pre-terminate hook (unblocking the task), awaits the task's exit, then
//! terminates sub-components. Children never start before or outlive their
//! parent.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// The four states of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not running; the only state `start()` is legal from.
    Terminated,
    /// Pre-start hook and sub-component startup in progress.
    Starting,
    /// The component's task is live; the only state `terminate()` is legal from.
    Running,
    /// Pre-terminate hook ran; waiting for the task and sub-components.
    Terminating,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Terminated => "terminated",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Lifecycle misuse, reported instead of panicking or ignoring the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested action is not legal from the current state.
    #[error("'{component}' cannot perform '{action}' from state '{state}'")]
    IllegalTransition {
        component: &'static str,
        action: &'static str,
        state: LifecycleState,
    },
}

/// State holder embedded in every component.
///
/// The transition table lives in [`Lifecycle::advance`]; call sites use the
/// named helpers (`begin_start`, `mark_running`, ...) so the legal cycle is
/// visible at a glance.
#[derive(Debug)]
pub struct Lifecycle {
    component: &'static str,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            state: Mutex::new(LifecycleState::Terminated),
        }
    }

    /// Current state (snapshot).
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// `true` while the component's task should keep looping.
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// `Terminated → Starting`; entry point of `start()`.
    pub fn begin_start(&self) -> Result<(), LifecycleError> {
        self.advance("start", LifecycleState::Terminated, LifecycleState::Starting)
    }

    /// `Starting → Running`; the component's task is about to spawn.
    pub fn mark_running(&self) -> Result<(), LifecycleError> {
        self.advance("run", LifecycleState::Starting, LifecycleState::Running)
    }

    /// `Starting → Terminated`; startup failed before the task spawned.
    pub fn abort_start(&self) -> Result<(), LifecycleError> {
        self.advance(
            "abort start",
            LifecycleState::Starting,
            LifecycleState::Terminated,
        )
    }

    /// `Running → Terminating`; entry point of `terminate()`.
    pub fn begin_terminate(&self) -> Result<(), LifecycleError> {
        self.advance(
            "terminate",
            LifecycleState::Running,
            LifecycleState::Terminating,
        )
    }

    /// `Terminating → Terminated`; the task exited and children are down.
    pub fn mark_terminated(&self) -> Result<(), LifecycleError> {
        self.advance(
            "finish termination",
            LifecycleState::Terminating,
            LifecycleState::Terminated,
        )
    }

    fn advance(
        &self,
        action: &'static str,
        expected: LifecycleState,
        next: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        if *state != expected {
            return Err(LifecycleError::IllegalTransition {
                component: self.component,
                action,
                state: *state,
            });
        }
        debug!(component = self.component, from = %*state, to = %next, "lifecycle transition");
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_legal() {
        let lc = Lifecycle::new("test");
        assert_eq!(lc.state(), LifecycleState::Terminated);
        lc.begin_start().unwrap();
        lc.mark_running().unwrap();
        assert!(lc.is_running());
        lc.begin_terminate().unwrap();
        lc.mark_terminated().unwrap();
        assert_eq!(lc.state(), LifecycleState::Terminated);
    }

    #[test]
    fn double_start_fails_fast() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.mark_running().unwrap();
        let err = lc.begin_start().unwrap_err();
        assert_eq!(
            err,
            LifecycleError::IllegalTransition {
                component: "test",
                action: "start",
                state: LifecycleState::Running,
            }
        );
    }

    #[test]
    fn terminate_before_start_fails_fast() {
        let lc = Lifecycle::new("test");
        assert!(matches!(
            lc.begin_terminate(),
            Err(LifecycleError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn aborted_start_allows_retry() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.abort_start().unwrap();
        assert_eq!(lc.state(), LifecycleState::Terminated);
        lc.begin_start().unwrap();
    }

    #[test]
    fn restart_after_full_cycle() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.mark_running().unwrap();
        lc.begin_terminate().unwrap();
        lc.mark_terminated().unwrap();
        // A terminated component may be started again.
        lc.begin_start().unwrap();
    }
}
