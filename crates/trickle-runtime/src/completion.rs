#![forbid(unsafe_code)]

//! Completion handles for render invocations.
//!
//! Each `render` call returns a [`CompletionHandle`]. The engine keeps the
//! matching resolver in a [`CompletionTracker`], which holds at most one
//! outstanding resolver. A handle settles exactly once, with one of:
//!
//! | Result | When |
//! |--------|------|
//! | `Ok(RenderOutcome::Completed)` | every item was processed |
//! | `Ok(RenderOutcome::Aborted)` | `clear()` ran first |
//! | `Err(RenderError::Superseded)` | a newer `render` preempted it |
//!
//! A resolver that is dropped without settling aborts its handle, so a
//! handle is never left pending forever. Handles are cheap to clone and
//! can be waited on from another thread.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::session::Epoch;

/// Successful settlement of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The working list was exhausted.
    Completed { session: Epoch, rendered: usize },
    /// The session was cleared before it finished.
    Aborted { session: Epoch },
}

impl RenderOutcome {
    #[must_use]
    pub const fn session(&self) -> Epoch {
        match self {
            Self::Completed { session, .. } | Self::Aborted { session } => *session,
        }
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Rendered count for a completed session.
    #[must_use]
    pub const fn rendered(&self) -> Option<usize> {
        match self {
            Self::Completed { rendered, .. } => Some(*rendered),
            Self::Aborted { .. } => None,
        }
    }
}

/// Rejection of a render.
///
/// Supersession is an expected lifecycle event, not a failure to surface
/// to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    /// A newer render call replaced this one.
    Superseded { session: Epoch },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superseded { session } => write!(f, "render session {session} was superseded"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Settled value of a [`CompletionHandle`].
pub type RenderResult = Result<RenderOutcome, RenderError>;

struct Shared {
    state: Mutex<Option<RenderResult>>,
    cvar: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<RenderResult>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-side view of a render's completion.
#[derive(Clone)]
pub struct CompletionHandle {
    session: Epoch,
    inner: Arc<Shared>,
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("session", &self.session)
            .field("settled", &self.try_outcome())
            .finish()
    }
}

impl CompletionHandle {
    /// Session this handle belongs to.
    #[must_use]
    pub fn session(&self) -> Epoch {
        self.session
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// The settled result, if any.
    #[must_use]
    pub fn try_outcome(&self) -> Option<RenderResult> {
        *self.inner.lock()
    }

    /// Block until settled or `timeout` elapses.
    ///
    /// Only useful when the engine is driven from another thread; on the
    /// engine's own thread use [`try_outcome`](Self::try_outcome).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RenderResult> {
        let start = Instant::now();
        let mut state = self.inner.lock();
        loop {
            if let Some(result) = *state {
                return Some(result);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            let (guard, _) = self
                .inner
                .cvar
                .wait_timeout(state, timeout - elapsed)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

/// Engine-side resolver. Settles its handle at most once.
struct Completer {
    session: Epoch,
    inner: Arc<Shared>,
    settled: bool,
}

impl Completer {
    fn new(session: Epoch) -> (Self, CompletionHandle) {
        let inner = Arc::new(Shared {
            state: Mutex::new(None),
            cvar: Condvar::new(),
        });
        let handle = CompletionHandle {
            session,
            inner: Arc::clone(&inner),
        };
        (
            Self {
                session,
                inner,
                settled: false,
            },
            handle,
        )
    }

    fn settle(&mut self, result: RenderResult) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut state = self.inner.lock();
        if state.is_none() {
            *state = Some(result);
            self.inner.cvar.notify_all();
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let session = self.session;
        self.settle(Ok(RenderOutcome::Aborted { session }));
    }
}

/// Holds the single outstanding resolver.
#[derive(Default)]
pub struct CompletionTracker {
    outstanding: Option<Completer>,
}

impl fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("outstanding", &self.outstanding.as_ref().map(|c| c.session))
            .finish()
    }
}

impl CompletionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a handle for `session`. Any outstanding handle is superseded.
    pub fn issue(&mut self, session: Epoch) -> CompletionHandle {
        self.supersede();
        let (completer, handle) = Completer::new(session);
        self.outstanding = Some(completer);
        handle
    }

    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Session of the outstanding handle.
    #[must_use]
    pub fn outstanding_session(&self) -> Option<Epoch> {
        self.outstanding.as_ref().map(|c| c.session)
    }

    /// Resolve the outstanding handle as completed.
    pub fn complete(&mut self, rendered: usize) -> bool {
        self.take_and_settle(|session| Ok(RenderOutcome::Completed { session, rendered }))
    }

    /// Resolve the outstanding handle as aborted.
    pub fn abort(&mut self) -> bool {
        self.take_and_settle(|session| Ok(RenderOutcome::Aborted { session }))
    }

    /// Reject the outstanding handle as superseded.
    pub fn supersede(&mut self) -> bool {
        self.take_and_settle(|session| Err(RenderError::Superseded { session }))
    }

    fn take_and_settle(&mut self, make: impl FnOnce(Epoch) -> RenderResult) -> bool {
        match self.outstanding.take() {
            Some(mut completer) => {
                let result = make(completer.session);
                completer.settle(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn handle_starts_pending() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(1);
        assert!(!handle.is_settled());
        assert!(tracker.is_outstanding());
        assert_eq!(tracker.outstanding_session(), Some(1));
    }

    #[test]
    fn complete_resolves_with_count() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(3);
        assert!(tracker.complete(50));
        assert_eq!(
            handle.try_outcome(),
            Some(Ok(RenderOutcome::Completed {
                session: 3,
                rendered: 50
            }))
        );
        assert!(!tracker.is_outstanding());
    }

    #[test]
    fn abort_resolves_not_rejects() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(4);
        tracker.abort();
        let outcome = handle.try_outcome().unwrap().unwrap();
        assert!(outcome.is_aborted());
        assert_eq!(outcome.session(), 4);
        assert_eq!(outcome.rendered(), None);
    }

    #[test]
    fn reissue_supersedes_previous() {
        let mut tracker = CompletionTracker::new();
        let first = tracker.issue(1);
        let second = tracker.issue(2);
        assert_eq!(
            first.try_outcome(),
            Some(Err(RenderError::Superseded { session: 1 }))
        );
        assert!(!second.is_settled());
    }

    #[test]
    fn settles_only_once() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(1);
        tracker.complete(2);
        assert!(!tracker.abort());
        assert_eq!(handle.try_outcome().unwrap().unwrap().rendered(), Some(2));
    }

    #[test]
    fn dropped_tracker_aborts() {
        let handle = {
            let mut tracker = CompletionTracker::new();
            tracker.issue(9)
        };
        assert_eq!(
            handle.try_outcome(),
            Some(Ok(RenderOutcome::Aborted { session: 9 }))
        );
    }

    #[test]
    fn wait_timeout_sees_cross_thread_settle() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(5);
        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait_timeout(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(10));
        tracker.complete(1);
        let result = waiter.join().unwrap();
        assert_eq!(result.unwrap().unwrap().rendered(), Some(1));
    }

    #[test]
    fn wait_timeout_expires() {
        let mut tracker = CompletionTracker::new();
        let handle = tracker.issue(6);
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn superseded_display() {
        let err = RenderError::Superseded { session: 7 };
        assert_eq!(err.to_string(), "render session 7 was superseded");
    }
}
