#![forbid(unsafe_code)]

//! Session epochs and cooperative cancellation.
//!
//! Every render invocation gets a new epoch from the [`SessionController`].
//! Work that may resume later (a suspended batch, a pending fetch, a
//! category lookup) carries a [`CancellationToken`] capturing the epoch it
//! started under. At every resumption point the work checks
//! [`CancellationToken::is_cancelled`] and becomes inert when a newer
//! session (or a clear) has bumped the epoch.
//!
//! Tokens are `Send` so they can ride along into background fetch jobs,
//! letting a retry loop give up early once its session is gone.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::pool::HandleId;

/// Monotonically increasing session identifier.
pub type Epoch = u64;

/// Captured epoch plus an explicit cancel flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    epoch: Epoch,
    current: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Epoch this token was issued for.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Stale (a newer epoch exists) or explicitly cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.current.load(Ordering::Acquire) != self.epoch
    }

    /// Cancel this session's work without bumping the epoch.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Issues epochs. Exactly one epoch is current at a time.
#[derive(Debug, Default)]
pub struct SessionController {
    current: Arc<AtomicU64>,
}

impl SessionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session, invalidating every outstanding token.
    pub fn start_session(&self) -> CancellationToken {
        let epoch = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        CancellationToken {
            epoch,
            current: Arc::clone(&self.current),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bump the epoch without starting a session. Returns the new epoch.
    pub fn invalidate(&self) -> Epoch {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> Epoch {
        self.current.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

/// Render state owned by the current session.
#[derive(Debug)]
pub struct RenderSession {
    token: CancellationToken,
    rendered: BTreeSet<usize>,
    live: VecDeque<HandleId>,
}

impl RenderSession {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            rendered: BTreeSet::new(),
            live: VecDeque::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.token.epoch()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    #[must_use]
    pub fn is_rendered(&self, index: usize) -> bool {
        self.rendered.contains(&index)
    }

    pub fn mark_rendered(&mut self, index: usize) {
        self.rendered.insert(index);
    }

    #[must_use]
    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    /// Rendered indices in ascending order.
    pub fn rendered_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.rendered.iter().copied()
    }

    /// Shift rendered indices after `index` by `delta` (a splice at `index`).
    pub fn shift_rendered_after(&mut self, index: usize, delta: isize) {
        if delta == 0 || self.rendered.range(index + 1..).next().is_none() {
            return;
        }
        let shifted: BTreeSet<usize> = self
            .rendered
            .iter()
            .filter_map(|&i| {
                if i <= index {
                    Some(i)
                } else {
                    i.checked_add_signed(delta).filter(|&j| j > index)
                }
            })
            .collect();
        self.rendered = shifted;
    }

    /// Drop any rendered index at or past `len`.
    pub fn clamp_rendered(&mut self, len: usize) {
        self.rendered.retain(|&i| i < len);
    }

    #[must_use]
    pub fn live(&self) -> &VecDeque<HandleId> {
        &self.live
    }

    pub fn push_live(&mut self, id: HandleId) {
        self.live.push_back(id);
    }

    pub fn pop_oldest(&mut self) -> Option<HandleId> {
        self.live.pop_front()
    }

    /// Remove a specific live handle (e.g. a failed category group).
    pub fn remove_live(&mut self, id: HandleId) -> bool {
        match self.live.iter().position(|&h| h == id) {
            Some(pos) => {
                self.live.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn drain_live(&mut self) -> impl Iterator<Item = HandleId> + '_ {
        self.live.drain(..)
    }
}
