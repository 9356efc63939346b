#![forbid(unsafe_code)]

//! Continuation trigger: decides when the next batch may run.
//!
//! After the first batch of a session, if items remain, the renderer arms
//! the trigger in one of three modes:
//!
//! | Mode | Signal | Fires when |
//! |------|--------|------------|
//! | [`TriggerMode::Visibility`] | sentinel visibility notifications | `debounce` after the latest notification |
//! | [`TriggerMode::ScrollFallback`] | scroll metrics, checked at most once per `scroll_throttle` | the viewport is within `near_tail_distance` of the end |
//! | [`TriggerMode::Eager`] | none | every poll |
//!
//! In eager mode the size of the follow-up batch is set by
//! [`EagerBatching`]: by default everything left goes in one batch.
//!
//! Only one batch may be in flight: between [`ContinuationTrigger::begin`]
//! and [`ContinuationTrigger::finish`] the trigger never fires, and signals
//! arriving in that window are dropped. A repositioned sentinel produces a
//! fresh notification if it is still visible.
//!
//! # Invariants
//!
//! - A disconnected trigger never fires.
//! - At most one firing per `begin`/`finish` pair.

use std::time::{Duration, Instant};

use crate::services::ScrollMetrics;

/// Trigger timing.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Quiet period after a visibility notification.
    pub debounce: Duration,
    /// Minimum spacing between scroll checks.
    pub scroll_throttle: Duration,
    /// "Near tail" distance in host scroll units.
    pub near_tail_distance: f64,
    /// Batch size in eager mode.
    pub eager_batching: EagerBatching,
}

/// How much an eager continuation renders at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EagerBatching {
    /// Everything that is left, in a single batch.
    #[default]
    Remaining,
    /// One hard-ceiling batch per tick until the list is exhausted.
    Ceiling,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            scroll_throttle: Duration::from_millis(100),
            near_tail_distance: 400.0,
            eager_batching: EagerBatching::Remaining,
        }
    }
}

/// How continuation is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Visibility,
    ScrollFallback,
    Eager,
}

impl TriggerMode {
    /// Pick the best mode the host supports.
    #[must_use]
    pub const fn select(has_visibility: bool, has_scroll: bool) -> Self {
        if has_visibility {
            Self::Visibility
        } else if has_scroll {
            Self::ScrollFallback
        } else {
            Self::Eager
        }
    }
}

/// Continuation state for the current session.
#[derive(Debug, Clone)]
pub struct ContinuationTrigger {
    config: TriggerConfig,
    mode: Option<TriggerMode>,
    last_visible: Option<Instant>,
    last_scroll_check: Option<Instant>,
    near_tail: bool,
    in_flight: bool,
    fired: u64,
}

impl ContinuationTrigger {
    #[must_use]
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            mode: None,
            last_visible: None,
            last_scroll_check: None,
            near_tail: false,
            in_flight: false,
            fired: 0,
        }
    }

    /// Connect in `mode`, dropping any stale signal.
    pub fn arm(&mut self, mode: TriggerMode) {
        self.mode = Some(mode);
        self.last_visible = None;
        self.last_scroll_check = None;
        self.near_tail = false;
        self.in_flight = false;
        tracing::trace!(?mode, "continuation trigger armed");
    }

    pub fn disconnect(&mut self) {
        if self.mode.take().is_some() {
            tracing::trace!(fired = self.fired, "continuation trigger disconnected");
        }
        self.last_visible = None;
        self.near_tail = false;
        self.in_flight = false;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.mode.is_some()
    }

    #[must_use]
    pub fn mode(&self) -> Option<TriggerMode> {
        self.mode
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Times the trigger has fired since creation.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Sentinel became visible.
    pub fn on_visible(&mut self, now: Instant) {
        if self.mode == Some(TriggerMode::Visibility) && !self.in_flight {
            self.last_visible = Some(now);
        }
    }

    /// Scroll event; performs a throttled near-tail check.
    pub fn on_scroll(&mut self, now: Instant, metrics: Option<ScrollMetrics>) {
        if self.mode == Some(TriggerMode::ScrollFallback) && !self.in_flight {
            self.check_scroll(now, metrics);
        }
    }

    fn check_scroll(&mut self, now: Instant, metrics: Option<ScrollMetrics>) {
        if let Some(last) = self.last_scroll_check {
            if now.saturating_duration_since(last) < self.config.scroll_throttle {
                return;
            }
        }
        self.last_scroll_check = Some(now);
        if let Some(metrics) = metrics {
            self.near_tail |= metrics.near_tail(self.config.near_tail_distance);
        }
    }

    /// Whether the next batch should run now. Firing does not mark a batch
    /// in flight; call [`begin`](Self::begin) when it starts.
    pub fn poll(&mut self, now: Instant, metrics: Option<ScrollMetrics>) -> bool {
        if self.in_flight {
            return false;
        }
        let fire = match self.mode {
            None => false,
            Some(TriggerMode::Eager) => true,
            Some(TriggerMode::Visibility) => match self.last_visible {
                Some(at) if now.saturating_duration_since(at) >= self.config.debounce => {
                    self.last_visible = None;
                    true
                }
                _ => false,
            },
            Some(TriggerMode::ScrollFallback) => {
                self.check_scroll(now, metrics);
                std::mem::take(&mut self.near_tail)
            }
        };
        if fire {
            self.fired += 1;
        }
        fire
    }

    /// A batch started.
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// The in-flight batch finished.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

impl Default for ContinuationTrigger {
    fn default() -> Self {
        Self::new(TriggerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn near() -> Option<ScrollMetrics> {
        Some(ScrollMetrics {
            offset: 900.0,
            viewport: 300.0,
            content: 1500.0,
        })
    }

    fn far() -> Option<ScrollMetrics> {
        Some(ScrollMetrics {
            offset: 0.0,
            viewport: 300.0,
            content: 5000.0,
        })
    }

    #[test]
    fn mode_selection() {
        assert_eq!(TriggerMode::select(true, true), TriggerMode::Visibility);
        assert_eq!(TriggerMode::select(false, true), TriggerMode::ScrollFallback);
        assert_eq!(TriggerMode::select(false, false), TriggerMode::Eager);
    }

    #[test]
    fn unarmed_never_fires() {
        let mut t = ContinuationTrigger::default();
        let now = Instant::now();
        t.on_visible(now);
        assert!(!t.poll(now + ms(500), near()));
    }

    #[test]
    fn visibility_is_debounced() {
        let start = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::Visibility);
        t.on_visible(start);
        assert!(!t.poll(start + ms(49), None));
        assert!(t.poll(start + ms(50), None));
        // Consumed.
        assert!(!t.poll(start + ms(200), None));
    }

    #[test]
    fn repeated_visibility_extends_debounce() {
        let start = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::Visibility);
        t.on_visible(start);
        t.on_visible(start + ms(40));
        assert!(!t.poll(start + ms(60), None));
        assert!(t.poll(start + ms(90), None));
    }

    #[test]
    fn in_flight_blocks_and_drops_signals() {
        let start = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::Visibility);
        t.begin();
        t.on_visible(start);
        assert!(!t.poll(start + ms(100), None));
        t.finish();
        assert!(!t.poll(start + ms(200), None));
    }

    #[test]
    fn scroll_fallback_fires_near_tail() {
        let start = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::ScrollFallback);
        assert!(!t.poll(start, far()));
        assert!(t.poll(start + ms(100), near()));
    }

    #[test]
    fn scroll_checks_are_throttled() {
        let start = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::ScrollFallback);
        t.on_scroll(start, far());
        t.on_scroll(start + ms(30), near());
        assert!(!t.poll(start + ms(60), near()));
        assert!(t.poll(start + ms(100), near()));
    }

    #[test]
    fn eager_fires_every_poll() {
        let now = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::Eager);
        assert!(t.poll(now, None));
        assert!(t.poll(now, None));
        assert_eq!(t.fired(), 2);
    }

    #[test]
    fn disconnect_stops_firing() {
        let now = Instant::now();
        let mut t = ContinuationTrigger::default();
        t.arm(TriggerMode::Eager);
        t.disconnect();
        assert!(!t.is_armed());
        assert!(!t.poll(now, None));
    }
}
