#![forbid(unsafe_code)]

//! Recording doubles for the host services.
//!
//! The renderer takes ownership of its services, so each recorder is a
//! cheap handle over shared state: keep a clone, hand the other to the
//! render context, and inspect the clone afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use trickle_core::element::Element;
use trickle_runtime::pool::HandleId;
use trickle_runtime::services::{
    ActivationSink, IndicatorToken, LoadingIndicator, LoadingOptions, VisibilityObserver,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Indicator state as observed by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorLog {
    pub shown: u32,
    pub hidden: u32,
    /// Token currently displayed.
    pub visible: Option<IndicatorToken>,
    pub last_message: Option<String>,
}

/// Loading indicator that records show/hide calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    log: Arc<Mutex<IndicatorLog>>,
}

impl RecordingIndicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn log(&self) -> IndicatorLog {
        lock(&self.log).clone()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        lock(&self.log).visible.is_some()
    }
}

impl LoadingIndicator for RecordingIndicator {
    fn show(&mut self, options: &LoadingOptions) -> IndicatorToken {
        let mut log = lock(&self.log);
        log.shown += 1;
        let token = IndicatorToken(u64::from(log.shown));
        log.visible = Some(token);
        log.last_message = Some(options.message.clone());
        token
    }

    fn hide(&mut self, token: IndicatorToken) {
        let mut log = lock(&self.log);
        log.hidden += 1;
        if log.visible == Some(token) {
            log.visible = None;
        }
    }

    fn update_message(&mut self, _token: IndicatorToken, message: &str) {
        lock(&self.log).last_message = Some(message.to_string());
    }
}

/// Visibility observer that counts connections.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    state: Arc<Mutex<(u32, u32)>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn observe_count(&self) -> u32 {
        lock(&self.state).0
    }

    #[must_use]
    pub fn disconnect_count(&self) -> u32 {
        lock(&self.state).1
    }

    /// Observing and not yet disconnected.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        let state = lock(&self.state);
        state.0 > state.1
    }
}

impl VisibilityObserver for RecordingObserver {
    fn observe(&mut self) {
        lock(&self.state).0 += 1;
    }

    fn disconnect(&mut self) {
        lock(&self.state).1 += 1;
    }
}

/// Activation sink that keeps activated titles (stands in for a clipboard).
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    activated: Arc<Mutex<Vec<(HandleId, String)>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activated handles with the text that was "copied".
    #[must_use]
    pub fn entries(&self) -> Vec<(HandleId, String)> {
        lock(&self.activated).clone()
    }
}

impl ActivationSink for RecordingSink {
    fn activated(&mut self, id: HandleId, element: &Element) {
        let text = element
            .content
            .clone()
            .unwrap_or_else(|| element.title.clone());
        lock(&self.activated).push((id, text));
    }
}
