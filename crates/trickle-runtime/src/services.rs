#![forbid(unsafe_code)]

//! Host collaborators and the render context.
//!
//! The engine owns no global state. Everything it needs from the host is
//! passed in through a [`RenderContext`] (data source, visibility service,
//! loading indicator, activation sink, device profile) and a
//! [`ViewSurface`] the renderer draws into.
//!
//! Only the surface is required. Without a visibility observer the engine
//! falls back to scroll metrics, and without those it renders eagerly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use trickle_core::device::DeviceProfile;
use trickle_core::element::Element;

use crate::fetch::ItemSource;
use crate::pool::HandleId;

/// Scroll position of the surface, in host units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub offset: f64,
    pub viewport: f64,
    pub content: f64,
}

impl ScrollMetrics {
    /// Whether the bottom of the viewport is within `distance` of the end.
    #[must_use]
    pub fn near_tail(&self, distance: f64) -> bool {
        self.offset + self.viewport >= self.content - distance
    }
}

/// Why a handle leaves the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// Oldest-first eviction from the live window.
    Evicted,
    /// Session teardown.
    Cleared,
    /// A category lookup failed.
    Failed,
}

/// The view the renderer appends elements to.
pub trait ViewSurface {
    /// Append a batch fragment in order, in one operation.
    fn append(&mut self, fragment: &[(HandleId, &Element)]);

    /// An attached element's contents changed.
    fn update(&mut self, id: HandleId, element: &Element);

    fn set_opacity(&mut self, id: HandleId, opacity: f32);

    /// Remove an attached element.
    fn detach(&mut self, id: HandleId, reason: DetachReason);

    /// Place (or move) the continuation sentinel after the last element.
    fn place_sentinel(&mut self);

    fn remove_sentinel(&mut self);

    /// Current scroll position, if the surface scrolls.
    fn scroll_metrics(&self) -> Option<ScrollMetrics> {
        None
    }
}

/// Visibility service watching the sentinel.
pub trait VisibilityObserver {
    fn observe(&mut self);
    fn disconnect(&mut self);
}

/// Token returned by [`LoadingIndicator::show`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorToken(pub u64);

/// What to display while a session loads.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingOptions {
    pub message: String,
    /// Hide automatically after this long, whatever happens.
    pub auto_hide_after: Option<Duration>,
}

impl Default for LoadingOptions {
    fn default() -> Self {
        Self {
            message: "Loading…".to_string(),
            auto_hide_after: Some(Duration::from_secs(10)),
        }
    }
}

/// Loading indicator controller.
pub trait LoadingIndicator {
    fn show(&mut self, options: &LoadingOptions) -> IndicatorToken;
    fn hide(&mut self, token: IndicatorToken);
    fn update_message(&mut self, _token: IndicatorToken, _message: &str) {}
}

/// Receives activated elements (copy to clipboard, notify, ...).
pub trait ActivationSink {
    fn activated(&mut self, id: HandleId, element: &Element);
}

/// Everything the engine borrows from the host.
pub struct RenderContext {
    pub source: Arc<dyn ItemSource>,
    pub visibility: Option<Box<dyn VisibilityObserver>>,
    pub indicator: Option<Box<dyn LoadingIndicator>>,
    pub activation: Option<Box<dyn ActivationSink>>,
    pub device: DeviceProfile,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("visibility", &self.visibility.is_some())
            .field("indicator", &self.indicator.is_some())
            .field("activation", &self.activation.is_some())
            .field("device", &self.device)
            .finish()
    }
}

impl RenderContext {
    /// A context with only a data source and a detected device profile.
    #[must_use]
    pub fn new(source: Arc<dyn ItemSource>) -> Self {
        Self {
            source,
            visibility: None,
            indicator: None,
            activation: None,
            device: DeviceProfile::detect(),
        }
    }

    #[must_use]
    pub fn with_visibility(mut self, observer: impl VisibilityObserver + 'static) -> Self {
        self.visibility = Some(Box::new(observer));
        self
    }

    #[must_use]
    pub fn with_indicator(mut self, indicator: impl LoadingIndicator + 'static) -> Self {
        self.indicator = Some(Box::new(indicator));
        self
    }

    #[must_use]
    pub fn with_activation(mut self, sink: impl ActivationSink + 'static) -> Self {
        self.activation = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_tail_threshold() {
        let m = ScrollMetrics {
            offset: 600.0,
            viewport: 400.0,
            content: 1400.0,
        };
        assert!(m.near_tail(400.0));
        assert!(!m.near_tail(399.0));
    }
}
