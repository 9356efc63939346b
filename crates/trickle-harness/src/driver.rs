#![forbid(unsafe_code)]

//! Frame-stepping driver for the renderer.
//!
//! `HarnessDriver` owns a [`Renderer`] over a [`MemorySurface`], a virtual
//! clock, and recording doubles for every host service. Each
//! [`frame`](HarnessDriver::frame) advances the clock by one frame and
//! ticks the renderer. With `auto_reach_tail` enabled the driver behaves
//! like a user who keeps scrolling: every new sentinel placement is
//! reported visible (or the viewport is scrolled to the end).
//!
//! # Example
//!
//! ```ignore
//! use trickle_harness::{HarnessDriver, HarnessOptions, ScriptedSource};
//!
//! let mut driver = HarnessDriver::new(ScriptedSource::new(), HarnessOptions::default());
//! let handle = driver.render(items);
//! driver.set_auto_reach_tail(true);
//! assert!(driver.run_until_finished(500));
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trickle_core::device::DeviceProfile;
use trickle_core::item::RenderItem;
use trickle_runtime::completion::CompletionHandle;
use trickle_runtime::config::RenderConfig;
use trickle_runtime::fetch::{FetchMode, FetchOptions};
use trickle_runtime::renderer::{Phase, RenderSnapshot, Renderer};
use trickle_runtime::services::RenderContext;
use trickle_runtime::session::Epoch;

use crate::recorders::{RecordingIndicator, RecordingObserver, RecordingSink};
use crate::source::ScriptedSource;
use crate::surface::{MemorySurface, SurfaceOp, Viewport};

/// How the simulated host is wired.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Provide a visibility observer.
    pub visibility: bool,
    /// Give the surface a scrollable viewport.
    pub viewport: Option<Viewport>,
    pub indicator: bool,
    pub device: DeviceProfile,
    /// Virtual time per frame.
    pub frame: Duration,
    pub config: RenderConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            visibility: true,
            viewport: None,
            indicator: true,
            device: DeviceProfile::standard(),
            frame: Duration::from_millis(16),
            config: RenderConfig::default().with_fetch(
                FetchOptions {
                    retries: 1,
                    backoff: Duration::ZERO,
                    timeout: Duration::from_secs(2),
                },
                FetchMode::Inline,
            ),
        }
    }
}

impl HarnessOptions {
    #[must_use]
    pub fn without_visibility(mut self) -> Self {
        self.visibility = false;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Run fetches on the background worker.
    #[must_use]
    pub fn with_background_fetch(mut self) -> Self {
        self.config.fetch_mode = FetchMode::Background;
        self
    }
}

/// Drives a renderer frame by frame on a virtual clock.
pub struct HarnessDriver {
    renderer: Renderer<MemorySurface>,
    source: Arc<ScriptedSource>,
    indicator: RecordingIndicator,
    observer: RecordingObserver,
    sink: RecordingSink,
    visibility: bool,
    clock: Instant,
    frame: Duration,
    frames: u64,
    auto_reach_tail: bool,
    sentinels_seen: usize,
}

impl std::fmt::Debug for HarnessDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessDriver")
            .field("frames", &self.frames)
            .field("renderer", &self.renderer)
            .finish()
    }
}

impl HarnessDriver {
    #[must_use]
    pub fn new(source: ScriptedSource, options: HarnessOptions) -> Self {
        let source = Arc::new(source);
        let indicator = RecordingIndicator::new();
        let observer = RecordingObserver::new();
        let sink = RecordingSink::new();

        let mut context = RenderContext::new(source.clone())
            .with_device(options.device)
            .with_activation(sink.clone());
        if options.visibility {
            context = context.with_visibility(observer.clone());
        }
        if options.indicator {
            context = context.with_indicator(indicator.clone());
        }
        let surface = match options.viewport {
            Some(viewport) => MemorySurface::with_viewport(viewport),
            None => MemorySurface::new(),
        };

        Self {
            renderer: Renderer::new(surface, context, options.config),
            source,
            indicator,
            observer,
            sink,
            visibility: options.visibility,
            clock: Instant::now(),
            frame: options.frame,
            frames: 0,
            auto_reach_tail: false,
            sentinels_seen: 0,
        }
    }

    pub fn render(&mut self, items: Vec<RenderItem>) -> CompletionHandle {
        self.renderer.render(items, self.clock)
    }

    pub fn clear(&mut self) -> Epoch {
        self.renderer.clear(self.clock)
    }

    /// Keep reporting the tail as reached.
    pub fn set_auto_reach_tail(&mut self, enabled: bool) {
        self.auto_reach_tail = enabled;
    }

    /// Report the sentinel visible, or scroll the viewport to the end.
    pub fn reach_tail(&mut self) {
        if self.visibility {
            self.renderer.on_sentinel_visible(self.clock);
        } else if self.renderer.surface().viewport().is_some() {
            self.renderer.surface_mut().scroll_to_end();
            self.renderer.on_scroll(self.clock);
        }
    }

    /// Advance one frame and tick.
    pub fn frame(&mut self) {
        self.clock += self.frame;
        self.frames += 1;
        if self.auto_reach_tail && self.renderer.surface().has_sentinel() {
            let placed = self
                .renderer
                .surface()
                .ops()
                .iter()
                .filter(|op| matches!(op, SurfaceOp::PlaceSentinel))
                .count();
            if placed != self.sentinels_seen || !self.visibility {
                self.sentinels_seen = placed;
                self.reach_tail();
            }
        }
        self.renderer.tick(self.clock);

        // Give background workers real time to answer.
        if matches!(self.renderer.phase(), Phase::Rendering | Phase::Scoring) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn run_frames(&mut self, n: usize) {
        for _ in 0..n {
            self.frame();
        }
    }

    /// Step until `done` holds or `max_frames` pass. Returns whether it held.
    pub fn run_until(&mut self, max_frames: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_frames {
            if done(self) {
                return true;
            }
            self.frame();
        }
        done(self)
    }

    pub fn run_until_finished(&mut self, max_frames: usize) -> bool {
        self.run_until(max_frames, |d| d.renderer.phase() == Phase::Finished)
    }

    /// Advance the clock without ticking.
    pub fn advance(&mut self, by: Duration) {
        self.clock += by;
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[must_use]
    pub fn renderer(&self) -> &Renderer<MemorySurface> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<MemorySurface> {
        &mut self.renderer
    }

    #[must_use]
    pub fn surface(&self) -> &MemorySurface {
        self.renderer.surface()
    }

    #[must_use]
    pub fn snapshot(&self) -> RenderSnapshot {
        self.renderer.snapshot()
    }

    #[must_use]
    pub fn source(&self) -> &ScriptedSource {
        &self.source
    }

    #[must_use]
    pub fn indicator(&self) -> &RecordingIndicator {
        &self.indicator
    }

    #[must_use]
    pub fn observer(&self) -> &RecordingObserver {
        &self.observer
    }

    #[must_use]
    pub fn sink(&self) -> &RecordingSink {
        &self.sink
    }
}

/// `n` titled button leaves with ids `item-0..n`.
#[must_use]
pub fn leaves(n: usize) -> Vec<RenderItem> {
    (0..n)
        .map(|i| RenderItem::button(format!("item {i}")).with_id(format!("item-{i}")))
        .collect()
}
