#![forbid(unsafe_code)]

//! The incremental renderer.
//!
//! [`Renderer`] ties the engine together. The host drives it with three
//! kinds of calls:
//!
//! - [`Renderer::render`] / [`Renderer::clear`] from the caller;
//! - [`Renderer::tick`] once per frame;
//! - [`Renderer::on_sentinel_visible`] / [`Renderer::on_scroll`] from the
//!   visibility service or scroll handler.
//!
//! Nothing here blocks. Fetches, score queries, and settle delays are
//! pending state checked on the next tick.
//!
//! # Session lifecycle
//!
//! ```text
//! render ─▶ Scoring ─▶ Rendering ⇄ Waiting ─▶ Settling ─▶ Finished
//!    │         (only above the        │
//!    │          scoring threshold)    └─ continuation trigger fires
//!    └─ supersedes the previous session
//! clear ─▶ Idle (completion resolves as Aborted)
//! ```
//!
//! Every batch is sized by the frame controller, which keeps its average
//! across sessions. The first batch of a session runs immediately with high
//! fetch priority; later ones run when the continuation trigger fires. Elements appended during one tick are
//! revealed on the next one, and that reveal is what counts as a view for
//! usage scoring.

use std::time::Instant;

use trickle_core::item::{ItemKey, RenderItem};

use crate::batch::{BatchLimits, BatchProgress, BatchRenderer, BatchStats};
use crate::completion::{CompletionHandle, CompletionTracker};
use crate::config::RenderConfig;
use crate::continuation::{ContinuationTrigger, EagerBatching, TriggerMode};
use crate::fetch::{FetchClient, FetchPriority};
use crate::frame_controller::FrameController;
use crate::pool::{ElementPool, HandleId, PoolStats};
use crate::scorer::{PriorityScorer, ScoreQuery, UsageEvent};
use crate::services::{IndicatorToken, LoadingOptions, RenderContext, ViewSurface};
use crate::session::{Epoch, RenderSession, SessionController};

/// Where the current session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session.
    Idle,
    /// Waiting for usage scores before the first batch.
    Scoring,
    /// A batch is in progress (possibly suspended on a fetch).
    Rendering,
    /// Between batches, waiting for the continuation trigger.
    Waiting,
    /// Everything rendered; waiting out the settle period.
    Settling,
    /// Settled; indicator hidden.
    Finished,
}

#[derive(Debug, Clone, Copy)]
struct Settle {
    frames_left: u32,
    until: Option<Instant>,
}

/// Read-only view of the renderer state.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub phase: Phase,
    /// Current epoch.
    pub epoch: Epoch,
    /// Working-list length.
    pub len: usize,
    pub rendered: usize,
    pub live: usize,
    pub next_start: usize,
    /// Size the next batch would get.
    pub next_batch_size: usize,
    pub smoothed_batch_ms: f64,
    pub pool_recycled: usize,
    pub pool_in_use: usize,
    pub pool: PoolStats,
    pub batches: BatchStats,
    pub trigger: Option<TriggerMode>,
    pub indicator_visible: bool,
    pub scorer: &'static str,
}

/// Adaptive incremental renderer over a host surface.
pub struct Renderer<S: ViewSurface> {
    surface: S,
    context: RenderContext,
    config: RenderConfig,
    sessions: SessionController,
    completion: CompletionTracker,
    scorer: PriorityScorer,
    batches: BatchRenderer,
    trigger: ContinuationTrigger,
    phase: Phase,
    score_query: Option<ScoreQuery>,
    settle: Option<Settle>,
    indicator: Option<(IndicatorToken, Instant)>,
}

impl<S: ViewSurface> std::fmt::Debug for Renderer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("phase", &self.phase)
            .field("epoch", &self.sessions.current())
            .field("batches", &self.batches)
            .field("trigger", &self.trigger.mode())
            .finish()
    }
}

impl<S: ViewSurface> Renderer<S> {
    /// Create a renderer drawing into `surface`.
    pub fn new(surface: S, context: RenderContext, config: RenderConfig) -> Self {
        let low_memory = config.is_low_memory(&context.device);
        let limits = BatchLimits {
            live_cap: config.live_cap_for(&context.device),
            low_memory,
            max_expansion_depth: config.max_expansion_depth,
        };
        let fetch = FetchClient::new(
            std::sync::Arc::clone(&context.source),
            config.fetch.clone(),
            config.fetch_mode,
        );
        let batches = BatchRenderer::new(
            ElementPool::new(config.pool.clone()),
            FrameController::new(config.sizing.clone()),
            fetch,
            limits,
        );
        tracing::debug!(
            live_cap = limits.live_cap,
            low_memory,
            fetch_mode = ?config.fetch_mode,
            "renderer created"
        );
        Self {
            surface,
            scorer: PriorityScorer::new(config.scorer.clone()),
            trigger: ContinuationTrigger::new(config.trigger.clone()),
            context,
            config,
            sessions: SessionController::new(),
            completion: CompletionTracker::new(),
            batches,
            phase: Phase::Idle,
            score_query: None,
            settle: None,
            indicator: None,
        }
    }

    /// Render `items`, replacing whatever is on the surface.
    ///
    /// An outstanding render is rejected as superseded and cleared first.
    /// The first batch runs before this returns.
    pub fn render(&mut self, items: Vec<RenderItem>, now: Instant) -> CompletionHandle {
        if self.completion.supersede() {
            tracing::debug!("previous render superseded");
        }
        self.reset(now);

        let token = self.sessions.start_session();
        let epoch = token.epoch();
        self.batches.begin(RenderSession::new(token), items);
        let handle = self.completion.issue(epoch);
        self.show_indicator(now);

        if self.batches.is_empty() {
            tracing::debug!(epoch, "empty list; completing immediately");
            self.completion.complete(0);
            self.hide_indicator();
            self.phase = Phase::Finished;
            return handle;
        }

        let keys = self.batches.keys();
        match self.scorer.query(&keys, now) {
            Some(query) => {
                self.score_query = Some(query);
                self.phase = Phase::Scoring;
                self.poll_scores(now);
            }
            None => self.start_first_batch(now),
        }
        handle
    }

    /// Stop the current session. Resolves its completion as aborted and
    /// returns the new epoch.
    pub fn clear(&mut self, now: Instant) -> Epoch {
        let epoch = self.sessions.invalidate();
        self.reset(now);
        if self.completion.abort() {
            tracing::debug!(epoch, "render aborted by clear");
        }
        self.phase = Phase::Idle;
        epoch
    }

    fn reset(&mut self, now: Instant) {
        let released = self.batches.teardown(&mut self.surface, now);
        self.disconnect_trigger();
        self.hide_indicator();
        self.score_query = None;
        self.settle = None;
        if released > 0 {
            crate::debug_trace!("reset released {} handles", released);
        }
    }

    /// Frame callback.
    pub fn tick(&mut self, now: Instant) {
        for key in self.batches.reveal_pending(&mut self.surface) {
            self.scorer.record_event(UsageEvent::View, &key);
        }

        match self.phase {
            Phase::Scoring => self.poll_scores(now),
            Phase::Rendering => self.drive(now),
            Phase::Waiting => {
                let metrics = self.surface.scroll_metrics();
                if self.trigger.poll(now, metrics) {
                    self.next_batch(now);
                }
            }
            Phase::Settling => self.advance_settle(now),
            Phase::Idle | Phase::Finished => {}
        }

        self.batches.poll_groups(&mut self.surface, now);
        self.check_indicator_timeout(now);
        self.batches.pool_mut().trim_idle(now);
    }

    /// The sentinel intersected the viewport.
    pub fn on_sentinel_visible(&mut self, now: Instant) {
        self.trigger.on_visible(now);
    }

    /// The surface scrolled.
    pub fn on_scroll(&mut self, now: Instant) {
        let metrics = self.surface.scroll_metrics();
        self.trigger.on_scroll(now, metrics);
    }

    /// The user activated an element. Counts a click and forwards the
    /// element to the activation sink. Returns `false` for an unknown handle.
    pub fn activate(&mut self, id: HandleId) -> bool {
        let Some(element) = self.batches.pool().get(id) else {
            return false;
        };
        if let Some(sink) = self.context.activation.as_mut() {
            sink.activated(id, element);
        }
        if let Some(key) = element.key.clone() {
            self.scorer.record_event(UsageEvent::Click, &key);
        }
        true
    }

    /// Count a usage event recorded outside the renderer.
    pub fn record_event(&mut self, event: UsageEvent, key: &ItemKey) {
        self.scorer.record_event(event, key);
    }

    fn poll_scores(&mut self, now: Instant) {
        let Some(query) = self.score_query.as_mut() else {
            self.start_first_batch(now);
            return;
        };
        let Some(scores) = query.poll(now) else {
            return;
        };
        self.score_query = None;
        self.batches.apply_scores(&scores);
        self.start_first_batch(now);
    }

    fn start_first_batch(&mut self, now: Instant) {
        if self.batches.start_batch(FetchPriority::High, now) {
            self.trigger.begin();
            self.phase = Phase::Rendering;
            self.drive(now);
        } else {
            self.after_batch(now);
        }
    }

    fn next_batch(&mut self, now: Instant) {
        let started = match (self.trigger.mode(), self.config.trigger.eager_batching) {
            (Some(TriggerMode::Eager), EagerBatching::Remaining) => {
                self.batches.start_remaining(FetchPriority::Normal, now)
            }
            (Some(TriggerMode::Eager), EagerBatching::Ceiling) => {
                let ceiling = self.batches.frames().ceiling();
                self.batches.start_batch_sized(ceiling, FetchPriority::Normal, now)
            }
            _ => self.batches.start_batch(FetchPriority::Normal, now),
        };
        if started {
            self.trigger.begin();
            self.phase = Phase::Rendering;
            self.drive(now);
        } else {
            self.after_batch(now);
        }
    }

    fn drive(&mut self, now: Instant) {
        match self.batches.resume(&mut self.surface, now) {
            BatchProgress::Suspended => self.phase = Phase::Rendering,
            BatchProgress::Finished(_) => {
                self.trigger.finish();
                self.after_batch(now);
            }
            BatchProgress::Idle => {
                self.trigger.finish();
                self.after_batch(now);
            }
            BatchProgress::Cancelled => self.trigger.finish(),
        }
    }

    fn after_batch(&mut self, now: Instant) {
        if self.batches.session().is_none_or(RenderSession::is_stale) {
            return;
        }
        if self.batches.is_exhausted() {
            self.finish_session(now);
            return;
        }

        if !self.trigger.is_armed() {
            let has_visibility = self.context.visibility.is_some();
            let has_scroll = self.surface.scroll_metrics().is_some();
            let mode = TriggerMode::select(has_visibility, has_scroll);
            self.trigger.arm(mode);
            if mode == TriggerMode::Visibility {
                if let Some(observer) = self.context.visibility.as_mut() {
                    observer.observe();
                }
            }
            tracing::debug!(?mode, "continuation armed");
        }
        if self.trigger.mode() != Some(TriggerMode::Eager) {
            self.surface.place_sentinel();
        }
        self.phase = Phase::Waiting;
    }

    fn finish_session(&mut self, now: Instant) {
        let rendered = self
            .batches
            .session()
            .map_or(0, RenderSession::rendered_count);
        self.completion.complete(rendered);
        self.disconnect_trigger();
        self.announce_settling();
        self.settle = Some(Settle {
            frames_left: self.config.settle.frames,
            until: None,
        });
        self.phase = Phase::Settling;
        tracing::debug!(epoch = self.sessions.current(), rendered, "render complete");
        self.advance_settle_frames_if_zero(now);
    }

    fn advance_settle_frames_if_zero(&mut self, now: Instant) {
        if let Some(settle) = self.settle.as_mut() {
            if settle.frames_left == 0 && settle.until.is_none() {
                settle.until = Some(now + self.config.settle.delay);
            }
        }
    }

    fn advance_settle(&mut self, now: Instant) {
        let Some(settle) = self.settle.as_mut() else {
            self.phase = Phase::Finished;
            return;
        };
        if settle.frames_left > 0 {
            settle.frames_left -= 1;
            if settle.frames_left == 0 {
                settle.until = Some(now + self.config.settle.delay);
            }
            return;
        }
        if settle.until.is_some_and(|until| now >= until) {
            self.settle = None;
            self.hide_indicator();
            self.phase = Phase::Finished;
            tracing::debug!(epoch = self.sessions.current(), "render settled");
        }
    }

    fn disconnect_trigger(&mut self) {
        if self.trigger.is_armed() {
            if self.trigger.mode() == Some(TriggerMode::Visibility) {
                if let Some(observer) = self.context.visibility.as_mut() {
                    observer.disconnect();
                }
            }
            self.trigger.disconnect();
            self.surface.remove_sentinel();
        }
    }

    fn show_indicator(&mut self, now: Instant) {
        let Some(indicator) = self.context.indicator.as_mut() else {
            return;
        };
        let options = LoadingOptions {
            message: self.config.loading_message.clone(),
            auto_hide_after: self.config.indicator_auto_hide,
        };
        let token = indicator.show(&options);
        self.indicator = Some((token, now));
    }

    fn announce_settling(&mut self) {
        let (Some((token, _)), Some(message)) = (self.indicator, self.config.settling_message.as_deref())
        else {
            return;
        };
        if let Some(indicator) = self.context.indicator.as_mut() {
            indicator.update_message(token, message);
        }
    }

    fn hide_indicator(&mut self) {
        if let Some((token, _)) = self.indicator.take() {
            if let Some(indicator) = self.context.indicator.as_mut() {
                indicator.hide(token);
            }
        }
    }

    fn check_indicator_timeout(&mut self, now: Instant) {
        let Some(limit) = self.config.indicator_auto_hide else {
            return;
        };
        if let Some((_, shown_at)) = self.indicator {
            if now.saturating_duration_since(shown_at) >= limit {
                tracing::debug!("loading indicator auto-hidden");
                self.hide_indicator();
            }
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.sessions.current()
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[must_use]
    pub fn batches(&self) -> &BatchRenderer {
        &self.batches
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Current usage score of `key`.
    #[must_use]
    pub fn score(&self, key: &ItemKey) -> f64 {
        self.scorer.local_score(key)
    }

    #[must_use]
    pub fn snapshot(&self) -> RenderSnapshot {
        let session = self.batches.session();
        let pool = self.batches.pool();
        let frames = self.batches.frames();
        RenderSnapshot {
            phase: self.phase,
            epoch: self.sessions.current(),
            len: self.batches.len(),
            rendered: session.map_or(0, RenderSession::rendered_count),
            live: session.map_or(0, |s| s.live().len()),
            next_start: self.batches.next_start(),
            next_batch_size: frames.batch_size(self.batches.limits().low_memory),
            smoothed_batch_ms: frames.smoothed_ms(),
            pool_recycled: pool.recycled_len(),
            pool_in_use: pool.in_use_len(),
            pool: pool.stats(),
            batches: self.batches.stats(),
            trigger: self.trigger.mode(),
            indicator_visible: self.indicator.is_some(),
            scorer: self.scorer.strategy_name(),
        }
    }
}
