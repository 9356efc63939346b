#![forbid(unsafe_code)]

//! Trickle runtime: the adaptive incremental rendering engine.
//!
//! # Key Components
//!
//! - [`Renderer`] - session orchestration, driven by `render`/`clear`/`tick`
//! - [`BatchRenderer`] - builds, appends, reveals, and evicts elements
//! - [`FrameController`] - EMA of batch cost → next batch size
//! - [`PriorityScorer`] - usage scores, inline or on a worker thread
//! - [`ElementPool`] - slot arena of reusable elements
//! - [`SessionController`] - epochs and cancellation tokens
//! - [`ContinuationTrigger`] - visibility / scroll / eager continuation
//! - [`CompletionTracker`] - one settled-once handle per render
//! - [`FetchClient`] - retry, timeout, and priority for remote items
//!
//! Host integration points are the traits in [`services`].

pub mod batch;
pub mod completion;
pub mod config;
pub mod continuation;
pub mod debug_trace;
pub mod fetch;
pub mod frame_controller;
pub mod pool;
pub mod renderer;
pub mod scorer;
pub mod services;
pub mod session;

pub use batch::{BatchLimits, BatchProgress, BatchRenderer, BatchReport, BatchStats, WorkingItem};
pub use completion::{
    CompletionHandle, CompletionTracker, RenderError, RenderOutcome, RenderResult,
};
pub use config::{ConfigError, RenderConfig, SettleConfig};
pub use continuation::{ContinuationTrigger, EagerBatching, TriggerConfig, TriggerMode};
pub use fetch::{
    FetchClient, FetchError, FetchMode, FetchOptions, FetchPriority, FetchResult, ItemSource,
    Pending,
};
pub use frame_controller::{BatchSizing, FrameController, FrameStats};
pub use pool::{ElementPool, HandleId, PoolConfig, PoolStats, ReleaseOutcome};
pub use renderer::{Phase, RenderSnapshot, Renderer};
pub use scorer::{
    InlineScorer, PriorityScorer, ScoreQuery, ScoreStrategy, ScoreTable, ScorerConfig,
    UsageCounts, UsageEvent, WorkerScorer, usage_score,
};
pub use services::{
    ActivationSink, DetachReason, IndicatorToken, LoadingIndicator, LoadingOptions,
    RenderContext, ScrollMetrics, ViewSurface, VisibilityObserver,
};
pub use session::{CancellationToken, Epoch, RenderSession, SessionController};
