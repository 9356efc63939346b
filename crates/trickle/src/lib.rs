#![forbid(unsafe_code)]

//! Trickle public facade crate.
//!
//! Re-exports the item model from `trickle-core` and the engine from
//! `trickle-runtime`, plus a combined [`Error`] and a prelude for hosts.
//!
//! # Example
//!
//! ```ignore
//! use trickle::prelude::*;
//!
//! let context = RenderContext::new(source).with_visibility(observer);
//! let mut renderer = Renderer::new(surface, context, RenderConfig::from_env()?);
//! let handle = renderer.render(items, Instant::now());
//! // once per frame:
//! renderer.tick(Instant::now());
//! ```

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use trickle_core::device::DeviceProfile;
pub use trickle_core::element::{Element, ElementChild};
pub use trickle_core::item::{
    CategoryGroup, FetchPayload, ItemError, ItemKey, ItemKind, ItemShape, RenderItem,
};

// --- Runtime re-exports ----------------------------------------------------

pub use trickle_runtime::{
    ActivationSink, CompletionHandle, ConfigError, DetachReason, FetchError, FetchMode,
    FetchOptions, FetchPriority, HandleId, IndicatorToken, ItemSource, LoadingIndicator,
    LoadingOptions, Phase, RenderConfig, RenderContext, RenderError, RenderOutcome, RenderResult,
    RenderSnapshot, Renderer, ScrollMetrics, TriggerMode, UsageEvent, ViewSurface,
    VisibilityObserver,
};

// --- Errors ---------------------------------------------------------------

/// Any error a host can get back from trickle.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An item could not be built.
    Item(ItemError),
    /// A remote collection or category lookup failed.
    Fetch(FetchError),
    /// A render was superseded.
    Render(RenderError),
    /// Bad `TRICKLE_*` configuration.
    Config(ConfigError),
}

impl Error {
    /// Supersession is an expected lifecycle event; hosts usually ignore it.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Render(RenderError::Superseded { .. }))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(err) => write!(f, "{err}"),
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Item(err) => Some(err),
            Self::Fetch(err) => Some(err),
            Self::Render(err) => Some(err),
            Self::Config(err) => Some(err),
        }
    }
}

impl From<ItemError> for Error {
    fn from(err: ItemError) -> Self {
        Self::Item(err)
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        Self::Render(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Standard result type for trickle APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        CompletionHandle, DeviceProfile, Error, ItemSource, Phase, RenderConfig, RenderContext,
        RenderItem, RenderOutcome, Renderer, Result, ViewSurface,
    };

    pub use crate::{core, runtime};
}

pub use trickle_core as core;
pub use trickle_runtime as runtime;
