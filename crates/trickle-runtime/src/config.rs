#![forbid(unsafe_code)]

//! Renderer configuration.
//!
//! [`RenderConfig`] groups every tunable of the engine. Defaults match the
//! values the engine was tuned with; hosts adjust them with the `with_*`
//! builders or from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TRICKLE_HARD_CEILING` | `sizing.hard_ceiling` |
//! | `TRICKLE_LIVE_CAP` | `live_cap` (and `live_cap_low_memory` if smaller) |
//! | `TRICKLE_SCORER_THRESHOLD` | `scorer.worker_threshold` |
//! | `TRICKLE_LOW_MEMORY` | forces the low-memory sizing path |
//!
//! Parsing is pure over a lookup function so it can be tested without
//! touching the process environment.

use std::env;
use std::fmt;
use std::time::Duration;

use trickle_core::device::DeviceProfile;

use crate::continuation::TriggerConfig;
use crate::fetch::{FetchMode, FetchOptions};
use crate::frame_controller::BatchSizing;
use crate::pool::PoolConfig;
use crate::scorer::ScorerConfig;

/// Finalization timing after the last batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleConfig {
    /// Frame callbacks to wait.
    pub frames: u32,
    /// Extra delay after those frames.
    pub delay: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            frames: 2,
            delay: Duration::from_millis(80),
        }
    }
}

/// Invalid environment override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The value could not be parsed.
    Invalid { var: &'static str, value: String },
    /// The value parsed but is out of range.
    OutOfRange { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { var, value } => write!(f, "{var}: invalid value {value:?}"),
            Self::OutOfRange { var, value } => write!(f, "{var}: value {value:?} out of range"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub sizing: BatchSizing,
    pub scorer: ScorerConfig,
    pub trigger: TriggerConfig,
    pub pool: PoolConfig,
    pub settle: SettleConfig,
    /// Maximum attached handles.
    pub live_cap: usize,
    /// Maximum attached handles on low-memory devices.
    pub live_cap_low_memory: usize,
    /// Nested lazy expansions allowed under one slot.
    pub max_expansion_depth: u32,
    pub fetch: FetchOptions,
    pub fetch_mode: FetchMode,
    /// Message shown by the loading indicator.
    pub loading_message: String,
    /// Indicator message while the finished session settles.
    pub settling_message: Option<String>,
    pub indicator_auto_hide: Option<Duration>,
    /// Overrides the context's device profile when set.
    pub force_low_memory: Option<bool>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sizing: BatchSizing::default(),
            scorer: ScorerConfig::default(),
            trigger: TriggerConfig::default(),
            pool: PoolConfig::default(),
            settle: SettleConfig::default(),
            live_cap: 28,
            live_cap_low_memory: 20,
            max_expansion_depth: 8,
            fetch: FetchOptions::default(),
            fetch_mode: FetchMode::default(),
            loading_message: "Loading…".to_string(),
            settling_message: Some("Finishing…".to_string()),
            indicator_auto_hide: Some(Duration::from_secs(10)),
            force_low_memory: None,
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn with_sizing(mut self, sizing: BatchSizing) -> Self {
        self.sizing = sizing;
        self
    }

    #[must_use]
    pub fn with_hard_ceiling(mut self, ceiling: usize) -> Self {
        self.sizing.hard_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: ScorerConfig) -> Self {
        self.scorer = scorer;
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Set both live caps.
    #[must_use]
    pub fn with_live_cap(mut self, standard: usize, low_memory: usize) -> Self {
        self.live_cap = standard;
        self.live_cap_low_memory = low_memory;
        self
    }

    #[must_use]
    pub fn with_max_expansion_depth(mut self, depth: u32) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    #[must_use]
    pub fn with_fetch(mut self, options: FetchOptions, mode: FetchMode) -> Self {
        self.fetch = options;
        self.fetch_mode = mode;
        self
    }

    #[must_use]
    pub fn with_loading_message(mut self, message: impl Into<String>) -> Self {
        self.loading_message = message.into();
        self
    }

    #[must_use]
    pub fn with_settling_message(mut self, message: Option<String>) -> Self {
        self.settling_message = message;
        self
    }

    #[must_use]
    pub fn with_indicator_auto_hide(mut self, after: Option<Duration>) -> Self {
        self.indicator_auto_hide = after;
        self
    }

    #[must_use]
    pub fn with_low_memory(mut self, low_memory: Option<bool>) -> Self {
        self.force_low_memory = low_memory;
        self
    }

    /// Whether the low-memory path applies for `device`.
    #[must_use]
    pub fn is_low_memory(&self, device: &DeviceProfile) -> bool {
        self.force_low_memory.unwrap_or(device.is_low_memory())
    }

    /// Live cap for `device`.
    #[must_use]
    pub fn live_cap_for(&self, device: &DeviceProfile) -> usize {
        let cap = if self.is_low_memory(device) {
            self.live_cap_low_memory
        } else {
            self.live_cap
        };
        cap.max(1)
    }

    /// Defaults with `TRICKLE_*` overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|var| env::var(var).ok())
    }

    /// Apply `TRICKLE_*` overrides read through `lookup`.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("TRICKLE_HARD_CEILING") {
            self.sizing.hard_ceiling = parse_count("TRICKLE_HARD_CEILING", &value)?;
        }
        if let Some(value) = lookup("TRICKLE_LIVE_CAP") {
            let cap = parse_count("TRICKLE_LIVE_CAP", &value)?;
            self.live_cap = cap;
            self.live_cap_low_memory = self.live_cap_low_memory.min(cap);
        }
        if let Some(value) = lookup("TRICKLE_SCORER_THRESHOLD") {
            self.scorer.worker_threshold = parse_count("TRICKLE_SCORER_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("TRICKLE_LOW_MEMORY") {
            self.force_low_memory = Some(parse_flag("TRICKLE_LOW_MEMORY", &value)?);
        }
        Ok(self)
    }
}

fn parse_count(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let n: usize = value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })?;
    if n == 0 {
        return Err(ConfigError::OutOfRange {
            var,
            value: value.to_string(),
        });
    }
    Ok(n)
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.live_cap, 28);
        assert_eq!(config.live_cap_low_memory, 20);
        assert_eq!(config.sizing.hard_ceiling, 12);
        assert_eq!(config.scorer.worker_threshold, 30);
        assert_eq!(config.settle.frames, 2);
    }

    #[test]
    fn live_cap_follows_device() {
        let config = RenderConfig::default();
        assert_eq!(config.live_cap_for(&DeviceProfile::standard()), 28);
        assert_eq!(config.live_cap_for(&DeviceProfile::low_memory()), 20);
        let forced = config.with_low_memory(Some(true));
        assert_eq!(forced.live_cap_for(&DeviceProfile::standard()), 20);
    }

    #[test]
    fn env_overrides() {
        let config = RenderConfig::default()
            .apply_env(lookup(&[
                ("TRICKLE_HARD_CEILING", "8"),
                ("TRICKLE_LIVE_CAP", "15"),
                ("TRICKLE_SCORER_THRESHOLD", " 50 "),
                ("TRICKLE_LOW_MEMORY", "off"),
            ]))
            .unwrap();
        assert_eq!(config.sizing.hard_ceiling, 8);
        assert_eq!(config.live_cap, 15);
        assert_eq!(config.live_cap_low_memory, 15);
        assert_eq!(config.scorer.worker_threshold, 50);
        assert_eq!(config.force_low_memory, Some(false));
    }

    #[test]
    fn env_errors() {
        let err = RenderConfig::default()
            .apply_env(lookup(&[("TRICKLE_LIVE_CAP", "lots")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "TRICKLE_LIVE_CAP",
                value: "lots".into()
            }
        );
        let err = RenderConfig::default()
            .apply_env(lookup(&[("TRICKLE_HARD_CEILING", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
        assert!(err.to_string().contains("TRICKLE_HARD_CEILING"));
    }
}
