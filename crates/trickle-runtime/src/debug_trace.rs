#![forbid(unsafe_code)]

//! Stderr milestones for batch debugging, gated on `TRICKLE_DEBUG_TRACE`.
//!
//! This sits below `tracing`: it prints session starts, batch boundaries,
//! and teardown counts with a millisecond offset so a stuck list can be
//! diagnosed without installing a subscriber. Accepted values are `1`,
//! `true`, `on`, and `yes` (case-insensitive); anything else is off.
//!
//! ```ignore
//! trickle_runtime::debug_trace!("batch done: epoch={} appended={}", epoch, n);
//! ```

use std::sync::LazyLock;
use std::time::Instant;

static ENABLED: LazyLock<bool> =
    LazyLock::new(|| flag_enabled(std::env::var("TRICKLE_DEBUG_TRACE").ok().as_deref()));

static ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Interpret a `TRICKLE_DEBUG_TRACE` value.
#[must_use]
pub fn flag_enabled(value: Option<&str>) -> bool {
    let Some(value) = value.map(str::trim) else {
        return false;
    };
    ["1", "true", "on", "yes"]
        .iter()
        .any(|accepted| value.eq_ignore_ascii_case(accepted))
}

#[inline]
pub fn is_enabled() -> bool {
    *ENABLED
}

/// Milliseconds since the first milestone.
#[inline]
pub fn elapsed_ms() -> u64 {
    u64::try_from(ORIGIN.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[trickle +{}ms] {}",
                $crate::debug_trace::elapsed_ms(),
                format_args!($($arg)*)
            );
        }
    };
}
