#![forbid(unsafe_code)]

//! Deterministic test harness for the trickle renderer.
//!
//! - **Doubles**: [`MemorySurface`], [`ScriptedSource`], and recording
//!   indicator / observer / activation sink.
//! - **Driver**: [`HarnessDriver`] steps a renderer frame by frame on a
//!   virtual clock.
//!
//! # Quick Start
//!
//! ```ignore
//! use trickle_harness::{HarnessDriver, HarnessOptions, ScriptedSource, leaves};
//!
//! let mut driver = HarnessDriver::new(ScriptedSource::new(), HarnessOptions::default());
//! let handle = driver.render(leaves(50));
//! assert_eq!(driver.surface().attached_len(), 6);
//!
//! driver.set_auto_reach_tail(true);
//! assert!(driver.run_until_finished(1_000));
//! ```
//!
//! Fetches run inline by default so a scenario is reproducible frame for
//! frame; [`HarnessOptions::with_background_fetch`] switches to the worker.
//!
//! Set `RUST_LOG=trickle_runtime=debug` and call [`init_tracing`] to see the
//! engine's events while a test runs.

pub mod driver;
pub mod recorders;
pub mod source;
pub mod surface;

pub use driver::{HarnessDriver, HarnessOptions, leaves};
pub use recorders::{IndicatorLog, RecordingIndicator, RecordingObserver, RecordingSink};
pub use source::{ScriptedSource, SourceCall};
pub use surface::{AttachedElement, MemorySurface, SurfaceOp, Viewport};

/// Install a test-friendly fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
