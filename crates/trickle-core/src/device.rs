#![forbid(unsafe_code)]

//! Coarse device classification.
//!
//! The renderer only needs one bit of hardware knowledge: whether the device
//! should be treated as low-memory. Low-memory devices get smaller batches
//! and a smaller live window. The hint comes from the environment so hosts
//! can forward whatever their platform reports.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `TRICKLE_LOW_MEMORY` | `1`/`true` forces low-memory, `0`/`false` forces standard |
//! | `TRICKLE_DEVICE_MEMORY_GB` | reported memory; below 4 GB is low-memory |

use std::env;

/// Reported memory below this is considered low-memory.
pub const LOW_MEMORY_THRESHOLD_GB: f64 = 4.0;

/// Raw inputs for detection, captured once so detection stays pure.
#[derive(Debug, Clone, Default)]
struct DetectInputs {
    low_memory_flag: Option<String>,
    memory_gb: Option<String>,
}

impl DetectInputs {
    fn from_env() -> Self {
        Self {
            low_memory_flag: env::var("TRICKLE_LOW_MEMORY").ok(),
            memory_gb: env::var("TRICKLE_DEVICE_MEMORY_GB").ok(),
        }
    }
}

/// Device hints consumed by batch sizing and the live-window cap.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceProfile {
    low_memory: bool,
    memory_gb: Option<f64>,
}

impl DeviceProfile {
    /// A standard (not low-memory) device.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            low_memory: false,
            memory_gb: None,
        }
    }

    /// A low-memory device.
    #[must_use]
    pub const fn low_memory() -> Self {
        Self {
            low_memory: true,
            memory_gb: None,
        }
    }

    /// Classify from reported memory in gigabytes.
    #[must_use]
    pub fn from_memory_gb(memory_gb: f64) -> Self {
        Self {
            low_memory: memory_gb.is_finite() && memory_gb < LOW_MEMORY_THRESHOLD_GB,
            memory_gb: Some(memory_gb),
        }
    }

    /// Detect from the environment.
    #[must_use]
    pub fn detect() -> Self {
        Self::detect_from_inputs(&DetectInputs::from_env())
    }

    fn detect_from_inputs(inputs: &DetectInputs) -> Self {
        let memory = inputs
            .memory_gb
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok());
        let mut profile = memory.map_or_else(Self::standard, Self::from_memory_gb);

        if let Some(flag) = inputs.low_memory_flag.as_deref() {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => profile.low_memory = true,
                "0" | "false" | "no" => profile.low_memory = false,
                _ => {}
            }
        }
        profile
    }

    /// Whether the device should be treated as low-memory.
    #[inline]
    #[must_use]
    pub const fn is_low_memory(&self) -> bool {
        self.low_memory
    }

    /// Reported memory, when known.
    #[must_use]
    pub const fn memory_gb(&self) -> Option<f64> {
        self.memory_gb
    }
}
