//! PulsePilot: driving-risk assessment from wearable vitals
//!
//! Vitals flow from the wearable to the paired companion, which runs an
//! on-device language model when one can be loaded and the rule engine
//! otherwise, then hands the assessment back over the pairing link.

pub mod core;
pub mod types;

// =============================================================================
// RULE ENGINE THRESHOLDS [C]
// =============================================================================

/// Heart rate above this (BPM) is a High factor
pub const HEART_RATE_HIGH: f64 = 120.0;

/// Heart rate above this (BPM) is a Medium factor
pub const HEART_RATE_MEDIUM: f64 = 100.0;

/// HRV below this (ms) is a High factor
pub const HRV_HIGH: f64 = 20.0;

/// HRV below this (ms) is a Medium factor
pub const HRV_MEDIUM: f64 = 30.0;

/// Blood oxygen below this (%) is a High factor
pub const BLOOD_OXYGEN_HIGH: f64 = 90.0;

/// Blood oxygen below this (%) is a Medium factor
pub const BLOOD_OXYGEN_MEDIUM: f64 = 95.0;

/// Respiratory rate below this (breaths/min) is a High factor
pub const RESPIRATORY_RATE_LOW: f64 = 10.0;

/// Respiratory rate above this (breaths/min) is a Medium factor
pub const RESPIRATORY_RATE_HIGH: f64 = 25.0;

/// Lower bound of the resting heart rate band the model must not flag
pub const HEART_RATE_NORMAL_MIN: f64 = 60.0;

// =============================================================================
// COALESCING [C]
// =============================================================================

/// Polling tick while another analysis is in flight (milliseconds)
pub const WAIT_TICK_MS: u64 = 1000;

/// Ticks to wait for an in-flight analysis before falling back to rules
pub const MAX_WAIT_TICKS: u32 = 30;

/// How long a finished assessment is shared with waiting callers (seconds)
pub const CACHE_TTL_SECS: u64 = 5;

// =============================================================================
// ASSESSMENT SHAPE
// =============================================================================

/// Upper bound on recommendations carried by any assessment
pub const MAX_RECOMMENDATIONS: usize = 5;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
