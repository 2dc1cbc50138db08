//! Vital kinds and individual sensor samples

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// The six monitored biometric categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VitalKind {
    HeartRate,
    #[serde(rename = "HRV")]
    Hrv,
    BloodOxygen,
    RespiratoryRate,
    StepCount,
    ActiveEnergy,
}

impl VitalKind {
    /// All kinds, in series iteration order
    pub const ALL: [VitalKind; 6] = [
        VitalKind::HeartRate,
        VitalKind::Hrv,
        VitalKind::BloodOxygen,
        VitalKind::RespiratoryRate,
        VitalKind::StepCount,
        VitalKind::ActiveEnergy,
    ];

    /// Key used for this kind's array in a `health_data` message
    pub fn wire_key(&self) -> &'static str {
        match self {
            VitalKind::HeartRate => "heartRate",
            VitalKind::Hrv => "hrv",
            VitalKind::BloodOxygen => "bloodOxygen",
            VitalKind::RespiratoryRate => "respiratoryRate",
            VitalKind::StepCount => "stepCount",
            VitalKind::ActiveEnergy => "activeEnergy",
        }
    }

    /// Human-readable name used in prompts and descriptions
    pub fn display_name(&self) -> &'static str {
        match self {
            VitalKind::HeartRate => "Heart rate",
            VitalKind::Hrv => "Heart rate variability (HRV)",
            VitalKind::BloodOxygen => "Blood oxygen",
            VitalKind::RespiratoryRate => "Respiratory rate",
            VitalKind::StepCount => "Step count",
            VitalKind::ActiveEnergy => "Active energy",
        }
    }

    /// Unit the sensor feed reports this kind in
    pub fn default_unit(&self) -> Unit {
        match self {
            VitalKind::HeartRate => Unit::Bpm,
            VitalKind::Hrv => Unit::Milliseconds,
            VitalKind::BloodOxygen => Unit::Percent,
            VitalKind::RespiratoryRate => Unit::BreathsPerMinute,
            VitalKind::StepCount => Unit::Count,
            VitalKind::ActiveEnergy => Unit::Kilocalories,
        }
    }
}

impl std::fmt::Display for VitalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Measurement unit, carried as a short string on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "BPM")]
    Bpm,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "breaths/min")]
    BreathsPerMinute,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "kcal")]
    Kilocalories,
}

impl Unit {
    /// Symbol shown after a value
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Bpm => "BPM",
            Unit::Milliseconds => "ms",
            Unit::Percent => "%",
            Unit::BreathsPerMinute => "breaths/min",
            Unit::Count => "steps",
            Unit::Kilocalories => "kcal",
        }
    }
}

/// One reading from the sensor feed
///
/// Timestamps are held at microsecond resolution, the precision the wire
/// format carries, so a sample survives transmission unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    value: f64,
    timestamp: DateTime<Utc>,
    unit: Unit,
}

impl SamplePoint {
    /// Create a sample, truncating the timestamp to microseconds
    pub fn new(value: f64, timestamp: DateTime<Utc>, unit: Unit) -> Self {
        Self {
            value,
            timestamp: timestamp.trunc_subsecs(6),
            unit,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }
}
