//! Risk levels, factors and assessments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::VitalKind;
use crate::MAX_RECOMMENDATIONS;

/// Overall risk, ordered Low < Medium < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        };
        write!(f, "{}", name)
    }
}

/// What a risk factor is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskFactorKind {
    ElevatedHeartRate,
    #[serde(rename = "LowHRV")]
    LowHrv,
    LowBloodOxygen,
    ElevatedRespiratoryRate,
    Fatigue,
}

impl RiskFactorKind {
    /// The vital that must be out of range for this factor to exist
    pub fn vital(&self) -> VitalKind {
        match self {
            RiskFactorKind::ElevatedHeartRate => VitalKind::HeartRate,
            RiskFactorKind::LowHrv | RiskFactorKind::Fatigue => VitalKind::Hrv,
            RiskFactorKind::LowBloodOxygen => VitalKind::BloodOxygen,
            RiskFactorKind::ElevatedRespiratoryRate => VitalKind::RespiratoryRate,
        }
    }

    /// Fixed recommendation template for this factor
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskFactorKind::ElevatedHeartRate => {
                "Your heart rate is elevated. Pull over when safe and take a few slow, deep breaths."
            }
            RiskFactorKind::LowHrv => {
                "Low heart rate variability suggests stress. Consider a break at the next safe stop."
            }
            RiskFactorKind::LowBloodOxygen => {
                "Blood oxygen is low. Stop driving when safe and seek medical help if you feel short of breath."
            }
            RiskFactorKind::ElevatedRespiratoryRate => {
                "Your breathing rate is outside the normal range. Slow your breathing and ventilate the cabin."
            }
            RiskFactorKind::Fatigue => {
                "Signs of fatigue detected. Rest before continuing your journey."
            }
        }
    }
}

/// One out-of-range vital contributing to the assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    pub severity: RiskLevel,
    pub description: String,
    pub measured_value: f64,
}

impl RiskFactor {
    pub fn new(
        kind: RiskFactorKind,
        severity: RiskLevel,
        description: impl Into<String>,
        measured_value: f64,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            measured_value,
        }
    }
}

/// Which path produced an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentSource {
    /// On-device language model, validated against the snapshot
    Model,
    /// Deterministic rule engine
    Rules,
    /// Received from the paired device
    Remote,
}

/// Immutable driving-risk verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    produced_at: DateTime<Utc>,
    level: RiskLevel,
    factors: Vec<RiskFactor>,
    recommendations: Vec<String>,
    source: AssessmentSource,
}

impl RiskAssessment {
    /// Build an assessment; recommendations beyond the cap are dropped
    pub fn new(
        produced_at: DateTime<Utc>,
        level: RiskLevel,
        factors: Vec<RiskFactor>,
        mut recommendations: Vec<String>,
        source: AssessmentSource,
    ) -> Self {
        recommendations.truncate(MAX_RECOMMENDATIONS);
        Self {
            produced_at,
            level,
            factors,
            recommendations,
            source,
        }
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    pub fn factors(&self) -> &[RiskFactor] {
        &self.factors
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    pub fn source(&self) -> AssessmentSource {
        self.source
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        let factors: Vec<String> = self
            .factors
            .iter()
            .map(|f| format!("{:?}({})", f.kind, f.severity))
            .collect();
        format!(
            "risk={} | factors=[{}] | recommendations={} | source={:?}",
            self.level,
            factors.join(", "),
            self.recommendations.len(),
            self.source
        )
    }
}
