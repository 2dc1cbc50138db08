//! Rule engine: fixed clinical thresholds over the latest reading of each vital
//!
//! Always available and infallible. Used whenever the model is absent, slow,
//! or produces output that cannot be trusted.

use chrono::{DateTime, Utc};

use crate::types::{
    AssessmentSource, HealthSnapshot, RiskAssessment, RiskFactor, RiskFactorKind, RiskLevel,
    VitalKind,
};
use crate::{
    BLOOD_OXYGEN_HIGH, BLOOD_OXYGEN_MEDIUM, HEART_RATE_HIGH, HEART_RATE_MEDIUM, HRV_HIGH,
    HRV_MEDIUM, MAX_RECOMMENDATIONS, RESPIRATORY_RATE_HIGH, RESPIRATORY_RATE_LOW,
};

/// Recommendations when nothing is out of range
const ALL_CLEAR_RECOMMENDATIONS: [&str; 3] = [
    "Your vital signs are within normal ranges. Continue driving safely.",
    "Stay hydrated and keep the cabin well ventilated.",
    "Take a short break every two hours on long journeys.",
];

/// Extra advice appended when the overall level is High
const HIGH_RISK_RECOMMENDATION: &str =
    "Avoid driving until your readings return to normal.";

/// Deterministic threshold-based assessor
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    /// Create new engine
    pub fn new() -> Self {
        Self
    }

    /// Assess a snapshot, stamped with the current time
    pub fn assess(&self, snapshot: &HealthSnapshot) -> RiskAssessment {
        self.assess_at(snapshot, Utc::now())
    }

    /// Assess a snapshot with an explicit production time
    pub fn assess_at(&self, snapshot: &HealthSnapshot, produced_at: DateTime<Utc>) -> RiskAssessment {
        let factors: Vec<RiskFactor> = snapshot
            .measured_kinds()
            .filter_map(primary_factor_kind)
            .filter_map(|kind| self.evaluate(kind, snapshot))
            .collect();

        let level = factors
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(RiskLevel::Low);

        let recommendations = recommendations_for(&factors, level);

        RiskAssessment::new(produced_at, level, factors, recommendations, AssessmentSource::Rules)
    }

    /// Check one factor against the snapshot
    ///
    /// Returns a factor only when the matching vital is measured and its
    /// latest value is strictly outside the normal range.
    pub fn evaluate(&self, kind: RiskFactorKind, snapshot: &HealthSnapshot) -> Option<RiskFactor> {
        let value = snapshot.latest(kind.vital())?;

        match kind {
            RiskFactorKind::ElevatedHeartRate => {
                let severity = if value > HEART_RATE_HIGH {
                    RiskLevel::High
                } else if value > HEART_RATE_MEDIUM {
                    RiskLevel::Medium
                } else {
                    return None;
                };
                Some(RiskFactor::new(
                    kind,
                    severity,
                    format!("Heart rate elevated at {:.0} BPM", value),
                    value,
                ))
            }

            RiskFactorKind::LowHrv | RiskFactorKind::Fatigue => {
                let severity = hrv_severity(value)?;
                let description = if kind == RiskFactorKind::Fatigue {
                    format!("Fatigue indicated by low HRV of {:.0} ms", value)
                } else {
                    format!("Heart rate variability low at {:.0} ms", value)
                };
                Some(RiskFactor::new(kind, severity, description, value))
            }

            RiskFactorKind::LowBloodOxygen => {
                let percent = blood_oxygen_percent(value);
                let severity = if percent < BLOOD_OXYGEN_HIGH {
                    RiskLevel::High
                } else if percent < BLOOD_OXYGEN_MEDIUM {
                    RiskLevel::Medium
                } else {
                    return None;
                };
                Some(RiskFactor::new(
                    kind,
                    severity,
                    format!("Blood oxygen low at {:.0}%", percent),
                    percent,
                ))
            }

            RiskFactorKind::ElevatedRespiratoryRate => {
                let (severity, label) = if value < RESPIRATORY_RATE_LOW {
                    (RiskLevel::High, "low")
                } else if value > RESPIRATORY_RATE_HIGH {
                    (RiskLevel::Medium, "elevated")
                } else {
                    return None;
                };
                Some(RiskFactor::new(
                    kind,
                    severity,
                    format!("Respiratory rate {} at {:.0} breaths/min", label, value),
                    value,
                ))
            }
        }
    }

    /// True when at least one measured vital is out of range
    pub fn any_out_of_range(&self, snapshot: &HealthSnapshot) -> bool {
        snapshot
            .measured_kinds()
            .filter_map(primary_factor_kind)
            .any(|kind| self.evaluate(kind, snapshot).is_some())
    }
}

/// The factor a measured vital can raise on its own (activity kinds raise none)
fn primary_factor_kind(vital: VitalKind) -> Option<RiskFactorKind> {
    match vital {
        VitalKind::HeartRate => Some(RiskFactorKind::ElevatedHeartRate),
        VitalKind::Hrv => Some(RiskFactorKind::LowHrv),
        VitalKind::BloodOxygen => Some(RiskFactorKind::LowBloodOxygen),
        VitalKind::RespiratoryRate => Some(RiskFactorKind::ElevatedRespiratoryRate),
        VitalKind::StepCount | VitalKind::ActiveEnergy => None,
    }
}

fn hrv_severity(value: f64) -> Option<RiskLevel> {
    if value < HRV_HIGH {
        Some(RiskLevel::High)
    } else if value < HRV_MEDIUM {
        Some(RiskLevel::Medium)
    } else {
        None
    }
}

/// Sensor feeds report saturation either as a fraction or as a percentage
pub fn blood_oxygen_percent(value: f64) -> f64 {
    if value <= 1.0 {
        value * 100.0
    } else {
        value
    }
}

fn recommendations_for(factors: &[RiskFactor], level: RiskLevel) -> Vec<String> {
    if factors.is_empty() {
        return ALL_CLEAR_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect();
    }

    let mut recs: Vec<String> = Vec::new();
    for factor in factors {
        let rec = factor.kind.recommendation().to_string();
        if !recs.contains(&rec) {
            recs.push(rec);
        }
    }
    if level == RiskLevel::High {
        recs.push(HIGH_RISK_RECOMMENDATION.to_string());
    }
    recs.truncate(MAX_RECOMMENDATIONS);
    recs
}

// =============================================================================
// TESTS
// =============================================================================
