//! Wire schema exchanged between wearable and companion
//!
//! Messages travel as JSON objects keyed by `type`:
//! - `health_data`: snapshot arrays plus optional `requestRiskAssessment`
//! - `risk_assessment_request`: no payload
//! - `risk_assessment_result`: level, factors, recommendations, timestamp
//!
//! Replies carry `status` (`received` | `error`), an optional `message`, and
//! an optional inline `riskAssessment`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    AssessmentSource, HealthSnapshot, MessageError, RiskAssessment, RiskFactor,
    RiskFactorKind, RiskLevel, SamplePoint, Unit, VitalKind,
};

pub const TYPE_HEALTH_DATA: &str = "health_data";
pub const TYPE_RISK_ASSESSMENT_REQUEST: &str = "risk_assessment_request";
pub const TYPE_RISK_ASSESSMENT_RESULT: &str = "risk_assessment_result";

const KNOWN_TYPES: [&str; 3] = [
    TYPE_HEALTH_DATA,
    TYPE_RISK_ASSESSMENT_REQUEST,
    TYPE_RISK_ASSESSMENT_RESULT,
];

/// Seconds since the Unix epoch, at microsecond resolution
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Inverse of [`epoch_seconds`]; `None` for non-finite or out-of-range input
pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One sample as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireSample {
    pub value: f64,
    pub timestamp: f64,
    pub unit: Unit,
}

/// `health_data` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDataPayload {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_risk_assessment: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heart_rate: Vec<WireSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hrv: Vec<WireSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blood_oxygen: Vec<WireSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub respiratory_rate: Vec<WireSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_count: Vec<WireSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_energy: Vec<WireSample>,
}

impl HealthDataPayload {
    /// Flatten a snapshot into per-vital arrays
    pub fn from_snapshot(snapshot: &HealthSnapshot, request_risk_assessment: Option<bool>) -> Self {
        let flatten = |kind: VitalKind| -> Vec<WireSample> {
            snapshot
                .series(kind)
                .iter()
                .map(|s| WireSample {
                    value: s.value(),
                    timestamp: epoch_seconds(s.timestamp()),
                    unit: s.unit(),
                })
                .collect()
        };

        Self {
            timestamp: epoch_seconds(snapshot.captured_at()),
            request_risk_assessment,
            heart_rate: flatten(VitalKind::HeartRate),
            hrv: flatten(VitalKind::Hrv),
            blood_oxygen: flatten(VitalKind::BloodOxygen),
            respiratory_rate: flatten(VitalKind::RespiratoryRate),
            step_count: flatten(VitalKind::StepCount),
            active_energy: flatten(VitalKind::ActiveEnergy),
        }
    }

    /// Array for one kind
    pub fn samples(&self, kind: VitalKind) -> &[WireSample] {
        match kind {
            VitalKind::HeartRate => &self.heart_rate,
            VitalKind::Hrv => &self.hrv,
            VitalKind::BloodOxygen => &self.blood_oxygen,
            VitalKind::RespiratoryRate => &self.respiratory_rate,
            VitalKind::StepCount => &self.step_count,
            VitalKind::ActiveEnergy => &self.active_energy,
        }
    }

    /// Whether the sender asked for an assessment
    pub fn wants_assessment(&self) -> bool {
        self.request_risk_assessment.unwrap_or(false)
    }

    /// Rebuild the snapshot
    pub fn to_snapshot(&self) -> Result<HealthSnapshot, MessageError> {
        let captured_at = from_epoch_seconds(self.timestamp)
            .ok_or_else(|| malformed(TYPE_HEALTH_DATA, "invalid timestamp"))?;

        let mut snapshot = HealthSnapshot::new(captured_at);
        for kind in VitalKind::ALL {
            let mut samples = Vec::with_capacity(self.samples(kind).len());
            for wire in self.samples(kind) {
                let at = from_epoch_seconds(wire.timestamp).ok_or_else(|| {
                    malformed(
                        TYPE_HEALTH_DATA,
                        &format!("invalid timestamp in {}", kind.wire_key()),
                    )
                })?;
                samples.push(SamplePoint::new(wire.value, at, wire.unit));
            }
            snapshot = snapshot.with_series(kind, samples);
        }
        Ok(snapshot)
    }
}

/// Risk factor as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRiskFactor {
    #[serde(rename = "type")]
    pub kind: RiskFactorKind,
    pub severity: RiskLevel,
    pub description: String,
    pub value: f64,
}

/// `risk_assessment_result` payload, also used as the `riskAssessment` reply field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessmentPayload {
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<WireRiskFactor>,
    pub recommendations: Vec<String>,
    pub timestamp: f64,
}

impl RiskAssessmentPayload {
    pub fn from_assessment(assessment: &RiskAssessment) -> Self {
        Self {
            risk_level: assessment.level(),
            risk_factors: assessment
                .factors()
                .iter()
                .map(|f| WireRiskFactor {
                    kind: f.kind,
                    severity: f.severity,
                    description: f.description.clone(),
                    value: f.measured_value,
                })
                .collect(),
            recommendations: assessment.recommendations().to_vec(),
            timestamp: epoch_seconds(assessment.produced_at()),
        }
    }

    /// Rebuild an assessment received from the peer
    pub fn to_assessment(&self) -> Result<RiskAssessment, MessageError> {
        let produced_at = from_epoch_seconds(self.timestamp)
            .ok_or_else(|| malformed(TYPE_RISK_ASSESSMENT_RESULT, "invalid timestamp"))?;
        let factors = self
            .risk_factors
            .iter()
            .map(|f| RiskFactor::new(f.kind, f.severity, f.description.clone(), f.value))
            .collect();
        Ok(RiskAssessment::new(
            produced_at,
            self.risk_level,
            factors,
            self.recommendations.clone(),
            AssessmentSource::Remote,
        ))
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Application message, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeMessage {
    HealthData(HealthDataPayload),
    RiskAssessmentRequest,
    RiskAssessmentResult(RiskAssessmentPayload),
}

impl ExchangeMessage {
    /// Wire name of this message's type
    pub fn type_name(&self) -> &'static str {
        match self {
            ExchangeMessage::HealthData(_) => TYPE_HEALTH_DATA,
            ExchangeMessage::RiskAssessmentRequest => TYPE_RISK_ASSESSMENT_REQUEST,
            ExchangeMessage::RiskAssessmentResult(_) => TYPE_RISK_ASSESSMENT_RESULT,
        }
    }

    /// Decode an inbound JSON object
    ///
    /// The type is checked before the payload so that an unknown type is
    /// reported as such rather than as a malformed payload.
    pub fn decode(value: &Value) -> Result<Self, MessageError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(MessageError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value.clone()).map_err(|e| malformed(kind, &e.to_string()))
    }

    /// Encode for transmission
    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Status carried by every reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Received,
    Error,
}

/// Reply to a send-with-reply message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskAssessmentPayload>,
}

impl Reply {
    pub fn received() -> Self {
        Self {
            status: ReplyStatus::Received,
            message: None,
            risk_assessment: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            message: Some(message.into()),
            risk_assessment: None,
        }
    }

    pub fn with_assessment(assessment: &RiskAssessment) -> Self {
        Self {
            status: ReplyStatus::Received,
            message: None,
            risk_assessment: Some(RiskAssessmentPayload::from_assessment(assessment)),
        }
    }

    /// JSON form; a reply always serializes
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "status": "error", "message": "Failed to encode reply" })
        })
    }
}

fn malformed(kind: &str, detail: &str) -> MessageError {
    MessageError::Malformed {
        kind: kind.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_unknown_type() {
        let err = ExchangeMessage::decode(&json!({"type": "unknown_type"})).unwrap_err();
        assert_eq!(err, MessageError::UnknownType("unknown_type".to_string()));
        assert_eq!(err.to_string(), "Unknown message type");
    }

    #[test]
    fn test_decode_missing_type() {
        let err = ExchangeMessage::decode(&json!({"timestamp": 1.0})).unwrap_err();
        assert_eq!(err, MessageError::MissingType);
    }

    #[test]
    fn test_decode_health_data_without_timestamp_is_malformed() {
        let err = ExchangeMessage::decode(&json!({"type": "health_data"})).unwrap_err();
        assert!(matches!(err, MessageError::Malformed { ref kind, .. } if kind == "health_data"));
    }

    #[test]
    fn test_request_has_only_type() {
        let value = ExchangeMessage::RiskAssessmentRequest.encode().unwrap();
        assert_eq!(value, json!({"type": "risk_assessment_request"}));
    }

    #[test]
    fn test_health_data_field_names() {
        let value = json!({
            "type": "health_data",
            "timestamp": 1_700_000_000.5,
            "requestRiskAssessment": true,
            "heartRate": [{"value": 80.0, "timestamp": 1_700_000_000.0, "unit": "BPM"}],
            "bloodOxygen": [{"value": 97.0, "timestamp": 1_700_000_000.0, "unit": "%"}]
        });
        let message = ExchangeMessage::decode(&value).unwrap();
        let ExchangeMessage::HealthData(payload) = message else {
            panic!("expected health_data");
        };
        assert!(payload.wants_assessment());
        assert_eq!(payload.heart_rate.len(), 1);
        assert_eq!(payload.blood_oxygen[0].unit, Unit::Percent);
        assert!(payload.hrv.is_empty());
    }

    #[test]
    fn test_epoch_seconds_round_trip() {
        let at = from_epoch_seconds(1_700_000_123.456789).unwrap();
        assert_eq!(from_epoch_seconds(epoch_seconds(at)), Some(at));
        assert_eq!(from_epoch_seconds(f64::NAN), None);
    }

    #[test]
    fn test_reply_shape() {
        let value = Reply::error("Unknown message type").to_value();
        assert_eq!(value, json!({"status": "error", "message": "Unknown message type"}));
        assert_eq!(Reply::received().to_value(), json!({"status": "received"}));
    }
}
