//! Integration tests for the wire schema
//!
//! Tests the full path: snapshot → health_data JSON text → snapshot, and
//! rule assessment → risk_assessment_result JSON text → assessment

use pulsepilot::core::RuleEngine;
use pulsepilot::types::{
    AssessmentSource, ExchangeMessage, HealthDataPayload, HealthSnapshot, MessageError,
    RiskAssessmentPayload, RiskLevel, VitalKind,
};
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn morning_drive() -> HealthSnapshot {
    let now = Utc::now();
    let t = |secs: i64| now - Duration::seconds(secs);
    HealthSnapshot::new(now)
        .with_values(VitalKind::HeartRate, &[(88.5, t(120)), (101.25, t(60)), (118.0, t(1))])
        .with_values(VitalKind::Hrv, &[(27.3, t(30))])
        .with_values(VitalKind::BloodOxygen, &[(0.97, t(45))])
        .with_values(VitalKind::RespiratoryRate, &[(16.0, t(10))])
        .with_values(VitalKind::StepCount, &[(1234.0, t(300))])
        .with_values(VitalKind::ActiveEnergy, &[(87.65, t(300))])
}

/// A snapshot survives the trip through JSON text unchanged
#[test]
fn test_snapshot_survives_json_text() {
    let original = morning_drive();
    let message = ExchangeMessage::HealthData(HealthDataPayload::from_snapshot(&original, Some(true)));

    let text = serde_json::to_string(&message.encode().unwrap()).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();

    match ExchangeMessage::decode(&value).unwrap() {
        ExchangeMessage::HealthData(payload) => {
            assert!(payload.wants_assessment());
            assert_eq!(payload.to_snapshot().unwrap(), original);
        }
        other => panic!("decoded as {}", other.type_name()),
    }
}

/// Unmeasured kinds are omitted on the wire and stay unmeasured
#[test]
fn test_unmeasured_kinds_stay_absent() {
    let now = Utc::now();
    let snapshot = HealthSnapshot::new(now).with_values(VitalKind::HeartRate, &[(72.0, now)]);
    let value = ExchangeMessage::HealthData(HealthDataPayload::from_snapshot(&snapshot, None))
        .encode()
        .unwrap();

    assert!(value.get("heartRate").is_some());
    assert!(value.get("hrv").is_none());
    assert!(value.get("requestRiskAssessment").is_none());

    let ExchangeMessage::HealthData(payload) = ExchangeMessage::decode(&value).unwrap() else {
        panic!("expected health_data");
    };
    let back = payload.to_snapshot().unwrap();
    assert!(!back.is_measured(VitalKind::Hrv));
    assert_eq!(back.latest(VitalKind::HeartRate), Some(72.0));
}

/// Hand-written messages in the documented shape decode
#[test]
fn test_decodes_hand_written_message() {
    let value = json!({
        "type": "health_data",
        "timestamp": 1_700_000_000.25,
        "requestRiskAssessment": true,
        "heartRate": [{"value": 121.0, "timestamp": 1_700_000_000.0, "unit": "BPM"}],
        "bloodOxygen": [{"value": 93.0, "timestamp": 1_699_999_990.5, "unit": "%"}]
    });

    let ExchangeMessage::HealthData(payload) = ExchangeMessage::decode(&value).unwrap() else {
        panic!("expected health_data");
    };
    let snapshot = payload.to_snapshot().unwrap();
    assert_eq!(
        snapshot.captured_at(),
        Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap()
    );

    let assessment = RuleEngine::new().assess(&snapshot);
    assert_eq!(assessment.level(), RiskLevel::High);
    assert_eq!(assessment.factors().len(), 2);
}

#[test]
fn test_rejects_bad_messages() {
    assert_eq!(
        ExchangeMessage::decode(&json!({"type": "unknown_type"})),
        Err(MessageError::UnknownType("unknown_type".to_string()))
    );
    assert_eq!(ExchangeMessage::decode(&json!({"value": 1})), Err(MessageError::MissingType));
    assert!(matches!(
        ExchangeMessage::decode(&json!({"type": "health_data", "timestamp": "yesterday"})),
        Err(MessageError::Malformed { .. })
    ));
}

/// An assessment crosses the link with level, factors and recommendations intact
#[test]
fn test_assessment_survives_json_text() {
    let assessment = RuleEngine::new().assess(&morning_drive());
    let message = ExchangeMessage::RiskAssessmentResult(RiskAssessmentPayload::from_assessment(&assessment));

    let text = serde_json::to_string(&message.encode().unwrap()).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "risk_assessment_result");
    assert_eq!(value["riskLevel"], "Medium");

    let ExchangeMessage::RiskAssessmentResult(payload) = ExchangeMessage::decode(&value).unwrap() else {
        panic!("expected risk_assessment_result");
    };
    let received = payload.to_assessment().unwrap();
    assert_eq!(received.level(), assessment.level());
    assert_eq!(received.factors(), assessment.factors());
    assert_eq!(received.recommendations(), assessment.recommendations());
    assert_eq!(received.source(), AssessmentSource::Remote);
}
