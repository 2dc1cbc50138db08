//! Response parser: turns model text into a validated assessment
//!
//! The model's wording proposes a level, candidate factors and
//! recommendations. Candidate factors survive only when the snapshot itself
//! shows the matching vital out of range, so the model can never introduce a
//! risk the measurements do not support.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::core::rules::RuleEngine;
use crate::types::{
    AssessmentSource, HealthSnapshot, ParseError, RiskAssessment, RiskFactor, RiskFactorKind,
    RiskLevel,
};
use crate::MAX_RECOMMENDATIONS;

/// Used when the response contains no recognisable recommendation lines
pub const FALLBACK_RECOMMENDATIONS: [&str; 4] = [
    "Take regular breaks during long drives.",
    "Stay hydrated and keep the cabin well ventilated.",
    "Pull over safely if you feel unwell or drowsy.",
    "Monitor how you feel and rest if anything changes.",
];

lazy_static! {
    // =========================================================================
    // Risk level, group 1: explicit phrases
    // =========================================================================
    static ref RE_LEVEL_LINE: Regex = Regex::new(
        r"(?i)risk\s*level\s*\**\s*[:\-]?\s*\**\s*(high|medium|moderate|low)\b"
    ).unwrap();
    static ref RE_EXPLICIT_HIGH: Regex = Regex::new(r"(?i)\bhigh[\s-]+risk\b").unwrap();
    static ref RE_EXPLICIT_MEDIUM: Regex = Regex::new(r"(?i)\b(medium|moderate)[\s-]+risk\b").unwrap();
    static ref RE_EXPLICIT_LOW: Regex = Regex::new(r"(?i)\blow[\s-]+risk\b").unwrap();

    // =========================================================================
    // Risk level, group 2: severity adjectives
    // =========================================================================
    static ref RE_SEVERE: Regex = Regex::new(
        r"(?i)\b(severe|critical|dangerous|alarming|emergency)\b"
    ).unwrap();
    static ref RE_CONCERNING: Regex = Regex::new(
        r"(?i)\b(concerning|elevated|caution|worrying|abnormal)\b"
    ).unwrap();
    static ref RE_REASSURING: Regex = Regex::new(
        r"(?i)\b(normal|stable|healthy|reassuring)\b"
    ).unwrap();

    // =========================================================================
    // Risk level, group 3: no verdict
    // =========================================================================
    static ref RE_UNABLE: Regex = Regex::new(
        r"(?i)\b(unable to analy[sz]e|cannot analy[sz]e|insufficient data|not enough data)\b"
    ).unwrap();

    // =========================================================================
    // Factor keywords
    // =========================================================================
    static ref RE_HRV: Regex = Regex::new(r"(?i)\b(hrv|heart rate variability)\b").unwrap();
    static ref RE_HEART_RATE: Regex = Regex::new(r"(?i)\b(heart rate|pulse|tachycardia)\b").unwrap();
    static ref RE_OXYGEN: Regex = Regex::new(r"(?i)\b(oxygen|spo2|saturation)\b").unwrap();
    static ref RE_RESPIRATORY: Regex = Regex::new(
        r"(?i)\b(respiratory|respiration|breathing rate)\b"
    ).unwrap();
    static ref RE_FATIGUE: Regex = Regex::new(
        r"(?i)\b(fatigue|fatigued|drowsy|drowsiness|tired|sleepy)\b"
    ).unwrap();

    // =========================================================================
    // Recommendation lines
    // =========================================================================
    static ref RE_NUMBERED: Regex = Regex::new(r"^\s*\d+[.)]\s+(.+)$").unwrap();
    static ref RE_BULLET: Regex = Regex::new(r"^\s*[-*•]\s+(.+)$").unwrap();
    static ref RE_IMPERATIVE: Regex = Regex::new(
        r"(?i)^\s*((?:take|consider|pull|stop|rest|drink|avoid|continue|stay|monitor|seek|keep|open|breathe|slow|schedule|find|get)\b.+)$"
    ).unwrap();
    static ref RE_RECOMMENDATION_HEADER: Regex = Regex::new(
        r"(?i)^\s*[#*]*\s*(recommendations?|suggestions?|advice)\s*[*]*\s*:?\s*[*]*\s*$"
    ).unwrap();
    static ref RE_FACTOR_HEADER: Regex = Regex::new(
        r"(?i)^\s*[#*]*\s*(risk\s+factors?|factors?)\s*[*]*\s*:?\s*[*]*\s*(none\.?)?\s*$"
    ).unwrap();
    static ref RE_LEVEL_HEADER: Regex = Regex::new(r"(?i)^\s*[#*]*\s*risk\s*level\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Factors,
    Recommendations,
}

/// Parses and validates model output
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser {
    rules: RuleEngine,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            rules: RuleEngine::new(),
        }
    }

    /// Parse a model response against the snapshot it was produced for
    pub fn parse(&self, response: &str, snapshot: &HealthSnapshot) -> Result<RiskAssessment, ParseError> {
        let response = response.trim();
        if response.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let claimed = extract_level(response);
        let factors = self.validated_factors(response, snapshot);

        // Without a supported factor the model's verdict has nothing behind it
        let level = match factors.iter().map(|f| f.severity).max() {
            Some(strongest) => claimed.max(strongest),
            None => {
                if claimed > RiskLevel::Low {
                    debug!(%claimed, "model risk level unsupported by measurements; using Low");
                }
                RiskLevel::Low
            }
        };

        let mut recommendations = extract_recommendations(response);
        if recommendations.is_empty() {
            recommendations = FALLBACK_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect();
        }

        Ok(RiskAssessment::new(
            Utc::now(),
            level,
            factors,
            recommendations,
            AssessmentSource::Model,
        ))
    }

    /// Factor candidates named in the text that the snapshot confirms
    fn validated_factors(&self, response: &str, snapshot: &HealthSnapshot) -> Vec<RiskFactor> {
        let candidates = propose_factors(response);

        let mut factors = Vec::new();
        for kind in candidates {
            match self.rules.evaluate(kind, snapshot) {
                Some(factor) => factors.push(factor),
                None => debug!(?kind, "discarding model risk factor not supported by measurements"),
            }
        }
        factors
    }
}

/// First matching phrase group decides; no match is Low
pub fn extract_level(text: &str) -> RiskLevel {
    if let Some(caps) = RE_LEVEL_LINE.captures(text) {
        return match caps[1].to_ascii_lowercase().as_str() {
            "high" => RiskLevel::High,
            "medium" | "moderate" => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };
    }

    let groups: [&[(&Regex, RiskLevel)]; 3] = [
        &[
            (&*RE_EXPLICIT_HIGH, RiskLevel::High),
            (&*RE_EXPLICIT_MEDIUM, RiskLevel::Medium),
            (&*RE_EXPLICIT_LOW, RiskLevel::Low),
        ],
        &[
            (&*RE_SEVERE, RiskLevel::High),
            (&*RE_CONCERNING, RiskLevel::Medium),
            (&*RE_REASSURING, RiskLevel::Low),
        ],
        &[(&*RE_UNABLE, RiskLevel::Low)],
    ];

    for group in groups {
        for (regex, level) in group {
            if regex.is_match(text) {
                return *level;
            }
        }
    }
    RiskLevel::Low
}

/// Factor kinds whose keywords appear in the text
fn propose_factors(text: &str) -> Vec<RiskFactorKind> {
    let mut kinds = Vec::new();

    // "heart rate variability" must not also count as "heart rate"
    let without_hrv = RE_HRV.replace_all(text, "HRV");

    if RE_HEART_RATE.is_match(&without_hrv) {
        kinds.push(RiskFactorKind::ElevatedHeartRate);
    }
    if RE_HRV.is_match(text) {
        kinds.push(RiskFactorKind::LowHrv);
    }
    if RE_OXYGEN.is_match(text) {
        kinds.push(RiskFactorKind::LowBloodOxygen);
    }
    if RE_RESPIRATORY.is_match(text) {
        kinds.push(RiskFactorKind::ElevatedRespiratoryRate);
    }
    if RE_FATIGUE.is_match(text) {
        kinds.push(RiskFactorKind::Fatigue);
    }
    kinds
}

/// Numbered, bulleted or imperative lines, deduplicated and capped
///
/// When the response has a recommendations heading only the lines under it
/// count; otherwise every line outside the factor list does.
pub fn extract_recommendations(text: &str) -> Vec<String> {
    let has_heading = text.lines().any(|l| RE_RECOMMENDATION_HEADER.is_match(l));

    let mut section = Section::Preamble;
    let mut recs: Vec<String> = Vec::new();

    for line in text.lines() {
        if RE_RECOMMENDATION_HEADER.is_match(line) {
            section = Section::Recommendations;
            continue;
        }
        if RE_FACTOR_HEADER.is_match(line) {
            section = Section::Factors;
            continue;
        }
        if RE_LEVEL_HEADER.is_match(line) {
            section = Section::Preamble;
            continue;
        }

        let accept = match section {
            Section::Recommendations => true,
            Section::Factors => false,
            Section::Preamble => !has_heading,
        };
        if !accept {
            continue;
        }

        let Some(rec) = recommendation_text(line) else {
            continue;
        };
        if rec.eq_ignore_ascii_case("none") || rec.eq_ignore_ascii_case("none.") {
            continue;
        }
        if !recs.iter().any(|r| r.eq_ignore_ascii_case(&rec)) {
            recs.push(rec);
        }
        if recs.len() == MAX_RECOMMENDATIONS {
            break;
        }
    }
    recs
}

fn recommendation_text(line: &str) -> Option<String> {
    let captured = RE_NUMBERED
        .captures(line)
        .or_else(|| RE_BULLET.captures(line))
        .or_else(|| RE_IMPERATIVE.captures(line))?;
    let text = captured[1].trim().trim_matches('*').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VitalKind;

    fn snapshot_with(readings: &[(VitalKind, f64)]) -> HealthSnapshot {
        let now = Utc::now();
        readings
            .iter()
            .fold(HealthSnapshot::new(now), |snap, (kind, value)| {
                snap.with_values(*kind, &[(*value, now)])
            })
    }

    #[test]
    fn test_empty_response_is_error() {
        let parser = ResponseParser::new();
        let err = parser.parse("   \n ", &snapshot_with(&[])).unwrap_err();
        assert_eq!(err, ParseError::EmptyResponse);
    }

    #[test]
    fn test_level_groups_in_order() {
        assert_eq!(extract_level("Risk Level: Medium risk"), RiskLevel::Medium);
        assert_eq!(extract_level("This is HIGH RISK driving"), RiskLevel::High);
        assert_eq!(extract_level("Your readings are concerning."), RiskLevel::Medium);
        assert_eq!(extract_level("Critical condition detected"), RiskLevel::High);
        assert_eq!(extract_level("I am unable to analyze this data"), RiskLevel::Low);
        assert_eq!(extract_level("lorem ipsum"), RiskLevel::Low);
        // Explicit phrase beats an adjective elsewhere
        assert_eq!(extract_level("low risk, although pulse is elevated"), RiskLevel::Low);
    }

    #[test]
    fn test_unsupported_factor_discarded() {
        let parser = ResponseParser::new();
        let response = "Risk Level: High risk\nRisk Factors:\n- Elevated heart rate\nRecommendations:\n1. Pull over now.";

        let absent = parser.parse(response, &snapshot_with(&[])).unwrap();
        assert!(absent.factors().is_empty());
        assert_eq!(absent.level(), RiskLevel::Low);

        let normal = parser.parse(response, &snapshot_with(&[(VitalKind::HeartRate, 100.0)])).unwrap();
        assert!(normal.factors().is_empty());
        assert_eq!(normal.level(), RiskLevel::Low);
    }

    #[test]
    fn test_supported_factor_kept_with_measured_value() {
        let parser = ResponseParser::new();
        let response = "Risk Level: Medium risk\nRisk Factors:\n- Heart rate is elevated\nRecommendations:\n1. Take a break.";
        let result = parser
            .parse(response, &snapshot_with(&[(VitalKind::HeartRate, 118.0)]))
            .unwrap();
        assert_eq!(result.level(), RiskLevel::Medium);
        assert_eq!(result.factors().len(), 1);
        assert_eq!(result.factors()[0].measured_value, 118.0);
        assert_eq!(result.source(), AssessmentSource::Model);
    }

    #[test]
    fn test_level_raised_to_validated_severity() {
        let parser = ResponseParser::new();
        let response = "Risk Level: Low risk\nRisk Factors:\n- Blood oxygen is low";
        let result = parser
            .parse(response, &snapshot_with(&[(VitalKind::BloodOxygen, 87.0)]))
            .unwrap();
        assert_eq!(result.level(), RiskLevel::High);
    }

    #[test]
    fn test_hrv_does_not_propose_heart_rate() {
        let kinds = propose_factors("Heart rate variability is low");
        assert_eq!(kinds, vec![RiskFactorKind::LowHrv]);
    }

    #[test]
    fn test_recommendations_under_heading_only() {
        let text = "Risk Level: Medium risk\nRisk Factors:\n- Elevated heart rate (118 BPM)\nRecommendations:\n1. Take a break.\n2. Drink some water.\n- Take a break.\nStay calm and breathe slowly.";
        let recs = extract_recommendations(text);
        assert_eq!(
            recs,
            vec![
                "Take a break.".to_string(),
                "Drink some water.".to_string(),
                "Stay calm and breathe slowly.".to_string(),
            ]
        );
    }

    #[test]
    fn test_recommendations_capped_and_fallback() {
        let text = (1..=8).map(|i| format!("{}. Step {}", i, i)).collect::<Vec<_>>().join("\n");
        assert_eq!(extract_recommendations(&text).len(), MAX_RECOMMENDATIONS);

        let parser = ResponseParser::new();
        let result = parser.parse("Everything looks normal.", &snapshot_with(&[])).unwrap();
        assert_eq!(result.recommendations().len(), FALLBACK_RECOMMENDATIONS.len());
    }
}
