//! Prompt construction
//!
//! Only measured vitals are listed; absent kinds are never mentioned or
//! filled in.

use std::fmt::Write;

use crate::core::rules::blood_oxygen_percent;
use crate::types::{HealthSnapshot, VitalKind};
use crate::{
    BLOOD_OXYGEN_HIGH, BLOOD_OXYGEN_MEDIUM, HEART_RATE_HIGH, HEART_RATE_MEDIUM,
    HEART_RATE_NORMAL_MIN, HRV_HIGH, HRV_MEDIUM, MAX_RECOMMENDATIONS, RESPIRATORY_RATE_HIGH,
    RESPIRATORY_RATE_LOW,
};

/// Builds the instruction block sent to the model
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, snapshot: &HealthSnapshot) -> String {
        let mut prompt = String::with_capacity(1536);

        prompt.push_str(
            "You are a driving safety assistant. Assess whether the driver's current \
             vital signs, measured by a wearable device, indicate a risk to safe driving.\n\n",
        );

        prompt.push_str("Measured vital signs:\n");
        if snapshot.is_empty() {
            prompt.push_str("- No vital signs were measured.\n");
        }
        for line in snapshot.measured_kinds().filter_map(|kind| describe_series(snapshot, kind)) {
            let _ = writeln!(prompt, "- {}", line);
        }

        let _ = write!(
            prompt,
            "\nClinical guidelines:\n\
             - Normal resting heart rate is {min:.0}-{med:.0} BPM. Above {med:.0} BPM is elevated; above {high:.0} BPM is high risk.\n\
             - HRV below {hrv_med:.0} ms suggests stress or fatigue; below {hrv_high:.0} ms is high risk.\n\
             - Blood oxygen below {o2_med:.0}% is concerning; below {o2_high:.0}% is high risk.\n\
             - Normal respiratory rate is {rr_low:.0}-{rr_high:.0} breaths per minute.\n",
            min = HEART_RATE_NORMAL_MIN,
            med = HEART_RATE_MEDIUM,
            high = HEART_RATE_HIGH,
            hrv_med = HRV_MEDIUM,
            hrv_high = HRV_HIGH,
            o2_med = BLOOD_OXYGEN_MEDIUM,
            o2_high = BLOOD_OXYGEN_HIGH,
            rr_low = RESPIRATORY_RATE_LOW,
            rr_high = RESPIRATORY_RATE_HIGH,
        );

        let _ = write!(
            prompt,
            "\nConstraints:\n\
             - Do not flag a heart rate between {min:.0} and {med:.0} BPM as a risk.\n\
             - Do not mention vital signs that are not listed above.\n\
             - Only report a risk factor when a listed value is outside its normal range.\n\
             - If the data is insufficient, say \"unable to analyze\".\n",
            min = HEART_RATE_NORMAL_MIN,
            med = HEART_RATE_MEDIUM,
        );

        let _ = write!(
            prompt,
            "\nRespond in exactly this format:\n\
             Risk Level: <Low|Medium|High> risk\n\
             Risk Factors:\n\
             - <factor with its measured value, or None>\n\
             Recommendations:\n\
             1. <short actionable recommendation>\n\
             Give at most {} recommendations.\n",
            MAX_RECOMMENDATIONS
        );

        prompt
    }
}

/// "Heart rate: 118 BPM (latest of 3 readings, range 110-118 BPM)"
/// One prompt line for a measured series; `None` when there is nothing to report
fn describe_series(snapshot: &HealthSnapshot, kind: VitalKind) -> Option<String> {
    let samples = snapshot.series(kind);
    let last = samples.last()?;
    let scale = |v: f64| {
        if kind == VitalKind::BloodOxygen {
            blood_oxygen_percent(v)
        } else {
            v
        }
    };

    let latest = scale(last.value());
    let symbol = last.unit().symbol();
    let spacer = if symbol == "%" { "" } else { " " };

    if samples.len() == 1 {
        return Some(format!("{}: {:.0}{}{}", kind.display_name(), latest, spacer, symbol));
    }

    let (min, max) = samples.iter().map(|s| scale(s.value())).fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), v| (lo.min(v), hi.max(v)),
    );
    Some(format!(
        "{}: {:.0}{}{} (latest of {} readings, range {:.0}-{:.0}{}{})",
        kind.display_name(),
        latest,
        spacer,
        symbol,
        samples.len(),
        min,
        max,
        spacer,
        symbol
    ))
}
