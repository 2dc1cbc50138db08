//! Health snapshot: typed time series for each vital sign
//!
//! A kind that is absent, or present with no samples, means "not measured".
//! It is never read as a zero.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SamplePoint, VitalKind};

/// Immutable bundle of vital series captured at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSnapshot")]
pub struct HealthSnapshot {
    captured_at: DateTime<Utc>,
    series: BTreeMap<VitalKind, Vec<SamplePoint>>,
}

/// Serialized form; every series is normalised through `with_series`
#[derive(Deserialize)]
struct RawSnapshot {
    captured_at: DateTime<Utc>,
    #[serde(default)]
    series: BTreeMap<VitalKind, Vec<SamplePoint>>,
}

impl From<RawSnapshot> for HealthSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        raw.series
            .into_iter()
            .fold(HealthSnapshot::new(raw.captured_at), |snapshot, (kind, samples)| {
                snapshot.with_series(kind, samples)
            })
    }
}

impl HealthSnapshot {
    /// Create an empty snapshot; the capture time keeps microsecond precision
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at: captured_at.trunc_subsecs(6),
            series: BTreeMap::new(),
        }
    }

    /// Attach a series, keeping samples in chronological order
    ///
    /// An empty series is dropped so that "empty" and "absent" stay the same thing.
    pub fn with_series(mut self, kind: VitalKind, mut samples: Vec<SamplePoint>) -> Self {
        if samples.is_empty() {
            self.series.remove(&kind);
            return self;
        }
        samples.sort_by_key(|s| s.timestamp());
        self.series.insert(kind, samples);
        self
    }

    /// Convenience for a series of values sharing the kind's default unit
    pub fn with_values(self, kind: VitalKind, values: &[(f64, DateTime<Utc>)]) -> Self {
        let unit = kind.default_unit();
        let samples = values
            .iter()
            .map(|(value, at)| SamplePoint::new(*value, *at, unit))
            .collect();
        self.with_series(kind, samples)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Samples for a kind, oldest first (empty when not measured)
    pub fn series(&self, kind: VitalKind) -> &[SamplePoint] {
        self.series.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Latest sample of a kind, `None` when unavailable
    pub fn latest_sample(&self, kind: VitalKind) -> Option<&SamplePoint> {
        self.series(kind).last()
    }

    /// Latest value of a kind, `None` when unavailable
    pub fn latest(&self, kind: VitalKind) -> Option<f64> {
        self.latest_sample(kind).map(SamplePoint::value)
    }

    /// Whether any sample of this kind was captured
    pub fn is_measured(&self, kind: VitalKind) -> bool {
        !self.series(kind).is_empty()
    }

    /// Measured kinds in stable order
    pub fn measured_kinds(&self) -> impl Iterator<Item = VitalKind> + '_ {
        self.series
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(kind, _)| *kind)
    }

    /// True when no vital was measured at all
    pub fn is_empty(&self) -> bool {
        self.measured_kinds().next().is_none()
    }
}
