//! Core types for PulsePilot

mod vitals;
mod snapshot;
mod risk;
mod model_state;
mod message;
mod error;

pub use vitals::{VitalKind, Unit, SamplePoint};
pub use snapshot::HealthSnapshot;
pub use risk::{RiskLevel, RiskFactorKind, RiskFactor, RiskAssessment, AssessmentSource};
pub use model_state::{ModelLoadState, Lifecycle};
pub use message::{
    ExchangeMessage, HealthDataPayload, RiskAssessmentPayload, WireSample, WireRiskFactor,
    Reply, ReplyStatus, epoch_seconds, from_epoch_seconds,
    TYPE_HEALTH_DATA, TYPE_RISK_ASSESSMENT_REQUEST, TYPE_RISK_ASSESSMENT_RESULT,
};
pub use error::{ModelError, ParseError, ChannelError, MessageError, ExchangeError};
