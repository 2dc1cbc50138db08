//! Core modules for PulsePilot

pub mod rules;
pub mod runtime;
pub mod loader;
pub mod prompt;
pub mod response_parser;
pub mod orchestrator;
pub mod channel;
pub mod exchange;
pub mod api;

pub use rules::{blood_oxygen_percent, RuleEngine};
pub use runtime::{CommandRuntime, GenerationSettings, LanguageModel, ModelRuntime};
pub use loader::{AssetCache, LoaderConfig, ModelLoader, ModelTier};
pub use prompt::PromptBuilder;
pub use response_parser::{extract_level, extract_recommendations, ResponseParser};
pub use orchestrator::{InferenceOrchestrator, OrchestratorConfig};
pub use channel::{Inbound, LinkEndpoint, LocalLink, PairingChannel, ReplyHandle};
pub use exchange::{ExchangeOutcome, ExchangeProtocol, ExchangeState, LatestExchange, Role, SnapshotSource, ViewState};
pub use api::{create_router, run_server, AppState, BroadcastChannel};
