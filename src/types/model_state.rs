//! Model load state and orchestrator lifecycle

use serde::{Deserialize, Serialize};

/// Where the model loader is in its tier sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelLoadState {
    /// No attempt made yet in this process
    Unloaded,
    /// Trying the tier at this index
    Loading(usize),
    /// The tier at this index produced a usable model
    Loaded(usize),
    /// Every tier failed; rules only until restart
    PermanentlyUnavailable,
}

impl ModelLoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelLoadState::Loaded(_))
    }
}

impl std::fmt::Display for ModelLoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelLoadState::Unloaded => write!(f, "UNLOADED"),
            ModelLoadState::Loading(tier) => write!(f, "LOADING(tier {})", tier),
            ModelLoadState::Loaded(tier) => write!(f, "LOADED(tier {})", tier),
            ModelLoadState::PermanentlyUnavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Orchestrator lifecycle: init → ready → shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    Initialized,
    Ready,
    ShutDown,
}
