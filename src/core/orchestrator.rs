//! Inference orchestrator: single-flight model analysis with rule fallback
//!
//! At most one model invocation runs at a time. A caller arriving while one
//! is in flight polls for it; when it finishes with a fresh cached result the
//! caller shares it, and when it takes too long the caller takes the rule
//! engine's answer and stops waiting. The in-flight analysis runs on its own
//! task, so it finishes and fills the cache even if every caller gave up.
//!
//! `assess_driving_risk` never fails: every error path ends at the rule engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::loader::ModelLoader;
use crate::core::prompt::PromptBuilder;
use crate::core::response_parser::ResponseParser;
use crate::core::rules::RuleEngine;
use crate::core::runtime::LanguageModel;
use crate::types::{HealthSnapshot, Lifecycle, ModelLoadState, RiskAssessment};
use crate::{CACHE_TTL_SECS, MAX_WAIT_TICKS, WAIT_TICK_MS};

/// Coalescing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    /// Poll interval while another analysis is in flight
    pub wait_tick: Duration,
    /// Polls before giving up on the in-flight analysis
    pub max_wait_ticks: u32,
    /// Age under which a finished result is shared with waiters
    pub cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wait_tick: Duration::from_millis(WAIT_TICK_MS),
            max_wait_ticks: MAX_WAIT_TICKS,
            cache_ttl: Duration::from_secs(CACHE_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedAssessment {
    assessment: RiskAssessment,
    stored_at: Instant,
}

#[derive(Debug)]
struct Shared {
    lifecycle: Lifecycle,
    in_flight: bool,
    cached: Option<CachedAssessment>,
}

/// Result of waiting on someone else's analysis
enum WaitOutcome {
    Cached(RiskAssessment),
    Finished,
    TimedOut,
}

struct Inner {
    loader: Arc<ModelLoader>,
    config: OrchestratorConfig,
    rules: RuleEngine,
    prompts: PromptBuilder,
    parser: ResponseParser,
    shared: Mutex<Shared>,
    model_invocations: AtomicU64,
}

/// Owner of the model handle and the in-flight flag
#[derive(Clone)]
pub struct InferenceOrchestrator {
    inner: Arc<Inner>,
}

impl InferenceOrchestrator {
    /// Create new orchestrator (INITIALIZED; no model loading yet)
    pub fn new(loader: Arc<ModelLoader>, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                config,
                rules: RuleEngine::new(),
                prompts: PromptBuilder::new(),
                parser: ResponseParser::new(),
                shared: Mutex::new(Shared {
                    lifecycle: Lifecycle::Initialized,
                    in_flight: false,
                    cached: None,
                }),
                model_invocations: AtomicU64::new(0),
            }),
        }
    }

    /// Move to READY and load the model in the background
    ///
    /// Must be called from within a Tokio runtime. The returned handle
    /// resolves to the final load state; dropping it does not stop loading.
    /// After `shutdown` this is a no-op resolving to the current load state.
    pub fn start(&self) -> JoinHandle<ModelLoadState> {
        {
            let mut shared = self.inner.lock();
            match shared.lifecycle {
                Lifecycle::Initialized => {
                    shared.lifecycle = Lifecycle::Ready;
                    info!("inference orchestrator ready");
                }
                Lifecycle::Ready => {}
                Lifecycle::ShutDown => {
                    let state = self.inner.loader.state();
                    debug!(?state, "start after shutdown ignored");
                    return tokio::spawn(async move { state });
                }
            }
        }
        let loader = Arc::clone(&self.inner.loader);
        tokio::spawn(async move { loader.ensure_loaded().await })
    }

    /// Stop using the model: waits (bounded) for an in-flight analysis, then
    /// releases the model handle. Later calls are answered by the rule engine.
    pub async fn shutdown(&self) {
        self.inner.lock().lifecycle = Lifecycle::ShutDown;
        if let WaitOutcome::TimedOut = self.inner.wait_for_in_flight().await {
            warn!("shutting down with an analysis still in flight");
        }
        self.inner.loader.unload();
        info!("inference orchestrator shut down");
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    /// Model status line for the view layer
    pub fn model_status(&self) -> String {
        self.inner.loader.status()
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.inner.loader
    }

    /// Number of model invocations started by this orchestrator
    pub fn model_invocations(&self) -> u64 {
        self.inner.model_invocations.load(Ordering::SeqCst)
    }

    /// Most recently cached assessment, regardless of age
    pub fn latest_assessment(&self) -> Option<RiskAssessment> {
        self.inner.lock().cached.as_ref().map(|c| c.assessment.clone())
    }

    /// Assess a snapshot; always produces an assessment
    pub async fn assess_driving_risk(&self, snapshot: &HealthSnapshot) -> RiskAssessment {
        let claimed = {
            let mut shared = self.inner.lock();
            if shared.lifecycle == Lifecycle::ShutDown {
                return self.inner.rules.assess(snapshot);
            }
            if shared.in_flight {
                false
            } else {
                shared.in_flight = true;
                true
            }
        };

        if !claimed {
            match self.inner.wait_for_in_flight().await {
                WaitOutcome::Cached(assessment) => {
                    debug!("sharing assessment from in-flight analysis");
                    return assessment;
                }
                WaitOutcome::TimedOut => {
                    warn!(
                        ticks = self.inner.config.max_wait_ticks,
                        "in-flight analysis still running; using rule-based assessment"
                    );
                    return self.inner.rules.assess(snapshot);
                }
                WaitOutcome::Finished => {
                    let mut shared = self.inner.lock();
                    if shared.in_flight {
                        debug!("another caller claimed the model first; using rule-based assessment");
                        return self.inner.rules.assess(snapshot);
                    }
                    shared.in_flight = true;
                }
            }
        }

        let inner = Arc::clone(&self.inner);
        let owned = snapshot.clone();
        match tokio::spawn(async move { inner.run_claimed(owned).await }).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(error = %e, "analysis task failed; using rule-based assessment");
                self.inner.rules.assess(snapshot)
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs with the in-flight flag held; clears it on every exit path
    async fn run_claimed(self: Arc<Self>, snapshot: HealthSnapshot) -> RiskAssessment {
        let _guard = InFlightGuard {
            inner: Arc::clone(&self),
        };

        let prompt = self.prompts.build(&snapshot);
        let state = self.loader.state();
        let assessment = match (state, self.loader.handle()) {
            (ModelLoadState::Loaded(_), Some(model)) => self.run_model(model, prompt, &snapshot).await,
            _ => {
                debug!(%state, "no model loaded; using rule-based assessment");
                self.rules.assess(&snapshot)
            }
        };

        self.lock().cached = Some(CachedAssessment {
            assessment: assessment.clone(),
            stored_at: Instant::now(),
        });
        assessment
    }

    async fn run_model(
        &self,
        model: Arc<dyn LanguageModel>,
        prompt: String,
        snapshot: &HealthSnapshot,
    ) -> RiskAssessment {
        self.model_invocations.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let response = tokio::task::spawn_blocking(move || model.generate(&prompt)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(Ok(text)) => match self.parser.parse(&text, snapshot) {
                Ok(assessment) => {
                    info!(elapsed_ms, level = %assessment.level(), "model assessment produced");
                    assessment
                }
                Err(e) => {
                    warn!(error = %e, "unusable model response; using rule-based assessment");
                    self.rules.assess(snapshot)
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, elapsed_ms, "model inference failed; using rule-based assessment");
                self.rules.assess(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "model task failed; using rule-based assessment");
                self.rules.assess(snapshot)
            }
        }
    }

    async fn wait_for_in_flight(&self) -> WaitOutcome {
        for _ in 0..self.config.max_wait_ticks {
            {
                let shared = self.lock();
                if !shared.in_flight {
                    return match &shared.cached {
                        Some(cached) if cached.stored_at.elapsed() < self.config.cache_ttl => {
                            WaitOutcome::Cached(cached.assessment.clone())
                        }
                        _ => WaitOutcome::Finished,
                    };
                }
            }
            tokio::time::sleep(self.config.wait_tick).await;
        }

        if self.lock().in_flight {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Finished
        }
    }
}

struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.lock().in_flight = false;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loader::{LoaderConfig, ModelTier};
    use crate::core::runtime::{GenerationSettings, ModelRuntime};
    use crate::types::{AssessmentSource, ModelError, RiskLevel, VitalKind};
    use chrono::Utc;
    use std::path::Path;

    struct FixedModel(Result<String, String>);

    impl LanguageModel for FixedModel {
        fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
            self.0.clone().map_err(ModelError::Generation)
        }
    }

    struct FixedRuntime(Result<String, String>);

    impl ModelRuntime for FixedRuntime {
        fn load(&self, _: &Path, _: &GenerationSettings) -> Result<Arc<dyn LanguageModel>, ModelError> {
            Ok(Arc::new(FixedModel(self.0.clone())))
        }
    }

    async fn loaded_orchestrator(response: Result<String, String>) -> (InferenceOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("model.gguf");
        std::fs::write(&asset, b"GGUF").unwrap();
        let loader = Arc::new(ModelLoader::new(
            Arc::new(FixedRuntime(response)),
            LoaderConfig {
                cache_dir: dir.path().join("cache"),
                tiers: vec![ModelTier::new("only", &asset, vec![GenerationSettings::new(512, 128, 0.2)])],
            },
        ));
        let orchestrator = InferenceOrchestrator::new(loader, OrchestratorConfig::default());
        assert_eq!(orchestrator.start().await.unwrap(), ModelLoadState::Loaded(0));
        (orchestrator, dir)
    }

    fn elevated_heart_rate() -> HealthSnapshot {
        let now = Utc::now();
        HealthSnapshot::new(now).with_values(VitalKind::HeartRate, &[(118.0, now)])
    }

    #[test]
    fn test_default_config_matches_constants() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.wait_tick, Duration::from_secs(1));
        assert_eq!(config.max_wait_ticks, 30);
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_model_result_used_when_loaded() {
        let response = "Risk Level: Medium risk\nRisk Factors:\n- Heart rate elevated\nRecommendations:\n1. Take a break.";
        let (orchestrator, _dir) = loaded_orchestrator(Ok(response.to_string())).await;

        let result = orchestrator.assess_driving_risk(&elevated_heart_rate()).await;
        assert_eq!(result.source(), AssessmentSource::Model);
        assert_eq!(result.level(), RiskLevel::Medium);
        assert_eq!(result.recommendations(), &["Take a break.".to_string()]);
        assert_eq!(orchestrator.model_invocations(), 1);
        assert_eq!(orchestrator.latest_assessment(), Some(result));
    }

    #[tokio::test]
    async fn test_model_error_falls_back_to_rules() {
        let (orchestrator, _dir) = loaded_orchestrator(Err("boom".to_string())).await;
        let result = orchestrator.assess_driving_risk(&elevated_heart_rate()).await;
        assert_eq!(result.source(), AssessmentSource::Rules);
        assert_eq!(result.level(), RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_empty_model_output_falls_back_to_rules() {
        let (orchestrator, _dir) = loaded_orchestrator(Ok("  ".to_string())).await;
        let result = orchestrator.assess_driving_risk(&elevated_heart_rate()).await;
        assert_eq!(result.source(), AssessmentSource::Rules);
    }

    #[tokio::test]
    async fn test_shutdown_uses_rules_and_releases_model() {
        let (orchestrator, _dir) = loaded_orchestrator(Ok("Risk Level: Low risk".to_string())).await;
        orchestrator.shutdown().await;

        assert_eq!(orchestrator.lifecycle(), Lifecycle::ShutDown);
        assert!(orchestrator.loader().handle().is_none());
        let result = orchestrator.assess_driving_risk(&elevated_heart_rate()).await;
        assert_eq!(result.source(), AssessmentSource::Rules);
        assert_eq!(orchestrator.model_invocations(), 0);
    }

    #[tokio::test]
    async fn test_start_after_shutdown_does_not_reload() {
        let (orchestrator, _dir) = loaded_orchestrator(Ok("Risk Level: Low risk".to_string())).await;
        orchestrator.shutdown().await;

        assert_eq!(orchestrator.start().await.unwrap(), ModelLoadState::Unloaded);
        assert_eq!(orchestrator.lifecycle(), Lifecycle::ShutDown);
        assert!(orchestrator.loader().handle().is_none());
        let result = orchestrator.assess_driving_risk(&elevated_heart_rate()).await;
        assert_eq!(result.source(), AssessmentSource::Rules);
    }
}
