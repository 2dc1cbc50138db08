//! Model loader: staged fallback across model tiers
//!
//! Tiers are tried from most to least capable. Inside a tier, a load that
//! runs out of resources is retried with the next (smaller) settings; an
//! asset or format error abandons the tier. When every tier fails the state
//! becomes `PermanentlyUnavailable` for the rest of the process.
//!
//! State transitions:
//! - UNLOADED → LOADING(0): first `ensure_loaded`
//! - LOADING(n) → LOADING(n+1): tier n failed
//! - LOADING(n) → LOADED(n): tier n produced a model
//! - LOADING(last) → UNAVAILABLE: nothing left to try

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::runtime::{GenerationSettings, LanguageModel, ModelRuntime};
use crate::types::{ModelError, ModelLoadState};

/// One candidate model asset with its settings, largest first
#[derive(Debug, Clone)]
pub struct ModelTier {
    pub name: String,
    pub asset: PathBuf,
    pub settings: Vec<GenerationSettings>,
}

impl ModelTier {
    pub fn new(name: impl Into<String>, asset: impl Into<PathBuf>, settings: Vec<GenerationSettings>) -> Self {
        Self {
            name: name.into(),
            asset: asset.into(),
            settings,
        }
    }

    /// Primary model at full, reduced and minimal settings, then the secondary model
    pub fn default_tiers(primary: &Path, secondary: &Path) -> Vec<ModelTier> {
        vec![
            ModelTier::new(
                "primary/full",
                primary,
                vec![
                    GenerationSettings::new(4096, 512, 0.3),
                    GenerationSettings::new(3072, 448, 0.3),
                    GenerationSettings::new(2048, 384, 0.3),
                ],
            ),
            ModelTier::new(
                "primary/reduced",
                primary,
                vec![
                    GenerationSettings::new(2048, 384, 0.3),
                    GenerationSettings::new(1536, 320, 0.3),
                    GenerationSettings::new(1024, 256, 0.3),
                ],
            ),
            ModelTier::new(
                "primary/minimal",
                primary,
                vec![
                    GenerationSettings::new(1024, 256, 0.2),
                    GenerationSettings::new(768, 192, 0.2),
                    GenerationSettings::new(512, 128, 0.2),
                ],
            ),
            ModelTier::new(
                "secondary",
                secondary,
                vec![
                    GenerationSettings::new(2048, 384, 0.2),
                    GenerationSettings::new(1024, 256, 0.2),
                    GenerationSettings::new(512, 128, 0.2),
                ],
            ),
        ]
    }
}

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Writable directory model assets are copied into
    pub cache_dir: PathBuf,
    /// Tiers in fallback order
    pub tiers: Vec<ModelTier>,
}

// =============================================================================
// ASSET CACHE
// =============================================================================

/// Writable copy of model assets
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Copy `source` into the cache unless a current copy already exists
    ///
    /// Cached files are keyed by the source's full path, so two assets that
    /// share a file name never share a cached copy. A copy whose size no
    /// longer matches its source is replaced. The copy goes through a
    /// temporary file and a rename, so a partial copy is never mistaken for a
    /// cached asset.
    pub fn prepare(&self, source: &Path) -> Result<PathBuf, ModelError> {
        let cached = self.cached_path(source)?;
        let source_len = fs::metadata(source).ok().filter(|m| m.is_file()).map(|m| m.len());

        if let Ok(existing) = fs::metadata(&cached) {
            if existing.is_file() && source_len.map_or(true, |len| len == existing.len()) {
                debug!(path = %cached.display(), "reusing cached model asset");
                return Ok(cached);
            }
            debug!(path = %cached.display(), "cached model asset is stale");
        }
        if source_len.is_none() {
            return Err(ModelError::AssetMissing(source.to_path_buf()));
        }

        let copy_err = |source: std::io::Error| ModelError::AssetCopy {
            path: cached.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(copy_err)?;

        let mut partial = cached.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        fs::copy(source, &partial).map_err(copy_err)?;
        fs::rename(&partial, &cached).map_err(copy_err)?;

        info!(from = %source.display(), to = %cached.display(), "copied model asset into cache");
        Ok(cached)
    }

    /// Cache location for a source: path digest prefix plus the file name
    pub fn cached_path(&self, source: &Path) -> Result<PathBuf, ModelError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| ModelError::AssetMissing(source.to_path_buf()))?;
        let identity = if source.is_absolute() {
            source.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|dir| dir.join(source))
                .unwrap_or_else(|_| source.to_path_buf())
        };

        let mut hasher = Sha256::new();
        hasher.update(identity.as_os_str().to_string_lossy().as_bytes());
        let digest: String = hasher.finalize()[..8].iter().map(|b| format!("{:02x}", b)).collect();

        Ok(self.dir.join(format!("{}-{}", digest, file_name.to_string_lossy())))
    }
}

// =============================================================================
// LOADER
// =============================================================================

/// Owns the model load state and, once loaded, the model handle
pub struct ModelLoader {
    runtime: Arc<dyn ModelRuntime>,
    tiers: Vec<ModelTier>,
    cache: AssetCache,
    state: watch::Sender<ModelLoadState>,
    handle: RwLock<Option<Arc<dyn LanguageModel>>>,
    unavailable_reason: RwLock<Option<String>>,
}

impl ModelLoader {
    /// Create new loader in the UNLOADED state
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: LoaderConfig) -> Self {
        let (state, _) = watch::channel(ModelLoadState::Unloaded);
        Self {
            runtime,
            tiers: config.tiers,
            cache: AssetCache::new(config.cache_dir),
            state,
            handle: RwLock::new(None),
            unavailable_reason: RwLock::new(None),
        }
    }

    /// Current state
    pub fn state(&self) -> ModelLoadState {
        *self.state.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ModelLoadState> {
        self.state.subscribe()
    }

    /// Tier definitions in fallback order
    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// Loaded model, if any
    pub fn handle(&self) -> Option<Arc<dyn LanguageModel>> {
        match self.handle.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Why no model is available, once every tier has failed
    pub fn unavailable_reason(&self) -> Option<String> {
        match self.unavailable_reason.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Human-readable status line
    pub fn status(&self) -> String {
        match self.state() {
            ModelLoadState::Unloaded => "Model not loaded".to_string(),
            ModelLoadState::Loading(tier) => format!("Loading model ({})", self.tier_name(tier)),
            ModelLoadState::Loaded(tier) => format!("Model ready ({})", self.tier_name(tier)),
            ModelLoadState::PermanentlyUnavailable => self
                .unavailable_reason()
                .unwrap_or_else(|| "On-device model unavailable".to_string()),
        }
    }

    /// Run the tier sequence once
    ///
    /// Only the first call from UNLOADED does any work; calls made while
    /// loading, after loading, or after giving up return the current state
    /// immediately.
    pub async fn ensure_loaded(self: &Arc<Self>) -> ModelLoadState {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ModelLoadState::Unloaded {
                *state = ModelLoadState::Loading(0);
                true
            } else {
                false
            }
        });
        if !claimed {
            return self.state();
        }

        let loader = Arc::clone(self);
        match tokio::task::spawn_blocking(move || loader.run_tiers()).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "model load task failed");
                self.give_up(format!("load task failed: {}", e))
            }
        }
    }

    /// Drop the model handle (orchestrator shutdown)
    pub fn unload(&self) {
        let previous = match self.handle.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if previous.is_some() {
            self.state.send_if_modified(|state| {
                if state.is_loaded() {
                    *state = ModelLoadState::Unloaded;
                    true
                } else {
                    false
                }
            });
            info!("model unloaded");
        }
    }

    fn run_tiers(&self) -> ModelLoadState {
        let mut last_error: Option<String> = None;

        for (index, tier) in self.tiers.iter().enumerate() {
            self.state.send_replace(ModelLoadState::Loading(index));
            info!(tier = index, name = %tier.name, "trying model tier");

            let path = match self.cache.prepare(&tier.asset) {
                Ok(path) => path,
                Err(e) => {
                    warn!(tier = index, error = %e, "model tier skipped");
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            for settings in &tier.settings {
                match self.runtime.load(&path, settings) {
                    Ok(model) => {
                        self.store_handle(model);
                        self.state.send_replace(ModelLoadState::Loaded(index));
                        info!(tier = index, name = %tier.name, ?settings, "model loaded");
                        return ModelLoadState::Loaded(index);
                    }
                    Err(ModelError::InsufficientResources(msg)) => {
                        debug!(tier = index, ?settings, %msg, "retrying with reduced settings");
                        last_error = Some(format!("insufficient resources: {}", msg));
                    }
                    Err(e) => {
                        warn!(tier = index, error = %e, "model tier failed");
                        last_error = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        self.give_up(last_error.unwrap_or_else(|| "no model tiers configured".to_string()))
    }

    fn store_handle(&self, model: Arc<dyn LanguageModel>) {
        match self.handle.write() {
            Ok(mut guard) => *guard = Some(model),
            Err(poisoned) => *poisoned.into_inner() = Some(model),
        }
    }

    fn give_up(&self, cause: String) -> ModelLoadState {
        let reason = format!(
            "On-device model unavailable ({}); using rule-based analysis",
            cause
        );
        warn!(%reason, "all model tiers exhausted");
        match self.unavailable_reason.write() {
            Ok(mut guard) => *guard = Some(reason),
            Err(poisoned) => *poisoned.into_inner() = Some(reason),
        }
        self.state.send_replace(ModelLoadState::PermanentlyUnavailable);
        ModelLoadState::PermanentlyUnavailable
    }

    fn tier_name(&self, index: usize) -> &str {
        self.tiers.get(index).map(|t| t.name.as_str()).unwrap_or("unknown tier")
    }
}

// =============================================================================
// TESTS
// =============================================================================
