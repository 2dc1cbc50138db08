//! Model runtime capability
//!
//! Any on-device text-generation backend that can `load` a model file with a
//! set of generation settings and `generate` text from a prompt can drive the
//! loader and orchestrator.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use crate::types::ModelError;

/// Magic bytes at the start of a GGUF model file
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Resource settings for one load attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    /// Context window in tokens
    pub context_tokens: u32,
    /// Token budget for a response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl GenerationSettings {
    pub const fn new(context_tokens: u32, max_tokens: u32, temperature: f32) -> Self {
        Self {
            context_tokens,
            max_tokens,
            temperature,
        }
    }
}

/// A loaded model that can produce text
pub trait LanguageModel: Send + Sync {
    /// Generate a response for a prompt (blocking)
    fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Backend able to bring a model file online
pub trait ModelRuntime: Send + Sync {
    /// Load the model at `path` with the given settings (blocking)
    fn load(
        &self,
        path: &Path,
        settings: &GenerationSettings,
    ) -> Result<Arc<dyn LanguageModel>, ModelError>;
}

// =============================================================================
// EXTERNAL COMMAND BACKEND
// =============================================================================

/// Prompt used to check that a model fits with the requested settings
const WARMUP_PROMPT: &str = "Ready.";

/// Runtime that drives a llama.cpp-style executable
///
/// The runner is invoked once per generation with the model path, context
/// size, token budget, temperature and prompt. Loading runs a one-token
/// warm-up with the requested settings so that allocation failures surface
/// at load time, where the loader can retry with smaller settings.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    runner: PathBuf,
}

impl CommandRuntime {
    pub fn new(runner: impl Into<PathBuf>) -> Self {
        Self {
            runner: runner.into(),
        }
    }
}

impl ModelRuntime for CommandRuntime {
    fn load(
        &self,
        path: &Path,
        settings: &GenerationSettings,
    ) -> Result<Arc<dyn LanguageModel>, ModelError> {
        check_gguf_header(path)?;

        if !runner_available(&self.runner) {
            return Err(ModelError::IncompatibleFormat(format!(
                "runner {} not available",
                self.runner.display()
            )));
        }

        let model = CommandModel {
            runner: self.runner.clone(),
            model: path.to_path_buf(),
            settings: *settings,
        };
        match model.run(WARMUP_PROMPT, 1) {
            Ok(_) => {}
            Err(ModelError::Generation(msg)) => {
                return Err(ModelError::IncompatibleFormat(format!(
                    "warm-up failed: {}",
                    msg
                )))
            }
            Err(e) => return Err(e),
        }

        debug!(model = %path.display(), ?settings, "model accepted by command runtime");
        Ok(Arc::new(model))
    }
}

/// Model served by one runner invocation per prompt
#[derive(Debug)]
struct CommandModel {
    runner: PathBuf,
    model: PathBuf,
    settings: GenerationSettings,
}

impl CommandModel {
    fn run(&self, prompt: &str, max_tokens: u32) -> Result<String, ModelError> {
        let output = Command::new(&self.runner)
            .arg("-m")
            .arg(&self.model)
            .arg("-c")
            .arg(self.settings.context_tokens.to_string())
            .arg("-n")
            .arg(max_tokens.to_string())
            .arg("--temp")
            .arg(self.settings.temperature.to_string())
            .arg("--no-display-prompt")
            .arg("-p")
            .arg(prompt)
            .output()
            .map_err(|e| ModelError::Generation(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_allocation_failure(&stderr) {
                return Err(ModelError::InsufficientResources(stderr.trim().to_string()));
            }
            return Err(ModelError::Generation(format!(
                "runner exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LanguageModel for CommandModel {
    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        self.run(prompt, self.settings.max_tokens)
    }
}

fn is_allocation_failure(stderr: &str) -> bool {
    stderr.contains("out of memory") || stderr.contains("failed to allocate")
}

/// Reject anything that is not a GGUF file
fn check_gguf_header(path: &Path) -> Result<(), ModelError> {
    let mut file = File::open(path).map_err(|_| ModelError::AssetMissing(path.to_path_buf()))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|_| {
        ModelError::IncompatibleFormat(format!("{} is too short to be a model", path.display()))
    })?;
    if &magic != GGUF_MAGIC {
        return Err(ModelError::IncompatibleFormat(format!(
            "{} is not a GGUF file",
            path.display()
        )));
    }
    Ok(())
}

fn runner_available(runner: &Path) -> bool {
    if runner.components().count() > 1 {
        return runner.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(runner).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rejects_non_gguf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        File::create(&path).unwrap().write_all(b"NOPE1234").unwrap();

        let err = check_gguf_header(&path).unwrap_err();
        assert!(matches!(err, ModelError::IncompatibleFormat(_)));
    }

    #[test]
    fn test_missing_file_is_asset_missing() {
        let err = check_gguf_header(Path::new("/nonexistent/model.gguf")).unwrap_err();
        assert!(matches!(err, ModelError::AssetMissing(_)));
    }

    #[test]
    fn test_missing_runner_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        File::create(&path).unwrap().write_all(b"GGUF\x03\x00\x00\x00").unwrap();

        let runtime = CommandRuntime::new(dir.path().join("no-such-runner"));
        let result = runtime.load(&path, &GenerationSettings::new(512, 128, 0.2));
        assert!(matches!(result, Err(ModelError::IncompatibleFormat(_))));
    }

    /// Executable shell script standing in for the model runner
    #[cfg(unix)]
    fn write_runner(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let runner = dir.join("runner.sh");
        std::fs::write(&runner, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();
        runner
    }

    #[cfg(unix)]
    fn write_model(dir: &Path) -> PathBuf {
        let path = dir.join("model.gguf");
        File::create(&path).unwrap().write_all(b"GGUF\x03\x00\x00\x00").unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_allocation_failure_at_load_is_insufficient_resources() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path());
        let runner = write_runner(
            dir.path(),
            "case \"$*\" in *\"-c 4096\"*) echo \"failed to allocate KV cache\" >&2; exit 1;; esac\necho ok\n",
        );
        let runtime = CommandRuntime::new(&runner);

        let result = runtime.load(&model, &GenerationSettings::new(4096, 512, 0.3));
        assert!(matches!(result, Err(ModelError::InsufficientResources(_))));

        let model = runtime.load(&model, &GenerationSettings::new(2048, 384, 0.3)).unwrap();
        assert_eq!(model.generate("hello").unwrap().trim(), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_crash_at_load_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path());
        let runner = write_runner(dir.path(), "echo \"unknown model architecture\" >&2\nexit 1\n");

        let result = CommandRuntime::new(&runner).load(&model, &GenerationSettings::new(512, 128, 0.2));
        assert!(matches!(result, Err(ModelError::IncompatibleFormat(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_generate_uses_full_token_budget() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path());
        let runner = write_runner(dir.path(), "echo \"$*\"\n");
        let runtime = CommandRuntime::new(&runner);

        let model = runtime.load(&model, &GenerationSettings::new(2048, 384, 0.3)).unwrap();
        let args = model.generate("hello").unwrap();
        assert!(args.contains("-c 2048"));
        assert!(args.contains("-n 384"));
    }
}
