//! Model readiness and language registry.
//!
//! [`ModelStatus`] is the explicit readiness state machine of a synthesis
//! backend.  It replaces any process-wide "is the model loaded" flag: each
//! backend owns one and hands out clones to whoever needs to watch it.
//!
//! Installation happens outside this crate.  The installer reports through
//! marker files in the model directory, which [`ModelStatus::refresh`] reads
//! together with the required model files:
//!
//! ```text
//! NotDownloaded ──.downloading──▶ Downloading ──marker removed, files──▶ Ready
//!                                      │
//!                                      └──.download-failed──▶ Failed
//! Failed ──.downloading──▶ Downloading            (retry)
//! Ready  ──.downloading──▶ Downloading            (forced re-download)
//! Ready  ──files vanish──▶ NotDownloaded
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// Present in the model directory while an installation is running.
pub const DOWNLOADING_MARKER: &str = ".downloading";
/// Left in the model directory by a failed installation; holds the reason.
pub const FAILED_MARKER: &str = ".download-failed";

// ---------------------------------------------------------------------------
// ModelState
// ---------------------------------------------------------------------------

/// Readiness of the synthesis model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ModelState {
    /// Model files are not on disk.
    NotDownloaded,
    /// An installation is in progress.
    Downloading,
    /// All required files are present.
    Ready,
    /// The last installation attempt failed.
    Failed(String),
}

impl ModelState {
    pub fn label(&self) -> &'static str {
        match self {
            ModelState::NotDownloaded => "not downloaded",
            ModelState::Downloading => "downloading",
            ModelState::Ready => "ready",
            ModelState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// ModelStatus
// ---------------------------------------------------------------------------

/// Shared, thread-safe readiness handle.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct ModelStatus {
    state: Arc<Mutex<ModelState>>,
    model_dir: PathBuf,
    required_files: Vec<String>,
}

impl ModelStatus {
    /// Start in `NotDownloaded`; call [`refresh`](Self::refresh) to pick up
    /// files that are already installed.
    pub fn new(model_dir: impl Into<PathBuf>, required_files: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ModelState::NotDownloaded)),
            model_dir: model_dir.into(),
            required_files,
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Current state without touching the filesystem.
    pub fn state(&self) -> ModelState {
        self.lock().clone()
    }

    /// Files from the required list that are missing on disk.
    pub fn missing_files(&self) -> Vec<String> {
        self.required_files
            .iter()
            .filter(|f| !self.model_dir.join(f).exists())
            .cloned()
            .collect()
    }

    /// Reconcile the state with the model directory and return it.
    ///
    /// An installation marker wins over the model files, so a forced
    /// re-download reports `Downloading` even while old files are present.
    pub fn refresh(&self) -> ModelState {
        let observed = self.observe();
        let mut state = self.lock();
        if *state != observed {
            match &observed {
                ModelState::Ready => {
                    log::info!("tts: model files present in {}", self.model_dir.display())
                }
                ModelState::Downloading => log::info!("tts: model installation in progress"),
                ModelState::Failed(reason) => {
                    log::error!("tts: model installation failed: {reason}")
                }
                ModelState::NotDownloaded if *state == ModelState::Ready => {
                    log::warn!("tts: model files disappeared: {:?}", self.missing_files())
                }
                ModelState::NotDownloaded => log::debug!("tts: model not installed"),
            }
            *state = observed.clone();
        }
        observed
    }

    fn observe(&self) -> ModelState {
        if self.model_dir.join(DOWNLOADING_MARKER).exists() {
            return ModelState::Downloading;
        }
        if let Ok(reason) = std::fs::read_to_string(self.model_dir.join(FAILED_MARKER)) {
            let reason = reason.trim();
            return ModelState::Failed(if reason.is_empty() {
                "installation failed".into()
            } else {
                reason.to_string()
            });
        }
        if self.missing_files().is_empty() {
            ModelState::Ready
        } else {
            ModelState::NotDownloaded
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

/// Languages the default model is known to speak: `(code, display name)`.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("fr", "French"),
    ("de", "German"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("zh", "Chinese"),
];

/// Display name for a language code, if it is in [`LANGUAGES`].
pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
