//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::segment::PauseDurations;

// ---------------------------------------------------------------------------
// PauseConfig
// ---------------------------------------------------------------------------

/// Lengths of the silences injected for each pause marker, in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseConfig {
    /// Silence appended after a `###` heading is spoken.
    pub heading_secs: u64,
    /// Silence between the parts of a line split on `...`.
    pub ellipsis_secs: u64,
    /// Silence between two non-blank lines.
    pub line_break_secs: u64,
    /// Silence for an author-inserted `[break]`.
    pub section_break_secs: u64,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            heading_secs: 5,
            ellipsis_secs: 2,
            line_break_secs: 2,
            section_break_secs: 5,
        }
    }
}

impl PauseConfig {
    /// Immutable snapshot consumed by a single pipeline run.
    pub fn durations(&self) -> PauseDurations {
        PauseDurations {
            heading: Duration::from_secs(self.heading_secs),
            ellipsis: Duration::from_secs(self.ellipsis_secs),
            line_break: Duration::from_secs(self.line_break_secs),
            section_break: Duration::from_secs(self.section_break_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationConfig
// ---------------------------------------------------------------------------

/// Settings for the parallel generation run and the exported file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Upper bound on concurrent synthesis workers.  Values below 1 are
    /// treated as 1.
    pub threads: usize,
    /// Where finished narrations are written; `None` means
    /// `<data dir>/output`.
    pub output_dir: Option<PathBuf>,
    /// Sample rate of the exported WAV file (mono, 16-bit PCM).
    pub sample_rate: u32,
    /// Language used when the caller does not pick one.
    pub default_language: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            output_dir: None,
            sample_rate: 24_000,
            default_language: "en".into(),
        }
    }
}

impl GenerationConfig {
    /// Thread budget clamped to at least one worker.
    pub fn thread_budget(&self) -> usize {
        self.threads.max(1)
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

const XTTS_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";
const XTTS_MODEL_DIR: &str = "tts/tts_models--multilingual--multi-dataset--xtts_v2";

/// How the external synthesis program is located and invoked.
///
/// Each argument in `args` may contain the placeholders `{text}`,
/// `{language}`, `{voice}`, `{output}` and `{model_dir}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Directory holding the model files; `None` means
    /// `<data dir>/tts_model`.
    pub model_dir: Option<PathBuf>,
    /// Files (relative to the model directory) that must all exist before
    /// the backend reports ready.
    pub required_files: Vec<String>,
    /// Program to spawn for each synthesis call.
    pub program: String,
    /// Argument template.
    pub args: Vec<String>,
    /// Write the text to the child's stdin instead of (or as well as) the
    /// `{text}` placeholder.
    pub text_via_stdin: bool,
    /// Environment variable that receives the model directory, if any.
    pub model_dir_env: Option<String>,
    /// Per-call timeout in seconds.  `0` waits forever.
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            required_files: ["model.pth", "config.json", "vocab.json", "speakers_xtts.pth"]
                .iter()
                .map(|f| format!("{XTTS_MODEL_DIR}/{f}"))
                .collect(),
            program: "tts".into(),
            args: vec![
                "--model_name".into(),
                XTTS_MODEL.into(),
                "--text".into(),
                "{text}".into(),
                "--speaker_wav".into(),
                "{voice}".into(),
                "--language_idx".into(),
                "{language}".into(),
                "--out_path".into(),
                "{output}".into(),
            ],
            text_via_stdin: false,
            model_dir_env: Some("TTS_HOME".into()),
            timeout_secs: 300,
        }
    }
}

impl TtsConfig {
    /// `None` when the timeout is disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use script_narrator::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Silence lengths for each pause marker.
    pub pauses: PauseConfig,
    /// Worker budget and output settings.
    pub generation: GenerationConfig,
    /// Synthesis backend settings.
    pub tts: TtsConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolved output directory.
    pub fn output_dir(&self, paths: &AppPaths) -> PathBuf {
        self.generation
            .output_dir
            .clone()
            .unwrap_or_else(|| paths.output_dir.clone())
    }

    /// Resolved model directory.
    pub fn model_dir(&self, paths: &AppPaths) -> PathBuf {
        self.tts
            .model_dir
            .clone()
            .unwrap_or_else(|| paths.model_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
