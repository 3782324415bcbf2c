//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\script-narrator\
//!   macOS:   ~/Library/Application Support/script-narrator/
//!   Linux:   ~/.config/script-narrator/
//!
//! Data dir (model files, voices, rendered audio):
//!   Windows: %LOCALAPPDATA%\script-narrator\
//!   macOS:   ~/Library/Application Support/script-narrator/
//!   Linux:   ~/.local/share/script-narrator/

use std::path::{Path, PathBuf};

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Root of everything the application writes besides settings.
    pub data_dir: PathBuf,
    /// Default directory for exported narrations.
    pub output_dir: PathBuf,
    /// Default directory for uploaded voice references.
    pub voices_dir: PathBuf,
    /// Default directory holding the synthesis model files.
    pub model_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "script-narrator";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self::with_roots(config_dir, data_dir)
    }

    /// Build the layout under explicit roots (useful in tests).
    pub fn with_roots(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let data_dir = data_dir.into();

        Self {
            settings_file: config_dir.join("settings.toml"),
            output_dir: data_dir.join("output"),
            voices_dir: data_dir.join("voices"),
            model_dir: data_dir.join("tts_model"),
            config_dir,
            data_dir,
        }
    }

    /// `voice` itself when it exists; otherwise a bare file name such as
    /// `calm.wav` is looked up in [`voices_dir`](Self::voices_dir).
    pub fn resolve_voice(&self, voice: &Path) -> PathBuf {
        let bare = voice.parent().is_some_and(|p| p.as_os_str().is_empty());
        if bare && !voice.exists() {
            self.voices_dir.join(voice)
        } else {
            voice.to_path_buf()
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
