//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for pauses,
//! generation and the synthesis backend, `AppPaths` for cross-platform data
//! directories, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, GenerationConfig, PauseConfig, TtsConfig};
