//! Generation pipeline: script text → narrated WAV file.
//!
//! # Architecture
//!
//! ```text
//! GenerationRequest
//!        │
//!        ▼
//! Narrator::generate()               ← blocking; generate_async for tokio callers
//!        │
//!        ├─ segment::segment          text → ordered Segments
//!        ├─ pool::process             Segments → SegmentResults   (worker threads)
//!        ├─ assemble::assemble        SegmentResults → WAV        (streaming)
//!        └─ fallback phrase           when nothing was assembled
//!
//! SharedState (Arc<Mutex<NarratorState>>) ←─── polled by front ends
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use script_narrator::config::{AppConfig, AppPaths};
//! use script_narrator::pipeline::{new_shared_settings, GenerationRequest, Narrator};
//! use script_narrator::tts::CommandBackend;
//!
//! let paths = AppPaths::new();
//! let config = AppConfig::load().unwrap_or_default();
//! let backend = Arc::new(CommandBackend::from_app_config(&config, &paths));
//! let narrator = Narrator::new(backend, new_shared_settings(config), paths);
//!
//! let request = GenerationRequest::new("### Welcome\nBreathe in...and out.", "voices/calm.wav")
//!     .language("en");
//! let mut progress = |percent: u8, message: &str| {
//!     println!("{percent:>3}% {message}");
//!     true
//! };
//! let outcome = narrator.generate(&request, Some(&mut progress))?;
//! println!("wrote {}", outcome.path.display());
//! # Ok::<(), script_narrator::pipeline::PipelineError>(())
//! ```

pub mod runner;
pub mod scratch;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{
    output_filename, GenerationOutcome, GenerationRequest, Narrator, PipelineError,
    COMPLETED_MESSAGE, FALLBACK_TEXT,
};
pub use scratch::ScratchDir;
pub use state::{
    new_shared_settings, new_shared_state, GenerationStage, NarratorState, SharedSettings,
    SharedState,
};

pub use crate::pool::CancelToken;
