//! Synthesis backend adapter.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │             SynthesisBackend (trait, shared)           │
//! │                                                       │
//! │   ┌─────────────┐          ┌───────────────────┐      │
//! │   │ ModelStatus │◀─state()─│  CommandBackend   │      │
//! │   │ - refresh   │          │  - TtsConfig      │      │
//! │   │ - download  │          └─────────┬─────────┘      │
//! │   └─────────────┘                    │ open()         │
//! │                                      ▼                │
//! │                     ┌───────────────────────────┐     │
//! │                     │ Synthesizer (per worker)  │     │
//! │                     │ text + voice → WAV file   │     │
//! │                     └───────────────────────────┘     │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod command;
pub mod model;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use backend::{synthesize_once, SynthesisBackend, SynthesisRequest, Synthesizer, TtsError};
pub use command::{CommandBackend, CommandSynthesizer};
pub use model::{
    language_name, ModelState, ModelStatus, DOWNLOADING_MARKER, FAILED_MARKER, LANGUAGES,
};

#[cfg(test)]
pub use backend::MockBackend;
