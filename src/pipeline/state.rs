//! Generation state machine and shared narrator state.
//!
//! [`GenerationStage`] tracks where the current `generate` call is.  Callers
//! that poll instead of passing a progress callback read it through
//! [`SharedState`].
//!
//! [`SharedSettings`] holds the live configuration.  It may be edited at any
//! time; each run takes one snapshot at its start and never looks again.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// GenerationStage
// ---------------------------------------------------------------------------

/// Stages of one generation run.
///
/// ```text
/// Idle ──generate──▶ Synthesizing ──pool done──▶ Assembling ──▶ Done
///                         │                           │
///                         │                           └─empty─▶ Fallback ──▶ Done
///                         └─cancel──▶ Cancelled
/// any stage ──error──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStage {
    #[default]
    Idle,
    Synthesizing,
    Assembling,
    /// No segment produced audio; the diagnostic phrase is being rendered.
    Fallback,
    Done,
    Cancelled,
    Failed,
}

impl GenerationStage {
    /// `true` while a run is in flight.
    ///
    /// ```
    /// use script_narrator::pipeline::GenerationStage;
    ///
    /// assert!(!GenerationStage::Idle.is_busy());
    /// assert!(GenerationStage::Synthesizing.is_busy());
    /// assert!(GenerationStage::Fallback.is_busy());
    /// assert!(!GenerationStage::Cancelled.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            GenerationStage::Synthesizing | GenerationStage::Assembling | GenerationStage::Fallback
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            GenerationStage::Idle => "Idle",
            GenerationStage::Synthesizing => "Synthesizing",
            GenerationStage::Assembling => "Assembling",
            GenerationStage::Fallback => "Fallback",
            GenerationStage::Done => "Done",
            GenerationStage::Cancelled => "Cancelled",
            GenerationStage::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// NarratorState
// ---------------------------------------------------------------------------

/// Observable state of the narrator.
#[derive(Debug, Clone, Default)]
pub struct NarratorState {
    pub stage: GenerationStage,
    /// Last reported percentage, `0..=100`.
    pub percent: u8,
    /// Last progress message.
    pub message: String,
    /// File written by the last successful run.
    pub last_output: Option<PathBuf>,
    /// Description of the last failure, cleared when a run starts.
    pub error_message: Option<String>,
}

impl NarratorState {
    pub(crate) fn begin(&mut self) {
        self.stage = GenerationStage::Synthesizing;
        self.percent = 0;
        self.message.clear();
        self.error_message = None;
    }
}

// ---------------------------------------------------------------------------
// Shared handles
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`NarratorState`].  Hold the lock briefly.
pub type SharedState = Arc<Mutex<NarratorState>>;

/// Live configuration, editable while the narrator is idle or running.
pub type SharedSettings = Arc<Mutex<AppConfig>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(NarratorState::default()))
}

pub fn new_shared_settings(config: AppConfig) -> SharedSettings {
    Arc::new(Mutex::new(config))
}

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
