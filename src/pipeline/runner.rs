//! Pipeline orchestrator: script text in, one narration file out.
//!
//! [`Narrator`] owns the synthesis backend, the live settings and the
//! [`SharedState`] that pollers read.
//!
//! # Flow
//!
//! ```text
//! generate(request)
//!   ├─ snapshot settings              (pauses, threads, rate, output dir)
//!   ├─ backend ready?                 ── no ──▶ BackendUnavailable
//!   ├─ voice file usable?             ── no ──▶ VoiceNotFound
//!   │     (bare names are looked up in the voices dir)
//!   ├─ output name = slug(name) | uuid
//!   ├─ ScratchDir                     (removed on every exit path)
//!   ├─ segment(text)
//!   ├─ pool::process                  [Synthesizing]  ── cancel ──▶ Cancelled
//!   ├─ assemble                       [Assembling]
//!   │     └─ Empty → fallback phrase  [Fallback]
//!   └─ progress(100, "Audio generation completed")    [Done]
//! ```
//!
//! The synchronous entry points block the calling thread for the whole run.
//! Async callers use [`Narrator::generate_async`], which moves the run onto
//! tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assemble::{assemble, AssembleError, Assembly};
use crate::audio::verify_clip;
use crate::config::{AppConfig, AppPaths};
use crate::pool::{self, CancelToken, PoolError, PoolJob, ProgressSink, RunPhase, SegmentResult};
use crate::segment::{segment, speech_count, PauseDurations, SegmentKind};
use crate::tts::{
    language_name, synthesize_once, ModelState, SynthesisBackend, SynthesisRequest, TtsError,
};
use crate::util::{allowed_voice_file, slugify};

use super::scratch::ScratchDir;
use super::state::{lock, GenerationStage, SharedSettings, SharedState};

/// Spoken instead of the script when no segment produced audio.
pub const FALLBACK_TEXT: &str = "No valid text segments found";

/// Final progress message of a successful run.
pub const COMPLETED_MESSAGE: &str = "Audio generation completed";

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// The single failure surfaced by a generation run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("synthesis backend is not available ({0})")]
    BackendUnavailable(ModelState),

    #[error("voice reference not found or unsupported: {}", .0.display())]
    VoiceNotFound(PathBuf),

    /// The caller asked for the run to stop.
    #[error("generation cancelled")]
    Cancelled,

    #[error("synthesis pool failed: {0}")]
    Pool(PoolError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    /// The diagnostic phrase could not be rendered either.
    #[error("fallback synthesis failed: {0}")]
    Fallback(#[source] TtsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking task running the generation did not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PoolError> for PipelineError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Pool(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Input of one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub text: String,
    /// Language code; empty means the configured default.
    #[serde(default)]
    pub language: String,
    /// Reference recording of the voice to imitate.
    pub voice: PathBuf,
    /// Human-readable name used to derive the output filename.
    #[serde(default)]
    pub name: Option<String>,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            language: String::new(),
            voice: voice.into(),
            name: None,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    /// Bare file name inside the output directory.
    pub filename: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub segments: usize,
    pub failed_segments: usize,
    /// `true` when the diagnostic phrase was exported instead of the script.
    pub fallback: bool,
}

// ---------------------------------------------------------------------------
// Narrator
// ---------------------------------------------------------------------------

/// Drives complete generation runs.  Cheap to clone; clones share the
/// backend, settings and state.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use script_narrator::config::{AppConfig, AppPaths};
/// use script_narrator::pipeline::{new_shared_settings, GenerationRequest, Narrator};
/// use script_narrator::tts::CommandBackend;
///
/// let paths = AppPaths::new();
/// let config = AppConfig::default();
/// let backend = Arc::new(CommandBackend::from_app_config(&config, &paths));
/// let narrator = Narrator::new(backend, new_shared_settings(config), paths);
///
/// let request = GenerationRequest::new("Close your eyes...", "voices/calm.wav")
///     .name("Evening wind-down");
/// let outcome = narrator.generate(&request, None)?;
/// println!("{}", outcome.filename);
/// # Ok::<(), script_narrator::pipeline::PipelineError>(())
/// ```
#[derive(Clone)]
pub struct Narrator {
    backend: Arc<dyn SynthesisBackend>,
    settings: SharedSettings,
    paths: AppPaths,
    state: SharedState,
    scratch_root: Option<PathBuf>,
}

impl Narrator {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        settings: SharedSettings,
        paths: AppPaths,
    ) -> Self {
        Self {
            backend,
            settings,
            paths,
            state: super::state::new_shared_state(),
            scratch_root: None,
        }
    }

    /// Place scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn settings(&self) -> SharedSettings {
        Arc::clone(&self.settings)
    }

    pub fn backend(&self) -> &Arc<dyn SynthesisBackend> {
        &self.backend
    }

    /// Run one generation.  Returning `false` from `progress` cancels it.
    pub fn generate(
        &self,
        request: &GenerationRequest,
        progress: Option<&mut dyn FnMut(u8, &str) -> bool>,
    ) -> Result<GenerationOutcome, PipelineError> {
        self.generate_with_cancel(request, &CancelToken::new(), progress)
    }

    /// Run one generation that can also be cancelled through `cancel` from
    /// another thread.
    pub fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        progress: Option<&mut dyn FnMut(u8, &str) -> bool>,
    ) -> Result<GenerationOutcome, PipelineError> {
        lock(&self.state).begin();

        let result = self.run(request, cancel, progress);

        let mut st = lock(&self.state);
        match &result {
            Ok(outcome) => {
                st.stage = GenerationStage::Done;
                st.last_output = Some(outcome.path.clone());
            }
            Err(PipelineError::Cancelled) => {
                log::info!("pipeline: generation cancelled");
                st.stage = GenerationStage::Cancelled;
            }
            Err(e) => {
                log::error!("pipeline error: {e}");
                st.stage = GenerationStage::Failed;
                st.error_message = Some(e.to_string());
            }
        }
        result
    }

    /// Run [`generate_with_cancel`](Self::generate_with_cancel) on tokio's
    /// blocking pool.
    pub async fn generate_async(
        &self,
        request: GenerationRequest,
        cancel: CancelToken,
    ) -> Result<GenerationOutcome, PipelineError> {
        let narrator = self.clone();
        tokio::task::spawn_blocking(move || narrator.generate_with_cancel(&request, &cancel, None))
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))?
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        progress: Option<&mut dyn FnMut(u8, &str) -> bool>,
    ) -> Result<GenerationOutcome, PipelineError> {
        let started = Instant::now();
        let config: AppConfig = lock(&self.settings).clone();

        // ── 1. Preconditions ─────────────────────────────────────────────
        let backend_state = self.backend.state();
        if backend_state != ModelState::Ready {
            return Err(PipelineError::BackendUnavailable(backend_state));
        }
        let voice = self.paths.resolve_voice(&request.voice);
        if !voice.is_file() || !allowed_voice_file(&voice) {
            return Err(PipelineError::VoiceNotFound(voice));
        }

        let language = if request.language.trim().is_empty() {
            config.generation.default_language.as_str()
        } else {
            request.language.trim()
        };
        if language_name(language).is_none() {
            log::warn!(
                "pipeline: language {language:?} is not in the supported list, passing through"
            );
        }

        // ── 2. Output location ───────────────────────────────────────────
        let output_dir = config.output_dir(&self.paths);
        std::fs::create_dir_all(&output_dir)?;
        let filename = output_filename(request.name.as_deref());
        let output = output_dir.join(&filename);

        let pauses = config.pauses.durations();
        let sample_rate = config.generation.sample_rate;
        let scratch = match &self.scratch_root {
            Some(root) => ScratchDir::new_in(root)?,
            None => ScratchDir::new()?,
        };

        // ── 3. Segment + synthesize ──────────────────────────────────────
        let segments = segment(&request.text);
        let total = segments.len();
        log::info!(
            "pipeline: generating {filename} ({} segments, {} speech, language {language})",
            total,
            speech_count(&segments)
        );

        let mut reporter = Reporter {
            state: Arc::clone(&self.state),
            callback: progress,
        };
        let job = PoolJob {
            language,
            voice: &voice,
            scratch_dir: scratch.path(),
            pauses,
            thread_budget: config.generation.thread_budget(),
        };
        let outcome = pool::process(self.backend.as_ref(), segments, &job, cancel, &mut reporter)?;

        // ── 4. Assemble ──────────────────────────────────────────────────
        self.set_stage(GenerationStage::Assembling);
        let (assembly, fallback) = match assemble(&outcome.results, &pauses, &output, sample_rate) {
            Ok(assembly) => (assembly, false),
            Err(AssembleError::Empty) => {
                self.set_stage(GenerationStage::Fallback);
                let assembly = self.fallback(
                    language,
                    &voice,
                    scratch.path(),
                    &pauses,
                    &output,
                    sample_rate,
                )?;
                (assembly, true)
            }
            Err(e) => return Err(e.into()),
        };

        // The file is already exported, so a `false` here changes nothing.
        reporter.progress(100, COMPLETED_MESSAGE);
        drop(scratch);

        log::info!(
            "pipeline: {filename} done in {:.2}s ({} of {total} segments failed{})",
            started.elapsed().as_secs_f32(),
            outcome.failed(),
            if fallback { ", fallback used" } else { "" }
        );

        Ok(GenerationOutcome {
            filename,
            path: assembly.output,
            duration_ms: assembly.duration_ms,
            segments: total,
            failed_segments: outcome.failed(),
            fallback,
        })
    }

    fn fallback(
        &self,
        language: &str,
        voice: &Path,
        scratch: &Path,
        pauses: &PauseDurations,
        output: &Path,
        sample_rate: u32,
    ) -> Result<Assembly, PipelineError> {
        log::warn!("pipeline: no valid text segments, exporting fallback phrase");
        let clip = scratch.join("fallback.wav");
        synthesize_once(
            self.backend.as_ref(),
            &SynthesisRequest {
                text: FALLBACK_TEXT,
                language,
                voice,
                destination: &clip,
            },
        )
        .map_err(PipelineError::Fallback)?;

        let duration_ms = verify_clip(&clip).map_err(AssembleError::from)?;
        let result = SegmentResult {
            sequence_index: 0,
            kind: SegmentKind::Speech {
                text: FALLBACK_TEXT.to_string(),
                heading: false,
            },
            audio: Some(clip),
            duration_ms,
            success: true,
            error: None,
        };
        Ok(assemble(&[result], pauses, output, sample_rate)?)
    }

    fn set_stage(&self, stage: GenerationStage) {
        lock(&self.state).stage = stage;
    }
}

/// `<slug>.wav` for a non-blank name, `<uuid>.wav` otherwise.
pub fn output_filename(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{}.wav", slugify(name)),
        None => format!("{}.wav", uuid::Uuid::new_v4()),
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Mirrors progress into [`SharedState`] and forwards it to the caller.
struct Reporter<'a> {
    state: SharedState,
    callback: Option<&'a mut dyn FnMut(u8, &str) -> bool>,
}

impl ProgressSink for Reporter<'_> {
    fn progress(&mut self, percent: u8, message: &str) -> bool {
        {
            let mut st = lock(&self.state);
            st.percent = percent;
            st.message = message.to_string();
        }
        match self.callback.as_deref_mut() {
            Some(callback) => callback(percent, message),
            None => true,
        }
    }

    fn phase(&mut self, phase: RunPhase) {
        log::debug!("pipeline: pool {phase:?}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
