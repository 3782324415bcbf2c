//! Synthesis backend traits.
//!
//! # Concurrency discipline
//!
//! A backend is **not** assumed to be safe for concurrent calls on a single
//! handle.  [`SynthesisBackend`] is therefore split in two:
//!
//! - the backend itself is a shared, `Send + Sync` factory that reports
//!   readiness and hands out handles;
//! - a [`Synthesizer`] handle is opened per unit of work, used exclusively by
//!   the worker thread that opened it, and dropped when the unit completes.
//!
//! [`MockBackend`] (available under `#[cfg(test)]`) renders deterministic
//! sine-wave clips so the pool, assembler and orchestrator can be tested
//! without a model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::model::ModelState;

// ---------------------------------------------------------------------------
// TtsError
// ---------------------------------------------------------------------------

/// All errors a synthesis call can produce.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The model is not installed or is being installed.
    #[error("synthesis backend not ready ({0})")]
    NotReady(ModelState),

    /// The backend process could not be started.
    #[error("failed to start synthesis program `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend ran but reported failure.
    #[error("synthesis failed: {0}")]
    Failed(String),

    /// The call exceeded the configured timeout and was aborted.
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// The backend claimed success but wrote nothing.
    #[error("synthesis produced no audio at {0}")]
    NoOutput(PathBuf),

    /// I/O failure while talking to the backend.
    #[error("I/O error during synthesis: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One synthesis call: render `text` in `language`, imitating the voice in
/// `voice`, into a WAV file at `destination`.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub voice: &'a Path,
    pub destination: &'a Path,
}

/// Shared backend capability.
pub trait SynthesisBackend: Send + Sync {
    /// Current readiness.
    fn state(&self) -> ModelState;

    /// `true` when [`open`](Self::open) can succeed.
    fn is_ready(&self) -> bool {
        self.state() == ModelState::Ready
    }

    /// Open a private handle for one unit of work.
    fn open(&self) -> Result<Box<dyn Synthesizer>, TtsError>;
}

/// Exclusive per-call handle.  Not required to be `Sync`.
pub trait Synthesizer {
    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<(), TtsError>;
}

// Compile-time assertion: both traits must be object-safe.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SynthesisBackend>, _: Box<dyn Synthesizer>) {}
};

/// Open a fresh handle and run a single request on it.
pub fn synthesize_once(
    backend: &dyn SynthesisBackend,
    request: &SynthesisRequest<'_>,
) -> Result<(), TtsError> {
    backend.open()?.synthesize(request)
}

// ---------------------------------------------------------------------------
// MockBackend  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockBackend;

#[cfg(test)]
mod mock {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{ModelState, SynthesisBackend, SynthesisRequest, Synthesizer, TtsError};
    use crate::audio::WavSink;

    /// Test double that writes a sine tone whose length is fixed per clip.
    ///
    /// ```text
    /// MockBackend::new()            // 16 kHz, 200 ms clips
    ///     .failing(&["bad"])        // these texts return Err
    ///     .panicking(&["boom"])     // these texts panic inside the worker
    ///     .silent(&["quiet"])       // these texts return Ok but write nothing
    ///     .truncating(&["cut"])     // these texts leave a clip cut off mid-data
    ///     .with_delay(..)           // sleep inside every call
    /// ```
    pub struct MockBackend {
        inner: Arc<Inner>,
    }

    struct Inner {
        sample_rate: u32,
        clip: Duration,
        delay: Duration,
        ready: AtomicBool,
        failing: HashSet<String>,
        panicking: HashSet<String>,
        silent: HashSet<String>,
        truncating: HashSet<String>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        spoken: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Inner {
                    sample_rate: 16_000,
                    clip: Duration::from_millis(200),
                    delay: Duration::ZERO,
                    ready: AtomicBool::new(true),
                    failing: HashSet::new(),
                    panicking: HashSet::new(),
                    silent: HashSet::new(),
                    truncating: HashSet::new(),
                    calls: AtomicUsize::new(0),
                    active: AtomicUsize::new(0),
                    peak: AtomicUsize::new(0),
                    spoken: Mutex::new(Vec::new()),
                }),
            }
        }

        fn edit(mut self, f: impl FnOnce(&mut Inner)) -> Self {
            f(Arc::get_mut(&mut self.inner).expect("configure before sharing"));
            self
        }

        pub fn failing(self, texts: &[&str]) -> Self {
            self.edit(|i| i.failing.extend(texts.iter().map(|t| t.to_string())))
        }

        pub fn panicking(self, texts: &[&str]) -> Self {
            self.edit(|i| i.panicking.extend(texts.iter().map(|t| t.to_string())))
        }

        pub fn silent(self, texts: &[&str]) -> Self {
            self.edit(|i| i.silent.extend(texts.iter().map(|t| t.to_string())))
        }

        pub fn truncating(self, texts: &[&str]) -> Self {
            self.edit(|i| i.truncating.extend(texts.iter().map(|t| t.to_string())))
        }

        pub fn with_delay(self, delay: Duration) -> Self {
            self.edit(|i| i.delay = delay)
        }

        pub fn with_clip(self, clip: Duration, sample_rate: u32) -> Self {
            self.edit(|i| {
                i.clip = clip;
                i.sample_rate = sample_rate;
            })
        }

        pub fn set_ready(&self, ready: bool) {
            self.inner.ready.store(ready, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.inner.calls.load(Ordering::SeqCst)
        }

        pub fn peak_concurrency(&self) -> usize {
            self.inner.peak.load(Ordering::SeqCst)
        }

        pub fn spoken(&self) -> Vec<String> {
            self.inner.spoken.lock().unwrap().clone()
        }
    }

    impl SynthesisBackend for MockBackend {
        fn state(&self) -> ModelState {
            if self.inner.ready.load(Ordering::SeqCst) {
                ModelState::Ready
            } else {
                ModelState::NotDownloaded
            }
        }

        fn open(&self) -> Result<Box<dyn Synthesizer>, TtsError> {
            if !self.is_ready() {
                return Err(TtsError::NotReady(self.state()));
            }
            Ok(Box::new(MockSynth {
                inner: Arc::clone(&self.inner),
            }))
        }
    }

    struct MockSynth {
        inner: Arc<Inner>,
    }

    impl Synthesizer for MockSynth {
        fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<(), TtsError> {
            let inner = &self.inner;
            inner.calls.fetch_add(1, Ordering::SeqCst);
            let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
            inner.peak.fetch_max(now, Ordering::SeqCst);
            let _active = ActiveGuard(inner);

            if !inner.delay.is_zero() {
                std::thread::sleep(inner.delay);
            }
            inner.spoken.lock().unwrap().push(request.text.to_string());

            if inner.panicking.contains(request.text) {
                panic!("mock backend exploded on {:?}", request.text);
            }
            if inner.failing.contains(request.text) {
                return Err(TtsError::Failed(format!("mock refused {:?}", request.text)));
            }
            if inner.silent.contains(request.text) {
                return Ok(());
            }

            let frames = inner.clip.as_millis() as u64 * inner.sample_rate as u64 / 1000;
            let tone: Vec<f32> = (0..frames)
                .map(|i| {
                    let t = i as f32 / inner.sample_rate as f32;
                    0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                })
                .collect();
            let mut sink = WavSink::create(request.destination, inner.sample_rate)
                .map_err(|e| TtsError::Failed(e.to_string()))?;
            sink.append_samples(&tone)
                .map_err(|e| TtsError::Failed(e.to_string()))?;
            sink.finalize().map_err(|e| TtsError::Failed(e.to_string()))?;

            if inner.truncating.contains(request.text) {
                // Header intact, sample data cut in half.
                let bytes = std::fs::read(request.destination)?;
                std::fs::write(request.destination, &bytes[..bytes.len() / 2])?;
            }
            Ok(())
        }
    }

    struct ActiveGuard<'a>(&'a Inner);

    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mock_writes_clip_of_configured_length() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.wav");
        let backend = MockBackend::new();
        let req = SynthesisRequest {
            text: "hello",
            language: "en",
            voice: Path::new("voice.wav"),
            destination: &dest,
        };
        synthesize_once(&backend, &req).unwrap();
        assert_eq!(crate::audio::probe_duration_ms(&dest).unwrap(), 200);
        assert_eq!(backend.calls(), 1);
        assert_eq!(backend.spoken(), vec!["hello".to_string()]);
    }

    #[test]
    fn mock_failing_text_returns_error() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.wav");
        let backend = MockBackend::new().failing(&["bad"]);
        let req = SynthesisRequest {
            text: "bad",
            language: "en",
            voice: Path::new("v.wav"),
            destination: &dest,
        };
        assert!(matches!(synthesize_once(&backend, &req), Err(TtsError::Failed(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn not_ready_backend_refuses_to_open() {
        let backend = MockBackend::new();
        backend.set_ready(false);
        assert!(!backend.is_ready());
        assert!(matches!(
            backend.open().err(),
            Some(TtsError::NotReady(ModelState::NotDownloaded))
        ));
    }

    #[test]
    fn error_display_mentions_cause() {
        let e = TtsError::NoOutput(PathBuf::from("/tmp/x.wav"));
        assert!(e.to_string().contains("/tmp/x.wav"));
        let e = TtsError::Timeout(Duration::from_secs(3));
        assert!(e.to_string().contains("timed out"));
    }
}
