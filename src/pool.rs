//! Parallel synthesis pool.
//!
//! [`process`] consumes the segments of one run and returns exactly one
//! [`SegmentResult`] per segment.
//!
//! # Design
//!
//! ```text
//!            ┌──────── work queue (closed after filling) ───────┐
//! segments ──┤ Speech → queue                                   ├─▶ worker 0..k
//!            └ pauses → resolved immediately ─┐                 │     │ open handle
//!                                             ▼                 │     │ synthesize
//!                                      result channel ◀─────────┴─────┘ verify clip
//!                                             │
//!                              collector: count down `total`, report progress
//! ```
//!
//! The queue is filled and closed before any worker starts, so a worker only
//! sees "disconnected" once every unit has been claimed.  The collector
//! counts results rather than watching worker liveness, so completion does
//! not depend on which worker finishes last.
//!
//! Workers never share a synthesis handle: each unit opens its own through
//! [`SynthesisBackend::open`].  A failing or panicking unit becomes a
//! `success = false` result; nothing crosses the thread boundary as a panic.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

use crate::audio::{verify_clip, AudioError};
use crate::segment::{speech_count, PauseDurations, Segment, SegmentKind};
use crate::tts::{SynthesisBackend, SynthesisRequest, TtsError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the pool as a whole.  Per-segment failures are not errors;
/// they are recorded in [`SegmentResult::error`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Cancellation was requested before every segment was processed.
    #[error("generation cancelled")]
    Cancelled,

    /// No worker thread could be started.
    #[error("failed to start synthesis workers: {0}")]
    Spawn(#[source] std::io::Error),

    /// The result channel closed with segments still outstanding.
    #[error("{missing} segment(s) were never processed")]
    Incomplete { missing: usize },
}

/// Why a single speech segment produced no audio.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Tts(#[from] TtsError),

    #[error("unreadable audio: {0}")]
    Audio(#[from] AudioError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Run-scoped cooperative cancellation flag.  Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Lifecycle of one pool run.
///
/// ```text
/// Pending ──workers started──▶ Running ──all results──▶ Done
///                                 │
///                                 └──cancel requested──▶ Draining ──▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Running,
    Draining,
    Done,
    Cancelled,
}

/// Receives advisory progress from the pool.
///
/// Any `FnMut(u8, &str) -> bool` closure is a sink; returning `false`
/// requests cancellation.
pub trait ProgressSink {
    /// `percent` is in `0..=100` and never decreases within a run.
    fn progress(&mut self, percent: u8, message: &str) -> bool;

    fn phase(&mut self, _phase: RunPhase) {}
}

impl<F: FnMut(u8, &str) -> bool> ProgressSink for F {
    fn progress(&mut self, percent: u8, message: &str) -> bool {
        self(percent, message)
    }
}

/// A sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _percent: u8, _message: &str) -> bool {
        true
    }
}

/// Integer percentage of `processed` out of `total`.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.min(total) * 100 / total) as u8
}

// ---------------------------------------------------------------------------
// Job / results
// ---------------------------------------------------------------------------

/// Everything a worker needs besides the segment itself.
#[derive(Debug, Clone, Copy)]
pub struct PoolJob<'a> {
    pub language: &'a str,
    pub voice: &'a Path,
    /// Directory that receives one WAV file per speech segment.
    pub scratch_dir: &'a Path,
    pub pauses: PauseDurations,
    pub thread_budget: usize,
}

/// Outcome of processing one segment.
#[derive(Debug, Clone)]
pub struct SegmentResult {
    pub sequence_index: usize,
    pub kind: SegmentKind,
    /// Rendered clip inside the run's scratch directory.
    pub audio: Option<PathBuf>,
    pub duration_ms: u64,
    pub success: bool,
    /// Failure description for unsuccessful speech segments.
    pub error: Option<String>,
}

impl SegmentResult {
    fn pause(segment: Segment, pauses: &PauseDurations) -> Self {
        let duration_ms = segment
            .kind
            .pause()
            .map(|p| pauses.get(p).as_millis() as u64)
            .unwrap_or(0);
        Self {
            sequence_index: segment.sequence_index,
            kind: segment.kind,
            audio: None,
            duration_ms,
            success: true,
            error: None,
        }
    }

    fn rendered(segment: Segment, audio: PathBuf, duration_ms: u64) -> Self {
        Self {
            sequence_index: segment.sequence_index,
            kind: segment.kind,
            audio: Some(audio),
            duration_ms,
            success: true,
            error: None,
        }
    }

    fn failed(segment: Segment, error: &SegmentError) -> Self {
        Self {
            sequence_index: segment.sequence_index,
            kind: segment.kind,
            audio: None,
            duration_ms: 0,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// All results of a completed run, sorted by `sequence_index`.
#[derive(Debug)]
pub struct PoolOutcome {
    pub results: Vec<SegmentResult>,
    /// Worker threads that were started.
    pub workers: usize,
}

impl PoolOutcome {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

// ---------------------------------------------------------------------------
// process
// ---------------------------------------------------------------------------

/// Render every speech segment with at most `min(thread_budget, speech)`
/// workers and collect one result per segment.
pub fn process(
    backend: &dyn SynthesisBackend,
    segments: Vec<Segment>,
    job: &PoolJob<'_>,
    cancel: &CancelToken,
    sink: &mut dyn ProgressSink,
) -> Result<PoolOutcome, PoolError> {
    let started = Instant::now();
    let total = segments.len();
    let speech = speech_count(&segments);
    let budget = job.thread_budget.max(1).min(speech);

    sink.phase(RunPhase::Pending);
    log::info!(
        "pool: {total} segments ({speech} speech), up to {budget} worker(s)"
    );

    let (work_tx, work_rx) = unbounded::<Segment>();
    let (result_tx, result_rx) = unbounded::<SegmentResult>();

    for seg in segments {
        if seg.kind.is_speech() {
            let _ = work_tx.send(seg);
        } else {
            let _ = result_tx.send(SegmentResult::pause(seg, &job.pauses));
        }
    }
    // Closing the queue here lets workers treat "disconnected" as "drained".
    drop(work_tx);

    let mut results = Vec::with_capacity(total);

    let workers = std::thread::scope(|scope| -> Result<usize, PoolError> {
        let mut workers = 0;
        let mut spawn_error = None;
        for id in 0..budget {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("synth-{id}"))
                .spawn_scoped(scope, move || {
                    worker_loop(id, backend, work_rx, result_tx, job, cancel)
                });
            match spawned {
                Ok(_) => workers += 1,
                Err(e) => {
                    log::warn!("pool: could not start worker {id}: {e}");
                    spawn_error = Some(e);
                }
            }
        }
        drop(result_tx);

        if workers == 0 {
            if let Some(e) = spawn_error {
                return Err(PoolError::Spawn(e));
            }
        }

        sink.phase(RunPhase::Running);
        let mut draining = false;
        while results.len() < total {
            let Ok(result) = result_rx.recv() else {
                break;
            };
            if !result.success {
                log::warn!(
                    "pool: segment {} dropped: {}",
                    result.sequence_index,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);

            let processed = results.len();
            log::debug!("pool: {processed}/{total} segments processed");
            let message = format!("Processing segments: {processed} / {total}");
            if !sink.progress(percent(processed, total), &message) {
                cancel.cancel();
            }
            if cancel.is_cancelled() && !draining {
                draining = true;
                log::info!("pool: cancellation requested, draining in-flight work");
                sink.phase(RunPhase::Draining);
            }
        }
        Ok(workers)
    })?;

    if cancel.is_cancelled() {
        sink.phase(RunPhase::Cancelled);
        log::info!(
            "pool: cancelled after {}/{} segments",
            results.len(),
            total
        );
        return Err(PoolError::Cancelled);
    }
    if results.len() < total {
        return Err(PoolError::Incomplete {
            missing: total - results.len(),
        });
    }

    sink.phase(RunPhase::Done);
    results.sort_by_key(|r| r.sequence_index);
    let outcome = PoolOutcome { results, workers };
    log::info!(
        "pool: finished {total} segments in {:.2}s ({} failed)",
        started.elapsed().as_secs_f32(),
        outcome.failed()
    );
    Ok(outcome)
}

fn worker_loop(
    id: usize,
    backend: &dyn SynthesisBackend,
    work_rx: Receiver<Segment>,
    result_tx: Sender<SegmentResult>,
    job: &PoolJob<'_>,
    cancel: &CancelToken,
) {
    log::debug!("pool: worker {id} started");
    while !cancel.is_cancelled() {
        let Ok(segment) = work_rx.recv() else {
            break;
        };
        let result = synthesize_segment(backend, segment, job);
        if result_tx.send(result).is_err() {
            break;
        }
    }
    log::debug!("pool: worker {id} exiting");
}

fn synthesize_segment(
    backend: &dyn SynthesisBackend,
    segment: Segment,
    job: &PoolJob<'_>,
) -> SegmentResult {
    let Some(text) = segment.kind.text() else {
        return SegmentResult::pause(segment, &job.pauses);
    };
    let destination = job
        .scratch_dir
        .join(format!("segment_{:05}.wav", segment.sequence_index));

    let started = Instant::now();
    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        render(backend, text, &destination, job)
    }))
    .unwrap_or_else(|payload| Err(SegmentError::Panicked(panic_message(&*payload))));

    match rendered {
        Ok(duration_ms) => {
            log::debug!(
                "pool: segment {} rendered in {:.2}s ({duration_ms} ms of audio)",
                segment.sequence_index,
                started.elapsed().as_secs_f32()
            );
            SegmentResult::rendered(segment, destination, duration_ms)
        }
        Err(e) => SegmentResult::failed(segment, &e),
    }
}

fn render(
    backend: &dyn SynthesisBackend,
    text: &str,
    destination: &Path,
    job: &PoolJob<'_>,
) -> Result<u64, SegmentError> {
    let mut synth = backend.open()?;
    synth.synthesize(&SynthesisRequest {
        text,
        language: job.language,
        voice: job.voice,
        destination,
    })?;
    if !destination.exists() {
        return Err(TtsError::NoOutput(destination.to_path_buf()).into());
    }
    Ok(verify_clip(destination)?)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment;
    use crate::tts::MockBackend;
    use std::time::Duration;
    use tempfile::tempdir;

    fn pauses() -> PauseDurations {
        PauseDurations {
            heading: Duration::from_millis(500),
            ellipsis: Duration::from_millis(300),
            line_break: Duration::from_millis(200),
            section_break: Duration::from_millis(1_000),
        }
    }

    fn job<'a>(scratch: &'a Path, threads: usize) -> PoolJob<'a> {
        PoolJob {
            language: "en",
            voice: Path::new("voice.wav"),
            scratch_dir: scratch,
            pauses: pauses(),
            thread_budget: threads,
        }
    }

    fn run(backend: &MockBackend, text: &str, threads: usize) -> Result<PoolOutcome, PoolError> {
        let dir = tempdir().unwrap();
        process(
            backend,
            segment(text),
            &job(dir.path(), threads),
            &CancelToken::new(),
            &mut NoProgress,
        )
    }

    #[test]
    fn one_result_per_segment() {
        let backend = MockBackend::new();
        let text = "A\nB...C[break]D\nE";
        let segs = segment(text);
        let n = speech_count(&segs);
        let p = segs.len() - n;

        let outcome = run(&backend, text, 3).unwrap();
        assert_eq!(outcome.results.len(), n + p);
        assert_eq!(outcome.workers, 3);
        assert_eq!(backend.calls(), n);
        for (i, r) in outcome.results.iter().enumerate() {
            assert_eq!(r.sequence_index, i);
            assert!(r.success);
        }
    }

    #[test]
    fn workers_never_exceed_speech_segments() {
        let backend = MockBackend::new();
        let outcome = run(&backend, "only one\n[break]", 8).unwrap();
        assert_eq!(outcome.workers, 1);
    }

    #[test]
    fn pause_results_carry_configured_duration() {
        let backend = MockBackend::new();
        let outcome = run(&backend, "A\nB...C[break]D", 2).unwrap();
        let by_kind = |k: SegmentKind| {
            outcome
                .results
                .iter()
                .find(|r| r.kind == k)
                .map(|r| (r.duration_ms, r.success, r.audio.is_none()))
        };
        assert_eq!(by_kind(SegmentKind::LineBreakPause), Some((200, true, true)));
        assert_eq!(by_kind(SegmentKind::EllipsisPause), Some((300, true, true)));
        assert_eq!(by_kind(SegmentKind::SectionBreakPause), Some((1_000, true, true)));
    }

    #[test]
    fn speech_results_have_measured_duration_and_clip() {
        let backend = MockBackend::new().with_clip(Duration::from_millis(350), 8_000);
        let outcome = run(&backend, "hello", 1).unwrap();
        let r = &outcome.results[0];
        assert!(r.success);
        assert_eq!(r.duration_ms, 350);
        assert!(r.audio.as_ref().is_some_and(|p| p.ends_with("segment_00000.wav")));
    }

    #[test]
    fn failing_segment_does_not_abort_pool() {
        let backend = MockBackend::new().failing(&["bad"]);
        let outcome = run(&backend, "good\nbad\nalso good", 2).unwrap();
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.failed(), 1);
        let bad = &outcome.results[2];
        assert!(!bad.success);
        assert!(bad.audio.is_none());
        assert!(bad.error.as_deref().is_some_and(|e| e.contains("mock refused")));
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn panicking_segment_becomes_failure() {
        let backend = MockBackend::new().panicking(&["boom"]);
        let outcome = run(&backend, "fine\nboom\nfine again", 2).unwrap();
        let boom = &outcome.results[2];
        assert!(!boom.success);
        assert!(boom.error.as_deref().is_some_and(|e| e.contains("panicked")));
        assert_eq!(outcome.failed(), 1);
    }

    #[test]
    fn missing_output_file_is_failure() {
        let backend = MockBackend::new().silent(&["quiet"]);
        let outcome = run(&backend, "quiet", 1).unwrap();
        assert!(!outcome.results[0].success);
    }

    #[test]
    fn truncated_clip_is_failure() {
        let backend = MockBackend::new().truncating(&["cut"]);
        let outcome = run(&backend, "whole\ncut", 2).unwrap();
        assert!(outcome.results[0].success);
        let cut = &outcome.results[2];
        assert!(!cut.success);
        assert!(cut.audio.is_none());
        assert!(cut.error.as_deref().is_some_and(|e| e.contains("unreadable audio")));
    }

    #[test]
    fn backend_not_ready_fails_every_speech_segment() {
        let backend = MockBackend::new();
        backend.set_ready(false);
        let outcome = run(&backend, "a\nb", 2).unwrap();
        assert_eq!(outcome.failed(), 2);
        assert!(outcome.results[1].success, "pause still succeeds");
    }

    #[test]
    fn concurrency_is_bounded_by_budget() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(30));
        let text = (0..12).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let outcome = run(&backend, &text, 3).unwrap();
        assert_eq!(outcome.workers, 3);
        assert!(backend.peak_concurrency() <= 3);
        assert!(backend.peak_concurrency() >= 1);
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        let segs = segment("a\nb\nc...d");
        let total = segs.len();

        let mut seen = Vec::new();
        let mut sink = |p: u8, msg: &str| {
            seen.push((p, msg.to_string()));
            true
        };
        process(&backend, segs, &job(dir.path(), 2), &CancelToken::new(), &mut sink).unwrap();

        assert_eq!(seen.len(), total);
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last().map(|s| s.0), Some(100));
        assert_eq!(
            seen.last().map(|s| s.1.clone()),
            Some(format!("Processing segments: {total} / {total}"))
        );
    }

    #[test]
    fn phases_are_reported_in_order() {
        struct Phases(Vec<RunPhase>);
        impl ProgressSink for Phases {
            fn progress(&mut self, _: u8, _: &str) -> bool {
                true
            }
            fn phase(&mut self, phase: RunPhase) {
                self.0.push(phase);
            }
        }

        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        let mut sink = Phases(Vec::new());
        process(&backend, segment("a\nb"), &job(dir.path(), 2), &CancelToken::new(), &mut sink)
            .unwrap();
        assert_eq!(sink.0, vec![RunPhase::Pending, RunPhase::Running, RunPhase::Done]);
    }

    #[test]
    fn callback_returning_false_cancels() {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new().with_delay(Duration::from_millis(20));
        let text = (0..6).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let mut sink = |_: u8, _: &str| false;

        let err = process(
            &backend,
            segment(&text),
            &job(dir.path(), 1),
            &CancelToken::new(),
            &mut sink,
        )
        .unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert!(backend.calls() < 6, "workers must stop claiming work");
    }

    #[test]
    fn cancelled_run_ends_in_cancelled_phase() {
        struct LastPhase(Option<RunPhase>);
        impl ProgressSink for LastPhase {
            fn progress(&mut self, _: u8, _: &str) -> bool {
                false
            }
            fn phase(&mut self, phase: RunPhase) {
                self.0 = Some(phase);
            }
        }

        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        let mut sink = LastPhase(None);
        let result = process(
            &backend,
            segment("a\nb"),
            &job(dir.path(), 1),
            &CancelToken::new(),
            &mut sink,
        );
        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(sink.0, Some(RunPhase::Cancelled));
    }

    #[test]
    fn pre_cancelled_token_runs_nothing() {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = process(&backend, segment("a\nb"), &job(dir.path(), 2), &cancel, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn empty_input_is_an_empty_outcome() {
        let backend = MockBackend::new();
        let outcome = run(&backend, "", 4).unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.workers, 0);
    }

    #[test]
    fn percent_rounds_down() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
