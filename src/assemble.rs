//! Deterministic reassembly of pool results into one narration file.
//!
//! Results are ordered by `sequence_index` alone, failures are dropped, and
//! the survivors are streamed into a [`WavSink`]:
//!
//! | segment                 | appended                           |
//! |-------------------------|------------------------------------|
//! | speech                  | its clip                           |
//! | speech (heading)        | its clip, then the heading pause   |
//! | line-break pause        | line-break silence                 |
//! | ellipsis pause          | ellipsis silence                   |
//! | section-break pause     | section-break silence              |
//!
//! Only one clip is decoded at a time.  A clip that cannot be decoded is
//! left out together with its heading pause, the same as a failed segment.

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

use crate::audio::{load_clip, AudioError, WavSink};
use crate::pool::SegmentResult;
use crate::segment::{PauseDurations, PauseKind, SegmentKind};

#[derive(Debug, Error)]
pub enum AssembleError {
    /// No successful speech segment survived filtering.
    #[error("no valid text segments to assemble")]
    Empty,

    #[error("failed to write narration: {0}")]
    Audio(#[from] AudioError),
}

/// Pause markers that made it into the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseCounts {
    pub section_breaks: usize,
    pub line_breaks: usize,
    pub headings: usize,
    pub ellipses: usize,
}

impl PauseCounts {
    fn record(&mut self, kind: PauseKind) {
        match kind {
            PauseKind::SectionBreak => self.section_breaks += 1,
            PauseKind::LineBreak => self.line_breaks += 1,
            PauseKind::Heading => self.headings += 1,
            PauseKind::Ellipsis => self.ellipses += 1,
        }
    }
}

/// What [`assemble`] wrote.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub output: PathBuf,
    pub duration_ms: u64,
    /// Speech clips appended.
    pub clips: usize,
    /// Results left out because they failed or could not be decoded.
    pub dropped: usize,
    pub pauses: PauseCounts,
}

/// Write the narration for `results` to `output` as mono 16-bit PCM at
/// `sample_rate`.  An existing file at `output` is replaced.
///
/// On error nothing is left at `output`.
pub fn assemble(
    results: &[SegmentResult],
    pauses: &PauseDurations,
    output: &Path,
    sample_rate: u32,
) -> Result<Assembly, AssembleError> {
    let started = Instant::now();

    let mut ordered: Vec<&SegmentResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.sequence_index);

    let dropped = ordered.iter().filter(|r| !r.success).count();
    ordered.retain(|r| r.success);

    if !ordered.iter().any(|r| r.kind.is_speech() && r.audio.is_some()) {
        log::warn!(
            "assemble: nothing to assemble ({} results, {dropped} failed)",
            results.len()
        );
        return Err(AssembleError::Empty);
    }

    let written = write(&ordered, pauses, output, sample_rate);
    let (duration_ms, clips, unreadable, counts) = match written {
        Ok((_, 0, unreadable, _)) => {
            log::warn!("assemble: none of the clips could be decoded ({unreadable} unreadable)");
            discard(output);
            return Err(AssembleError::Empty);
        }
        Ok(w) => w,
        Err(e) => {
            discard(output);
            return Err(e);
        }
    };
    let dropped = dropped + unreadable;

    log::info!(
        "assemble: {clips} clips, {} section breaks, {} line breaks, {} headings, {} ellipses",
        counts.section_breaks,
        counts.line_breaks,
        counts.headings,
        counts.ellipses
    );
    log::info!(
        "assemble: wrote {} ({:.1}s of audio) in {:.2}s",
        output.display(),
        duration_ms as f64 / 1000.0,
        started.elapsed().as_secs_f32()
    );

    Ok(Assembly {
        output: output.to_path_buf(),
        duration_ms,
        clips,
        dropped,
        pauses: counts,
    })
}

fn write(
    ordered: &[&SegmentResult],
    pauses: &PauseDurations,
    output: &Path,
    sample_rate: u32,
) -> Result<(u64, usize, usize, PauseCounts), AssembleError> {
    let mut sink = WavSink::create(output, sample_rate)?;
    let mut clips = 0;
    let mut unreadable = 0;
    let mut counts = PauseCounts::default();

    for result in ordered {
        match &result.kind {
            SegmentKind::Speech { .. } => {
                let Some(audio) = &result.audio else {
                    continue;
                };
                match load_clip(audio, sample_rate) {
                    Ok(samples) => sink.append_samples(&samples)?,
                    Err(e) => {
                        log::warn!(
                            "assemble: skipping segment {} ({}): {e}",
                            result.sequence_index,
                            audio.display()
                        );
                        unreadable += 1;
                        continue;
                    }
                }
                clips += 1;
            }
            kind => {
                if let Some(pause) = kind.pause() {
                    sink.append_silence(pauses.get(pause))?;
                    counts.record(pause);
                }
            }
        }
        if let Some(pause) = result.kind.trailing_pause() {
            sink.append_silence(pauses.get(pause))?;
            counts.record(pause);
        }
    }

    let duration_ms = sink.finalize()?;
    Ok((duration_ms, clips, unreadable, counts))
}

fn discard(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => log::debug!("assemble: removed partial {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "assemble: could not remove partial {}: {e}",
            output.display()
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
