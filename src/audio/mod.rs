//! Audio plumbing: clip probing, format normalisation and WAV export.
//!
//! # Flow
//!
//! ```text
//! backend WAV (any rate / channels / depth)
//!     → verify_clip                  (full decode, duration recorded per segment)
//!     → load_clip → downmix_to_mono → resample
//!     → WavSink::append_samples / append_silence
//!     → WavSink::finalize            (one mono 16-bit PCM file)
//! ```

pub mod resample;
pub mod wav;

pub use resample::{downmix_to_mono, resample};
pub use wav::{load_clip, probe_duration_ms, verify_clip, AudioError, WavSink};
