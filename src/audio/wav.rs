//! WAV probing, decoding and streaming export via `hound`.
//!
//! Every clip produced by the synthesis backend is a WAV file in whatever
//! format the backend prefers.  [`probe_duration_ms`] reads only the header;
//! [`verify_clip`] decodes the whole clip to prove it is readable;
//! [`load_clip`] decodes the full clip into mono `f32` at the export rate;
//! [`WavSink`] writes the narration one clip at a time so at most one clip
//! is held in memory.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

use super::resample::{downmix_to_mono, resample};

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Errors raised while reading or writing WAV data.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The file is missing, truncated or not a WAV file.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// The header declares a format this module cannot decode.
    #[error("unsupported WAV format: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Duration of the WAV file at `path`, computed from its header.
pub fn probe_duration_ms(path: &Path) -> Result<u64, AudioError> {
    let reader = WavReader::open(path)?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return Err(AudioError::Unsupported("sample rate of 0 Hz".into()));
    }
    Ok(frames_to_ms(reader.duration() as u64, rate))
}

/// Header duration of the WAV file at `path`, after decoding every sample.
///
/// Unlike [`probe_duration_ms`] this catches clips whose header is intact
/// but whose sample data is truncated or corrupt.
pub fn verify_clip(path: &Path) -> Result<u64, AudioError> {
    let duration_ms = probe_duration_ms(path)?;
    decode(path)?;
    Ok(duration_ms)
}

/// Decode the WAV file at `path` into mono `f32` samples at `target_rate`.
///
/// Integer PCM of 8 to 32 bits and 32-bit float are accepted.
pub fn load_clip(path: &Path, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    let (interleaved, spec) = decode(path)?;
    let mono = downmix_to_mono(&interleaved, spec.channels);
    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Interleaved samples scaled to `[-1.0, 1.0]`, plus the source format.
fn decode(path: &Path) -> Result<(Vec<f32>, WavSpec), AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioError::Unsupported("sample rate of 0 Hz".into()));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => {
            return Err(AudioError::Unsupported(format!("{format:?} at {bits} bits")));
        }
    };
    Ok((interleaved, spec))
}

// ---------------------------------------------------------------------------
// WavSink
// ---------------------------------------------------------------------------

/// Streaming writer for the exported narration: mono, 16-bit PCM.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    sample_rate: u32,
    frames: u64,
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl WavSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::Unsupported("sample rate of 0 Hz".into()));
        }
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: WavWriter::create(path, spec)?,
            sample_rate,
            frames: 0,
        })
    }

    /// Append mono samples in `[-1.0, 1.0]`; values outside are clipped.
    pub fn append_samples(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            self.writer.write_sample(v)?;
        }
        self.frames += samples.len() as u64;
        Ok(())
    }

    /// Append `duration` of digital silence.
    pub fn append_silence(&mut self, duration: Duration) -> Result<(), AudioError> {
        let frames = duration_to_frames(duration, self.sample_rate);
        for _ in 0..frames {
            self.writer.write_sample(0_i16)?;
        }
        self.frames += frames;
        Ok(())
    }

    /// Length of everything appended so far.
    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames, self.sample_rate)
    }

    /// Flush and patch the header.  Returns the final duration in ms.
    pub fn finalize(self) -> Result<u64, AudioError> {
        let duration_ms = self.duration_ms();
        self.writer.finalize()?;
        Ok(duration_ms)
    }
}

fn frames_to_ms(frames: u64, rate: u32) -> u64 {
    frames * 1000 / rate as u64
}

fn duration_to_frames(duration: Duration, rate: u32) -> u64 {
    (duration.as_micros() * rate as u128 / 1_000_000) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_wav(path: &Path, spec: WavSpec, samples: &[i32]) {
        let mut w = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            match spec.bits_per_sample {
                8 => w.write_sample(s as i8).unwrap(),
                16 => w.write_sample(s as i16).unwrap(),
                _ => w.write_sample(s).unwrap(),
            }
        }
        w.finalize().unwrap();
    }

    #[test]
    fn probe_reads_duration_from_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        // 4 000 stereo frames = 0.5 s
        write_wav(&path, spec, &vec![0; 8_000]);
        assert_eq!(probe_duration_ms(&path).unwrap(), 500);
    }

    #[test]
    fn probe_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            probe_duration_ms(&dir.path().join("nope.wav")),
            Err(AudioError::Wav(_))
        ));
    }

    #[test]
    fn probe_non_wav_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("text.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();
        assert!(probe_duration_ms(&path).is_err());
    }

    #[test]
    fn verify_rejects_clip_with_truncated_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, &vec![1_000; 8_000]);
        assert_eq!(verify_clip(&path).unwrap(), 1_000);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        // The header still promises a full second.
        assert_eq!(probe_duration_ms(&path).unwrap(), 1_000);
        assert!(matches!(verify_clip(&path), Err(AudioError::Wav(_))));
    }

    #[test]
    fn load_clip_scales_int16_and_downmixes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, &[16_384, 16_384, -16_384, -16_384]);

        let clip = load_clip(&path, 16_000).unwrap();
        assert_eq!(clip.len(), 2);
        assert!((clip[0] - 0.5).abs() < 1e-3);
        assert!((clip[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn load_clip_reads_float_and_resamples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut w = WavWriter::create(&path, spec).unwrap();
        for _ in 0..480 {
            w.write_sample(0.25_f32).unwrap();
        }
        w.finalize().unwrap();

        let clip = load_clip(&path, 24_000).unwrap();
        assert_eq!(clip.len(), 240);
        assert!(clip.iter().all(|s| (s - 0.25).abs() < 1e-5));
    }

    #[test]
    fn sink_counts_samples_and_silence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path, 8_000).unwrap();
        sink.append_samples(&vec![0.1; 4_000]).unwrap();
        sink.append_silence(Duration::from_millis(250)).unwrap();
        assert_eq!(sink.duration_ms(), 750);
        assert_eq!(sink.finalize().unwrap(), 750);

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 6_000);
        assert_eq!(probe_duration_ms(&path).unwrap(), 750);
    }

    #[test]
    fn sink_clips_out_of_range_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        let mut sink = WavSink::create(&path, 8_000).unwrap();
        sink.append_samples(&[2.0, -2.0]).unwrap();
        sink.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn sink_rejects_zero_rate() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            WavSink::create(&dir.path().join("x.wav"), 0),
            Err(AudioError::Unsupported(_))
        ));
    }
}
