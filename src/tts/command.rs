//! External-program synthesis backend.
//!
//! [`CommandBackend`] drives any TTS command-line tool that can render one
//! utterance into a WAV file (Coqui `tts`, `piper`, …).  Every synthesis
//! call spawns its own child process, so each handle is private to the
//! worker that opened it and nothing is shared between concurrent calls.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, AppPaths, TtsConfig};

use super::backend::{SynthesisBackend, SynthesisRequest, Synthesizer, TtsError};
use super::model::{ModelState, ModelStatus};

/// How often a running child is polled while a timeout is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bytes of stderr kept for the error message.
const STDERR_TAIL: usize = 2_000;

// ---------------------------------------------------------------------------
// CommandBackend
// ---------------------------------------------------------------------------

/// Shared factory for [`CommandSynthesizer`] handles.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    config: TtsConfig,
    status: ModelStatus,
}

impl CommandBackend {
    /// Build a backend whose model lives in `model_dir`.
    pub fn new(config: TtsConfig, model_dir: impl Into<PathBuf>) -> Self {
        let status = ModelStatus::new(model_dir, config.required_files.clone());
        status.refresh();
        Self { config, status }
    }

    /// Build a backend from the application config and resolved paths.
    pub fn from_app_config(config: &AppConfig, paths: &AppPaths) -> Self {
        Self::new(config.tts.clone(), config.model_dir(paths))
    }

    /// Readiness handle, e.g. for an installer to drive.
    pub fn status(&self) -> &ModelStatus {
        &self.status
    }
}

impl SynthesisBackend for CommandBackend {
    fn state(&self) -> ModelState {
        self.status.refresh()
    }

    fn open(&self) -> Result<Box<dyn Synthesizer>, TtsError> {
        match self.status.state() {
            ModelState::Ready => Ok(Box::new(CommandSynthesizer {
                config: self.config.clone(),
                model_dir: self.status.model_dir().to_path_buf(),
            })),
            other => Err(TtsError::NotReady(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandSynthesizer
// ---------------------------------------------------------------------------

/// One-shot handle: each call spawns and reaps one child process.
#[derive(Debug)]
pub struct CommandSynthesizer {
    config: TtsConfig,
    model_dir: PathBuf,
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<(), TtsError> {
        let model_dir = self.model_dir.to_string_lossy();
        let voice = request.voice.to_string_lossy();
        let output = request.destination.to_string_lossy();
        let vars = [
            ("text", request.text),
            ("language", request.language),
            ("voice", voice.as_ref()),
            ("output", output.as_ref()),
            ("model_dir", model_dir.as_ref()),
        ];

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.args.iter().map(|a| fill_template(a, &vars)))
            .stdin(if self.config.text_via_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(var) = &self.config.model_dir_env {
            cmd.env(var, &self.model_dir);
        }

        log::debug!(
            "tts: spawning {} for {} chars",
            self.config.program,
            request.text.len()
        );

        let mut child = cmd.spawn().map_err(|source| TtsError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        // Pipes are serviced on helper threads so the timeout in `wait`
        // always applies.
        let stderr = drain_stderr(&mut child);
        let feeder = match feed_stdin(&mut child, request.text) {
            Ok(feeder) => feeder,
            Err(e) => {
                reap(&mut child);
                return Err(TtsError::Io(e));
            }
        };
        let status = wait(&mut child, self.config.timeout())?;
        let stderr = stderr
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(TtsError::Failed(format!(
                "{} exited with {status}: {}",
                self.config.program,
                stderr.trim()
            )));
        }
        if let Some(Err(e)) = feeder.and_then(|h| h.join().ok()) {
            return Err(TtsError::Io(e));
        }

        ensure_output(request.destination)
    }
}

/// Substitute `{name}` placeholders in one pass, so text that itself
/// contains braces is never re-expanded.
fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = vars.iter().find_map(|(name, value)| {
            let key_len = name.len() + 2;
            (tail.len() >= key_len
                && tail[1..].starts_with(name)
                && tail[key_len - 1..].starts_with('}'))
            .then_some((key_len, *value))
        });
        match hit {
            Some((len, value)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Write `text` to the child's stdin, if piped, and close it so the program
/// sees EOF.
fn feed_stdin(
    child: &mut Child,
    text: &str,
) -> std::io::Result<Option<JoinHandle<std::io::Result<()>>>> {
    let Some(mut pipe) = child.stdin.take() else {
        return Ok(None);
    };
    let text = text.to_owned();
    std::thread::Builder::new()
        .name("tts-stdin".into())
        .spawn(move || pipe.write_all(text.as_bytes()))
        .map(Some)
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut pipe = child.stderr.take()?;
    std::thread::Builder::new()
        .name("tts-stderr".into())
        .spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            if buf.len() > STDERR_TAIL {
                let mut cut = buf.len() - STDERR_TAIL;
                while !buf.is_char_boundary(cut) {
                    cut += 1;
                }
                buf.drain(..cut);
            }
            buf
        })
        .ok()
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, TtsError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            log::warn!("tts: synthesis exceeded {timeout:?}, killing child");
            reap(&mut *child);
            return Err(TtsError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("tts: kill failed: {e}");
    }
    let _ = child.wait();
}

fn ensure_output(path: &Path) -> Result<(), TtsError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(TtsError::NoOutput(path.to_path_buf())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
