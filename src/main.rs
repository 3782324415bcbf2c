//! Command-line entry point.
//!
//! # Startup sequence
//!
//! 1. Parse arguments.
//! 2. Initialise logging (`RUST_LOG`, default `info`).
//! 3. Load [`AppConfig`] (explicit `--config` must load; the default file
//!    falls back to defaults with a warning).
//! 4. Build the [`CommandBackend`] and report its readiness.
//! 5. Read the script, run [`Narrator::generate`] and print the result.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use script_narrator::{
    config::{AppConfig, AppPaths},
    pipeline::{new_shared_settings, GenerationOutcome, GenerationRequest, Narrator},
    tts::{CommandBackend, SynthesisBackend},
};

#[derive(Parser, Debug)]
#[command(name = "script-narrator", version, about = "Render a narrated script into one WAV file")]
struct Args {
    /// Script to narrate, or `-` to read standard input.
    #[arg(long, value_name = "PATH", required_unless_present = "status")]
    text_file: Option<PathBuf>,

    /// Reference recording of the voice to imitate (wav, mp3, ogg).  A bare
    /// file name is looked up in the voices directory.
    #[arg(long, value_name = "PATH", required_unless_present = "status")]
    voice: Option<PathBuf>,

    /// Language code; defaults to the configured language.
    #[arg(long)]
    language: Option<String>,

    /// Name used for the output file.
    #[arg(long)]
    name: Option<String>,

    /// Synthesis worker threads (overrides the config file).
    #[arg(long)]
    threads: Option<usize>,

    /// Settings file to use instead of the platform default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print backend readiness and exit.
    #[arg(long)]
    status: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let args = Args::parse();

    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if args.json {
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    // 2. Configuration
    let paths = AppPaths::new();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(threads) = args.threads {
        config.generation.threads = threads;
    }

    // 3. Backend
    let backend = Arc::new(CommandBackend::from_app_config(&config, &paths));
    if args.status {
        return print_status(&backend, args.json);
    }

    // 4. Request
    let (Some(text_file), Some(voice)) = (&args.text_file, &args.voice) else {
        anyhow::bail!("--text-file and --voice are required");
    };
    let text = read_script(text_file)?;
    let mut request = GenerationRequest::new(text, voice.clone());
    if let Some(language) = &args.language {
        request = request.language(language.clone());
    }
    if let Some(name) = &args.name {
        request = request.name(name.clone());
    }

    // 5. Generate
    let narrator = Narrator::new(backend, new_shared_settings(config), paths);
    let mut progress = |percent: u8, message: &str| {
        log::info!("[{percent:>3}%] {message}");
        true
    };
    let outcome = narrator.generate(&request, Some(&mut progress))?;
    print_outcome(&outcome, args.json)
}

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        })),
    }
}

fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read script from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))
}

fn print_status(backend: &CommandBackend, json: bool) -> Result<()> {
    let state = backend.state();
    let missing = backend.status().missing_files();
    let model_dir = backend.status().model_dir();
    if json {
        let report = serde_json::json!({
            "state": state,
            "model_dir": model_dir,
            "missing_files": missing,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("backend:   {state}");
        println!("model dir: {}", model_dir.display());
        for file in &missing {
            println!("missing:   {file}");
        }
    }
    Ok(())
}

fn print_outcome(outcome: &GenerationOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        if outcome.fallback {
            log::warn!("no segment could be synthesised; exported the fallback phrase");
        }
        println!("{}", outcome.path.display());
    }
    Ok(())
}
