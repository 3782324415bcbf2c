//! Script narrator: turns a narrated script into a single audio file.
//!
//! ```text
//! text ─▶ segment ─▶ pool (parallel TTS) ─▶ assemble ─▶ output.wav
//! ```
//!
//! The [`pipeline::Narrator`] is the entry point; [`task::TaskManager`] runs
//! it in the background for interactive front ends.

pub mod assemble;
pub mod audio;
pub mod config;
pub mod pipeline;
pub mod pool;
pub mod segment;
pub mod task;
pub mod tts;
pub mod util;
