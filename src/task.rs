//! Background generation tasks.
//!
//! [`TaskManager`] runs at most one [`Narrator`] generation at a time on a
//! dedicated thread and reports its lifecycle to a [`TaskNotifier`].  Every
//! event is delivered on the task thread with no manager lock held, so a
//! notifier may call back into the manager:
//!
//! ```text
//! start_task ──▶ started ──▶ progress* ──┬──▶ completed(outcome)
//!                                        └──▶ failed(Cancelled | Error)
//! ```
//!
//! Front ends (desktop, web, CLI) implement [`TaskNotifier`] to forward the
//! events wherever they need to go.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::{CancelToken, GenerationOutcome, GenerationRequest, Narrator, PipelineError};

pub type TaskId = Uuid;

/// How a task ended without producing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    Cancelled,
    Error(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Cancelled => f.write_str("Task cancelled"),
            TaskFailure::Error(msg) => f.write_str(msg),
        }
    }
}

/// Receives task lifecycle events.  Called from the task thread.
pub trait TaskNotifier: Send + Sync + 'static {
    fn started(&self, id: TaskId);
    fn progress(&self, id: TaskId, percent: u8, message: &str);
    fn completed(&self, id: TaskId, outcome: &GenerationOutcome);
    fn failed(&self, id: TaskId, failure: TaskFailure);
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("a generation task is already running")]
    AlreadyRunning,

    #[error("failed to start task thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Running {
    id: TaskId,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// TaskManager
// ---------------------------------------------------------------------------

pub struct TaskManager<N: TaskNotifier> {
    narrator: Narrator,
    notifier: Arc<N>,
    current: Mutex<Option<Running>>,
}

impl<N: TaskNotifier> TaskManager<N> {
    pub fn new(narrator: Narrator, notifier: Arc<N>) -> Self {
        log::info!("task: manager initialised");
        Self {
            narrator,
            notifier,
            current: Mutex::new(None),
        }
    }

    pub fn notifier(&self) -> &Arc<N> {
        &self.notifier
    }

    /// `true` while the task thread is alive.
    pub fn is_task_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Id of the running task, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.lock()
            .as_ref()
            .filter(|task| !task.handle.is_finished())
            .map(|task| task.id)
    }

    /// Request cooperative cancellation of the running task.  Returns
    /// `false` when nothing is running.
    pub fn cancel_task(&self) -> bool {
        match self.lock().as_ref() {
            Some(task) if !task.handle.is_finished() => {
                log::info!("task: cancellation requested for {}", task.id);
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Start `request` on a background thread.
    pub fn start_task(&self, request: GenerationRequest) -> Result<TaskId, TaskError> {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            if !previous.handle.is_finished() {
                *current = Some(previous);
                return Err(TaskError::AlreadyRunning);
            }
            join(previous);
        }

        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        log::info!(
            "task: starting {id} ({})",
            request.name.as_deref().unwrap_or("unnamed")
        );

        let narrator = self.narrator.clone();
        let notifier = Arc::clone(&self.notifier);
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("narration-task".into())
            .spawn(move || run_task(&narrator, &*notifier, id, &request, &token));

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                drop(current);
                self.notifier
                    .failed(id, TaskFailure::Error(format!("failed to start task: {e}")));
                return Err(e.into());
            }
        };

        *current = Some(Running { id, cancel, handle });
        Ok(id)
    }

    /// Block until the current task (if any) has finished.  Returns its id.
    pub fn wait(&self) -> Option<TaskId> {
        let task = self.lock().take()?;
        let id = task.id;
        join(task);
        Some(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<N: TaskNotifier> Drop for TaskManager<N> {
    fn drop(&mut self) {
        if self.cancel_task() {
            log::info!("task: manager dropped while running, waiting for cancellation");
        }
        self.wait();
    }
}

fn join(task: Running) {
    if task.handle.join().is_err() {
        log::error!("task: thread for {} panicked", task.id);
    }
}

fn run_task(
    narrator: &Narrator,
    notifier: &dyn TaskNotifier,
    id: TaskId,
    request: &GenerationRequest,
    cancel: &CancelToken,
) {
    notifier.started(id);
    notifier.progress(id, 0, "Preparing to generate audio...");
    if cancel.is_cancelled() {
        log::info!("task: {id} cancelled before generation");
        notifier.failed(id, TaskFailure::Cancelled);
        return;
    }

    let mut progress = |percent: u8, message: &str| {
        notifier.progress(id, percent, message);
        !cancel.is_cancelled()
    };

    match narrator.generate_with_cancel(request, cancel, Some(&mut progress)) {
        Ok(outcome) => {
            log::info!("task: {id} completed: {}", outcome.filename);
            notifier.completed(id, &outcome);
        }
        Err(PipelineError::Cancelled) => {
            log::info!("task: {id} cancelled");
            notifier.failed(id, TaskFailure::Cancelled);
        }
        Err(e) => {
            log::error!("task: {id} failed: {e}");
            notifier.failed(id, TaskFailure::Error(e.to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, AppPaths, PauseConfig};
    use crate::pipeline::new_shared_settings;
    use crate::tts::MockBackend;
    use std::path::{Path, PathBuf};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Started(TaskId),
        Progress(u8, String),
        Completed(String),
        Failed(TaskFailure),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }

        fn last(&self) -> Option<Event> {
            self.events().pop()
        }
    }

    impl TaskNotifier for Recorder {
        fn started(&self, id: TaskId) {
            self.0.lock().unwrap().push(Event::Started(id));
        }
        fn progress(&self, _id: TaskId, percent: u8, message: &str) {
            self.0.lock().unwrap().push(Event::Progress(percent, message.to_string()));
        }
        fn completed(&self, _id: TaskId, outcome: &GenerationOutcome) {
            self.0.lock().unwrap().push(Event::Completed(outcome.filename.clone()));
        }
        fn failed(&self, _id: TaskId, failure: TaskFailure) {
            self.0.lock().unwrap().push(Event::Failed(failure));
        }
    }

    fn build<N: TaskNotifier>(
        root: &Path,
        backend: MockBackend,
        notifier: N,
    ) -> (TaskManager<N>, PathBuf) {
        let voice = root.join("voice.wav");
        std::fs::write(&voice, b"RIFF").unwrap();

        let mut config = AppConfig::default();
        config.pauses = PauseConfig {
            heading_secs: 0,
            ellipsis_secs: 0,
            line_break_secs: 0,
            section_break_secs: 0,
        };
        config.generation.output_dir = Some(root.join("out"));
        config.generation.sample_rate = 8_000;
        config.generation.threads = 2;

        let paths = AppPaths::with_roots(root.join("config"), root.join("data"));
        let narrator = Narrator::new(Arc::new(backend), new_shared_settings(config), paths);
        (TaskManager::new(narrator, Arc::new(notifier)), voice)
    }

    fn script(lines: usize) -> String {
        (0..lines).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    fn setup(backend: MockBackend) -> (TempDir, TaskManager<Recorder>, PathBuf) {
        let root = tempdir().unwrap();
        let (tasks, voice) = build(root.path(), backend, Recorder::default());
        (root, tasks, voice)
    }

    #[test]
    fn completed_task_reports_lifecycle() {
        let (_root, tasks, voice) = setup(MockBackend::new());
        let id = tasks
            .start_task(GenerationRequest::new("Hello...world", &voice).name("Morning"))
            .unwrap();
        assert_eq!(tasks.wait(), Some(id));
        assert!(!tasks.is_task_running());

        let events = tasks.notifier().events();
        assert_eq!(events.first(), Some(&Event::Started(id)));
        assert_eq!(
            events.get(1),
            Some(&Event::Progress(0, "Preparing to generate audio...".into()))
        );
        assert!(events.contains(&Event::Progress(100, "Audio generation completed".into())));
        assert_eq!(events.last(), Some(&Event::Completed("morning.wav".into())));
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let (_root, tasks, voice) =
            setup(MockBackend::new().with_delay(Duration::from_millis(40)));
        let id = tasks.start_task(GenerationRequest::new(script(6), &voice)).unwrap();

        assert!(tasks.is_task_running());
        assert_eq!(tasks.current_task(), Some(id));
        assert!(matches!(
            tasks.start_task(GenerationRequest::new("again", &voice)),
            Err(TaskError::AlreadyRunning)
        ));

        tasks.wait();
        assert!(tasks.current_task().is_none());
        let next = tasks.start_task(GenerationRequest::new("again", &voice)).unwrap();
        assert_ne!(next, id);
        tasks.wait();
    }

    #[test]
    fn cancel_reports_cancelled_failure() {
        let (root, tasks, voice) =
            setup(MockBackend::new().with_delay(Duration::from_millis(30)));
        tasks
            .start_task(GenerationRequest::new(script(10), &voice).name("stopped"))
            .unwrap();
        assert!(tasks.cancel_task());
        tasks.wait();

        assert_eq!(tasks.notifier().last(), Some(Event::Failed(TaskFailure::Cancelled)));
        assert!(!root.path().join("out/stopped.wav").exists());
    }

    #[test]
    fn pipeline_error_reports_message() {
        let (_root, tasks, voice) = setup(MockBackend::new());
        let missing = voice.with_file_name("missing.wav");
        tasks.start_task(GenerationRequest::new("Hello", missing)).unwrap();
        tasks.wait();

        match tasks.notifier().last() {
            Some(Event::Failed(TaskFailure::Error(msg))) => {
                assert!(msg.contains("voice reference"), "{msg}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn idle_manager_has_nothing_to_cancel_or_wait_for() {
        let (_root, tasks, _voice) = setup(MockBackend::new());
        assert!(!tasks.is_task_running());
        assert!(!tasks.cancel_task());
        assert_eq!(tasks.wait(), None);
    }

    /// Queries the manager from inside `started`.
    #[derive(Default)]
    struct Reentrant {
        manager: OnceLock<Weak<TaskManager<Reentrant>>>,
        seen: Mutex<Vec<(bool, Option<TaskId>)>>,
    }

    impl TaskNotifier for Reentrant {
        fn started(&self, _id: TaskId) {
            if let Some(tasks) = self.manager.get().and_then(Weak::upgrade) {
                let running = tasks.is_task_running();
                self.seen.lock().unwrap().push((running, tasks.current_task()));
            }
        }
        fn progress(&self, _id: TaskId, _percent: u8, _message: &str) {}
        fn completed(&self, _id: TaskId, _outcome: &GenerationOutcome) {}
        fn failed(&self, _id: TaskId, _failure: TaskFailure) {}
    }

    #[test]
    fn notifier_can_query_manager_when_started() {
        let root = tempdir().unwrap();
        let (tasks, voice) = build(root.path(), MockBackend::new(), Reentrant::default());
        let tasks = Arc::new(tasks);
        tasks.notifier().manager.set(Arc::downgrade(&tasks)).unwrap();

        let id = tasks.start_task(GenerationRequest::new("Hello", &voice)).unwrap();
        assert_eq!(tasks.wait(), Some(id));
        assert_eq!(*tasks.notifier().seen.lock().unwrap(), vec![(true, Some(id))]);
    }

    #[test]
    fn failure_display() {
        assert_eq!(TaskFailure::Cancelled.to_string(), "Task cancelled");
        assert_eq!(TaskFailure::Error("disk full".into()).to_string(), "disk full");
    }
}
