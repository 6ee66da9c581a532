//! Per-project file watcher.
//!
//! Wraps a recursive notify watcher over the project root, filtered by the
//! project's include/exclude patterns. Events are debounced per
//! `(project, file)` key (a new event within the window resets the timer),
//! and a stability wait guards against reading files mid-write. At most one
//! callback per key runs at a time; an event arriving while its key is in
//! flight is dropped and logged. Failed callbacks land in a failed-files map
//! that a background pass retries every minute, up to three attempts total.
//!
//! Shutdown clears all pending timers, closes the event source, and waits
//! for in-flight callbacks with a 10 second cap.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResolvedProject;
use crate::error::{Error, Result};
use crate::scan;

/// Per-callback deadline.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);
/// Cadence of the failed-files retry pass.
const RETRY_INTERVAL: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 3;
/// Cap on waiting for in-flight callbacks at shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Changed,
    Deleted,
}

impl FileEvent {
    fn as_str(self) -> &'static str {
        match self {
            FileEvent::Changed => "changed",
            FileEvent::Deleted => "deleted",
        }
    }
}

/// Callbacks the watcher drives; the server wires these to the indexer.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    async fn on_file_changed(&self, project: &ResolvedProject, path: &Path) -> Result<()>;
    async fn on_file_deleted(&self, project: &ResolvedProject, rel_path: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub event: String,
    pub file: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStats {
    pub events_processed: u64,
    pub events_in_queue: u64,
    pub error_count: u64,
    pub in_flight_count: u64,
    pub failed_files: Vec<FailedFile>,
}

#[derive(Clone)]
struct FailedEntry {
    event: FileEvent,
    attempts: u32,
}

struct WatchState {
    project: Arc<ResolvedProject>,
    handler: Arc<dyn WatchHandler>,
    root: PathBuf,
    stability: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    in_flight: Mutex<HashSet<String>>,
    failed: Mutex<HashMap<String, FailedEntry>>,
    events_processed: AtomicU64,
    error_count: AtomicU64,
}

/// One watcher per project.
pub struct ProjectWatcher {
    state: Arc<WatchState>,
    debounce: Duration,
    include: GlobSet,
    exclude: GlobSet,
    /// Kept alive to keep the OS watches registered; dropped on shutdown.
    source: Mutex<Option<RecommendedWatcher>>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectWatcher {
    /// Start watching the project root. Fails (and starts nothing) when the
    /// root does not exist.
    pub fn start(project: ResolvedProject, handler: Arc<dyn WatchHandler>) -> Result<Arc<Self>> {
        let root = project
            .root
            .clone()
            .ok_or_else(|| Error::Config(format!("project {}: root required to watch", project.project)))?;
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "watch root does not exist: {}",
                root.display()
            )));
        }

        let include = build_globset(&project.include_patterns)?;
        let exclude = build_globset(&project.exclude_patterns)?;
        let debounce = Duration::from_millis(project.watcher.debounce);
        let stability = Duration::from_millis(project.watcher.stability);

        let state = Arc::new(WatchState {
            project: Arc::new(project),
            handler,
            root: root.clone(),
            stability,
            timers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            failed: Mutex::new(HashMap::new()),
            events_processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        });

        let watcher = Arc::new(Self {
            state,
            debounce,
            include,
            exclude,
            source: Mutex::new(None),
            event_pump: Mutex::new(None),
            retry_task: Mutex::new(None),
        });

        watcher.clone().spawn_event_source()?;
        watcher.clone().spawn_retry_pass();
        info!(
            project = %watcher.state.project.project,
            root = %root.display(),
            "watcher started"
        );
        Ok(watcher)
    }

    fn spawn_event_source(self: Arc<Self>) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Event>();

        let mut source = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Internal(format!("watcher init: {e}")))?;

        source
            .watch(&self.state.root, RecursiveMode::Recursive)
            .map_err(|e| Error::Internal(format!("watch {}: {e}", self.state.root.display())))?;
        *self.source.lock().unwrap() = Some(source);

        let this = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let file_event = match event.kind {
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_) => {
                        FileEvent::Changed
                    }
                    notify::EventKind::Remove(_) => FileEvent::Deleted,
                    _ => continue,
                };
                for path in event.paths {
                    this.dispatch(file_event, &path);
                }
            }
        });
        *self.event_pump.lock().unwrap() = Some(pump);
        Ok(())
    }

    /// Route one event through pattern filters and the debounce timer.
    fn dispatch(&self, event: FileEvent, abs_path: &Path) {
        let Ok(rel) = abs_path.strip_prefix(&self.state.root) else {
            return;
        };
        let rel_str = scan::to_forward_slashes(rel);
        if rel_str.is_empty() || self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str)
        {
            return;
        }

        let key = format!("{}//{}", self.state.project.project, rel_str);
        let state = self.state.clone();
        let debounce = self.debounce;
        let timer_key = key.clone();

        let mut timers = self.state.timers.lock().unwrap();
        // A fresh event resets the pending window for this key.
        if let Some(previous) = timers.remove(&key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            state.timers.lock().unwrap().remove(&timer_key);
            state.run_callback(&timer_key, event, &rel_str, 1).await;
        });
        timers.insert(key, handle);
    }

    pub fn stats(&self) -> WatcherStats {
        let failed = self
            .state
            .failed
            .lock()
            .unwrap()
            .iter()
            .map(|(key, entry)| FailedFile {
                event: entry.event.as_str().to_string(),
                file: key.clone(),
                attempts: entry.attempts,
            })
            .collect();
        WatcherStats {
            events_processed: self.state.events_processed.load(Ordering::Relaxed),
            events_in_queue: self.state.timers.lock().unwrap().len() as u64,
            error_count: self.state.error_count.load(Ordering::Relaxed),
            in_flight_count: self.state.in_flight.lock().unwrap().len() as u64,
            failed_files: failed,
        }
    }

    fn spawn_retry_pass(self: Arc<Self>) {
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RETRY_INTERVAL).await;
                let retryable: Vec<(String, FailedEntry)> = {
                    let failed = state.failed.lock().unwrap();
                    failed
                        .iter()
                        .filter(|(_, e)| e.attempts < MAX_ATTEMPTS)
                        .map(|(k, e)| (k.clone(), e.clone()))
                        .collect()
                };
                for (key, entry) in retryable {
                    let rel = key
                        .split_once("//")
                        .map(|(_, rel)| rel.to_string())
                        .unwrap_or_default();
                    debug!(key = %key, attempt = entry.attempts + 1, "retrying failed file");
                    state
                        .run_callback(&key, entry.event, &rel, entry.attempts + 1)
                        .await;
                }
            }
        });
        *self.retry_task.lock().unwrap() = Some(task);
    }

    /// Stop the watcher: clear timers, close the event source, then wait for
    /// in-flight callbacks up to the shutdown cap.
    pub async fn shutdown(&self) {
        for (_, handle) in self.state.timers.lock().unwrap().drain() {
            handle.abort();
        }
        if let Some(task) = self.retry_task.lock().unwrap().take() {
            task.abort();
        }
        // Dropping the notify watcher closes the OS event source.
        self.source.lock().unwrap().take();
        if let Some(pump) = self.event_pump.lock().unwrap().take() {
            pump.abort();
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_WAIT;
        while !self.state.in_flight.lock().unwrap().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    project = %self.state.project.project,
                    "shutdown cap reached with callbacks still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!(project = %self.state.project.project, "watcher stopped");
    }
}

impl WatchState {
    /// Run the handler for one key, enforcing at-most-one-in-flight and the
    /// per-call timeout. `attempt` is 1 for a fresh event.
    async fn run_callback(&self, key: &str, event: FileEvent, rel: &str, attempt: u32) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(key.to_string()) {
                debug!(key, "dropping event, callback already in flight");
                return;
            }
        }

        if event == FileEvent::Changed {
            self.wait_for_stability(rel).await;
        }

        let call = async {
            match event {
                FileEvent::Changed => {
                    let abs = self.root.join(rel);
                    self.handler.on_file_changed(&self.project, &abs).await
                }
                FileEvent::Deleted => self.handler.on_file_deleted(&self.project, rel).await,
            }
        };

        let outcome = match tokio::time::timeout(CALLBACK_TIMEOUT, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("watch callback for {rel}"))),
        };

        match outcome {
            Ok(()) => {
                self.failed.lock().unwrap().remove(key);
                self.events_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(key, attempt, error = %e, "watch callback failed");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                self.failed.lock().unwrap().insert(
                    key.to_string(),
                    FailedEntry {
                        event,
                        attempts: attempt,
                    },
                );
            }
        }

        self.in_flight.lock().unwrap().remove(key);
    }

    /// Wait until the file's size and mtime hold still for the stability
    /// window. Bounded; a file that never settles proceeds anyway.
    async fn wait_for_stability(&self, rel: &str) {
        let path = self.root.join(rel);
        let mut last = file_signature(&path);
        for _ in 0..20 {
            tokio::time::sleep(self.stability).await;
            let current = file_signature(&path);
            if current == last {
                return;
            }
            last = current;
        }
    }
}

fn file_signature(path: &Path) -> Option<(u64, std::time::SystemTime)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).map_err(|e| Error::Config(format!("glob {pattern:?}: {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_project_config;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct RecordingHandler {
        changed: AtomicUsize,
        deleted: AtomicUsize,
        fail_first: AtomicUsize,
    }

    impl RecordingHandler {
        fn new(fail_first: usize) -> Self {
            Self {
                changed: AtomicUsize::new(0),
                deleted: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(fail_first),
            }
        }
    }

    #[async_trait]
    impl WatchHandler for RecordingHandler {
        async fn on_file_changed(&self, _project: &ResolvedProject, _path: &Path) -> Result<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Upstream("induced failure".into()));
            }
            self.changed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_file_deleted(&self, _project: &ResolvedProject, _rel: &str) -> Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_project(root: &Path) -> ResolvedProject {
        let doc = format!(
            "group: g\nproject: p\nlanguage: typescript\nroot: {}\nwatcher:\n  debounce: 100\n  stability: 100\n",
            root.display()
        );
        parse_project_config(&doc).unwrap()
    }

    async fn started(
        handler: Arc<RecordingHandler>,
    ) -> (TempDir, Arc<ProjectWatcher>) {
        let tmp = TempDir::new().unwrap();
        let project = test_project(tmp.path());
        let watcher = ProjectWatcher::start(project, handler).unwrap();
        (tmp, watcher)
    }

    #[tokio::test]
    async fn test_missing_root_does_not_start() {
        let doc = "group: g\nproject: p\nlanguage: typescript\nroot: /nonexistent/watch-root\n";
        let project = parse_project_config(doc).unwrap();
        let result = ProjectWatcher::start(project, Arc::new(RecordingHandler::new(0)));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_debounce_coalesces_bursts() {
        let handler = Arc::new(RecordingHandler::new(0));
        let (tmp, watcher) = started(handler.clone()).await;
        let file = tmp.path().join("a.ts");
        std::fs::write(&file, "const a = 1;").unwrap();

        // A burst of events for one key collapses into one callback.
        for _ in 0..5 {
            watcher.dispatch(FileEvent::Changed, &file);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(handler.changed.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.stats().events_processed, 1);
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_matching_files_ignored() {
        let handler = Arc::new(RecordingHandler::new(0));
        let (tmp, watcher) = started(handler.clone()).await;
        let file = tmp.path().join("notes.md");
        std::fs::write(&file, "not typescript").unwrap();

        watcher.dispatch(FileEvent::Changed, &file);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(handler.changed.load(Ordering::SeqCst), 0);
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_event_routes_to_deleted_callback() {
        let handler = Arc::new(RecordingHandler::new(0));
        let (tmp, watcher) = started(handler.clone()).await;

        watcher.dispatch(FileEvent::Deleted, &tmp.path().join("gone.ts"));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(handler.deleted.load(Ordering::SeqCst), 1);
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_callback_recorded() {
        let handler = Arc::new(RecordingHandler::new(1));
        let (tmp, watcher) = started(handler.clone()).await;
        let file = tmp.path().join("flaky.ts");
        std::fs::write(&file, "const x = 1;").unwrap();

        watcher.dispatch(FileEvent::Changed, &file);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let stats = watcher.stats();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.failed_files.len(), 1);
        assert_eq!(stats.failed_files[0].attempts, 1);
        assert!(stats.failed_files[0].file.contains("flaky.ts"));
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_clears_pending_timers() {
        let handler = Arc::new(RecordingHandler::new(0));
        let (tmp, watcher) = started(handler.clone()).await;
        let file = tmp.path().join("pending.ts");
        std::fs::write(&file, "const x = 1;").unwrap();

        watcher.dispatch(FileEvent::Changed, &file);
        assert_eq!(watcher.stats().events_in_queue, 1);
        watcher.shutdown().await;
        assert_eq!(watcher.stats().events_in_queue, 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(handler.changed.load(Ordering::SeqCst), 0, "timer was aborted");
    }
}
