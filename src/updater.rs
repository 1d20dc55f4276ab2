//! Bounded dispatcher fetching server-known issues and feeding them into the
//! local issue matcher.
//!
//! Refreshes are submitted as tasks against a fixed-size worker pool with a
//! strictly bounded queue: when the queue is full, new refresh requests are
//! dropped and logged instead of piling up. Once a batch spans enough files,
//! the dispatcher stops fetching per file and downloads the full server issue
//! set per project instead, at most once per project key and batch.

use crate::binding::BindingManager;
use crate::binding::{ModuleId, ProjectBinding};
use crate::engine::ConnectedEngine;
use crate::issue_store::IssueMatcher;
use crate::trackable::ServerIssueTrackable;
use dashmap::DashSet;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

const THREADS_NUM: usize = 5;
const QUEUE_LIMIT: usize = 100;
const FETCH_ALL_ISSUES_THRESHOLD: usize = 10;
const TASK_TIMEOUT: Duration = Duration::from_secs(20);

/// Pool sizing and batching policy. The defaults are the production values;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// At this many files per batch, switch from per-file fetches to one
    /// download-all per project.
    pub download_all_threshold: usize,
    pub task_timeout: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            workers: THREADS_NUM,
            queue_capacity: QUEUE_LIMIT,
            download_all_threshold: FETCH_ALL_ISSUES_THRESHOLD,
            task_timeout: TASK_TIMEOUT,
        }
    }
}

/// Reports batch progress back to the host's progress UI.
pub trait ProgressMonitor: Send + Sync {
    fn set_message(&self, text: &str);
}

pub struct NoopProgress;

impl ProgressMonitor for NoopProgress {
    fn set_message(&self, _text: &str) {}
}

/// A file needing a server-issue refresh. The host resolves the path relative
/// to the analysis root, since only it knows the module layout.
#[derive(Debug, Clone)]
pub struct SyncFile {
    pub path: PathBuf,
    pub relative_path: String,
}

impl SyncFile {
    pub fn new(path: impl Into<PathBuf>, relative_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            relative_path: relative_path.into(),
        }
    }
}

/// Decrements a counter when dropped, so aborted tasks release their slot.
struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pending-queue accounting. [`ServerIssueUpdater::dispose`] marks the pool
/// closed and takes the pending count in one critical section, so the dropped
/// count it reports stays exact even while waiters are being woken.
#[derive(Default)]
struct QueueState {
    pending: usize,
    closed: bool,
}

fn lock_queue(queue: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tracks one pending submission. Dropping it releases the slot, except after
/// close, when dispose() has already taken the count.
struct PendingGuard {
    queue: Arc<Mutex<QueueState>>,
    armed: bool,
}

impl PendingGuard {
    fn new(queue: Arc<Mutex<QueueState>>) -> Self {
        Self { queue, armed: true }
    }

    /// Move this submission from pending to running. Returns `false` when the
    /// pool closed first; the task must not run then.
    fn start(mut self) -> bool {
        self.armed = false;
        let mut queue = lock_queue(&self.queue);
        if queue.closed {
            return false;
        }
        queue.pending -= 1;
        true
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut queue = lock_queue(&self.queue);
        if !queue.closed {
            queue.pending -= 1;
        }
    }
}

pub struct ServerIssueUpdater {
    binding: Arc<BindingManager>,
    matcher: Arc<dyn IssueMatcher>,
    config: UpdaterConfig,
    semaphore: Arc<Semaphore>,
    /// Submitted tasks that have not finished yet (queued + running).
    in_flight: Arc<AtomicUsize>,
    /// Submitted tasks still waiting for a worker, plus the closed flag.
    queue: Arc<Mutex<QueueState>>,
    rejected: AtomicUsize,
    submitted: AtomicUsize,
}

impl ServerIssueUpdater {
    pub fn new(binding: Arc<BindingManager>, matcher: Arc<dyn IssueMatcher>) -> Self {
        Self::with_config(binding, matcher, UpdaterConfig::default())
    }

    pub fn with_config(
        binding: Arc<BindingManager>,
        matcher: Arc<dyn IssueMatcher>,
        config: UpdaterConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers));
        Self {
            binding,
            matcher,
            config,
            semaphore,
            in_flight: Arc::new(AtomicUsize::new(0)),
            queue: Arc::new(Mutex::new(QueueState::default())),
            rejected: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
        }
    }

    /// Refresh the server issues of `files_per_module` and feed the results
    /// into the issue matcher.
    ///
    /// Does nothing when the project is not bound or its binding is invalid;
    /// the caller is expected to have validated the binding. With
    /// `wait_for_completion` the call blocks until every task finished or
    /// timed out; otherwise tasks complete in the background.
    pub async fn fetch_and_match_server_issues(
        &self,
        files_per_module: HashMap<ModuleId, Vec<SyncFile>>,
        progress: &dyn ProgressMonitor,
        wait_for_completion: bool,
    ) {
        if !self.binding.project_settings().is_bound() {
            // not in connected mode
            return;
        }
        let connection = match self.binding.server_connection() {
            Ok(connection) => connection,
            Err(_) => return,
        };
        let engine = match self.binding.connected_engine() {
            Ok(engine) => engine,
            Err(_) => return,
        };

        let num_files: usize = files_per_module.values().map(|f| f.len()).sum();
        let download_all = num_files >= self.config.download_all_threshold;
        let mut msg = if download_all {
            "Fetching all server issues".to_string()
        } else {
            format!(
                "Fetching server issues in {} file{}",
                num_files,
                if num_files == 1 { "" } else { "s" }
            )
        };
        if wait_for_completion {
            msg.push_str(" (waiting for results)");
        }
        debug!("{msg}");
        progress.set_message(&msg);

        let connection = Arc::new(connection);
        let handles = if download_all {
            self.download_and_match_all(files_per_module, connection, engine)
        } else {
            self.fetch_and_match_files(files_per_module, connection, engine)
        };

        if wait_for_completion {
            self.wait_for_tasks(handles).await;
        }
    }

    /// Per-file mode: one task per file, each downloading that file's server
    /// issues and falling back to the cached ones when the download fails.
    fn fetch_and_match_files(
        &self,
        files_per_module: HashMap<ModuleId, Vec<SyncFile>>,
        connection: Arc<crate::connection::ServerConnection>,
        engine: Arc<dyn ConnectedEngine>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (module, files) in files_per_module {
            let Some(project_key) = self.binding.resolve_project_key(&module) else {
                debug!("No project key resolved for module {module}, skipping");
                continue;
            };
            let project_binding = ProjectBinding::new(project_key.clone());
            for file in files {
                let connection = connection.clone();
                let engine = engine.clone();
                let matcher = self.matcher.clone();
                let binding = project_binding.clone();
                let relative = file.relative_path.clone();
                let path = file.path.clone();
                let task = async move {
                    debug!(
                        "fetchServerIssues projectKey={}, filepath={relative}",
                        binding.project_key
                    );
                    let issues = match engine
                        .download_server_issues(&connection, &binding, &relative)
                        .await
                    {
                        Ok(issues) => issues,
                        Err(e) => {
                            info!("{e}");
                            // Serve the previously downloaded issues instead.
                            engine.server_issues(&binding, &relative)
                        }
                    };
                    match_file(&*matcher, &path, issues);
                };
                if let Some(handle) = self.submit(task, &project_key, Some(&file.relative_path)) {
                    handles.push(handle);
                }
            }
        }
        handles
    }

    /// Download-all mode: one task per module. Each distinct project key is
    /// downloaded at most once per batch, then every file is matched from the
    /// engine's local store.
    fn download_and_match_all(
        &self,
        files_per_module: HashMap<ModuleId, Vec<SyncFile>>,
        connection: Arc<crate::connection::ServerConnection>,
        engine: Arc<dyn ConnectedEngine>,
    ) -> Vec<JoinHandle<()>> {
        let updated_projects: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let mut handles = Vec::new();
        for (module, files) in files_per_module {
            let Some(project_key) = self.binding.resolve_project_key(&module) else {
                debug!("No project key resolved for module {module}, skipping");
                continue;
            };
            let project_binding = ProjectBinding::new(project_key.clone());
            let connection = connection.clone();
            let engine = engine.clone();
            let matcher = self.matcher.clone();
            let updated_projects = updated_projects.clone();
            let key = project_key.clone();
            let task = async move {
                if updated_projects.insert(key.clone()) {
                    debug!("fetchServerIssues projectKey={key}");
                    if let Err(e) = engine.download_all_server_issues(&connection, &key).await {
                        info!("{e}");
                    }
                }
                for file in files {
                    let issues = engine.server_issues(&project_binding, &file.relative_path);
                    match_file(&*matcher, &file.path, issues);
                }
            };
            if let Some(handle) = self.submit(task, &project_key, None) {
                handles.push(handle);
            }
        }
        handles
    }

    /// Admit a task if the pool has room, spawning it gated on the worker
    /// semaphore. Over-capacity submissions are dropped and logged.
    fn submit<F>(
        &self,
        task: F,
        project_key: &str,
        file_path: Option<&str>,
    ) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let capacity = self.config.workers + self.config.queue_capacity;
        {
            let mut queue = lock_queue(&self.queue);
            if queue.closed {
                self.rejected.fetch_add(1, Ordering::AcqRel);
                error!(
                    "fetch and match server issues rejected for projectKey={project_key}, filepath={}: updater disposed",
                    file_path.unwrap_or("<all>")
                );
                return None;
            }
            let prior = self.in_flight.fetch_add(1, Ordering::AcqRel);
            if prior >= capacity {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.rejected.fetch_add(1, Ordering::AcqRel);
                error!(
                    "fetch and match server issues rejected for projectKey={project_key}, filepath={}",
                    file_path.unwrap_or("<all>")
                );
                return None;
            }
            queue.pending += 1;
        }
        self.submitted.fetch_add(1, Ordering::AcqRel);

        let semaphore = self.semaphore.clone();
        let in_flight = self.in_flight.clone();
        let queue = self.queue.clone();
        Some(tokio::spawn(async move {
            let _in_flight = CounterGuard(in_flight);
            let pending = PendingGuard::new(queue);
            let permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                // Pool shut down before this task started: drop it.
                Err(_) => return,
            };
            if !pending.start() {
                // Shut down between the permit grant and the start.
                return;
            }
            task.await;
            drop(permit);
        }))
    }

    /// Await each task with the configured timeout. A timed-out task is
    /// aborted and logged; the rest of the batch still completes.
    async fn wait_for_tasks(&self, handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            let abort = handle.abort_handle();
            match timeout(self.config.task_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("ServerIssueUpdater task failed: {e}"),
                Err(_) => {
                    abort.abort();
                    error!("ServerIssueUpdater task expired");
                }
            }
        }
    }

    /// Shut the pool down. Tasks queued but not yet started are dropped;
    /// returns how many. Terminal: the updater cannot be restarted.
    pub fn dispose(&self) -> usize {
        let dropped = {
            let mut queue = lock_queue(&self.queue);
            queue.closed = true;
            std::mem::take(&mut queue.pending)
        };
        self.semaphore.close();
        if dropped > 0 {
            error!("rejected {dropped} pending tasks");
        }
        dropped
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::Acquire)
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::Acquire)
    }
}

fn match_file(matcher: &dyn IssueMatcher, path: &std::path::Path, issues: Vec<crate::trackable::ServerIssue>) {
    let trackables: Vec<ServerIssueTrackable> =
        issues.into_iter().map(ServerIssueTrackable::new).collect();
    if !trackables.is_empty() {
        matcher.match_server_issues(path, trackables);
    }
}
