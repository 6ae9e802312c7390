//! Tracked detached tasks with an explicit failure sink.
//!
//! Work that must not block a session (scratch removal, throttled partial
//! writes) runs here instead of on bare `tokio::spawn`, so failures are
//! logged, counted, and retained, and shutdown can wait for completion.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Failures kept for inspection.
const MAX_RETAINED_FAILURES: usize = 64;

/// A background task that returned an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    /// Task label.
    pub task: &'static str,
    /// Error text.
    pub error: String,
}

type FailureLog = Arc<Mutex<VecDeque<TaskFailure>>>;

/// Tracker for detached tasks.
pub struct BackgroundTasks {
    tracker: TaskTracker,
    failures: FailureLog,
}

impl BackgroundTasks {
    /// Empty tracker.
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Spawn `fut` as a tracked task labelled `task`. An `Err` result goes
    /// to the failure sink.
    pub fn spawn<F, E>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let failures = Arc::clone(&self.failures);
        let _ = self.tracker.spawn(async move {
            if let Err(e) = fut.await {
                record_failure(&failures, task, &e);
            }
        });
    }

    /// Recorded failures, oldest first.
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.failures.lock().iter().cloned().collect()
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether no tasks are running.
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait until every task spawned so far has finished.
    pub async fn wait_idle(&self) {
        let _ = self.tracker.close();
        self.tracker.wait().await;
        let _ = self.tracker.reopen();
    }
}

fn record_failure(failures: &FailureLog, task: &'static str, error: &dyn Display) {
    let error = error.to_string();
    warn!(task, error = %error, "background task failed");
    counter!("background_task_failures_total", "task" => task).increment(1);
    let mut log = failures.lock();
    if log.len() == MAX_RETAINED_FAILURES {
        let _ = log.pop_front();
    }
    log.push_back(TaskFailure { task, error });
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("running", &self.tracker.len())
            .field("failures", &self.failures.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failures_reach_the_sink() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("ok_task", async { Ok::<(), String>(()) });
        tasks.spawn("bad_task", async { Err::<(), _>("disk full".to_string()) });
        tasks.wait_idle().await;

        assert!(tasks.is_empty());
        assert_eq!(
            tasks.failures(),
            vec![TaskFailure {
                task: "bad_task",
                error: "disk full".into(),
            }]
        );
    }

    #[tokio::test]
    async fn tracker_reopens_after_wait() {
        let tasks = BackgroundTasks::new();
        tasks.wait_idle().await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tasks.spawn("later", async move {
            let _ = tx.send(());
            Ok::<(), String>(())
        });
        rx.await.unwrap();
        tasks.wait_idle().await;
        assert!(tasks.failures().is_empty());
    }

    #[tokio::test]
    async fn retained_failures_are_bounded() {
        let tasks = BackgroundTasks::new();
        for i in 0..(MAX_RETAINED_FAILURES + 5) {
            tasks.spawn("flaky", async move { Err::<(), _>(format!("e{i}")) });
        }
        tasks.wait_idle().await;
        let failures = tasks.failures();
        assert_eq!(failures.len(), MAX_RETAINED_FAILURES);
        assert!(failures.iter().all(|f| f.task == "flaky"));
    }
}
