//! Long-running remote operations as pollable tasks.
//!
//! An [`AsyncTask`] wraps a deferred remote call (e.g. destroying a VM).
//! The call is submitted at most once, on the first `start`/`poll`/`wait`,
//! and never at construction. "Submitted" and "completed" are separate
//! observable states: a submission failure means the platform never saw
//! the request, while a failed task was accepted and then failed remotely.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{ConnectorError, TaskError};
use crate::remote::{RemoteTask, RemoteTaskState};

type SubmitResult = Result<Arc<dyn RemoteTask>, ConnectorError>;
type SubmitFn = Box<dyn FnOnce() -> BoxFuture<'static, SubmitResult> + Send>;

/// Observable state of an [`AsyncTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Submitted, waiting to be scheduled by the platform.
    Pending,
    /// Submitted and executing.
    Running,
    Succeeded,
    /// The platform reported a failure of the operation.
    Failed(String),
    /// The remote call could not be started.
    SubmitFailed(ConnectorError),
    Cancelled,
}

impl TaskStatus {
    /// Returns true once the status will not change anymore.
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Converts a terminal status into the task outcome.
    ///
    /// Returns `None` while the task is still in flight.
    pub fn outcome(&self, description: &str) -> Option<Result<(), TaskError>> {
        let description = description.to_string();
        match self {
            Self::Pending | Self::Running => None,
            Self::Succeeded => Some(Ok(())),
            Self::Failed(message) => Some(Err(TaskError::Failed {
                description,
                message: message.clone(),
            })),
            Self::SubmitFailed(source) => Some(Err(TaskError::SubmitFailed {
                description,
                source: source.clone(),
            })),
            Self::Cancelled => Some(Err(TaskError::Cancelled { description })),
        }
    }
}

/// A remote operation submitted lazily and exactly once.
pub struct AsyncTask {
    description: String,

    /// Deferred call, taken by the single submission.
    submit: Mutex<Option<SubmitFn>>,

    /// Result of the submission; initialized once.
    handle: OnceCell<SubmitResult>,

    cancel_requested: AtomicBool,

    /// Set once a cancel request has been sent to the platform.
    cancel_forwarded: AtomicBool,

    /// Set only when cancellation took effect: the call was never made, or
    /// the platform accepted the cancel request.
    cancelled: AtomicBool,

    /// Terminal status once observed.
    completed: Mutex<Option<TaskStatus>>,
}

impl AsyncTask {
    /// Wraps a deferred remote call. Nothing is invoked here.
    pub fn new<F, Fut>(description: impl Into<String>, submit: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SubmitResult> + Send + 'static,
    {
        Self {
            description: description.into(),
            submit: Mutex::new(Some(Box::new(move || submit().boxed()))),
            handle: OnceCell::new(),
            cancel_requested: AtomicBool::new(false),
            cancel_forwarded: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            completed: Mutex::new(None),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns true once the remote call has been made (successfully or not).
    pub fn is_submitted(&self) -> bool {
        self.handle.initialized()
    }

    /// Returns true once a terminal status has been observed.
    pub fn is_complete(&self) -> bool {
        self.completed_status().is_some()
    }

    /// Submits the remote call unless already submitted.
    ///
    /// Concurrent callers share one submission.
    pub async fn start(&self) -> Result<(), TaskError> {
        match self.submission().await {
            Some(Ok(_)) => Ok(()),
            Some(Err(source)) => Err(TaskError::SubmitFailed {
                description: self.description.clone(),
                source: source.clone(),
            }),
            None => Err(TaskError::Cancelled {
                description: self.description.clone(),
            }),
        }
    }

    /// Queries progress, submitting first if needed. Never waits for completion.
    pub async fn poll(&self) -> TaskStatus {
        if let Some(status) = self.completed_status() {
            return status;
        }

        let handle = match self.submission().await {
            None => return self.complete(TaskStatus::Cancelled),
            Some(Err(e)) => return self.complete(TaskStatus::SubmitFailed(e.clone())),
            Some(Ok(handle)) => Arc::clone(handle),
        };

        match handle.info().await {
            Ok(info) => match info.state {
                RemoteTaskState::Queued => TaskStatus::Pending,
                RemoteTaskState::Running => {
                    debug!(task = %self.description, progress = ?info.progress, "Task running");
                    TaskStatus::Running
                }
                RemoteTaskState::Success => self.complete(TaskStatus::Succeeded),
                RemoteTaskState::Error(_) if self.cancelled.load(Ordering::SeqCst) => {
                    self.complete(TaskStatus::Cancelled)
                }
                RemoteTaskState::Error(message) => self.complete(TaskStatus::Failed(message)),
            },
            Err(e) => {
                warn!(task = %self.description, error = %e, "Unable to read task state");
                TaskStatus::Running
            }
        }
    }

    /// Polls until the task completes.
    pub async fn wait(&self, poll_interval: Duration) -> Result<(), TaskError> {
        loop {
            let status = self.poll().await;
            if let Some(outcome) = status.outcome(&self.description) {
                return outcome;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Requests cancellation.
    ///
    /// Best effort: the platform may still finish the operation, so callers
    /// must keep polling to learn the real outcome. No-op once complete.
    ///
    /// A request that lands while the call is being submitted is forwarded
    /// as soon as the submission returns a handle.
    pub async fn cancel(&self) {
        if self.is_complete() {
            return;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);

        match self.handle.get() {
            None => {
                let pending = self
                    .submit
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if pending.is_some() {
                    self.cancelled.store(true, Ordering::SeqCst);
                    info!(task = %self.description, "Task cancelled before submission");
                } else {
                    debug!(task = %self.description, "Cancel deferred until submission returns");
                }
            }
            Some(Ok(handle)) => self.forward_cancel(&**handle).await,
            Some(Err(_)) => {}
        }
    }

    async fn forward_cancel(&self, handle: &dyn RemoteTask) {
        if self.cancel_forwarded.swap(true, Ordering::SeqCst) {
            return;
        }
        match handle.cancel().await {
            Ok(()) => {
                self.cancelled.store(true, Ordering::SeqCst);
                info!(task = %self.description, "Cancel request accepted");
            }
            Err(e) => warn!(task = %self.description, error = %e, "Cancel request failed"),
        }
    }

    async fn submission(&self) -> Option<&SubmitResult> {
        if !self.handle.initialized() && self.cancelled.load(Ordering::SeqCst) {
            return None;
        }

        let result = self
            .handle
            .get_or_init(|| async {
                let submit = self
                    .submit
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match submit {
                    Some(submit) => {
                        info!(task = %self.description, "Submitting task");
                        let result = submit().await;
                        if let Err(e) = &result {
                            warn!(task = %self.description, error = %e, "Task submission failed");
                        }
                        result
                    }
                    None => Err(ConnectorError::Rejected(
                        "cancelled before submission".to_string(),
                    )),
                }
            })
            .await;

        match result {
            // The closure was taken by `cancel`; no call was made.
            Err(_) if self.cancelled.load(Ordering::SeqCst) => return None,
            Ok(handle) if self.cancel_requested.load(Ordering::SeqCst) => {
                self.forward_cancel(&**handle).await;
            }
            _ => {}
        }
        Some(result)
    }

    fn completed_status(&self) -> Option<TaskStatus> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn complete(&self, status: TaskStatus) -> TaskStatus {
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        completed.get_or_insert(status).clone()
    }
}

impl std::fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTask")
            .field("description", &self.description)
            .field("submitted", &self.is_submitted())
            .field("completed", &self.completed_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DestroyBehavior, MockTask, MockVm};
    use crate::remote::RemoteVm;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(calls: Arc<AtomicUsize>, remote: Arc<MockTask>) -> AsyncTask {
        AsyncTask::new("Delete instance test-1", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(remote as Arc<dyn RemoteTask>)
        })
    }

    #[tokio::test]
    async fn test_not_submitted_at_construction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::new(MockTask::succeeding_after(0)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!task.is_submitted());
        assert!(!task.is_complete());
    }

    #[tokio::test]
    async fn test_concurrent_start_submits_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::new(MockTask::succeeding_after(1)));

        let (a, b) = tokio::join!(task.start(), task.start());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        task.start().await.unwrap();
        task.poll().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_progresses_to_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::new(MockTask::succeeding_after(2)));

        assert_eq!(task.poll().await, TaskStatus::Running);
        assert_eq!(task.poll().await, TaskStatus::Running);
        assert_eq!(task.poll().await, TaskStatus::Succeeded);
        assert!(task.is_complete());
        assert_eq!(task.poll().await, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_submit_failure_is_distinct() {
        let task = AsyncTask::new("Delete instance broken", || async {
            Err(ConnectorError::Rejected("permission denied".to_string()))
        });

        let err = task.start().await.unwrap_err();
        assert!(err.is_submit_failure());
        assert!(matches!(task.poll().await, TaskStatus::SubmitFailed(_)));

        let outcome = task.wait(Duration::from_millis(1)).await.unwrap_err();
        assert!(outcome.is_submit_failure());
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_submit_failure() {
        let task = AsyncTask::new("Delete instance locked", || async {
            Ok(Arc::new(MockTask::failing_after(1, "vm is locked")) as Arc<dyn RemoteTask>)
        });

        task.start().await.unwrap();
        let err = task.wait(Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Failed {
                description: "Delete instance locked".to_string(),
                message: "vm is locked".to_string(),
            }
        );
        assert!(!err.is_submit_failure());
    }

    #[tokio::test]
    async fn test_cancel_before_submission_prevents_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::new(MockTask::succeeding_after(0)));

        task.cancel().await;
        assert_eq!(task.poll().await, TaskStatus::Cancelled);
        assert!(matches!(
            task.start().await,
            Err(TaskError::Cancelled { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_is_forwarded() {
        let remote = Arc::new(MockTask::succeeding_after(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::clone(&remote));

        task.start().await.unwrap();
        task.cancel().await;
        assert_eq!(remote.cancel_count(), 1);
        assert_eq!(task.poll().await, TaskStatus::Cancelled);
    }

    fn destroy_task(vm: &Arc<MockVm>) -> AsyncTask {
        let vm = Arc::clone(vm);
        AsyncTask::new("Delete instance agent-1", move || async move {
            vm.submit_destroy().await
        })
    }

    fn slow_vm(behavior: DestroyBehavior) -> Arc<MockVm> {
        Arc::new(
            MockVm::new("vm-1", "agent-1")
                .with_destroy(behavior)
                .with_submit_delay(Duration::from_millis(50)),
        )
    }

    async fn cancel_later(task: &AsyncTask) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.cancel().await;
    }

    #[tokio::test]
    async fn test_cancel_during_submission_keeps_remote_failure() {
        let vm = slow_vm(DestroyBehavior::Fail {
            message: "disk locked".to_string(),
        });
        let task = destroy_task(&vm);

        let (started, ()) = tokio::join!(task.start(), cancel_later(&task));
        assert!(started.is_ok());

        let err = task.wait(Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Failed {
                description: "Delete instance agent-1".to_string(),
                message: "disk locked".to_string(),
            }
        );
        assert_eq!(vm.destroy_submissions(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_submission_keeps_submit_failure() {
        let vm = slow_vm(DestroyBehavior::Reject {
            message: "permission denied".to_string(),
        });
        let task = destroy_task(&vm);

        let (started, ()) = tokio::join!(task.start(), cancel_later(&task));
        assert!(started.unwrap_err().is_submit_failure());
        assert!(matches!(task.poll().await, TaskStatus::SubmitFailed(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_submission_is_forwarded() {
        let vm = slow_vm(DestroyBehavior::Succeed { polls: 5 });
        let task = destroy_task(&vm);

        let (started, ()) = tokio::join!(task.start(), cancel_later(&task));
        assert!(started.is_ok());

        assert_eq!(task.poll().await, TaskStatus::Cancelled);
        assert!(!vm.is_destroyed());
    }

    #[tokio::test]
    async fn test_rejected_cancel_keeps_real_outcome() {
        let remote = Arc::new(MockTask::failing_after(0, "vm is locked"));
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::clone(&remote));

        task.start().await.unwrap();
        task.cancel().await;
        assert_eq!(remote.cancel_count(), 1);
        assert_eq!(task.poll().await, TaskStatus::Failed("vm is locked".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let remote = Arc::new(MockTask::succeeding_after(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&calls), Arc::clone(&remote));

        task.wait(Duration::from_millis(1)).await.unwrap();
        task.cancel().await;
        assert_eq!(remote.cancel_count(), 0);
        assert_eq!(task.poll().await, TaskStatus::Succeeded);
    }

    #[test]
    fn test_status_outcome() {
        assert!(TaskStatus::Pending.outcome("t").is_none());
        assert!(TaskStatus::Running.outcome("t").is_none());
        assert_eq!(TaskStatus::Succeeded.outcome("t"), Some(Ok(())));
        assert!(TaskStatus::Cancelled.is_complete());
    }
}
