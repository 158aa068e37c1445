//! Background evaluation.
//!
//! Submissions are accepted synchronously and evaluated later. The
//! [`TaskQueue`] is the hand-off point; the [`BackgroundRunner`] consumes it,
//! re-validates each task against the store and calls
//! [`Coordinator::evaluate`]. Failures are logged and never reach the
//! submitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{FlexageError, Result};
use crate::evaluator::FeedbackGenerator;
use crate::model::{OutcomeId, SubmissionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub submission_id: SubmissionId,
    pub scheduled_at: DateTime<Utc>,
}

impl EvaluationTask {
    pub fn new(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            scheduled_at: Utc::now(),
        }
    }
}

/// Somewhere to put evaluation work that runs after the submit call returns.
pub trait TaskQueue: Send + Sync {
    fn schedule(&self, task: EvaluationTask);
}

/// Unbounded tokio channel feeding [`BackgroundRunner::spawn`].
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<EvaluationTask>,
}

impl ChannelQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EvaluationTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskQueue for ChannelQueue {
    fn schedule(&self, task: EvaluationTask) {
        let submission_id = task.submission_id;
        if self.tx.send(task).is_err() {
            warn!(%submission_id, "background runner stopped, evaluation not scheduled");
        }
    }
}

/// Holds tasks until they are drained. Used by the CLI and in tests to run
/// evaluations deterministically.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<EvaluationTask>>,
}

impl RecordingQueue {
    pub fn drain(&self) -> Vec<EvaluationTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskQueue for RecordingQueue {
    fn schedule(&self, task: EvaluationTask) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }
}

/// Retry policy for failed background evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(OutcomeId),
    /// An outcome already existed, or appeared while evaluating.
    AlreadyEvaluated,
    /// The submission or its entry disappeared before the task ran.
    Skipped(String),
    Failed(String),
}

pub struct BackgroundRunner<E> {
    coordinator: Arc<Coordinator<E>>,
    retry: RetryConfig,
}

impl<E: FeedbackGenerator + 'static> BackgroundRunner<E> {
    pub fn new(coordinator: Arc<Coordinator<E>>, retry: RetryConfig) -> Self {
        Self { coordinator, retry }
    }

    /// Run one task to completion. Never returns an error.
    pub async fn run(&self, task: &EvaluationTask) -> RunOutcome {
        let submission_id = task.submission_id;
        let mut attempt = 0;
        loop {
            match self.attempt(submission_id).await {
                Ok(outcome) => return outcome,
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(%submission_id, attempt, ?delay, error = %e, "background evaluation failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(%submission_id, error = %e, "background evaluation failed");
                    return RunOutcome::Failed(e.to_string());
                }
            }
        }
    }

    async fn attempt(&self, submission_id: SubmissionId) -> Result<RunOutcome> {
        let store = self.coordinator.store();

        if store.get_submission(submission_id)?.is_none() {
            error!(%submission_id, "submission not found, skipping evaluation");
            return Ok(RunOutcome::Skipped(format!("submission {submission_id} not found")));
        }
        if store.outcome_for_submission(submission_id)?.is_some() {
            info!(%submission_id, "outcome already exists, skipping evaluation");
            return Ok(RunOutcome::AlreadyEvaluated);
        }
        if store.entry_for_submission(submission_id)?.is_none() {
            error!(%submission_id, "entry not found, skipping evaluation");
            return Ok(RunOutcome::Skipped(format!(
                "entry for submission {submission_id} not found"
            )));
        }

        match self.coordinator.evaluate(submission_id, false).await {
            Ok(outcome) => Ok(RunOutcome::Completed(outcome.id)),
            Err(FlexageError::Conflict(_)) => {
                info!(%submission_id, "outcome written concurrently, nothing to do");
                Ok(RunOutcome::AlreadyEvaluated)
            }
            Err(FlexageError::NotFound { kind, id }) => {
                Ok(RunOutcome::Skipped(format!("{kind} {id} not found")))
            }
            Err(e) => Err(e),
        }
    }

    /// Run `task` in its own tokio task so a panicking evaluator is reported
    /// as [`RunOutcome::Failed`] instead of unwinding into the caller.
    pub async fn run_isolated(self: &Arc<Self>, task: EvaluationTask) -> RunOutcome {
        let submission_id = task.submission_id;
        let runner = Arc::clone(self);
        match tokio::spawn(async move { runner.run(&task).await }).await {
            Ok(outcome) => {
                debug!(%submission_id, ?outcome, "background task finished");
                outcome
            }
            Err(e) => {
                error!(%submission_id, error = %e, "background evaluation panicked");
                RunOutcome::Failed(format!("evaluation panicked: {e}"))
            }
        }
    }

    /// Run every task currently held by `queue`, in order.
    pub async fn run_pending(self: &Arc<Self>, queue: &RecordingQueue) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        for task in queue.drain() {
            outcomes.push(self.run_isolated(task).await);
        }
        outcomes
    }

    /// Re-queue evaluations stalled for longer than `older_than`, then run
    /// everything pending on `queue`. A failed scan is logged and the pending
    /// tasks still run.
    pub async fn sweep(self: &Arc<Self>, queue: &RecordingQueue, older_than: Duration) -> Vec<RunOutcome> {
        match self.coordinator.requeue_stalled(older_than) {
            Ok(ids) if !ids.is_empty() => info!(count = ids.len(), "stalled evaluations re-queued"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "stalled-evaluation scan failed"),
        }
        self.run_pending(queue).await
    }

    /// Consume `rx` until every sender is dropped or the handle is aborted.
    /// Each task goes through [`BackgroundRunner::run_isolated`].
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<EvaluationTask>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                self.run_isolated(task).await;
            }
            debug!("task queue closed, background runner stopping");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluationContext;
    use crate::lifecycle::EntryStatus;
    use chrono::TimeDelta;

    use crate::model::{Competency, Enrollment, Entry, FeedbackPayload, Outcome, Role, Submission, User};
    use crate::store::{MemoryStore, Store};

    struct FixedEvaluator;

    impl FeedbackGenerator for FixedEvaluator {
        async fn generate_feedback(&self, _ctx: &EvaluationContext) -> FeedbackPayload {
            FeedbackPayload::new("Fine work.", 8.5, 90)
        }
    }

    /// Panics on submissions titled "boom".
    struct FragileEvaluator;

    impl FeedbackGenerator for FragileEvaluator {
        async fn generate_feedback(&self, ctx: &EvaluationContext) -> FeedbackPayload {
            if ctx.submission_title == "boom" {
                panic!("evaluator exploded");
            }
            FeedbackPayload::new("ok", 7.0, 80)
        }
    }

    struct Setup {
        store: Arc<MemoryStore>,
        entry: Entry,
        student: User,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let comp = store.insert_competency(Competency::new("Physics", None, None)).unwrap();
        let entry = store.insert_entry(Entry::new(comp.id, "Motion")).unwrap();
        let student = store.insert_user(User::new("pat", Role::Student)).unwrap();
        store
            .insert_enrollment(Enrollment {
                student_id: student.id,
                competency_id: comp.id,
                enrolled_at: Utc::now(),
            })
            .unwrap();
        Setup {
            store,
            entry,
            student,
        }
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn retry_delay_saturates() {
        let config = RetryConfig {
            max_retries: 1,
            base_delay_ms: u64::MAX,
        };
        assert_eq!(config.delay_for_attempt(70), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn recording_queue_drains_in_order() {
        let queue = RecordingQueue::default();
        let a = EvaluationTask::new(uuid::Uuid::new_v4());
        let b = EvaluationTask::new(uuid::Uuid::new_v4());
        queue.schedule(a.clone());
        queue.schedule(b.clone());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec![a, b]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn run_pending_evaluates_scheduled_submissions() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FixedEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        let sub = coord.submit(s.entry.id, s.student.id, "Try", "body").unwrap();
        let outcomes = runner.run_pending(&queue).await;

        assert!(matches!(outcomes[..], [RunOutcome::Completed(_)]));
        let outcome = s.store.outcome_for_submission(sub.id).unwrap().unwrap();
        assert_eq!(outcome.payload.score, 8.5);
        let state = s.store.get_state(s.entry.id, s.student.id).unwrap().unwrap();
        assert_eq!(state.status, EntryStatus::OutcomeAvailable);
    }

    #[tokio::test]
    async fn existing_outcome_is_a_noop() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FixedEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        let sub = coord.submit(s.entry.id, s.student.id, "Try", "body").unwrap();
        let manual = s
            .store
            .insert_outcome(Outcome::reviewed(sub.id, FeedbackPayload::new("manual", 9.0, 100)))
            .unwrap();

        assert_eq!(runner.run_pending(&queue).await, vec![RunOutcome::AlreadyEvaluated]);
        assert_eq!(s.store.outcome_for_submission(sub.id).unwrap().unwrap(), manual);
    }

    #[tokio::test]
    async fn deleted_submission_is_skipped() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FixedEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        let sub = coord.submit(s.entry.id, s.student.id, "Try", "body").unwrap();
        coord.delete_submission(sub.id).unwrap();

        let outcomes = runner.run_pending(&queue).await;
        assert!(matches!(outcomes[..], [RunOutcome::Skipped(_)]));
    }

    #[tokio::test]
    async fn channel_worker_survives_panicking_task() {
        let s = setup();
        let (queue, rx) = ChannelQueue::new();
        let coord = Arc::new(Coordinator::new(s.store.clone(), FragileEvaluator, Arc::new(queue)));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));
        let worker = runner.spawn(rx);

        let bad = coord.submit(s.entry.id, s.student.id, "boom", "x").unwrap();
        let good = coord.submit(s.entry.id, s.student.id, "fine", "y").unwrap();

        let mut evaluated = false;
        for _ in 0..200 {
            if s.store.outcome_for_submission(good.id).unwrap().is_some() {
                evaluated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.abort();

        assert!(evaluated, "worker stopped after the panicking task");
        assert!(s.store.outcome_for_submission(bad.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn run_pending_contains_a_panicking_task() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FragileEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        let bad = coord.submit(s.entry.id, s.student.id, "boom", "x").unwrap();
        let good = coord.submit(s.entry.id, s.student.id, "fine", "y").unwrap();

        let outcomes = runner.run_pending(&queue).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], RunOutcome::Failed(msg) if msg.contains("panicked")));
        assert!(matches!(outcomes[1], RunOutcome::Completed(_)));
        assert!(s.store.outcome_for_submission(bad.id).unwrap().is_none());
        assert!(s.store.outcome_for_submission(good.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_evaluates_stalled_submissions() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FixedEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        // Accepted earlier, but its task never ran.
        let mut stuck = Submission::new(s.entry.id, s.student.id, "stuck", "c");
        stuck.submitted_at = Utc::now() - TimeDelta::hours(1);
        let stuck = s.store.insert_submission(stuck).unwrap();
        coord.sync_lifecycle(s.entry.id, s.student.id).unwrap();
        assert!(queue.is_empty());

        let outcomes = runner.sweep(&queue, Duration::from_secs(900)).await;
        assert!(matches!(outcomes[..], [RunOutcome::Completed(_)]));
        assert!(s.store.outcome_for_submission(stuck.id).unwrap().is_some());
        let state = s.store.get_state(s.entry.id, s.student.id).unwrap().unwrap();
        assert_eq!(state.status, EntryStatus::OutcomeAvailable);

        // Nothing left to pick up.
        assert!(runner.sweep(&queue, Duration::from_secs(900)).await.is_empty());
    }

    #[tokio::test]
    async fn sweep_leaves_recent_submissions_to_their_own_task() {
        let s = setup();
        let queue = Arc::new(RecordingQueue::default());
        let coord = Arc::new(Coordinator::new(s.store.clone(), FixedEvaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(coord.clone(), RetryConfig::default()));

        let sub = coord.submit(s.entry.id, s.student.id, "Try", "body").unwrap();
        let outcomes = runner.sweep(&queue, Duration::from_secs(900)).await;

        assert!(matches!(outcomes[..], [RunOutcome::Completed(_)]));
        assert!(s.store.outcome_for_submission(sub.id).unwrap().is_some());
    }
}
