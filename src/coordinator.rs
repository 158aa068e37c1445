//! Submission and outcome coordination.
//!
//! The [`Coordinator`] owns every write that can move a (student, entry)
//! pair through its lifecycle. Each of those paths ends in
//! [`Coordinator::sync_lifecycle`], which recomputes the stored status from
//! what the store actually holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{FlexageError, Result};
use crate::evaluator::{EvaluationContext, FeedbackGenerator};
use crate::lifecycle::{EntryStatus, Lifecycle, PairActivity, Transition};
use crate::model::{
    CompetencyId, Entry, EntryId, EntryView, FeedbackPayload, Outcome, OutcomeId, OutcomePatch,
    StudentEntryState, Submission, SubmissionId, SubmissionWithOutcome, UserId,
};
use crate::runner::{EvaluationTask, TaskQueue};
use crate::store::{Store, StoreError};

pub struct Coordinator<E> {
    store: Arc<dyn Store>,
    evaluator: E,
    queue: Arc<dyn TaskQueue>,
}

impl<E: FeedbackGenerator> Coordinator<E> {
    pub fn new(store: Arc<dyn Store>, evaluator: E, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            evaluator,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Accept a new submission and schedule its evaluation.
    ///
    /// Returns as soon as the submission is stored; evaluation happens on the
    /// task queue.
    pub fn submit(
        &self,
        entry_id: EntryId,
        student_id: UserId,
        title: &str,
        content: &str,
    ) -> Result<Submission> {
        let entry = self.require_entry(entry_id)?;
        self.ensure_enrolled(student_id, entry.competency_id)?;

        let submission = self
            .store
            .insert_submission(Submission::new(entry_id, student_id, title, content))?;
        self.sync_lifecycle(entry_id, student_id)?;

        self.queue.schedule(EvaluationTask::new(submission.id));
        info!(submission_id = %submission.id, %entry_id, %student_id, "submission accepted");
        Ok(submission)
    }

    /// Evaluate a submission with the configured evaluator and store the outcome.
    ///
    /// An existing outcome is a `Conflict` unless `force_regenerate` is set,
    /// in which case it is deleted first.
    pub async fn evaluate(&self, submission_id: SubmissionId, force_regenerate: bool) -> Result<Outcome> {
        let submission = self.require_submission(submission_id)?;
        self.clear_existing_outcome(&submission, force_regenerate)?;
        let ctx = self.evaluation_context(&submission)?;

        debug!(%submission_id, history = ctx.history.len(), "evaluating submission");
        let payload = self.evaluator.generate_feedback(&ctx).await;

        self.write_outcome(&submission, Outcome::machine(submission_id, payload))
    }

    /// Store an outcome written by a human reviewer. Same conflict rules as
    /// [`Coordinator::evaluate`].
    pub fn record_review(
        &self,
        submission_id: SubmissionId,
        payload: FeedbackPayload,
        force_regenerate: bool,
    ) -> Result<Outcome> {
        let submission = self.require_submission(submission_id)?;
        self.clear_existing_outcome(&submission, force_regenerate)?;
        self.write_outcome(&submission, Outcome::reviewed(submission_id, payload))
    }

    /// Edit an outcome in place. The result counts as human-authored.
    pub fn update_outcome(&self, outcome_id: OutcomeId, patch: OutcomePatch) -> Result<Outcome> {
        let mut outcome = self
            .store
            .get_outcome(outcome_id)?
            .ok_or_else(|| FlexageError::not_found("Outcome", outcome_id))?;

        if let Some(text) = patch.feedback_text {
            outcome.payload.feedback_text = text;
        }
        if let Some(score) = patch.score {
            outcome.payload.score = score;
        }
        if let Some(confidence) = patch.confidence {
            outcome.payload.confidence = confidence.min(100);
        }
        outcome.is_machine_generated = false;
        outcome.payload.degraded = false;

        let outcome = self
            .store
            .update_outcome(outcome)?
            .ok_or_else(|| FlexageError::not_found("Outcome", outcome_id))?;
        self.sync_submission_pair(outcome.submission_id)?;
        Ok(outcome)
    }

    pub fn delete_outcome(&self, outcome_id: OutcomeId) -> Result<Outcome> {
        let outcome = self
            .store
            .delete_outcome(outcome_id)?
            .ok_or_else(|| FlexageError::not_found("Outcome", outcome_id))?;
        self.sync_submission_pair(outcome.submission_id)?;
        Ok(outcome)
    }

    pub fn delete_submission(&self, submission_id: SubmissionId) -> Result<Submission> {
        let submission = self
            .store
            .delete_submission(submission_id)?
            .ok_or_else(|| FlexageError::not_found("Submission", submission_id))?;
        self.sync_lifecycle(submission.entry_id, submission.student_id)?;
        Ok(submission)
    }

    /// Re-schedule evaluation for pairs stuck in `submitted_processing` whose
    /// latest submission is older than `older_than` and still has no outcome.
    ///
    /// Pairs whose stored status lags behind an existing outcome are
    /// re-synchronised instead.
    pub fn requeue_stalled(&self, older_than: Duration) -> Result<Vec<SubmissionId>> {
        let threshold = chrono::Duration::from_std(older_than)
            .map_err(|_| FlexageError::Config("stale threshold out of range".into()))?;
        let Some(cutoff) = Utc::now().checked_sub_signed(threshold) else {
            return Ok(Vec::new());
        };

        let mut requeued = Vec::new();
        for state in self.store.all_states()? {
            if state.status != EntryStatus::SubmittedProcessing {
                continue;
            }
            let Some(latest) = self.store.latest_submission(state.entry_id, state.student_id)? else {
                self.sync_lifecycle(state.entry_id, state.student_id)?;
                continue;
            };
            if self.store.outcome_for_submission(latest.id)?.is_some() {
                self.sync_lifecycle(state.entry_id, state.student_id)?;
                continue;
            }
            if latest.submitted_at <= cutoff {
                self.queue.schedule(EvaluationTask::new(latest.id));
                requeued.push(latest.id);
            }
        }

        if !requeued.is_empty() {
            warn!(count = requeued.len(), "re-queued stalled evaluations");
        }
        Ok(requeued)
    }

    /// Entry, lifecycle state and latest submission for one student. Creates
    /// the state record on first access.
    pub fn entry_view(&self, entry_id: EntryId, student_id: UserId) -> Result<EntryView> {
        let entry = self.require_entry(entry_id)?;
        self.view_of(entry, student_id)
    }

    /// [`Coordinator::entry_view`] for a student, who must be enrolled.
    pub fn student_entry_view(&self, student_id: UserId, entry_id: EntryId) -> Result<EntryView> {
        let entry = self.require_entry(entry_id)?;
        self.ensure_enrolled(student_id, entry.competency_id)?;
        self.view_of(entry, student_id)
    }

    /// Views of every entry in a competency the student is enrolled in.
    pub fn entries_for_competency(
        &self,
        competency_id: CompetencyId,
        student_id: UserId,
    ) -> Result<Vec<EntryView>> {
        if self.store.get_competency(competency_id)?.is_none() {
            return Err(FlexageError::not_found("Competency", competency_id));
        }
        self.ensure_enrolled(student_id, competency_id)?;
        self.store
            .list_entries(competency_id)?
            .into_iter()
            .map(|entry| self.view_of(entry, student_id))
            .collect()
    }

    pub fn submission_with_outcome(&self, submission_id: SubmissionId) -> Result<SubmissionWithOutcome> {
        self.store
            .submission_with_outcome(submission_id)?
            .ok_or_else(|| FlexageError::not_found("Submission", submission_id))
    }

    /// A submission as its author sees it.
    pub fn student_submission(
        &self,
        student_id: UserId,
        submission_id: SubmissionId,
    ) -> Result<SubmissionWithOutcome> {
        let joined = self.submission_with_outcome(submission_id)?;
        if joined.submission.student_id != student_id {
            return Err(FlexageError::Forbidden(
                "not authorized to view this submission".into(),
            ));
        }
        Ok(joined)
    }

    /// Every submission for the pair with its outcome, most recent first.
    pub fn submissions_for_pair(
        &self,
        entry_id: EntryId,
        student_id: UserId,
    ) -> Result<Vec<SubmissionWithOutcome>> {
        self.with_outcomes(self.store.submissions_for_pair(entry_id, student_id)?)
    }

    pub fn student_submissions_for_entry(
        &self,
        student_id: UserId,
        entry_id: EntryId,
    ) -> Result<Vec<SubmissionWithOutcome>> {
        let entry = self.require_entry(entry_id)?;
        self.ensure_enrolled(student_id, entry.competency_id)?;
        self.submissions_for_pair(entry_id, student_id)
    }

    pub fn submissions_for_entry(&self, entry_id: EntryId) -> Result<Vec<SubmissionWithOutcome>> {
        self.require_entry(entry_id)?;
        self.with_outcomes(self.store.submissions_for_entry(entry_id)?)
    }

    pub fn submissions_for_student(&self, student_id: UserId) -> Result<Vec<Submission>> {
        Ok(self.store.submissions_for_student(student_id)?)
    }

    pub fn states_for_entry(&self, entry_id: EntryId) -> Result<Vec<StudentEntryState>> {
        self.require_entry(entry_id)?;
        Ok(self.store.states_for_entry(entry_id)?)
    }

    /// Bring the stored status of a pair in line with its submissions and
    /// outcomes. Creates the state record if it does not exist yet.
    pub fn sync_lifecycle(&self, entry_id: EntryId, student_id: UserId) -> Result<StudentEntryState> {
        let mut state = self.state_or_create(entry_id, student_id)?;

        let latest_has_outcome = match self.store.latest_submission(entry_id, student_id)? {
            Some(latest) => Some(self.store.outcome_for_submission(latest.id)?.is_some()),
            None => None,
        };
        let transition = Lifecycle::transition(state.status, PairActivity::from_latest(latest_has_outcome));

        match transition {
            Transition::Unchanged(_) => return Ok(state),
            Transition::Advance { from, to } => {
                info!(%entry_id, %student_id, %from, %to, "lifecycle advanced");
            }
            Transition::Resync { from, to } => {
                info!(%entry_id, %student_id, %from, %to, "lifecycle re-synchronised");
            }
        }

        state.status = transition.target();
        state.updated_at = Utc::now();
        Ok(self.store.update_state(state.clone())?.unwrap_or(state))
    }

    // Read-triggered initialisation; the store's uniqueness settles races.
    fn state_or_create(&self, entry_id: EntryId, student_id: UserId) -> Result<StudentEntryState> {
        if let Some(state) = self.store.get_state(entry_id, student_id)? {
            return Ok(state);
        }
        let fresh = StudentEntryState::new(entry_id, student_id, EntryStatus::NotSubmitted);
        match self.store.insert_state(fresh) {
            Ok(state) => Ok(state),
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .get_state(entry_id, student_id)?
                .ok_or_else(|| FlexageError::not_found("StudentEntryState", entry_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn view_of(&self, entry: Entry, student_id: UserId) -> Result<EntryView> {
        let state = self.state_or_create(entry.id, student_id)?;
        let latest_submission = self.store.latest_submission(entry.id, student_id)?;
        Ok(EntryView {
            entry,
            state,
            latest_submission,
        })
    }

    fn evaluation_context(&self, submission: &Submission) -> Result<EvaluationContext> {
        let entry = self.require_entry(submission.entry_id)?;
        let history = self
            .store
            .submissions_for_pair(submission.entry_id, submission.student_id)?
            .into_iter()
            .filter(|s| s.id != submission.id)
            .collect();
        Ok(EvaluationContext {
            entry,
            submission_title: submission.title.clone(),
            submission_content: submission.content.clone(),
            history,
        })
    }

    fn clear_existing_outcome(&self, submission: &Submission, force_regenerate: bool) -> Result<()> {
        let Some(existing) = self.store.outcome_for_submission(submission.id)? else {
            return Ok(());
        };
        if !force_regenerate {
            return Err(FlexageError::Conflict(
                "Outcome already exists for this submission. Use force_regenerate=true to regenerate."
                    .into(),
            ));
        }
        self.store.delete_outcome(existing.id)?;
        info!(submission_id = %submission.id, outcome_id = %existing.id, "previous outcome discarded");
        self.sync_lifecycle(submission.entry_id, submission.student_id)?;
        Ok(())
    }

    fn write_outcome(&self, submission: &Submission, outcome: Outcome) -> Result<Outcome> {
        let outcome = match self.store.insert_outcome(outcome) {
            Ok(outcome) => outcome,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(FlexageError::Conflict(format!(
                    "an outcome for submission {} was written concurrently",
                    submission.id
                )));
            }
            Err(StoreError::MissingReference(_)) => {
                return Err(FlexageError::not_found("Submission", submission.id));
            }
            Err(e) => return Err(e.into()),
        };
        self.sync_lifecycle(submission.entry_id, submission.student_id)?;
        info!(
            submission_id = %submission.id,
            outcome_id = %outcome.id,
            score = outcome.payload.score,
            machine = outcome.is_machine_generated,
            "outcome stored"
        );
        Ok(outcome)
    }

    fn sync_submission_pair(&self, submission_id: SubmissionId) -> Result<()> {
        if let Some(submission) = self.store.get_submission(submission_id)? {
            self.sync_lifecycle(submission.entry_id, submission.student_id)?;
        }
        Ok(())
    }

    fn with_outcomes(&self, submissions: Vec<Submission>) -> Result<Vec<SubmissionWithOutcome>> {
        submissions
            .into_iter()
            .map(|submission| {
                let outcome = self.store.outcome_for_submission(submission.id)?;
                Ok(SubmissionWithOutcome { submission, outcome })
            })
            .collect()
    }

    fn require_entry(&self, entry_id: EntryId) -> Result<Entry> {
        self.store
            .get_entry(entry_id)?
            .ok_or_else(|| FlexageError::not_found("Entry", entry_id))
    }

    fn require_submission(&self, submission_id: SubmissionId) -> Result<Submission> {
        self.store
            .get_submission(submission_id)?
            .ok_or_else(|| FlexageError::not_found("Submission", submission_id))
    }

    fn ensure_enrolled(&self, student_id: UserId, competency_id: CompetencyId) -> Result<()> {
        if self.store.is_enrolled(student_id, competency_id)? {
            Ok(())
        } else {
            Err(FlexageError::Forbidden(
                "not enrolled in this competency".into(),
            ))
        }
    }
}
