//! Persistence boundary.
//!
//! [`Store`] is the relational store the workflow runs against: plain
//! get/insert/update/delete per record plus a few composite reads. Every call
//! is synchronous and self-contained; nothing is held open across an
//! evaluation call. [`MemoryStore`] is the in-process implementation.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use crate::model::{
    Competency, CompetencyId, Enrollment, Entry, EntryId, Outcome, OutcomeId, StudentEntryState,
    Submission, SubmissionId, SubmissionWithOutcome, User, UserId,
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage operations used by the catalog and the coordinator.
///
/// Uniqueness (one state per pair, one outcome per submission, one enrollment
/// per pair, unique usernames and emails) is enforced by implementations and
/// reported as [`StoreError::UniqueViolation`].
pub trait Store: Send + Sync {
    // Users
    fn insert_user(&self, user: User) -> Result<User>;
    fn get_user(&self, id: UserId) -> Result<Option<User>>;
    fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;

    // Competencies. Deleting one cascades to its entries and enrollments.
    fn insert_competency(&self, comp: Competency) -> Result<Competency>;
    fn get_competency(&self, id: CompetencyId) -> Result<Option<Competency>>;
    fn list_competencies(&self) -> Result<Vec<Competency>>;
    fn update_competency(&self, comp: Competency) -> Result<Option<Competency>>;
    fn delete_competency(&self, id: CompetencyId) -> Result<Option<Competency>>;

    // Entries. Deleting one cascades to states, submissions and outcomes.
    fn insert_entry(&self, entry: Entry) -> Result<Entry>;
    fn get_entry(&self, id: EntryId) -> Result<Option<Entry>>;
    fn list_entries(&self, competency_id: CompetencyId) -> Result<Vec<Entry>>;
    fn update_entry(&self, entry: Entry) -> Result<Option<Entry>>;
    fn delete_entry(&self, id: EntryId) -> Result<Option<Entry>>;

    // Enrollments
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment>;
    fn delete_enrollment(&self, student_id: UserId, competency_id: CompetencyId) -> Result<bool>;
    fn is_enrolled(&self, student_id: UserId, competency_id: CompetencyId) -> Result<bool>;
    fn enrolled_competencies(&self, student_id: UserId) -> Result<Vec<Competency>>;
    fn enrolled_students(&self, competency_id: CompetencyId) -> Result<Vec<User>>;

    // Lifecycle states
    fn get_state(&self, entry_id: EntryId, student_id: UserId) -> Result<Option<StudentEntryState>>;
    fn insert_state(&self, state: StudentEntryState) -> Result<StudentEntryState>;
    fn update_state(&self, state: StudentEntryState) -> Result<Option<StudentEntryState>>;
    fn states_for_entry(&self, entry_id: EntryId) -> Result<Vec<StudentEntryState>>;
    fn all_states(&self) -> Result<Vec<StudentEntryState>>;

    // Submissions. Deleting one cascades to its outcome.
    fn insert_submission(&self, submission: Submission) -> Result<Submission>;
    fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>>;
    /// All submissions for the pair, most recent first.
    fn submissions_for_pair(&self, entry_id: EntryId, student_id: UserId) -> Result<Vec<Submission>>;
    fn submissions_for_entry(&self, entry_id: EntryId) -> Result<Vec<Submission>>;
    fn submissions_for_student(&self, student_id: UserId) -> Result<Vec<Submission>>;
    fn delete_submission(&self, id: SubmissionId) -> Result<Option<Submission>>;

    // Outcomes
    fn insert_outcome(&self, outcome: Outcome) -> Result<Outcome>;
    fn get_outcome(&self, id: OutcomeId) -> Result<Option<Outcome>>;
    fn outcome_for_submission(&self, submission_id: SubmissionId) -> Result<Option<Outcome>>;
    fn update_outcome(&self, outcome: Outcome) -> Result<Option<Outcome>>;
    fn delete_outcome(&self, id: OutcomeId) -> Result<Option<Outcome>>;

    fn latest_submission(&self, entry_id: EntryId, student_id: UserId) -> Result<Option<Submission>> {
        Ok(self.submissions_for_pair(entry_id, student_id)?.into_iter().next())
    }

    fn submission_with_outcome(&self, id: SubmissionId) -> Result<Option<SubmissionWithOutcome>> {
        let Some(submission) = self.get_submission(id)? else {
            return Ok(None);
        };
        let outcome = self.outcome_for_submission(id)?;
        Ok(Some(SubmissionWithOutcome { submission, outcome }))
    }

    fn entry_for_submission(&self, id: SubmissionId) -> Result<Option<Entry>> {
        match self.get_submission(id)? {
            Some(submission) => self.get_entry(submission.entry_id),
            None => Ok(None),
        }
    }
}
