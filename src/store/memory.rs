use std::sync::{Mutex, MutexGuard};

use super::{Result, Store, StoreError};
use crate::model::{
    Competency, CompetencyId, Enrollment, Entry, EntryId, Outcome, OutcomeId, StudentEntryState,
    Submission, SubmissionId, User, UserId,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    competencies: Vec<Competency>,
    entries: Vec<Entry>,
    enrollments: Vec<Enrollment>,
    states: Vec<StudentEntryState>,
    submissions: Vec<Submission>,
    outcomes: Vec<Outcome>,
}

impl Tables {
    fn remove_entry_cascade(&mut self, id: EntryId) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entry = self.entries.remove(pos);
        self.states.retain(|s| s.entry_id != id);
        let doomed: Vec<SubmissionId> = self
            .submissions
            .iter()
            .filter(|s| s.entry_id == id)
            .map(|s| s.id)
            .collect();
        self.submissions.retain(|s| s.entry_id != id);
        self.outcomes.retain(|o| !doomed.contains(&o.submission_id));
        Some(entry)
    }
}

/// In-process [`Store`] backed by vectors behind one mutex.
///
/// Insertion order is preserved, so listings are stable and submissions with
/// identical timestamps sort newest-inserted first.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn replace<T: Clone>(rows: &mut [T], matches: impl Fn(&T) -> bool, row: T) -> Option<T> {
    let slot = rows.iter_mut().find(|r| matches(r))?;
    *slot = row.clone();
    Some(row)
}

impl Store for MemoryStore {
    fn insert_user(&self, user: User) -> Result<User> {
        let mut t = self.lock()?;
        if t.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation(format!("username {}", user.username)));
        }
        if let Some(email) = &user.email
            && t.users.iter().any(|u| u.email.as_deref() == Some(email.as_str()))
        {
            return Err(StoreError::UniqueViolation(format!("email {email}")));
        }
        t.users.push(user.clone());
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.username == username).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.lock()?.users.clone())
    }

    fn insert_competency(&self, comp: Competency) -> Result<Competency> {
        self.lock()?.competencies.push(comp.clone());
        Ok(comp)
    }

    fn get_competency(&self, id: CompetencyId) -> Result<Option<Competency>> {
        Ok(self.lock()?.competencies.iter().find(|c| c.id == id).cloned())
    }

    fn list_competencies(&self) -> Result<Vec<Competency>> {
        Ok(self.lock()?.competencies.clone())
    }

    fn update_competency(&self, comp: Competency) -> Result<Option<Competency>> {
        let id = comp.id;
        Ok(replace(&mut self.lock()?.competencies, |c| c.id == id, comp))
    }

    fn delete_competency(&self, id: CompetencyId) -> Result<Option<Competency>> {
        let mut t = self.lock()?;
        let Some(pos) = t.competencies.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let comp = t.competencies.remove(pos);
        let entry_ids: Vec<EntryId> = t
            .entries
            .iter()
            .filter(|e| e.competency_id == id)
            .map(|e| e.id)
            .collect();
        for entry_id in entry_ids {
            t.remove_entry_cascade(entry_id);
        }
        t.enrollments.retain(|e| e.competency_id != id);
        Ok(Some(comp))
    }

    fn insert_entry(&self, entry: Entry) -> Result<Entry> {
        let mut t = self.lock()?;
        if !t.competencies.iter().any(|c| c.id == entry.competency_id) {
            return Err(StoreError::MissingReference(format!(
                "competency {}",
                entry.competency_id
            )));
        }
        t.entries.push(entry.clone());
        Ok(entry)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        Ok(self.lock()?.entries.iter().find(|e| e.id == id).cloned())
    }

    fn list_entries(&self, competency_id: CompetencyId) -> Result<Vec<Entry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| e.competency_id == competency_id)
            .cloned()
            .collect())
    }

    fn update_entry(&self, entry: Entry) -> Result<Option<Entry>> {
        let id = entry.id;
        Ok(replace(&mut self.lock()?.entries, |e| e.id == id, entry))
    }

    fn delete_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        Ok(self.lock()?.remove_entry_cascade(id))
    }

    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment> {
        let mut t = self.lock()?;
        if !t.users.iter().any(|u| u.id == enrollment.student_id) {
            return Err(StoreError::MissingReference(format!("user {}", enrollment.student_id)));
        }
        if !t.competencies.iter().any(|c| c.id == enrollment.competency_id) {
            return Err(StoreError::MissingReference(format!(
                "competency {}",
                enrollment.competency_id
            )));
        }
        if t.enrollments.iter().any(|e| {
            e.student_id == enrollment.student_id && e.competency_id == enrollment.competency_id
        }) {
            return Err(StoreError::UniqueViolation(format!(
                "enrollment of {} in {}",
                enrollment.student_id, enrollment.competency_id
            )));
        }
        t.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    fn delete_enrollment(&self, student_id: UserId, competency_id: CompetencyId) -> Result<bool> {
        let mut t = self.lock()?;
        let before = t.enrollments.len();
        t.enrollments
            .retain(|e| !(e.student_id == student_id && e.competency_id == competency_id));
        Ok(t.enrollments.len() != before)
    }

    fn is_enrolled(&self, student_id: UserId, competency_id: CompetencyId) -> Result<bool> {
        Ok(self
            .lock()?
            .enrollments
            .iter()
            .any(|e| e.student_id == student_id && e.competency_id == competency_id))
    }

    fn enrolled_competencies(&self, student_id: UserId) -> Result<Vec<Competency>> {
        let t = self.lock()?;
        Ok(t.enrollments
            .iter()
            .filter(|e| e.student_id == student_id)
            .filter_map(|e| t.competencies.iter().find(|c| c.id == e.competency_id))
            .cloned()
            .collect())
    }

    fn enrolled_students(&self, competency_id: CompetencyId) -> Result<Vec<User>> {
        let t = self.lock()?;
        Ok(t.enrollments
            .iter()
            .filter(|e| e.competency_id == competency_id)
            .filter_map(|e| t.users.iter().find(|u| u.id == e.student_id))
            .cloned()
            .collect())
    }

    fn get_state(&self, entry_id: EntryId, student_id: UserId) -> Result<Option<StudentEntryState>> {
        Ok(self
            .lock()?
            .states
            .iter()
            .find(|s| s.entry_id == entry_id && s.student_id == student_id)
            .cloned())
    }

    fn insert_state(&self, state: StudentEntryState) -> Result<StudentEntryState> {
        let mut t = self.lock()?;
        if t.states
            .iter()
            .any(|s| s.entry_id == state.entry_id && s.student_id == state.student_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "state for entry {} and student {}",
                state.entry_id, state.student_id
            )));
        }
        t.states.push(state.clone());
        Ok(state)
    }

    fn update_state(&self, state: StudentEntryState) -> Result<Option<StudentEntryState>> {
        let (entry_id, student_id) = (state.entry_id, state.student_id);
        Ok(replace(
            &mut self.lock()?.states,
            |s| s.entry_id == entry_id && s.student_id == student_id,
            state,
        ))
    }

    fn states_for_entry(&self, entry_id: EntryId) -> Result<Vec<StudentEntryState>> {
        Ok(self
            .lock()?
            .states
            .iter()
            .filter(|s| s.entry_id == entry_id)
            .cloned()
            .collect())
    }

    fn all_states(&self) -> Result<Vec<StudentEntryState>> {
        Ok(self.lock()?.states.clone())
    }

    fn insert_submission(&self, submission: Submission) -> Result<Submission> {
        let mut t = self.lock()?;
        if !t.entries.iter().any(|e| e.id == submission.entry_id) {
            return Err(StoreError::MissingReference(format!("entry {}", submission.entry_id)));
        }
        t.submissions.push(submission.clone());
        Ok(submission)
    }

    fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        Ok(self.lock()?.submissions.iter().find(|s| s.id == id).cloned())
    }

    fn submissions_for_pair(&self, entry_id: EntryId, student_id: UserId) -> Result<Vec<Submission>> {
        let mut rows: Vec<Submission> = self
            .lock()?
            .submissions
            .iter()
            .rev()
            .filter(|s| s.entry_id == entry_id && s.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(rows)
    }

    fn submissions_for_entry(&self, entry_id: EntryId) -> Result<Vec<Submission>> {
        Ok(self
            .lock()?
            .submissions
            .iter()
            .filter(|s| s.entry_id == entry_id)
            .cloned()
            .collect())
    }

    fn submissions_for_student(&self, student_id: UserId) -> Result<Vec<Submission>> {
        Ok(self
            .lock()?
            .submissions
            .iter()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect())
    }

    fn delete_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let mut t = self.lock()?;
        let Some(pos) = t.submissions.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        let submission = t.submissions.remove(pos);
        t.outcomes.retain(|o| o.submission_id != id);
        Ok(Some(submission))
    }

    fn insert_outcome(&self, outcome: Outcome) -> Result<Outcome> {
        let mut t = self.lock()?;
        if !t.submissions.iter().any(|s| s.id == outcome.submission_id) {
            return Err(StoreError::MissingReference(format!(
                "submission {}",
                outcome.submission_id
            )));
        }
        if t.outcomes.iter().any(|o| o.submission_id == outcome.submission_id) {
            return Err(StoreError::UniqueViolation(format!(
                "outcome for submission {}",
                outcome.submission_id
            )));
        }
        t.outcomes.push(outcome.clone());
        Ok(outcome)
    }

    fn get_outcome(&self, id: OutcomeId) -> Result<Option<Outcome>> {
        Ok(self.lock()?.outcomes.iter().find(|o| o.id == id).cloned())
    }

    fn outcome_for_submission(&self, submission_id: SubmissionId) -> Result<Option<Outcome>> {
        Ok(self
            .lock()?
            .outcomes
            .iter()
            .find(|o| o.submission_id == submission_id)
            .cloned())
    }

    fn update_outcome(&self, outcome: Outcome) -> Result<Option<Outcome>> {
        let id = outcome.id;
        Ok(replace(&mut self.lock()?.outcomes, |o| o.id == id, outcome))
    }

    fn delete_outcome(&self, id: OutcomeId) -> Result<Option<Outcome>> {
        let mut t = self.lock()?;
        let Some(pos) = t.outcomes.iter().position(|o| o.id == id) else {
            return Ok(None);
        };
        Ok(Some(t.outcomes.remove(pos)))
    }
}
