//! Persistent records of the assessment workflow.
//!
//! Records reference each other by id only. Ownership and cascades are the
//! store's business (see [`crate::store`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::EntryStatus;

pub type UserId = Uuid;
pub type CompetencyId = Uuid;
pub type EntryId = Uuid;
pub type SubmissionId = Uuid;
pub type OutcomeId = Uuid;

/// Role carried by a user and by the principal resolved from a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Configurator,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Configurator => write!(f, "configurator"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: None,
            full_name: None,
            role,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// A named collection of entries students enroll in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competency {
    pub id: CompetencyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_instructions: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Competency {
    pub fn new(
        name: impl Into<String>,
        general_instructions: Option<String>,
        created_by: Option<UserId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            general_instructions,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single assignment inside a competency.
///
/// The rubric is an opaque document; it is handed to the evaluator as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub competency_id: CompetencyId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub rubric: serde_json::Value,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(competency_id: CompetencyId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            competency_id,
            title: title.into(),
            instructions: None,
            rubric: serde_json::Value::Object(serde_json::Map::new()),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_rubric(mut self, rubric: serde_json::Value) -> Self {
        self.rubric = rubric;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: UserId,
    pub competency_id: CompetencyId,
    pub enrolled_at: DateTime<Utc>,
}

/// Cached lifecycle status for one (entry, student) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentEntryState {
    pub entry_id: EntryId,
    pub student_id: UserId,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentEntryState {
    pub fn new(entry_id: EntryId, student_id: UserId, status: EntryStatus) -> Self {
        let now = Utc::now();
        Self {
            entry_id,
            student_id,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One attempt at an entry. Never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub entry_id: EntryId,
    pub student_id: UserId,
    pub title: String,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        entry_id: EntryId,
        student_id: UserId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            student_id,
            title: title.into(),
            content: content.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Scored feedback carried by an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub feedback_text: String,
    pub score: f64,
    /// 0 to 100.
    #[serde(rename = "llm_confidence")]
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    /// Set when the evaluator could not produce a real score and this is the
    /// zero-score fallback.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl FeedbackPayload {
    pub fn new(feedback_text: impl Into<String>, score: f64, confidence: u8) -> Self {
        Self {
            feedback_text: feedback_text.into(),
            score,
            confidence: confidence.min(100),
            raw_response: None,
            degraded: false,
        }
    }

    /// Zero score, zero confidence, flagged as degraded.
    pub fn degraded(feedback_text: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::new(feedback_text, 0.0, 0)
        }
    }
}

/// The evaluation result for exactly one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: OutcomeId,
    pub submission_id: SubmissionId,
    pub payload: FeedbackPayload,
    pub is_machine_generated: bool,
    pub generated_at: DateTime<Utc>,
}

impl Outcome {
    pub fn machine(submission_id: SubmissionId, payload: FeedbackPayload) -> Self {
        Self::build(submission_id, payload, true)
    }

    pub fn reviewed(submission_id: SubmissionId, payload: FeedbackPayload) -> Self {
        Self::build(submission_id, payload, false)
    }

    fn build(submission_id: SubmissionId, payload: FeedbackPayload, is_machine_generated: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id,
            payload,
            is_machine_generated,
            generated_at: Utc::now(),
        }
    }
}

/// Partial edit applied by a human reviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomePatch {
    pub feedback_text: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<u8>,
}

/// A submission together with its outcome, if one was written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionWithOutcome {
    pub submission: Submission,
    pub outcome: Option<Outcome>,
}

/// An entry as one student sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub entry: Entry,
    pub state: StudentEntryState,
    pub latest_submission: Option<Submission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_confidence_as_llm_confidence() {
        let payload = FeedbackPayload::new("Good", 8.5, 90);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["llm_confidence"], 90);
        assert!(json.get("raw_response").is_none());
        assert!(json.get("degraded").is_none());

        let fallback = serde_json::to_value(FeedbackPayload::degraded("Error")).unwrap();
        assert_eq!(fallback["degraded"], true);
        let back: FeedbackPayload = serde_json::from_value(fallback).unwrap();
        assert!(back.degraded);
    }

    #[test]
    fn payload_clamps_confidence() {
        assert_eq!(FeedbackPayload::new("x", 1.0, 250).confidence, 100);
    }

    #[test]
    fn outcome_constructors_mark_origin() {
        let id = Uuid::new_v4();
        assert!(Outcome::machine(id, FeedbackPayload::new("a", 1.0, 1)).is_machine_generated);
        assert!(!Outcome::reviewed(id, FeedbackPayload::new("a", 1.0, 1)).is_machine_generated);
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Student.to_string(), "student");
        assert_eq!(Role::Configurator.to_string(), "configurator");
        assert_eq!(Role::Admin.to_string(), "admin");
    }
}
