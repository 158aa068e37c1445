use std::fmt;

use serde::{Deserialize, Serialize};

/// Per (student, entry) progress through submission and evaluation.
///
/// NOT_SUBMITTED → SUBMITTED_PROCESSING → OUTCOME_AVAILABLE, and any state
/// goes back to SUBMITTED_PROCESSING on a repeat submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    NotSubmitted,
    SubmittedProcessing,
    OutcomeAvailable,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::NotSubmitted => write!(f, "not_submitted"),
            EntryStatus::SubmittedProcessing => write!(f, "submitted_processing"),
            EntryStatus::OutcomeAvailable => write!(f, "outcome_available"),
        }
    }
}

impl EntryStatus {
    /// Whether `self → to` is one of the event-driven transitions.
    pub fn permits(self, to: EntryStatus) -> bool {
        matches!(
            (self, to),
            (_, EntryStatus::SubmittedProcessing)
                | (EntryStatus::SubmittedProcessing, EntryStatus::OutcomeAvailable)
        )
    }
}

/// What the store currently holds for a (student, entry) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairActivity {
    NoSubmissions,
    /// The most recent submission has no outcome yet.
    LatestPending,
    /// The most recent submission has an outcome.
    LatestEvaluated,
}

impl PairActivity {
    /// `latest_has_outcome` is `None` when the pair has no submissions.
    pub fn from_latest(latest_has_outcome: Option<bool>) -> Self {
        match latest_has_outcome {
            None => PairActivity::NoSubmissions,
            Some(false) => PairActivity::LatestPending,
            Some(true) => PairActivity::LatestEvaluated,
        }
    }
}

/// Result of reconciling a stored status with the pair's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged(EntryStatus),
    /// A regular lifecycle step (submission accepted, outcome written).
    Advance { from: EntryStatus, to: EntryStatus },
    /// A correction after something was deleted or edited out of band.
    Resync { from: EntryStatus, to: EntryStatus },
}

impl Transition {
    pub fn target(&self) -> EntryStatus {
        match *self {
            Transition::Unchanged(status) => status,
            Transition::Advance { to, .. } | Transition::Resync { to, .. } => to,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged(_))
    }
}

/// Derives the stored status from submission/outcome presence.
pub struct Lifecycle;

impl Lifecycle {
    /// The status a pair should carry given what the store holds.
    pub fn reconcile(activity: PairActivity) -> EntryStatus {
        match activity {
            PairActivity::NoSubmissions => EntryStatus::NotSubmitted,
            PairActivity::LatestPending => EntryStatus::SubmittedProcessing,
            PairActivity::LatestEvaluated => EntryStatus::OutcomeAvailable,
        }
    }

    /// Compute the transition from `current` to the reconciled status.
    pub fn transition(current: EntryStatus, activity: PairActivity) -> Transition {
        let to = Self::reconcile(activity);
        if to == current {
            Transition::Unchanged(current)
        } else if current.permits(to) {
            Transition::Advance { from: current, to }
        } else {
            Transition::Resync { from: current, to }
        }
    }
}
