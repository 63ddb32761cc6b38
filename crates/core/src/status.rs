//! Job lifecycle status and its transition table.
//!
//! The status set is closed: values outside it are rejected at
//! deserialization boundaries and resolved by the store's inference rule
//! instead of leaking into business logic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution status of a conversion job.
///
/// `Done`, `Failed`, and `Cancelled` are terminal: a record in one of
/// those states is never mutated again except by retention deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Cancelling,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Every known status, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Cancelling,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// The snapshot wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a raw status string (trimmed, case-insensitive).
    ///
    /// Returns `None` for anything outside the known set; callers fall
    /// back to the inferred-status rule instead of propagating the tag.
    pub fn parse(raw: &str) -> Option<JobStatus> {
        let normalized = raw.trim().to_ascii_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The exhaustive transition table.
    ///
    /// ```text
    /// queued     -> running | cancelled
    /// running    -> cancelling | done | failed
    /// cancelling -> cancelled | failed
    /// ```
    ///
    /// Every other edge is invalid, including any edge out of a terminal
    /// state and any direct `queued -> done`/`queued -> failed` jump.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Cancelling)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Cancelling, JobStatus::Cancelled)
                | (JobStatus::Cancelling, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- parse ----------------------------------------------------------------

    #[test]
    fn parse_known_statuses() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        assert_eq!(JobStatus::parse("  Running "), Some(JobStatus::Running));
        assert_eq!(JobStatus::parse("CANCELLED"), Some(JobStatus::Cancelled));
    }

    #[test]
    fn parse_rejects_unknown_tags() {
        assert_eq!(JobStatus::parse("paused"), None);
        assert_eq!(JobStatus::parse(""), None);
        assert_eq!(JobStatus::parse("done!"), None);
    }

    // -- serde ----------------------------------------------------------------

    #[test]
    fn serializes_as_lowercase_string() {
        let json = serde_json::to_string(&JobStatus::Cancelling).unwrap();
        assert_eq!(json, "\"cancelling\"");
    }

    #[test]
    fn round_trips_through_json() {
        for status in JobStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            let back: JobStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }

    // -- transition table ------------------------------------------------------

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled] {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be invalid");
            }
        }
    }

    #[test]
    fn queued_cannot_jump_straight_to_done_or_failed() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn valid_edges_match_the_lifecycle() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelling));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Cancelling.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Cancelling.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn no_self_edges() {
        for status in JobStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn exactly_seven_valid_edges() {
        let mut count = 0;
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                if from.can_transition_to(to) {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 7);
    }
}
