use serde::{Deserialize, Serialize};

/// Store-assigned run identifier. Monotonically increasing per store.
pub type RunId = i64;

/// One collection window for a problem within a course context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub problem_id: String,
    pub context_id: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    pub open: bool,
}

/// A participant's recorded answer within one run.
///
/// At most one record exists per (run_id, participant_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub run_id: RunId,
    pub participant_id: String,
    pub answer_id: String,
    pub answer_text: String,
    /// The inbound event, preserved verbatim for audit.
    pub event: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// A submission to be written. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub run_id: RunId,
    pub participant_id: String,
    pub answer_id: String,
    pub answer_text: String,
    pub event: serde_json::Value,
    pub created_at: String,
}

/// Number of submissions holding `answer_id` within `run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCount {
    pub run_id: RunId,
    pub answer_id: String,
    pub count: u64,
}
