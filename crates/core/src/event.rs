//! Parsing of raw tracking events into answer submissions.
//!
//! Accepted shape (the `problem_check` server event):
//!
//! ```json
//! {
//!   "event_type": "problem_check",
//!   "context": {"user_id": 42, "course_id": "course-v1:Org+Course+Run"},
//!   "event": {
//!     "problem_id": "block-v1:Org+Course+Run+type@problem+block@abc",
//!     "submission": {"abc_2_1": {"answer": "the correct answer"}},
//!     "answers": {"abc_2_1": "choice_1"}
//!   }
//! }
//! ```
//!
//! Parsing never panics and never returns anything but a [`SkipReason`] on
//! failure; the ingester turns that into a `skipped` outcome.

use serde_json::{Map, Value};

use crate::ids::{AnswerId, ContextId, IdError, ParticipantId, ProblemId, MAX_ANSWER_TEXT_LEN};

/// `event_type` marker of an answer submission.
pub const PROBLEM_CHECK: &str = "problem_check";

/// A validated, normalized answer submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEvent {
    pub participant: ParticipantId,
    pub problem: ProblemId,
    pub context: ContextId,
    pub answer_id: AnswerId,
    pub answer_text: String,
}

/// Why an event was not recorded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("malformed event: {detail}")]
    MalformedJson { detail: String },

    #[error("event_type {found:?} is not problem_check")]
    WrongEventType { found: Option<String> },

    #[error("event has no participant")]
    MissingParticipant,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(IdError),

    #[error("event has no submission payload")]
    MissingPayload,

    #[error("expected exactly one submission entry, found {count}")]
    SubmissionCount { count: usize },

    #[error("submission entry '{key}' has no answer text")]
    MissingAnswerText { key: String },

    #[error("submission entry '{key}' has no answer id")]
    MissingAnswerId { key: String },

    #[error("submission entry '{key}' has a multi-valued answer")]
    UnsupportedAnswerShape { key: String },

    #[error("answer text exceeds {max} bytes")]
    AnswerTooLong { max: usize },

    #[error("no open run for {problem} in {context}")]
    NoOpenRun { problem: String, context: String },

    #[error("run {run_id} closed before the submission committed")]
    RunClosed { run_id: i64 },

    #[error("storage failure: {detail}")]
    Storage { detail: String },
}

impl SkipReason {
    /// Stable machine-readable code, used in JSON outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::MalformedJson { .. } => "malformed_json",
            SkipReason::WrongEventType { .. } => "wrong_event_type",
            SkipReason::MissingParticipant => "missing_participant",
            SkipReason::InvalidIdentifier(_) => "invalid_identifier",
            SkipReason::MissingPayload => "missing_payload",
            SkipReason::SubmissionCount { .. } => "submission_count",
            SkipReason::MissingAnswerText { .. } => "missing_answer_text",
            SkipReason::MissingAnswerId { .. } => "missing_answer_id",
            SkipReason::UnsupportedAnswerShape { .. } => "unsupported_answer_shape",
            SkipReason::AnswerTooLong { .. } => "answer_too_long",
            SkipReason::NoOpenRun { .. } => "no_open_run",
            SkipReason::RunClosed { .. } => "run_closed",
            SkipReason::Storage { .. } => "storage",
        }
    }
}

impl From<IdError> for SkipReason {
    fn from(e: IdError) -> Self {
        SkipReason::InvalidIdentifier(e)
    }
}

/// Validate and normalize one raw event.
pub fn parse_event(raw: &Value) -> Result<AnswerEvent, SkipReason> {
    let event_type = raw.get("event_type").and_then(Value::as_str);
    if event_type != Some(PROBLEM_CHECK) {
        return Err(SkipReason::WrongEventType {
            found: event_type.map(str::to_string),
        });
    }

    let context = raw.get("context");
    let participant = participant_id(context.and_then(|c| c.get("user_id")))?;
    let context_id = ContextId::parse(string_field(context, "course_id"))?;

    let body = raw
        .get("event")
        .and_then(Value::as_object)
        .ok_or(SkipReason::MissingPayload)?;
    let problem_id = ProblemId::parse(
        body.get("problem_id")
            .and_then(Value::as_str)
            .unwrap_or(""),
    )?;

    let submission = body
        .get("submission")
        .and_then(Value::as_object)
        .ok_or(SkipReason::MissingPayload)?;
    let (key, entry) = single_entry(submission)?;

    let answer_text = entry
        .get("answer")
        .and_then(Value::as_str)
        .ok_or_else(|| SkipReason::MissingAnswerText { key: key.clone() })?;
    let answer_id = match body.get("answers").and_then(|a| a.get(key)) {
        Some(Value::String(id)) => AnswerId::parse(id)?,
        Some(Value::Array(_)) => return Err(SkipReason::UnsupportedAnswerShape { key: key.clone() }),
        _ => return Err(SkipReason::MissingAnswerId { key: key.clone() }),
    };
    if answer_text.len() > MAX_ANSWER_TEXT_LEN {
        return Err(SkipReason::AnswerTooLong {
            max: MAX_ANSWER_TEXT_LEN,
        });
    }

    Ok(AnswerEvent {
        participant,
        problem: problem_id,
        context: context_id,
        answer_id,
        answer_text: answer_text.to_string(),
    })
}

fn participant_id(value: Option<&Value>) -> Result<ParticipantId, SkipReason> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(ParticipantId::parse(s)?),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(ParticipantId::parse(&n.to_string())?),
        _ => Err(SkipReason::MissingParticipant),
    }
}

fn string_field<'a>(object: Option<&'a Value>, key: &str) -> &'a str {
    object
        .and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn single_entry(submission: &Map<String, Value>) -> Result<(&String, &Value), SkipReason> {
    let mut entries = submission.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(SkipReason::SubmissionCount {
            count: submission.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(user_id: Value, answer_id: Value) -> Value {
        json!({
            "event_type": "problem_check",
            "context": {"user_id": user_id, "course_id": "course-v1:Org+Poll+2025"},
            "event": {
                "problem_id": "block-v1:Org+Poll+2025+type@problem+block@q1",
                "submission": {"q1_2_1": {"answer": "right", "correct": true}},
                "answers": {"q1_2_1": answer_id}
            }
        })
    }

    #[test]
    fn parses_problem_check() {
        let parsed = parse_event(&event(json!(42), json!("choice_1"))).unwrap();
        assert_eq!(parsed.participant.as_str(), "42");
        assert_eq!(parsed.context.as_str(), "course-v1:Org+Poll+2025");
        assert_eq!(
            parsed.problem.as_str(),
            "block-v1:Org+Poll+2025+type@problem+block@q1"
        );
        assert_eq!(parsed.answer_id.as_str(), "choice_1");
        assert_eq!(parsed.answer_text, "right");
    }

    #[test]
    fn string_user_id_is_accepted() {
        let parsed = parse_event(&event(json!("learner-7"), json!("choice_1"))).unwrap();
        assert_eq!(parsed.participant.as_str(), "learner-7");
    }

    #[test]
    fn other_event_types_are_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event_type"] = json!("play_video");
        assert_eq!(
            parse_event(&raw),
            Err(SkipReason::WrongEventType {
                found: Some("play_video".into())
            })
        );
        assert_eq!(
            parse_event(&json!({})),
            Err(SkipReason::WrongEventType { found: None })
        );
    }

    #[test]
    fn missing_or_null_participant_is_skipped() {
        assert_eq!(
            parse_event(&event(Value::Null, json!("choice_1"))),
            Err(SkipReason::MissingParticipant)
        );
        assert_eq!(
            parse_event(&event(json!(1.5), json!("choice_1"))),
            Err(SkipReason::MissingParticipant)
        );
    }

    #[test]
    fn invalid_course_id_is_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["context"]["course_id"] = json!("not a key");
        assert_eq!(parse_event(&raw).unwrap_err().code(), "invalid_identifier");

        raw["context"].as_object_mut().unwrap().remove("course_id");
        assert_eq!(parse_event(&raw).unwrap_err().code(), "invalid_identifier");
    }

    #[test]
    fn two_submission_entries_are_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"]["submission"]["q1_3_1"] = json!({"answer": "other"});
        raw["event"]["answers"]["q1_3_1"] = json!("choice_0");
        assert_eq!(
            parse_event(&raw),
            Err(SkipReason::SubmissionCount { count: 2 })
        );
    }

    #[test]
    fn empty_submission_is_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"]["submission"] = json!({});
        assert_eq!(
            parse_event(&raw),
            Err(SkipReason::SubmissionCount { count: 0 })
        );
    }

    #[test]
    fn missing_answer_id_or_text_is_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"]["answers"] = json!({});
        assert_eq!(parse_event(&raw).unwrap_err().code(), "missing_answer_id");

        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"]["submission"]["q1_2_1"] = json!({"correct": true});
        assert_eq!(parse_event(&raw).unwrap_err().code(), "missing_answer_text");
    }

    #[test]
    fn list_valued_answer_is_unsupported() {
        let raw = event(json!(1), json!(["choice_0", "choice_1"]));
        assert_eq!(
            parse_event(&raw).unwrap_err().code(),
            "unsupported_answer_shape"
        );
    }

    #[test]
    fn overlong_answer_text_is_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"]["submission"]["q1_2_1"]["answer"] = json!("x".repeat(MAX_ANSWER_TEXT_LEN + 1));
        assert_eq!(
            parse_event(&raw),
            Err(SkipReason::AnswerTooLong {
                max: MAX_ANSWER_TEXT_LEN
            })
        );
    }

    #[test]
    fn non_object_payload_is_skipped() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"] = json!("input_q1_2_1=choice_1");
        assert_eq!(parse_event(&raw).unwrap_err(), SkipReason::MissingPayload);
    }

    #[test]
    fn absent_payload_is_skipped_as_missing() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw.as_object_mut().unwrap().remove("event");
        assert_eq!(parse_event(&raw).unwrap_err().code(), "missing_payload");
    }

    #[test]
    fn payload_without_problem_id_is_an_invalid_identifier() {
        let mut raw = event(json!(1), json!("choice_1"));
        raw["event"].as_object_mut().unwrap().remove("problem_id");
        assert_eq!(parse_event(&raw).unwrap_err().code(), "invalid_identifier");
    }
}
