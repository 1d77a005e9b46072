//! Validated identifiers.
//!
//! Every identifier that reaches storage passes through one of these
//! newtypes. Validation is shallow: non-empty, at most
//! [`MAX_ID_LEN`] bytes, and free of whitespace and control characters.
//! Course and block keys (`course-v1:Org+Poll+2025`,
//! `block-v1:...+type@problem+block@q1`) all fit that shape.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upper bound on any identifier, in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Upper bound on stored answer text, in bytes.
pub const MAX_ANSWER_TEXT_LEN: usize = 4096;

/// Why a raw string was not accepted as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} exceeds {max} bytes ({len})")]
    TooLong {
        kind: &'static str,
        max: usize,
        len: usize,
    },

    #[error("{kind} contains whitespace or control characters: {raw:?}")]
    InvalidCharacter { kind: &'static str, raw: String },
}

impl IdError {
    /// Which identifier kind failed validation.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::TooLong { kind, .. }
            | IdError::InvalidCharacter { kind, .. } => kind,
        }
    }
}

fn validate(kind: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_ID_LEN,
            len: raw.len(),
        });
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter {
            kind,
            raw: raw.to_string(),
        });
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, IdError> {
                validate($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate($kind, &value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// Identifies a poll question.
    ProblemId,
    "problem_id"
);

identifier!(
    /// Identifies the course offering a problem is asked in.
    ContextId,
    "context_id"
);

identifier!(
    /// Identifies a single participant (a learner).
    ParticipantId,
    "participant_id"
);

identifier!(
    /// Identifies one selectable choice of a problem.
    AnswerId,
    "answer_id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_course_and_block_keys() {
        assert!(ContextId::parse("course-v1:Org+Poll+2025").is_ok());
        assert!(ProblemId::parse("block-v1:Org+Poll+2025+type@problem+block@q1").is_ok());
        assert!(AnswerId::parse("choice_0").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(
            ParticipantId::parse(""),
            Err(IdError::Empty {
                kind: "participant_id"
            })
        );
    }

    #[test]
    fn rejects_whitespace_and_control_characters() {
        assert!(matches!(
            AnswerId::parse("choice 0"),
            Err(IdError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            AnswerId::parse("choice\u{0}"),
            Err(IdError::InvalidCharacter { .. })
        ));
    }

    #[test]
    fn rejects_overlong() {
        let raw = "x".repeat(MAX_ID_LEN + 1);
        let err = ProblemId::parse(&raw).unwrap_err();
        assert_eq!(err.kind(), "problem_id");
        assert!(matches!(err, IdError::TooLong { len, .. } if len == MAX_ID_LEN + 1));
        assert!(ProblemId::parse(&raw[..MAX_ID_LEN]).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: ProblemId = serde_json::from_str("\"q1\"").unwrap();
        assert_eq!(ok.as_str(), "q1");
        assert!(serde_json::from_str::<ProblemId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"q1\"");
    }
}
