//! Problem catalog: which problems exist and which choices they offer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{AnswerId, ProblemId};

/// One selectable option of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub answer_id: String,
    pub answer_text: String,
}

impl Choice {
    pub fn new(answer_id: impl Into<String>, answer_text: impl Into<String>) -> Self {
        Self {
            answer_id: answer_id.into(),
            answer_text: answer_text.into(),
        }
    }
}

/// Source of the current, ordered choice list for a problem.
///
/// Choices are looked up at read time and never snapshotted into storage,
/// so editing a problem changes how past runs are reported.
pub trait ChoiceLookup: Send + Sync + 'static {
    /// The current choices, in display order. `None` for an unknown problem;
    /// a known problem may have zero choices.
    fn choices(&self, problem: &ProblemId) -> Option<Vec<Choice>>;

    /// Initial `enabled` state for a problem with no persisted setting.
    fn enabled_by_default(&self, _problem: &ProblemId) -> bool {
        false
    }
}

/// Static definition of a problem, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDefinition {
    pub id: ProblemId,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("problem '{0}' is defined more than once")]
    DuplicateProblem(String),

    #[error("problem '{problem}' lists answer_id '{answer_id}' more than once")]
    DuplicateAnswer { problem: String, answer_id: String },

    #[error("problem '{problem}': {source}")]
    InvalidAnswerId {
        problem: String,
        #[source]
        source: crate::ids::IdError,
    },
}

/// In-memory [`ChoiceLookup`] built from problem definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    problems: BTreeMap<ProblemId, ProblemDefinition>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate problems, duplicate answer ids
    /// within a problem, and malformed answer ids.
    pub fn new(
        definitions: impl IntoIterator<Item = ProblemDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut problems = BTreeMap::new();
        for def in definitions {
            let mut seen = BTreeSet::new();
            for choice in &def.choices {
                AnswerId::parse(&choice.answer_id).map_err(|source| {
                    CatalogError::InvalidAnswerId {
                        problem: def.id.to_string(),
                        source,
                    }
                })?;
                if !seen.insert(choice.answer_id.as_str()) {
                    return Err(CatalogError::DuplicateAnswer {
                        problem: def.id.to_string(),
                        answer_id: choice.answer_id.clone(),
                    });
                }
            }
            if problems.contains_key(&def.id) {
                return Err(CatalogError::DuplicateProblem(def.id.to_string()));
            }
            problems.insert(def.id.clone(), def);
        }
        Ok(Self { problems })
    }

    pub fn get(&self, problem: &ProblemId) -> Option<&ProblemDefinition> {
        self.problems.get(problem)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProblemDefinition> {
        self.problems.values()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl ChoiceLookup for Catalog {
    fn choices(&self, problem: &ProblemId) -> Option<Vec<Choice>> {
        self.problems.get(problem).map(|def| def.choices.clone())
    }

    fn enabled_by_default(&self, problem: &ProblemId) -> bool {
        self.problems.get(problem).is_some_and(|def| def.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str, choices: &[(&str, &str)]) -> ProblemDefinition {
        ProblemDefinition {
            id: ProblemId::parse(id).unwrap(),
            enabled: false,
            choices: choices.iter().map(|(a, t)| Choice::new(*a, *t)).collect(),
        }
    }

    #[test]
    fn lookup_preserves_choice_order() {
        let catalog = Catalog::new([def("q1", &[("b", "Bee"), ("a", "Ay")])]).unwrap();
        let choices = catalog.choices(&ProblemId::parse("q1").unwrap()).unwrap();
        let ids: Vec<_> = choices.iter().map(|c| c.answer_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn unknown_problem_is_none_and_empty_problem_is_some() {
        let catalog = Catalog::new([def("q1", &[])]).unwrap();
        assert_eq!(
            catalog.choices(&ProblemId::parse("q1").unwrap()),
            Some(vec![])
        );
        assert_eq!(catalog.choices(&ProblemId::parse("q2").unwrap()), None);
    }

    #[test]
    fn rejects_duplicate_problem() {
        let err = Catalog::new([def("q1", &[]), def("q1", &[])]).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateProblem("q1".into()));
    }

    #[test]
    fn rejects_duplicate_answer() {
        let err = Catalog::new([def("q1", &[("a", "A"), ("a", "again")])]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateAnswer { ref answer_id, .. } if answer_id == "a"));
    }

    #[test]
    fn rejects_malformed_answer_id() {
        let err = Catalog::new([def("q1", &[("has space", "A")])]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidAnswerId { .. }));
    }

    #[test]
    fn enabled_default_comes_from_definition() {
        let mut enabled = def("q1", &[]);
        enabled.enabled = true;
        let catalog = Catalog::new([enabled, def("q2", &[])]).unwrap();
        assert!(catalog.enabled_by_default(&ProblemId::parse("q1").unwrap()));
        assert!(!catalog.enabled_by_default(&ProblemId::parse("q2").unwrap()));
        assert!(!catalog.enabled_by_default(&ProblemId::parse("q3").unwrap()));
    }
}
