use std::sync::Arc;

use rapid_storage::{RapidStorage, StorageError};
use tracing::info;

use crate::choices::ChoiceLookup;
use crate::clock::now_rfc3339;
use crate::ids::ProblemId;

/// Per-problem `enabled` flag.
///
/// The catalog supplies the initial value; once toggled, the persisted
/// setting is authoritative. The flag only decides whether a problem is
/// shown as a poll. It does not gate ingestion or run toggles.
pub struct Enablement<S, L> {
    storage: Arc<S>,
    lookup: Arc<L>,
}

impl<S, L> Clone for Enablement<S, L> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            lookup: self.lookup.clone(),
        }
    }
}

impl<S: RapidStorage, L: ChoiceLookup> Enablement<S, L> {
    pub fn new(storage: Arc<S>, lookup: Arc<L>) -> Self {
        Self { storage, lookup }
    }

    pub async fn is_enabled(&self, problem: &ProblemId) -> Result<bool, StorageError> {
        let persisted = self.storage.get_problem_enabled(problem.as_str()).await?;
        Ok(persisted.unwrap_or_else(|| self.lookup.enabled_by_default(problem)))
    }

    /// Flip the flag and return the new value.
    pub async fn toggle(&self, problem: &ProblemId) -> Result<bool, StorageError> {
        let storage = &self.storage;
        let mut snapshot = storage.begin_snapshot().await?;

        let current = match storage
            .get_problem_enabled_for_update(&mut snapshot, problem.as_str())
            .await
        {
            Ok(value) => value.unwrap_or_else(|| self.lookup.enabled_by_default(problem)),
            Err(e) => {
                let _ = storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        let next = !current;
        if let Err(e) = storage
            .set_problem_enabled(&mut snapshot, problem.as_str(), next, &now_rfc3339())
            .await
        {
            let _ = storage.abort_snapshot(snapshot).await;
            return Err(e);
        }
        storage.commit_snapshot(snapshot).await?;

        info!(problem = %problem, enabled = next, "toggled problem enablement");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::{Catalog, ProblemDefinition};
    use rapid_storage::MemoryStorage;

    fn setup(default_enabled: bool) -> (Enablement<MemoryStorage, Catalog>, ProblemId) {
        let problem = ProblemId::parse("q1").unwrap();
        let catalog = Catalog::new([ProblemDefinition {
            id: problem.clone(),
            enabled: default_enabled,
            choices: vec![],
        }])
        .unwrap();
        (
            Enablement::new(Arc::new(MemoryStorage::new()), Arc::new(catalog)),
            problem,
        )
    }

    #[tokio::test]
    async fn unset_flag_follows_catalog() {
        let (enablement, problem) = setup(true);
        assert!(enablement.is_enabled(&problem).await.unwrap());
        let (enablement, problem) = setup(false);
        assert!(!enablement.is_enabled(&problem).await.unwrap());
    }

    #[tokio::test]
    async fn toggle_flips_from_default_and_persists() {
        let (enablement, problem) = setup(false);
        assert!(enablement.toggle(&problem).await.unwrap());
        assert!(enablement.is_enabled(&problem).await.unwrap());
        assert!(!enablement.toggle(&problem).await.unwrap());
        assert!(!enablement.is_enabled(&problem).await.unwrap());
    }
}
