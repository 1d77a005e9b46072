//! The gated entry points a boundary (HTTP, CLI) calls.
//!
//! Staff-only operations check the [`Caller`] before anything else, so a
//! rejected call never reaches the store.

use std::sync::Arc;

use rapid_storage::RapidStorage;
use serde::Serialize;
use serde_json::Value;

use crate::access::Caller;
use crate::aggregate::{Aggregator, ResponsesPayload};
use crate::choices::ChoiceLookup;
use crate::controller::RunController;
use crate::enablement::Enablement;
use crate::error::ServiceError;
use crate::ids::{ContextId, ProblemId};
use crate::ingest::{IngestOutcome, IngestSummary, Ingester};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleResponse {
    pub is_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnabledResponse {
    pub is_enabled: bool,
}

/// Initial view state for a problem in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub is_open: bool,
    pub is_staff: bool,
    pub is_enabled: bool,
}

pub struct RapidService<S, L> {
    lookup: Arc<L>,
    controller: RunController<S>,
    ingester: Ingester<S>,
    aggregator: Aggregator<S, L>,
    enablement: Enablement<S, L>,
}

impl<S, L> Clone for RapidService<S, L> {
    fn clone(&self) -> Self {
        Self {
            lookup: self.lookup.clone(),
            controller: self.controller.clone(),
            ingester: self.ingester.clone(),
            aggregator: self.aggregator.clone(),
            enablement: self.enablement.clone(),
        }
    }
}

impl<S: RapidStorage, L: ChoiceLookup> RapidService<S, L> {
    pub fn new(storage: Arc<S>, lookup: Arc<L>) -> Self {
        Self {
            controller: RunController::new(storage.clone()),
            ingester: Ingester::new(storage.clone()),
            aggregator: Aggregator::new(storage.clone(), lookup.clone()),
            enablement: Enablement::new(storage, lookup.clone()),
            lookup,
        }
    }

    fn require_known(&self, problem: &ProblemId) -> Result<(), ServiceError> {
        match self.lookup.choices(problem) {
            Some(_) => Ok(()),
            None => Err(ServiceError::UnknownProblem(problem.to_string())),
        }
    }

    /// Open a new run, or close the open one.
    pub async fn toggle_open(
        &self,
        caller: Caller,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<ToggleResponse, ServiceError> {
        caller.require_staff()?;
        self.require_known(problem)?;
        let run = self.controller.toggle(problem, context).await?;
        Ok(ToggleResponse { is_open: run.open })
    }

    pub async fn responses(
        &self,
        caller: Caller,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<ResponsesPayload, ServiceError> {
        caller.require_staff()?;
        self.aggregator.responses(problem, context).await
    }

    pub async fn toggle_enabled(
        &self,
        caller: Caller,
        problem: &ProblemId,
    ) -> Result<EnabledResponse, ServiceError> {
        caller.require_staff()?;
        self.require_known(problem)?;
        let is_enabled = self.enablement.toggle(problem).await?;
        Ok(EnabledResponse { is_enabled })
    }

    /// Not staff-gated: participants need it to decide whether to show the poll.
    pub async fn status(
        &self,
        caller: Caller,
        problem: &ProblemId,
        context: &ContextId,
    ) -> Result<StatusPayload, ServiceError> {
        self.require_known(problem)?;
        Ok(StatusPayload {
            is_open: self.aggregator.is_open(problem, context).await?,
            is_staff: caller.is_staff(),
            is_enabled: self.enablement.is_enabled(problem).await?,
        })
    }

    pub async fn ingest(&self, raw: &Value) -> IngestOutcome {
        self.ingester.ingest(raw).await
    }

    pub async fn ingest_batch(&self, events: &[Value]) -> IngestSummary {
        self.ingester.ingest_batch(events).await
    }
}
