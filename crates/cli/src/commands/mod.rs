//! One-shot operator commands.
//!
//! These run as the local operator, which holds the staff capability.

pub(crate) mod ingest;
pub(crate) mod responses;
pub(crate) mod status;
pub(crate) mod toggle;

use rapid_core::{Caller, ContextId, ProblemId, ServiceError};

/// The capability every one-shot command runs with.
pub(crate) fn operator() -> Caller {
    Caller::staff()
}

pub(crate) fn parse_scope(problem: &str, context: &str) -> Result<(ProblemId, ContextId), ServiceError> {
    Ok((ProblemId::parse(problem)?, ContextId::parse(context)?))
}
