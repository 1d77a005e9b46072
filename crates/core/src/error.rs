use rapid_storage::StorageError;

use crate::access::AccessError;
use crate::ids::IdError;

/// Errors surfaced by [`RapidService`](crate::RapidService) to a boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The caller lacks the staff capability. No state was touched.
    #[error(transparent)]
    Forbidden(#[from] AccessError),

    /// The choice lookup does not know the problem.
    #[error("unknown problem: {0}")]
    UnknownProblem(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] IdError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
