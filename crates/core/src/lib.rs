//! Live poll core: run lifecycle, answer ingestion, and histogram
//! aggregation over any [`RapidStorage`](rapid_storage::RapidStorage)
//! backend.

pub mod access;
pub mod aggregate;
pub mod choices;
mod clock;
pub mod controller;
pub mod enablement;
mod error;
pub mod event;
pub mod ids;
pub mod ingest;
mod service;

pub use access::{AccessError, Caller};
pub use aggregate::{build_counts, Aggregator, Counts, ResponsesPayload, RunSummary};
pub use choices::{Catalog, CatalogError, Choice, ChoiceLookup, ProblemDefinition};
pub use clock::now_rfc3339;
pub use controller::RunController;
pub use error::ServiceError;
pub use event::{parse_event, AnswerEvent, SkipReason};
pub use ids::{AnswerId, ContextId, IdError, ParticipantId, ProblemId};
pub use ingest::{IngestOutcome, IngestSummary, Ingester};
pub use service::{EnabledResponse, RapidService, StatusPayload, ToggleResponse};
