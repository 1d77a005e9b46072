pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{AnswerCount, NewSubmission, RunId, RunRecord, SubmissionRecord};
pub use traits::RapidStorage;
