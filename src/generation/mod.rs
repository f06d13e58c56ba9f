pub mod service;
pub mod store;
pub mod types;

pub use service::GenerationService;
pub use store::{HistoryStore, ReconcileOutcome};
pub use types::{GenerationKind, GenerationRecord, GenerationStatus};
