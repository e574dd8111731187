//! Domain models for the crawl ledger.

mod lock;
mod quota;
mod resource;
mod run;

pub use lock::LockInfo;
pub use quota::{QuotaDecision, QuotaUsage};
pub use resource::{ProcessOutcome, Resource, ResourceState};
pub use run::{PipelineRun, RunCompletion, RunStatus};
