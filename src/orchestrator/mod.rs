//! Cadence orchestrator.
//!
//! Each cycle evaluates every registered source against its cadence,
//! takes the source lock, records a pipeline run, and dispatches the
//! source's [`Pipeline`] on its own task.

mod cadence;
mod pipeline;
mod runner;

pub use cadence::{effective_cadence, evaluate, Eligibility, RunReason};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome, RunContext};
pub use runner::{
    check_eligibility, CancelHandle, CycleReport, Orchestrator, SourceOutcome, SourceReport,
};
