//! Pipeline run models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    /// Stopped early because the daily quota ran out.
    QuotaLimited,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::QuotaLimited => "quota_limited",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "quota_limited" => Some(Self::QuotaLimited),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub source: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub records_written: u64,
    pub error_summary: Option<String>,
}

impl PipelineRun {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Final values written when a run is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub records_processed: u64,
    pub records_written: u64,
    pub error_summary: Option<String>,
}

impl RunCompletion {
    pub fn success(records_processed: u64, records_written: u64) -> Self {
        Self {
            status: RunStatus::Success,
            records_processed,
            records_written,
            error_summary: None,
        }
    }

    pub fn quota_limited(records_processed: u64, records_written: u64) -> Self {
        Self {
            status: RunStatus::QuotaLimited,
            ..Self::success(records_processed, records_written)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            records_processed: 0,
            records_written: 0,
            error_summary: Some(error.into()),
        }
    }

    pub fn with_counts(mut self, records_processed: u64, records_written: u64) -> Self {
        self.records_processed = records_processed;
        self.records_written = records_written;
        self
    }
}
