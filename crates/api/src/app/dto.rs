use serde::{Deserialize, Serialize};

use lotwise_infra::jobs::{BatchReport, JobOutcome, JobStats, JobStatus};

use crate::app::BatchLimits;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchRequest {
    pub batch_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchQuery {
    pub batch_size: Option<i64>,
}

/// Resolve the effective batch size: body wins over query, default when neither is set.
pub fn resolve_batch_size(
    body: Option<i64>,
    query: Option<i64>,
    limits: BatchLimits,
) -> Result<usize, String> {
    let Some(requested) = body.or(query) else {
        return Ok(limits.default_size);
    };
    match usize::try_from(requested) {
        Ok(n) if (1..=limits.max_size).contains(&n) => Ok(n),
        _ => Err(format!(
            "batchSize must be between 1 and {}, got {requested}",
            limits.max_size
        )),
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ProcessBatchResponse {
    pub processed: usize,
    pub results: Vec<JobResultDto>,
}

#[derive(Debug, Serialize)]
pub struct JobResultDto {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(rename = "tokensUsed")]
    pub tokens_used: u64,
    #[serde(rename = "costEstimateUSD")]
    pub cost_estimate_usd: f64,
}

impl From<JobOutcome> for JobResultDto {
    fn from(o: JobOutcome) -> Self {
        Self {
            job_id: o.job_id.to_string(),
            status: o.status,
            tokens_used: o.tokens_used,
            cost_estimate_usd: o.cost_estimate_usd,
        }
    }
}

impl From<BatchReport> for ProcessBatchResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            processed: report.processed,
            results: report.results.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatsResponse {
    pub pending: u64,
    pub processing: u64,
    pub succeeded: u64,
    pub needs_review: u64,
    pub failed: u64,
}

impl From<JobStats> for JobStatsResponse {
    fn from(s: JobStats) -> Self {
        Self {
            pending: s.pending,
            processing: s.processing,
            succeeded: s.succeeded,
            needs_review: s.needs_review,
            failed: s.failed,
        }
    }
}
