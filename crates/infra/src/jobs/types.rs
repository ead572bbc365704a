//! Job record and its state machine.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use lotwise_ai::{BilledCall, Completion, JobType};
use lotwise_core::{DomainError, DomainResult, JobId, UserId};

use super::retry::FailureDecision;

/// Default attempt budget for newly enqueued jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job lifecycle status.
///
/// `Pending` and `Processing` are the only states the worker pipeline mutates;
/// the other three are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting to be claimed once `available_at` has passed
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Completed with a trusted result
    Succeeded,
    /// Completed, but the result must be checked by a human
    NeedsReview,
    /// Gave up; see `error_message`
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::NeedsReview => "NEEDS_REVIEW",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::NeedsReview | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "NEEDS_REVIEW" => Ok(JobStatus::NeedsReview),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// An enrichment job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Wire name of the job type. Kept as text so rows written by other
    /// producers can still be loaded (and failed) when the name is unknown.
    pub job_type: String,
    pub status: JobStatus,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    /// Last raw provider text, kept even when it failed validation
    pub raw_output: Option<String>,
    /// Failed attempts so far; only the retry path increments it
    pub attempts: u32,
    pub max_attempts: u32,
    /// Not claimable before this instant
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Provider tokens billed across every attempt
    pub tokens_used: u64,
    pub cost_estimate_usd: f64,
    pub needs_review: bool,
    pub owner_user_id: UserId,
    pub model_name: Option<String>,
    pub latency_ms: Option<u64>,
}

impl Job {
    /// Create a pending job, claimable from `now`.
    pub fn new(
        owner_user_id: UserId,
        job_type: JobType,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_type_name(owner_user_id, job_type.as_str(), payload, now)
    }

    /// Like [`Job::new`] but with a raw type name (as received from a producer).
    pub fn with_type_name(
        owner_user_id: UserId,
        job_type: impl Into<String>,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            payload,
            result: None,
            raw_output: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            available_at: now,
            created_at: now,
            updated_at: now,
            error_message: None,
            tokens_used: 0,
            cost_estimate_usd: 0.0,
            needs_review: false,
            owner_user_id,
            model_name: None,
            latency_ms: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = at;
        self
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now
    }

    /// PENDING -> PROCESSING.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(JobStatus::Pending, "claim")?;
        self.status = JobStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// Fold a successful provider call into the job's accounting.
    pub fn record_completion(&mut self, completion: &Completion) {
        self.tokens_used += completion.usage.total_tokens;
        self.cost_estimate_usd += completion.cost_estimate_usd;
        self.raw_output = Some(completion.raw_response.clone());
        self.model_name = Some(completion.model_name.clone());
        self.latency_ms = Some(completion.latency_ms);
    }

    /// Fold a billed call whose output was rejected into the job's accounting.
    pub fn record_billed_call(&mut self, call: &BilledCall) {
        self.tokens_used += call.usage.total_tokens;
        self.cost_estimate_usd += call.cost_estimate_usd;
        self.raw_output = Some(call.raw_response.clone());
        self.model_name = Some(call.model_name.clone());
    }

    /// PROCESSING -> SUCCEEDED | NEEDS_REVIEW. `attempts` is left untouched.
    pub fn mark_completed(
        &mut self,
        result: JsonValue,
        needs_review: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing, "complete")?;
        self.status = if needs_review {
            JobStatus::NeedsReview
        } else {
            JobStatus::Succeeded
        };
        self.result = Some(result);
        self.needs_review = needs_review;
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    /// PROCESSING -> PENDING (retry) | FAILED, as decided by the retry policy.
    ///
    /// A failed job keeps its `available_at`.
    pub fn apply_failure(
        &mut self,
        decision: &FailureDecision,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing, "fail")?;
        match *decision {
            FailureDecision::Retry {
                next_available_at,
                attempts,
            } => {
                self.status = JobStatus::Pending;
                self.attempts = attempts;
                self.available_at = next_available_at;
            }
            FailureDecision::Fail { attempts } => {
                self.status = JobStatus::Failed;
                self.attempts = attempts;
            }
        }
        self.needs_review = false;
        self.error_message = Some(error.into());
        self.updated_at = now;
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "cannot {action} job {} in status {} (expected {expected})",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
