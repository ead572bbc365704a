//! Batch processor: claim, dispatch to the provider, classify, persist.
//!
//! `process_batch` is stateless and safe to call from any number of concurrent
//! triggers. The claim is the only point of coordination; after it, each job is
//! owned by this invocation until its outcome is saved.
//!
//! Per-job failures never escape: they become RETRY/FAIL transitions and show up
//! in the returned report. Only store/ledger failures abort the batch, and jobs
//! saved before the failure stay saved.
//!
//! A crash between claim and save leaves the job in PROCESSING; nothing here
//! reclaims it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use lotwise_ai::{CompletionClient, JobError, PromptRegistry, ReviewPolicy};
use lotwise_core::{Clock, DomainError, JobId};

use super::retry::{FailureDecision, RetryPolicy};
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus};
use crate::usage::{LedgerError, UsageLedger};

/// Infrastructure failure that aborts a batch.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    #[error("usage ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Outcome of one claimed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub tokens_used: u64,
    pub cost_estimate_usd: f64,
}

impl JobOutcome {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            tokens_used: job.tokens_used,
            cost_estimate_usd: job.cost_estimate_usd,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub results: Vec<JobOutcome>,
}

pub struct JobProcessor<S, C, L> {
    store: S,
    client: C,
    ledger: L,
    clock: Arc<dyn Clock>,
    registry: PromptRegistry,
    review: ReviewPolicy,
    retry: RetryPolicy,
}

impl<S, C, L> JobProcessor<S, C, L>
where
    S: JobStore,
    C: CompletionClient,
    L: UsageLedger,
{
    pub fn new(store: S, client: C, ledger: L, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            client,
            ledger,
            clock,
            registry: PromptRegistry::standard(),
            review: ReviewPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_registry(mut self, registry: PromptRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_review_policy(mut self, review: ReviewPolicy) -> Self {
        self.review = review;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically claim up to `limit` eligible jobs.
    pub async fn claim_batch(&self, limit: usize) -> Result<Vec<Job>, ProcessError> {
        let claimed = self.store.claim_batch(limit, self.clock.now()).await?;
        if claimed.len() < limit {
            debug!(requested = limit, claimed = claimed.len(), "claimed fewer jobs than requested");
        }
        Ok(claimed)
    }

    /// Claim up to `batch_size` jobs and drive each to its next state.
    pub async fn process_batch(&self, batch_size: usize) -> Result<BatchReport, ProcessError> {
        let claimed = self.claim_batch(batch_size).await?;
        let mut report = BatchReport {
            processed: 0,
            results: Vec::with_capacity(claimed.len()),
        };

        for job in claimed {
            let outcome = self.process_one(job).await.inspect_err(|e| {
                error!(error = %e, processed = report.processed, "aborting batch");
            })?;
            report.processed += 1;
            report.results.push(outcome);
        }

        info!(processed = report.processed, "batch finished");
        Ok(report)
    }

    async fn process_one(&self, mut job: Job) -> Result<JobOutcome, ProcessError> {
        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            "processing job"
        );

        let built = match self.registry.build_request(&job.job_type, &job.payload) {
            Ok(built) => built,
            Err(fatal) => return self.fail(job, JobError::Fatal(fatal)).await,
        };

        match self
            .client
            .execute(&built.request, &built.validator, &built.options)
            .await
        {
            Ok(completion) => {
                let now = self.clock.now();
                self.ledger
                    .record(
                        job.owner_user_id,
                        completion.usage.total_tokens,
                        completion.cost_estimate_usd,
                        now,
                    )
                    .await?;
                job.record_completion(&completion);

                let needs_review = self.review.classify(built.job_type, &completion.data);
                job.mark_completed(completion.data, needs_review, now)?;
                self.store.save_claimed(&job).await?;

                if needs_review {
                    info!(job_id = %job.id, job_type = %job.job_type, "job needs review");
                } else {
                    info!(job_id = %job.id, job_type = %job.job_type, "job succeeded");
                }
                Ok(JobOutcome::of(&job))
            }
            Err(provider_err) => {
                if let Some(call) = provider_err.billed_call() {
                    self.ledger
                        .record(
                            job.owner_user_id,
                            call.usage.total_tokens,
                            call.cost_estimate_usd,
                            self.clock.now(),
                        )
                        .await?;
                    job.record_billed_call(call);
                }
                self.fail(job, JobError::Retryable(provider_err)).await
            }
        }
    }

    async fn fail(&self, mut job: Job, error: JobError) -> Result<JobOutcome, ProcessError> {
        let now = self.clock.now();
        let decision = self.retry.on_failure(&job, &error, now);
        job.apply_failure(&decision, error.to_string(), now)?;
        self.store.save_claimed(&job).await?;

        match decision {
            FailureDecision::Retry {
                next_available_at,
                attempts,
            } => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts,
                %next_available_at,
                error = %error,
                "job failed, retry scheduled"
            ),
            FailureDecision::Fail { attempts } => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts,
                fatal = !error.is_retryable(),
                error = %error,
                "job failed permanently"
            ),
        }
        Ok(JobOutcome::of(&job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::retry::FixedJitter;
    use crate::jobs::store::InMemoryJobStore;
    use crate::usage::{InMemoryUsageLedger, UsagePeriod};
    use chrono::{Duration, TimeZone, Utc};
    use lotwise_ai::{ProviderError, ScriptedCompletionClient, Usage};
    use lotwise_core::{ManualClock, UserId};
    use serde_json::json;

    type TestProcessor = JobProcessor<
        Arc<InMemoryJobStore>,
        Arc<ScriptedCompletionClient>,
        Arc<InMemoryUsageLedger>,
    >;

    struct Harness {
        store: Arc<InMemoryJobStore>,
        client: Arc<ScriptedCompletionClient>,
        ledger: Arc<InMemoryUsageLedger>,
        clock: Arc<ManualClock>,
        processor: TestProcessor,
    }

    fn harness() -> Harness {
        let store = InMemoryJobStore::arc();
        let client = Arc::new(ScriptedCompletionClient::new());
        let ledger = InMemoryUsageLedger::arc();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        ));
        let processor =
            JobProcessor::new(store.clone(), client.clone(), ledger.clone(), clock.clone())
                .with_retry_policy(RetryPolicy::new(Arc::new(FixedJitter(0.0))));
        Harness {
            store,
            client,
            ledger,
            clock,
            processor,
        }
    }

    impl Harness {
        async fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Job {
            let job = Job::with_type_name(UserId::new(), job_type, payload, self.clock.now());
            self.store.enqueue(job.clone()).await.unwrap();
            job
        }

        async fn reload(&self, id: JobId) -> Job {
            self.store.get(id).await.unwrap().unwrap()
        }
    }

    fn grade_payload() -> serde_json::Value {
        json!({"title": "Leather satchel", "description": "light wear on strap"})
    }

    const GOOD_GRADE: &str =
        r#"{"grade": "good", "defects": [{"description": "strap wear", "severity": "minor"}], "confidence": 0.91}"#;

    #[tokio::test]
    async fn empty_pool_yields_empty_report() {
        let h = harness();
        let report = h.processor.process_batch(1).await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(h.processor.claim_batch(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confident_result_succeeds() {
        let h = harness();
        let job = h
            .enqueue("PRICE_SUGGESTION", json!({"title": "Canon AE-1"}))
            .await;
        h.client.push_text(
            r#"{"suggested_price": 180.0, "low": 150.0, "high": 210.0, "currency": "USD", "confidence": 0.95}"#,
            Usage::new(400, 60),
        );

        let report = h.processor.process_batch(5).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.results[0].status, JobStatus::Succeeded);
        assert_eq!(report.results[0].tokens_used, 460);

        let stored = h.reload(job.id).await;
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert!(!stored.needs_review);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.result.unwrap()["suggested_price"], json!(180.0));
        assert_eq!(stored.model_name.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn low_confidence_needs_review() {
        let h = harness();
        let job = h
            .enqueue("PRICE_SUGGESTION", json!({"title": "Canon AE-1"}))
            .await;
        h.client.push_text(
            r#"{"suggested_price": 180.0, "low": 100.0, "high": 260.0, "currency": "USD", "confidence": 0.5}"#,
            Usage::new(400, 60),
        );

        h.processor.process_batch(1).await.unwrap();
        let stored = h.reload(job.id).await;
        assert_eq!(stored.status, JobStatus::NeedsReview);
        assert!(stored.needs_review);
        assert!(stored.result.is_some());
    }

    #[tokio::test]
    async fn major_defect_needs_review() {
        let h = harness();
        let job = h.enqueue("CONDITION_GRADE", grade_payload()).await;
        h.client.push_text(
            r#"{"grade": "fair", "defects": [{"description": "cracked buckle", "severity": "major"}], "confidence": 0.97}"#,
            Usage::new(300, 40),
        );

        h.processor.process_batch(1).await.unwrap();
        assert_eq!(h.reload(job.id).await.status, JobStatus::NeedsReview);
    }

    #[tokio::test]
    async fn condition_grade_fails_twice_then_succeeds() {
        let h = harness();
        let job = h.enqueue("CONDITION_GRADE", grade_payload()).await;

        h.client.push_error(ProviderError::Timeout(std::time::Duration::from_secs(60)));
        h.processor.process_batch(1).await.unwrap();
        let after_first = h.reload(job.id).await;
        assert_eq!(after_first.status, JobStatus::Pending);
        assert_eq!(after_first.attempts, 1);
        assert_eq!(after_first.available_at, h.clock.now() + Duration::seconds(2));

        // Not claimable until the backoff elapses.
        assert_eq!(h.processor.process_batch(1).await.unwrap().processed, 0);

        h.clock.advance(Duration::seconds(2));
        h.client.push_error(ProviderError::RateLimited { retry_after: None });
        h.processor.process_batch(1).await.unwrap();
        let after_second = h.reload(job.id).await;
        assert_eq!(after_second.status, JobStatus::Pending);
        assert_eq!(after_second.attempts, 2);
        assert_eq!(after_second.available_at, h.clock.now() + Duration::seconds(4));

        h.clock.advance(Duration::seconds(4));
        h.client.push_text(GOOD_GRADE, Usage::new(300, 40));
        h.processor.process_batch(1).await.unwrap();

        let done = h.reload(job.id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.attempts, 2);
        assert!(done.result.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn listings_job_on_last_attempt_fails() {
        let h = harness();
        let job = Job::with_type_name(
            UserId::new(),
            "GENERATE_LISTINGS",
            json!({"title": "Wool coat", "marketplaces": ["ebay", "depop"]}),
            h.clock.now(),
        )
        .with_attempts(2)
        .with_max_attempts(3);
        h.store.enqueue(job.clone()).await.unwrap();
        h.client.push_error(ProviderError::Status {
            status: 503,
            body: "upstream unavailable".to_string(),
        });

        let report = h.processor.process_batch(1).await.unwrap();
        assert_eq!(report.results[0].status, JobStatus::Failed);

        let stored = h.reload(job.id).await;
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.available_at, job.available_at);
        assert!(stored.error_message.unwrap().contains("503"));
        assert!(!stored.needs_review);
    }

    #[tokio::test]
    async fn large_attempt_budget_retries_within_max_delay() {
        let h = harness();
        let job = Job::with_type_name(
            UserId::new(),
            "NORMALIZE",
            json!({"title": "denim jacket"}),
            h.clock.now(),
        )
        .with_attempts(50)
        .with_max_attempts(100);
        h.store.enqueue(job.clone()).await.unwrap();
        h.client.push_error(ProviderError::Transport("connection reset".to_string()));

        let report = h.processor.process_batch(1).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.results[0].status, JobStatus::Pending);

        let stored = h.reload(job.id).await;
        assert_eq!(stored.attempts, 51);
        assert_eq!(
            stored.available_at,
            h.clock.now() + Duration::seconds(RetryPolicy::DEFAULT_MAX_DELAY_SECS)
        );
    }

    #[tokio::test]
    async fn unknown_type_fails_without_calling_provider() {
        let h = harness();
        let job = h.enqueue("TRANSLATE", json!({"text": "hola"})).await;

        let report = h.processor.process_batch(1).await.unwrap();
        assert_eq!(report.results[0].status, JobStatus::Failed);

        let stored = h.reload(job.id).await;
        assert_eq!(stored.attempts, 0);
        assert!(stored.error_message.unwrap().contains("unknown job type"));
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_output_is_retried_and_billed() {
        let h = harness();
        let job = h.enqueue("NORMALIZE", json!({"title": "nike af1 wht sz10"})).await;
        h.client.push_text("Here you go: Nike Air Force 1", Usage::new(200, 20));

        h.processor.process_batch(1).await.unwrap();
        let stored = h.reload(job.id).await;
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.tokens_used, 220);
        assert_eq!(stored.raw_output.as_deref(), Some("Here you go: Nike Air Force 1"));

        let usage = h
            .ledger
            .usage(job.owner_user_id, UsagePeriod::day_of(h.clock.now()))
            .await
            .unwrap();
        assert_eq!(usage.tokens, 220);
    }

    #[tokio::test]
    async fn usage_is_recorded_for_every_billed_call() {
        let h = harness();
        let job = h.enqueue("NORMALIZE", json!({"title": "levis 501 w32"})).await;

        h.client.push_text("not json", Usage::new(100, 10));
        h.processor.process_batch(1).await.unwrap();
        h.clock.advance(Duration::seconds(2));
        h.client.push_text(
            r#"{"title": "Levi's 501 Jeans W32", "brand": "Levi's", "confidence": 0.9}"#,
            Usage::new(100, 30),
        );
        h.processor.process_batch(1).await.unwrap();

        let stored = h.reload(job.id).await;
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.tokens_used, 240);

        let month = h
            .ledger
            .usage(job.owner_user_id, UsagePeriod::month_of(h.clock.now()))
            .await
            .unwrap();
        assert_eq!(month.tokens, 240);
    }

    #[tokio::test]
    async fn one_result_entry_per_claimed_job() {
        let h = harness();
        h.enqueue("NORMALIZE", json!({"title": "a"})).await;
        h.enqueue("UNSUPPORTED", json!({})).await;
        h.enqueue("GENERATE_EMBEDDING", json!({"text": "linen shirt"})).await;

        h.client.push_text(r#"{"title": "A", "confidence": 0.8}"#, Usage::new(10, 5));
        h.client.push_embedding(vec![0.1, 0.2, 0.3], Usage::new(3, 0));

        let report = h.processor.process_batch(10).await.unwrap();
        assert_eq!(report.processed, 3);
        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert!(statuses.contains(&JobStatus::Succeeded));
        assert!(statuses.contains(&JobStatus::Failed));
        assert_eq!(
            statuses.iter().filter(|s| **s == JobStatus::Succeeded).count(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_never_share_jobs() {
        let h = harness();
        for i in 0..20 {
            h.enqueue("NORMALIZE", json!({"title": format!("item {i}")})).await;
            h.client.push_text(r#"{"title": "T", "confidence": 0.9}"#, Usage::new(1, 1));
        }
        let processor = Arc::new(h.processor);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = processor.clone();
                tokio::spawn(async move { p.process_batch(6).await.unwrap() })
            })
            .collect();

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            for outcome in handle.await.unwrap().results {
                assert!(ids.insert(outcome.job_id));
            }
        }
        assert_eq!(ids.len(), 20);
    }
}
