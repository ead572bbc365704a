//! Enrichment job queue: record, storage, retry policy, batch processor.
//!
//! ## Design
//!
//! - Jobs are owned by a user and carry a type name plus a JSON payload
//! - Workers claim batches atomically; a claimed job is PROCESSING until saved
//! - Failures retry with exponential backoff until the attempt budget runs out
//! - Completed results are classified into SUCCEEDED or NEEDS_REVIEW
//!
//! ## Components
//!
//! - `Job`: record and state machine
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `RetryPolicy`: backoff and retry-or-fail decision
//! - `JobProcessor`: claims and drives a batch

pub mod postgres;
pub mod processor;
pub mod retry;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use processor::{BatchReport, JobOutcome, JobProcessor, ProcessError};
pub use retry::{
    FailureDecision, FixedJitter, JitterSource, RetryPolicy, SeededJitter, ThreadRngJitter,
};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{DEFAULT_MAX_ATTEMPTS, Job, JobStatus};
