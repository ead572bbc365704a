//! `lotwise-ai`
//!
//! **Responsibility:** the AI boundary of the enrichment pipeline.
//!
//! This crate is intentionally storage- and runtime-agnostic:
//! - It knows the job type catalogue, payload/result shapes and prompts.
//! - It defines the completion provider contract, not a transport.
//! - Its policies are pure functions; persisting their decisions is up to callers.

pub mod completion;
pub mod job_type;
pub mod mock;
pub mod prompt;
pub mod result;
pub mod review;
pub mod schema;

pub use completion::{
    BilledCall, Completion, CompletionClient, CompletionOptions, CompletionRequest,
    ProviderContent, ProviderError, RawCompletion, Usage,
};
pub use job_type::JobType;
pub use mock::ScriptedCompletionClient;
pub use prompt::{BuiltRequest, JobTypeSchema, PromptRegistry};
pub use result::{FatalError, JobError, ValidationError};
pub use review::{REVIEW_CONFIDENCE_THRESHOLD, ReviewPolicy, classify};
pub use schema::OutputValidator;
