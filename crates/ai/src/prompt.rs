//! Prompt builder and schema registry.
//!
//! Each job type has one [`JobTypeSchema`]: the instructions sent to the
//! provider, the generation options, and the validator its output must pass.
//! Supporting a new job type means adding a registry entry; nothing in the
//! claim/retry path changes.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::completion::{CompletionOptions, CompletionRequest};
use crate::job_type::JobType;
use crate::result::FatalError;
use crate::schema::{
    ConditionGradePayload, GenerateEmbeddingPayload, GenerateListingsPayload, NormalizePayload,
    OutputValidator, PriceSuggestionPayload,
};

const SYSTEM_PROMPT: &str = "You are an assistant for second-hand resellers. \
You enrich inventory records. Reply with a single JSON object and nothing else.";

/// Static registry entry for a job type.
#[derive(Debug, Clone)]
pub struct JobTypeSchema {
    pub job_type: JobType,
    /// Task instructions; the payload and expected output shape are appended.
    pub instructions: &'static str,
    /// Example of the JSON object the provider must return.
    pub output_example: &'static str,
    pub options: CompletionOptions,
    pub validator: OutputValidator,
}

/// A ready-to-send request plus everything needed to check its response.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub job_type: JobType,
    pub request: CompletionRequest,
    pub validator: OutputValidator,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    entries: HashMap<JobType, JobTypeSchema>,
}

impl PromptRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with an entry for every job type in the catalogue.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for job_type in JobType::ALL {
            registry.register(standard_schema(job_type));
        }
        registry
    }

    pub fn register(&mut self, schema: JobTypeSchema) {
        self.entries.insert(schema.job_type, schema);
    }

    pub fn get(&self, job_type: JobType) -> Option<&JobTypeSchema> {
        self.entries.get(&job_type)
    }

    /// Build the provider request for a persisted job.
    ///
    /// Fails with [`FatalError::UnknownJobType`] when the name is outside the
    /// catalogue or has no registered entry, and with
    /// [`FatalError::InvalidPayload`] when the payload does not decode into the
    /// type's payload shape.
    pub fn build_request(
        &self,
        job_type: &str,
        payload: &JsonValue,
    ) -> Result<BuiltRequest, FatalError> {
        let job_type: JobType = job_type.parse()?;
        let schema = self
            .get(job_type)
            .ok_or_else(|| FatalError::UnknownJobType(job_type.to_string()))?;

        let request = match job_type {
            JobType::GenerateEmbedding => {
                let p: GenerateEmbeddingPayload = decode(job_type, payload)?;
                if p.text.trim().is_empty() {
                    return Err(FatalError::InvalidPayload {
                        job_type: job_type.to_string(),
                        reason: "text must not be empty".to_string(),
                    });
                }
                CompletionRequest::Embedding { input: p.text }
            }
            _ => {
                let input = typed_input(job_type, payload)?;
                CompletionRequest::Chat {
                    system: SYSTEM_PROMPT.to_string(),
                    prompt: render(schema, &input),
                }
            }
        };

        Ok(BuiltRequest {
            job_type,
            request,
            validator: schema.validator,
            options: schema.options,
        })
    }
}

fn decode<T: DeserializeOwned>(job_type: JobType, payload: &JsonValue) -> Result<T, FatalError> {
    serde_json::from_value(payload.clone()).map_err(|e| FatalError::InvalidPayload {
        job_type: job_type.to_string(),
        reason: e.to_string(),
    })
}

/// Decode into the typed payload and re-encode, so only known fields reach the prompt.
fn typed_input(job_type: JobType, payload: &JsonValue) -> Result<JsonValue, FatalError> {
    let reencoded = match job_type {
        JobType::Normalize => serde_json::to_value(decode::<NormalizePayload>(job_type, payload)?),
        JobType::PriceSuggestion => {
            serde_json::to_value(decode::<PriceSuggestionPayload>(job_type, payload)?)
        }
        JobType::ConditionGrade => {
            serde_json::to_value(decode::<ConditionGradePayload>(job_type, payload)?)
        }
        JobType::GenerateListings => {
            let p = decode::<GenerateListingsPayload>(job_type, payload)?;
            if p.marketplaces.is_empty() {
                return Err(FatalError::InvalidPayload {
                    job_type: job_type.to_string(),
                    reason: "marketplaces must not be empty".to_string(),
                });
            }
            serde_json::to_value(p)
        }
        JobType::GenerateEmbedding => {
            serde_json::to_value(decode::<GenerateEmbeddingPayload>(job_type, payload)?)
        }
    };
    reencoded.map_err(|e| FatalError::InvalidPayload {
        job_type: job_type.to_string(),
        reason: e.to_string(),
    })
}

fn render(schema: &JobTypeSchema, input: &JsonValue) -> String {
    let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    format!(
        "{}\n\nItem:\n{}\n\nRespond with JSON shaped like:\n{}",
        schema.instructions, input, schema.output_example
    )
}

fn standard_schema(job_type: JobType) -> JobTypeSchema {
    let (instructions, output_example, options) = match job_type {
        JobType::Normalize => (
            "Normalize this listing: clean up the title, identify brand and category, \
             and extract structured attributes (size, color, material, model). \
             Set confidence to how sure you are of the brand and category.",
            r#"{"title": "...", "brand": "...", "category": "...", "attributes": {"size": "M"}, "confidence": 0.0}"#,
            CompletionOptions {
                temperature: 0.1,
                max_tokens: 600,
            },
        ),
        JobType::PriceSuggestion => (
            "Suggest a resale price for this item. Use the comparables when present; \
             prefer sold comparables over active ones. Give a low/high range that \
             contains the suggested price and explain the reasoning briefly.",
            r#"{"suggested_price": 0.0, "low": 0.0, "high": 0.0, "currency": "USD", "rationale": "...", "confidence": 0.0}"#,
            CompletionOptions {
                temperature: 0.2,
                max_tokens: 500,
            },
        ),
        JobType::ConditionGrade => (
            "Grade the condition of this item as one of new, like_new, good, fair, poor. \
             List every visible or described defect with severity minor, moderate or major.",
            r#"{"grade": "good", "defects": [{"description": "...", "severity": "minor"}], "summary": "...", "confidence": 0.0}"#,
            CompletionOptions {
                temperature: 0.1,
                max_tokens: 700,
            },
        ),
        JobType::GenerateListings => (
            "Write marketplace listing copy for this item, one listing per requested \
             marketplace, respecting each marketplace's title length conventions. \
             Include search tags.",
            r#"{"listings": [{"marketplace": "...", "title": "...", "description": "...", "tags": ["..."]}], "confidence": 0.0}"#,
            CompletionOptions {
                temperature: 0.7,
                max_tokens: 1500,
            },
        ),
        JobType::GenerateEmbedding => (
            "Embed the item text.",
            r#"{"embedding": [0.0], "dimensions": 1}"#,
            CompletionOptions {
                temperature: 0.0,
                max_tokens: 0,
            },
        ),
    };

    JobTypeSchema {
        job_type,
        instructions,
        output_example,
        options,
        validator: OutputValidator::for_type(job_type),
    }
}
