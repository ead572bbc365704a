//! Payload and result shapes per job type, plus the output validators that
//! enforce them on provider responses.
//!
//! Payloads are produced by external consumers; results are produced by the
//! completion provider and must pass [`OutputValidator::validate`] before they
//! are persisted.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::job_type::JobType;
use crate::result::ValidationError;

/// Semantic checks applied after a result deserializes.
pub trait ResultShape: DeserializeOwned + Serialize {
    fn check(&self) -> Result<(), ValidationError>;
}

fn check_confidence(confidence: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::constraint(
            "confidence",
            format!("must be within [0, 1], got {confidence}"),
        ));
    }
    Ok(())
}

fn check_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::constraint(field, "must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// NORMALIZE

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizePayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeResult {
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub confidence: f64,
}

impl ResultShape for NormalizeResult {
    fn check(&self) -> Result<(), ValidationError> {
        check_non_empty("title", &self.title)?;
        check_confidence(self.confidence)
    }
}

// ---------------------------------------------------------------------------
// PRICE_SUGGESTION

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparable {
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub sold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSuggestionPayload {
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub comparables: Vec<Comparable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSuggestionResult {
    pub suggested_price: f64,
    pub low: f64,
    pub high: f64,
    pub currency: String,
    #[serde(default)]
    pub rationale: String,
    pub confidence: f64,
}

impl ResultShape for PriceSuggestionResult {
    fn check(&self) -> Result<(), ValidationError> {
        if self.low < 0.0 {
            return Err(ValidationError::constraint("low", "must not be negative"));
        }
        if !(self.low <= self.suggested_price && self.suggested_price <= self.high) {
            return Err(ValidationError::constraint(
                "suggested_price",
                format!(
                    "must lie within [low, high] = [{}, {}], got {}",
                    self.low, self.high, self.suggested_price
                ),
            ));
        }
        if self.currency.len() != 3 {
            return Err(ValidationError::constraint(
                "currency",
                "must be a 3-letter ISO code",
            ));
        }
        check_confidence(self.confidence)
    }
}

// ---------------------------------------------------------------------------
// CONDITION_GRADE

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGradePayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub seller_notes: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionGrade {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectSeverity {
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub description: String,
    pub severity: DefectSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGradeResult {
    pub grade: ConditionGrade,
    #[serde(default)]
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub summary: String,
    pub confidence: f64,
}

impl ResultShape for ConditionGradeResult {
    fn check(&self) -> Result<(), ValidationError> {
        if self.grade == ConditionGrade::New
            && self.defects.iter().any(|d| d.severity == DefectSeverity::Major)
        {
            return Err(ValidationError::constraint(
                "grade",
                "an item with major defects cannot be graded new",
            ));
        }
        check_confidence(self.confidence)
    }
}

// ---------------------------------------------------------------------------
// GENERATE_LISTINGS

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateListingsPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    pub marketplaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCopy {
    pub marketplace: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateListingsResult {
    pub listings: Vec<ListingCopy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ResultShape for GenerateListingsResult {
    fn check(&self) -> Result<(), ValidationError> {
        if self.listings.is_empty() {
            return Err(ValidationError::constraint(
                "listings",
                "at least one listing is required",
            ));
        }
        for listing in &self.listings {
            check_non_empty("listings.title", &listing.title)?;
            check_non_empty("listings.description", &listing.description)?;
        }
        match self.confidence {
            Some(c) => check_confidence(c),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// GENERATE_EMBEDDING

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateEmbeddingPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub dimensions: usize,
}

impl ResultShape for EmbeddingResult {
    fn check(&self) -> Result<(), ValidationError> {
        if self.embedding.is_empty() {
            return Err(ValidationError::constraint("embedding", "must not be empty"));
        }
        if self.embedding.len() != self.dimensions {
            return Err(ValidationError::constraint(
                "dimensions",
                format!(
                    "declares {} but vector has {}",
                    self.dimensions,
                    self.embedding.len()
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Validator registered for one job type.
///
/// Deserializes the candidate into the type's result shape, applies its
/// semantic checks, and returns the normalized JSON (unknown fields dropped).
#[derive(Clone, Copy)]
pub struct OutputValidator {
    job_type: JobType,
    validate: fn(&JsonValue) -> Result<JsonValue, ValidationError>,
}

impl OutputValidator {
    pub fn for_type(job_type: JobType) -> Self {
        let validate: fn(&JsonValue) -> Result<JsonValue, ValidationError> = match job_type {
            JobType::Normalize => validate_as::<NormalizeResult>,
            JobType::PriceSuggestion => validate_as::<PriceSuggestionResult>,
            JobType::ConditionGrade => validate_as::<ConditionGradeResult>,
            JobType::GenerateListings => validate_as::<GenerateListingsResult>,
            JobType::GenerateEmbedding => validate_as::<EmbeddingResult>,
        };
        Self { job_type, validate }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn validate(&self, candidate: &JsonValue) -> Result<JsonValue, ValidationError> {
        (self.validate)(candidate)
    }

    /// Parse provider text (optionally wrapped in a markdown code fence) and validate it.
    pub fn validate_text(&self, text: &str) -> Result<JsonValue, ValidationError> {
        let candidate: JsonValue = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.validate(&candidate)
    }
}

impl fmt::Debug for OutputValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputValidator")
            .field("job_type", &self.job_type)
            .finish()
    }
}

fn validate_as<T: ResultShape>(candidate: &JsonValue) -> Result<JsonValue, ValidationError> {
    let parsed: T = serde_json::from_value(candidate.clone())
        .map_err(|e| ValidationError::Shape(e.to_string()))?;
    parsed.check()?;
    serde_json::to_value(&parsed).map_err(|e| ValidationError::Shape(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
