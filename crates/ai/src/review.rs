//! Human-review escalation policy.

use serde_json::Value as JsonValue;

use crate::job_type::JobType;

/// Results whose `confidence` falls below this are escalated.
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Decides whether a validated result must be checked by a human before use.
///
/// Pure and deterministic: the decision depends only on `(job_type, result)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ReviewPolicy {
    pub confidence_threshold: f64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: REVIEW_CONFIDENCE_THRESHOLD,
        }
    }
}

impl ReviewPolicy {
    pub fn classify(&self, job_type: JobType, result: &JsonValue) -> bool {
        let low_confidence = result
            .get("confidence")
            .and_then(JsonValue::as_f64)
            .is_some_and(|c| c < self.confidence_threshold);

        low_confidence || type_overlay(job_type, result)
    }
}

/// `classify` with the default threshold.
pub fn classify(job_type: JobType, result: &JsonValue) -> bool {
    ReviewPolicy::default().classify(job_type, result)
}

fn type_overlay(job_type: JobType, result: &JsonValue) -> bool {
    match job_type {
        // A major defect always needs eyes on it, however sure the model is.
        JobType::ConditionGrade => result
            .get("defects")
            .and_then(JsonValue::as_array)
            .is_some_and(|defects| {
                defects
                    .iter()
                    .any(|d| d.get("severity").and_then(JsonValue::as_str) == Some("major"))
            }),
        _ => false,
    }
}
