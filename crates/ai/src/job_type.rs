//! Closed catalogue of enrichment job types.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::result::FatalError;

/// The fixed set of enrichment work a job can request.
///
/// Persisted as its wire name (`NORMALIZE`, `PRICE_SUGGESTION`, ...). Parsing an
/// unrecognised name yields [`FatalError::UnknownJobType`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Normalize,
    PriceSuggestion,
    ConditionGrade,
    GenerateListings,
    GenerateEmbedding,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Normalize,
        JobType::PriceSuggestion,
        JobType::ConditionGrade,
        JobType::GenerateListings,
        JobType::GenerateEmbedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Normalize => "NORMALIZE",
            JobType::PriceSuggestion => "PRICE_SUGGESTION",
            JobType::ConditionGrade => "CONDITION_GRADE",
            JobType::GenerateListings => "GENERATE_LISTINGS",
            JobType::GenerateEmbedding => "GENERATE_EMBEDDING",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = FatalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FatalError::UnknownJobType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
            assert_eq!(
                serde_json::to_value(t).unwrap(),
                serde_json::Value::String(t.as_str().to_string())
            );
        }
    }

    #[test]
    fn unknown_name_is_fatal() {
        let err = "SUMMARIZE".parse::<JobType>().unwrap_err();
        assert_eq!(err, FatalError::UnknownJobType("SUMMARIZE".to_string()));
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!("normalize".parse::<JobType>().is_err());
    }
}
