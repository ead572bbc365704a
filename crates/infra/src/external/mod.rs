//! External service clients/adapters.

pub mod openai;
pub mod pricing;

pub use openai::{OpenAiCompatibleClient, OpenAiSettings};
pub use pricing::{ModelPrice, PricingTable};
