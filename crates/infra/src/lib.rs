//! Infrastructure layer: job storage, usage ledger, provider client, config.

pub mod config;
pub mod db;
pub mod external;
pub mod jobs;
pub mod usage;
