//! Per-user usage ledger.
//!
//! Every provider call that reports usage is recorded here, whatever happens to
//! the job afterwards. Counters are kept per calendar day and per calendar month
//! (UTC) and are only ever changed by atomic increments.

pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use lotwise_core::UserId;

pub use postgres::PostgresUsageLedger;

/// A counter bucket.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UsagePeriod {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
}

impl UsagePeriod {
    pub fn day_of(at: DateTime<Utc>) -> Self {
        UsagePeriod::Day(at.date_naive())
    }

    pub fn month_of(at: DateTime<Utc>) -> Self {
        UsagePeriod::Month {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Both buckets a usage record at `at` contributes to.
    pub fn buckets(at: DateTime<Utc>) -> [UsagePeriod; 2] {
        [Self::day_of(at), Self::month_of(at)]
    }

    /// Storage key: `YYYY-MM-DD` for days, `YYYY-MM` for months.
    pub fn key(&self) -> String {
        match self {
            UsagePeriod::Day(date) => date.format("%Y-%m-%d").to_string(),
            UsagePeriod::Month { year, month } => format!("{year:04}-{month:02}"),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Atomically add `tokens` and `cost_usd` to the user's day and month counters.
    async fn record(
        &self,
        user_id: UserId,
        tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Current totals for one bucket; zero when nothing was recorded.
    async fn usage(&self, user_id: UserId, period: UsagePeriod)
    -> Result<UsageTotals, LedgerError>;
}

/// In-memory ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    counters: Mutex<HashMap<(UserId, String), UsageTotals>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn record(
        &self,
        user_id: UserId,
        tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        for period in UsagePeriod::buckets(at) {
            let totals = counters.entry((user_id, period.key())).or_default();
            totals.tokens += tokens;
            totals.cost_usd += cost_usd;
        }
        Ok(())
    }

    async fn usage(
        &self,
        user_id: UserId,
        period: UsagePeriod,
    ) -> Result<UsageTotals, LedgerError> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        Ok(counters
            .get(&(user_id, period.key()))
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl<T: UsageLedger + ?Sized> UsageLedger for Arc<T> {
    async fn record(
        &self,
        user_id: UserId,
        tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        (**self).record(user_id, tokens, cost_usd, at).await
    }

    async fn usage(
        &self,
        user_id: UserId,
        period: UsagePeriod,
    ) -> Result<UsageTotals, LedgerError> {
        (**self).usage(user_id, period).await
    }
}
