//! Postgres-backed usage ledger.
//!
//! Increments are a single `INSERT .. ON CONFLICT DO UPDATE SET tokens = tokens + $n`,
//! so concurrent writers serialize on the row lock and no increment is lost.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use lotwise_core::UserId;

use super::{LedgerError, UsageLedger, UsagePeriod, UsageTotals};
use crate::db::describe_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresUsageLedger {
    pool: Arc<PgPool>,
}

impl PostgresUsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UsageLedger for PostgresUsageLedger {
    #[instrument(skip(self), err)]
    async fn record(
        &self,
        user_id: UserId,
        tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let [day, month] = UsagePeriod::buckets(at);

        sqlx::query(
            r#"
            INSERT INTO usage_counters (user_id, period, tokens, cost_usd, updated_at)
            VALUES ($1, $2, $4, $5, $6), ($1, $3, $4, $5, $6)
            ON CONFLICT (user_id, period) DO UPDATE
            SET tokens = usage_counters.tokens + EXCLUDED.tokens,
                cost_usd = usage_counters.cost_usd + EXCLUDED.cost_usd,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(day.key())
        .bind(month.key())
        .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
        .bind(cost_usd)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| LedgerError::Storage(describe_sqlx_error("usage.record", &e)))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn usage(
        &self,
        user_id: UserId,
        period: UsagePeriod,
    ) -> Result<UsageTotals, LedgerError> {
        let row = sqlx::query(
            "SELECT tokens, cost_usd FROM usage_counters WHERE user_id = $1 AND period = $2",
        )
        .bind(user_id.as_uuid())
        .bind(period.key())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| LedgerError::Storage(describe_sqlx_error("usage.get", &e)))?;

        let Some(row) = row else {
            return Ok(UsageTotals::default());
        };
        let tokens: i64 = row
            .try_get("tokens")
            .map_err(|e| LedgerError::Storage(describe_sqlx_error("usage.get", &e)))?;
        let cost_usd: f64 = row
            .try_get("cost_usd")
            .map_err(|e| LedgerError::Storage(describe_sqlx_error("usage.get", &e)))?;

        Ok(UsageTotals {
            tokens: tokens.max(0) as u64,
            cost_usd,
        })
    }
}
