//! Postgres wiring: pool construction, schema bootstrap, error mapping.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// DDL for every table this crate reads or writes.
pub const SCHEMA: &str = include_str!("../migrations/0001_enrichment.sql");

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Create tables and indexes if they do not exist yet. Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("database schema ensured");
    Ok(())
}

/// Render a sqlx error with the operation that produced it.
pub(crate) fn describe_sqlx_error(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("database error in {operation} ({code}): {}", db_err.message()),
            None => format!("database error in {operation}: {}", db_err.message()),
        },
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::PoolTimedOut => format!("timed out acquiring connection in {operation}"),
        other => format!("{operation} failed: {other}"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::str::FromStr;

    use sqlx::PgPool;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use uuid::Uuid;

    /// Pool pinned to a freshly created schema, so tests sharing one database
    /// never see each other's rows.
    pub(crate) struct ScratchSchema {
        pub(crate) pool: PgPool,
        admin: PgPool,
        name: String,
    }

    impl ScratchSchema {
        /// `None` when `DATABASE_URL` is unset.
        pub(crate) async fn create() -> Option<Self> {
            let url = std::env::var("DATABASE_URL").ok()?;
            let admin = super::connect(&url, 1).await.expect("connect to DATABASE_URL");
            let name = format!("lotwise_test_{}", Uuid::new_v4().simple());
            let ddl = format!("CREATE SCHEMA {name}");
            sqlx::query(&ddl).execute(&admin).await.expect("create scratch schema");

            let options = PgConnectOptions::from_str(&url)
                .expect("parse DATABASE_URL")
                .options([("search_path", name.as_str())]);
            let pool = PgPoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await
                .expect("connect to scratch schema");
            super::ensure_schema(&pool).await.expect("bootstrap scratch schema");

            Some(Self { pool, admin, name })
        }

        pub(crate) async fn cleanup(self) {
            self.pool.close().await;
            let ddl = format!("DROP SCHEMA {} CASCADE", self.name);
            sqlx::query(&ddl).execute(&self.admin).await.expect("drop scratch schema");
        }
    }
}
