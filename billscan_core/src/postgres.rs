//! PostgreSQL connection handling
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Wrapper around a PostgreSQL connection pool, the concrete backend for all
/// handler traits of this crate.
pub struct PostgresDB {
    pub pool: PgPool,
}

impl PostgresDB {
    pub async fn new(url: &str) -> Result<PostgresDB, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(PostgresDB { pool })
    }
}
