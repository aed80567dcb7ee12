use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// A stored poll cursor
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockCursor {
    pub block_number: i64,
    pub updated_at: DateTime<Utc>,
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Get the last processed block for a chain/relayer pair
pub async fn get_block_cursor(
    pool: &PgPool,
    chain_id: i16,
    relayer: &str,
) -> Result<Option<BlockCursor>> {
    sqlx::query_as::<_, BlockCursor>(
        r#"SELECT block_number, updated_at FROM block_cursors WHERE chain_id = $1 AND relayer = $2"#,
    )
    .bind(chain_id)
    .bind(relayer)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to get block cursor")
}

/// Upsert the block cursor. The stored value never moves backwards.
pub async fn update_block_cursor(
    pool: &PgPool,
    chain_id: i16,
    relayer: &str,
    block_number: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO block_cursors (chain_id, relayer, block_number)
        VALUES ($1, $2, $3)
        ON CONFLICT (chain_id, relayer) DO UPDATE
            SET block_number = GREATEST(block_cursors.block_number, EXCLUDED.block_number),
                updated_at = NOW()
        "#,
    )
    .bind(chain_id)
    .bind(relayer)
    .bind(block_number)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update block cursor for chain {}", chain_id))?;

    Ok(())
}
