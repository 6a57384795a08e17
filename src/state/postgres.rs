//! PostgreSQL swap store

use super::records::{SwapRecord, SwapResultRecord};
use super::repository::{ResultFilter, StatusQuery, SwapRepository};
use super::updates::{SwapFields, SwapResultFields};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::status::{SettleStatus, VerifyStatus};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;

const SWAP_COLUMNS: &str =
    "key, from_chain_id, to_chain_id, tx_id, log_index, status, timestamp, memo";

const RESULT_COLUMNS: &str = "key, from_chain_id, to_chain_id, tx_id, log_index, pair_id, \
     tx_to, tx_height, tx_time, from_address, to_address, bind, value, for_native, \
     for_underlying, token, path, amount_out_min, swap_tx, old_swap_txs, swap_height, \
     swap_time, swap_value, swap_type, swap_nonce, status, timestamp, memo";

/// Swap store backed by PostgreSQL
pub struct PgSwapStore {
    pool: PgPool,
}

impl PgSwapStore {
    /// Connect to the database
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                key TEXT PRIMARY KEY,
                from_chain_id TEXT NOT NULL,
                to_chain_id TEXT NOT NULL,
                tx_id TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                status VARCHAR(32) NOT NULL,
                timestamp BIGINT NOT NULL,
                memo TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_status_time
            ON swaps (status, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_chain_tx
            ON swaps (from_chain_id, tx_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_results (
                key TEXT PRIMARY KEY,
                from_chain_id TEXT NOT NULL,
                to_chain_id TEXT NOT NULL,
                tx_id TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                pair_id TEXT NOT NULL,
                tx_to TEXT NOT NULL,
                tx_height BIGINT NOT NULL,
                tx_time BIGINT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                bind TEXT NOT NULL,
                value TEXT NOT NULL,
                for_native BOOLEAN NOT NULL,
                for_underlying BOOLEAN NOT NULL,
                token TEXT NOT NULL,
                path TEXT[] NOT NULL DEFAULT '{}',
                amount_out_min TEXT NOT NULL,
                swap_tx TEXT NOT NULL DEFAULT '',
                old_swap_txs TEXT[] NOT NULL DEFAULT '{}',
                swap_height BIGINT NOT NULL DEFAULT 0,
                swap_time BIGINT NOT NULL DEFAULT 0,
                swap_value TEXT NOT NULL DEFAULT '0',
                swap_type INTEGER NOT NULL DEFAULT 0,
                swap_nonce BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(32) NOT NULL,
                timestamp BIGINT NOT NULL,
                memo TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swap_results_status_time
            ON swap_results (status, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swap_results_from
            ON swap_results (from_chain_id, from_address, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

/// Map driver errors onto the store taxonomy
fn store_error(key: &str, err: sqlx::Error) -> RelayerError {
    match err {
        sqlx::Error::RowNotFound => RelayerError::NotFound {
            key: key.to_string(),
        },
        sqlx::Error::Database(db) if db.is_unique_violation() => RelayerError::DuplicateKey {
            key: key.to_string(),
        },
        other => RelayerError::StoreUnavailable(other),
    }
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: &str) -> RelayerResult<T> {
    raw.parse::<T>().map_err(RelayerError::StoreBackend)
}

fn swap_from_row(row: &PgRow) -> RelayerResult<SwapRecord> {
    let status: String = row.try_get("status")?;
    Ok(SwapRecord {
        key: row.try_get("key")?,
        from_chain_id: row.try_get("from_chain_id")?,
        to_chain_id: row.try_get("to_chain_id")?,
        tx_id: row.try_get("tx_id")?,
        log_index: row.try_get::<i32, _>("log_index")? as u32,
        status: parse_status::<VerifyStatus>(&status)?,
        timestamp: row.try_get("timestamp")?,
        memo: row.try_get("memo")?,
    })
}

fn result_from_row(row: &PgRow) -> RelayerResult<SwapResultRecord> {
    let status: String = row.try_get("status")?;
    Ok(SwapResultRecord {
        key: row.try_get("key")?,
        from_chain_id: row.try_get("from_chain_id")?,
        to_chain_id: row.try_get("to_chain_id")?,
        tx_id: row.try_get("tx_id")?,
        log_index: row.try_get::<i32, _>("log_index")? as u32,
        pair_id: row.try_get("pair_id")?,
        tx_to: row.try_get("tx_to")?,
        tx_height: row.try_get::<i64, _>("tx_height")? as u64,
        tx_time: row.try_get::<i64, _>("tx_time")? as u64,
        from: row.try_get("from_address")?,
        to: row.try_get("to_address")?,
        bind: row.try_get("bind")?,
        value: row.try_get("value")?,
        for_native: row.try_get("for_native")?,
        for_underlying: row.try_get("for_underlying")?,
        token: row.try_get("token")?,
        path: row.try_get("path")?,
        amount_out_min: row.try_get("amount_out_min")?,
        swap_tx: row.try_get("swap_tx")?,
        old_swap_txs: row.try_get("old_swap_txs")?,
        swap_height: row.try_get::<i64, _>("swap_height")? as u64,
        swap_time: row.try_get::<i64, _>("swap_time")? as u64,
        swap_value: row.try_get("swap_value")?,
        swap_type: row.try_get::<i32, _>("swap_type")? as u32,
        swap_nonce: row.try_get::<i64, _>("swap_nonce")? as u64,
        status: parse_status::<SettleStatus>(&status)?,
        timestamp: row.try_get("timestamp")?,
        memo: row.try_get("memo")?,
    })
}

/// Append `WHERE status = .. AND timestamp >= .. [AND from_chain_id = ..]`
fn push_status_query(qb: &mut QueryBuilder<'_, Postgres>, status: &'static str, since: i64, chain_id: Option<String>) {
    qb.push(" WHERE status = ").push_bind(status);
    qb.push(" AND timestamp >= ").push_bind(since);
    if let Some(chain_id) = chain_id {
        qb.push(" AND from_chain_id = ").push_bind(chain_id);
    }
}

#[async_trait]
impl SwapRepository for PgSwapStore {
    async fn insert_swap(&self, swap: &SwapRecord) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO swaps
                (key, from_chain_id, to_chain_id, tx_id, log_index, status, timestamp, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&swap.key)
        .bind(&swap.from_chain_id)
        .bind(&swap.to_chain_id)
        .bind(&swap.tx_id)
        .bind(swap.log_index as i32)
        .bind(swap.status.as_str())
        .bind(swap.timestamp)
        .bind(&swap.memo)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(&swap.key, e))?;

        Ok(())
    }

    async fn update_swap(&self, key: &str, fields: &SwapFields) -> RelayerResult<()> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE swaps SET status = ");
        qb.push_bind(fields.status.as_str());
        qb.push(", timestamp = ").push_bind(fields.timestamp);
        if let Some(memo) = &fields.memo {
            qb.push(", memo = ").push_bind(memo.clone());
        }
        qb.push(" WHERE key = ").push_bind(key.to_string());

        let done = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(key, e))?;
        if done.rows_affected() == 0 {
            return Err(RelayerError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn get_swap(&self, key: &str) -> RelayerResult<SwapRecord> {
        let row = sqlx::query(&format!("SELECT {} FROM swaps WHERE key = $1", SWAP_COLUMNS))
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(key, e))?;
        swap_from_row(&row)
    }

    async fn first_swap(&self, chain_id: &str, tx_id: &str) -> RelayerResult<SwapRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swaps WHERE from_chain_id = $1 AND tx_id = $2 ORDER BY log_index LIMIT 1",
            SWAP_COLUMNS
        ))
        .bind(chain_id)
        .bind(tx_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(&format!("{}:{}:*", chain_id, tx_id), e))?;
        swap_from_row(&row)
    }

    async fn swaps_with_status(
        &self,
        query: &StatusQuery<VerifyStatus>,
    ) -> RelayerResult<Vec<SwapRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM swaps", SWAP_COLUMNS));
        push_status_query(&mut qb, query.status.as_str(), query.since, query.chain_id.clone());
        qb.push(" ORDER BY timestamp ASC LIMIT ").push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(swap_from_row).collect()
    }

    async fn insert_swap_result(&self, result: &SwapResultRecord) -> RelayerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO swap_results ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
              $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)",
            RESULT_COLUMNS
        ))
        .bind(&result.key)
        .bind(&result.from_chain_id)
        .bind(&result.to_chain_id)
        .bind(&result.tx_id)
        .bind(result.log_index as i32)
        .bind(&result.pair_id)
        .bind(&result.tx_to)
        .bind(result.tx_height as i64)
        .bind(result.tx_time as i64)
        .bind(&result.from)
        .bind(&result.to)
        .bind(&result.bind)
        .bind(&result.value)
        .bind(result.for_native)
        .bind(result.for_underlying)
        .bind(&result.token)
        .bind(&result.path)
        .bind(&result.amount_out_min)
        .bind(&result.swap_tx)
        .bind(&result.old_swap_txs)
        .bind(result.swap_height as i64)
        .bind(result.swap_time as i64)
        .bind(&result.swap_value)
        .bind(result.swap_type as i32)
        .bind(result.swap_nonce as i64)
        .bind(result.status.as_str())
        .bind(result.timestamp)
        .bind(&result.memo)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(&result.key, e))?;

        Ok(())
    }

    async fn update_swap_result(&self, key: &str, fields: &SwapResultFields) -> RelayerResult<()> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE swap_results SET timestamp = ");
        qb.push_bind(fields.timestamp);
        if let Some(status) = fields.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(memo) = &fields.memo {
            qb.push(", memo = ").push_bind(memo.clone());
        }
        if let Some(swap_tx) = &fields.swap_tx {
            qb.push(", swap_tx = ").push_bind(swap_tx.clone());
        }
        if let Some(old_swap_txs) = &fields.old_swap_txs {
            qb.push(", old_swap_txs = ").push_bind(old_swap_txs.clone());
        }
        if let Some(swap_height) = fields.swap_height {
            qb.push(", swap_height = ").push_bind(swap_height as i64);
        }
        if let Some(swap_time) = fields.swap_time {
            qb.push(", swap_time = ").push_bind(swap_time as i64);
        }
        if let Some(swap_value) = &fields.swap_value {
            qb.push(", swap_value = ").push_bind(swap_value.clone());
        }
        if let Some(swap_type) = fields.swap_type {
            qb.push(", swap_type = ").push_bind(swap_type as i32);
        }
        if let Some(swap_nonce) = fields.swap_nonce {
            qb.push(", swap_nonce = ").push_bind(swap_nonce as i64);
        }
        qb.push(" WHERE key = ").push_bind(key.to_string());

        let done = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(key, e))?;
        if done.rows_affected() == 0 {
            return Err(RelayerError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn get_swap_result(&self, key: &str) -> RelayerResult<SwapResultRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_results WHERE key = $1",
            RESULT_COLUMNS
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(key, e))?;
        result_from_row(&row)
    }

    async fn first_swap_result(
        &self,
        chain_id: &str,
        tx_id: &str,
    ) -> RelayerResult<SwapResultRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_results WHERE from_chain_id = $1 AND tx_id = $2 \
             ORDER BY log_index LIMIT 1",
            RESULT_COLUMNS
        ))
        .bind(chain_id)
        .bind(tx_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(&format!("{}:{}:*", chain_id, tx_id), e))?;
        result_from_row(&row)
    }

    async fn swap_results_with_status(
        &self,
        query: &StatusQuery<SettleStatus>,
    ) -> RelayerResult<Vec<SwapResultRecord>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM swap_results", RESULT_COLUMNS));
        push_status_query(&mut qb, query.status.as_str(), query.since, query.chain_id.clone());
        qb.push(" ORDER BY timestamp ASC LIMIT ").push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn list_swap_results(&self, filter: &ResultFilter) -> RelayerResult<Vec<SwapResultRecord>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM swap_results WHERE TRUE", RESULT_COLUMNS));
        if let Some(chain_id) = &filter.chain_id {
            qb.push(" AND from_chain_id = ").push_bind(chain_id.clone());
        }
        if let Some(address) = &filter.address {
            qb.push(" AND from_address = ").push_bind(address.clone());
        }
        if filter.descending {
            qb.push(" ORDER BY timestamp DESC, key DESC");
        } else {
            qb.push(" ORDER BY timestamp ASC, key ASC");
        }
        qb.push(" OFFSET ").push_bind(filter.offset as i64);
        qb.push(" LIMIT ").push_bind(filter.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
