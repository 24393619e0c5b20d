use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::errors::ApiError;
use crate::models::{ApiKey, KeyStatus, UsageBucket};
use crate::store::{Admission, KeyStore, UsageStore};
use crate::usage::UsageWindow;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const KEY_COLUMNS: &str = "id, name, digest, prefix, status, rate_limit, expires_at, \
     last_used_at, owner_id, project_id, created_at";

const BUCKET_COLUMNS: &str =
    "api_key_id, owner_id, date, hour, request_count, success_count, error_count";

/// SQLite-backed key registry and usage store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ApiError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ApiError> {
        conn.execute_batch(include_str!("../db/schema.sql"))?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|e| ApiError::StoreUnavailable(format!("connection lock poisoned: {}", e)))
    }
}

fn row_to_api_key(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    let status: String = row.get(4)?;
    let status = status.parse::<KeyStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(ApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        digest: row.get(2)?,
        prefix: row.get(3)?,
        status,
        rate_limit: row.get(5)?,
        expires_at: row.get(6)?,
        last_used_at: row.get(7)?,
        owner_id: row.get(8)?,
        project_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_bucket(row: &Row<'_>) -> rusqlite::Result<UsageBucket> {
    Ok(UsageBucket {
        api_key_id: row.get(0)?,
        owner_id: row.get(1)?,
        date: row.get(2)?,
        hour: row.get(3)?,
        request_count: row.get(4)?,
        success_count: row.get(5)?,
        error_count: row.get(6)?,
    })
}

impl KeyStore for Database {
    fn insert_key(&self, key: &ApiKey) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO api_keys ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                KEY_COLUMNS
            ),
            params![
                key.id,
                key.name,
                key.digest,
                key.prefix,
                key.status.as_str(),
                key.rate_limit,
                key.expires_at,
                key.last_used_at,
                key.owner_id,
                key.project_id,
                key.created_at,
            ],
        )?;
        Ok(())
    }

    fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, ApiError> {
        let conn = self.lock()?;
        let key = conn
            .query_row(
                &format!("SELECT {} FROM api_keys WHERE prefix = ?1", KEY_COLUMNS),
                params![prefix],
                row_to_api_key,
            )
            .optional()?;
        Ok(key)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, ApiError> {
        let conn = self.lock()?;
        let key = conn
            .query_row(
                &format!("SELECT {} FROM api_keys WHERE id = ?1", KEY_COLUMNS),
                params![id],
                row_to_api_key,
            )
            .optional()?;
        Ok(key)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_keys WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
            KEY_COLUMNS
        ))?;
        let keys = stmt
            .query_map(params![owner_id], row_to_api_key)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn set_status(&self, id: &str, status: KeyStatus) -> Result<bool, ApiError> {
        if status.is_active() {
            return Err(ApiError::InvalidRequest(
                "a key cannot be moved back to active".to_string(),
            ));
        }

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE api_keys SET status = ?1 WHERE id = ?2 AND status = 'active'",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![at, id],
        )?;
        Ok(())
    }
}

impl UsageStore for Database {
    fn increment_if_under_limit(
        &self,
        api_key_id: &str,
        owner_id: &str,
        window: UsageWindow,
        limit: u32,
    ) -> Result<Admission, ApiError> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front so other processes sharing
        // the file wait on the busy timeout instead of failing mid-transaction.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let admitted: Option<u32> = tx
            .query_row(
                "INSERT INTO usage (api_key_id, owner_id, date, hour, request_count, success_count, error_count)
                 VALUES (?1, ?2, ?3, ?4, 1, 1, 0)
                 ON CONFLICT(api_key_id, date, hour) DO UPDATE SET
                     request_count = request_count + 1,
                     success_count = success_count + 1
                 WHERE request_count < ?5
                 RETURNING request_count",
                params![api_key_id, owner_id, window.date, window.hour, limit],
                |row| row.get(0),
            )
            .optional()?;

        let admission = match admitted {
            Some(count) => Admission {
                admitted: true,
                count,
            },
            None => {
                let count: u32 = tx.query_row(
                    "SELECT request_count FROM usage WHERE api_key_id = ?1 AND date = ?2 AND hour = ?3",
                    params![api_key_id, window.date, window.hour],
                    |row| row.get(0),
                )?;
                Admission {
                    admitted: false,
                    count,
                }
            }
        };

        tx.commit()?;
        Ok(admission)
    }

    fn record_success(
        &self,
        api_key_id: &str,
        owner_id: &str,
        window: UsageWindow,
    ) -> Result<UsageBucket, ApiError> {
        let conn = self.lock()?;
        let bucket = conn.query_row(
            &format!(
                "INSERT INTO usage (api_key_id, owner_id, date, hour, request_count, success_count, error_count)
                 VALUES (?1, ?2, ?3, ?4, 1, 1, 0)
                 ON CONFLICT(api_key_id, date, hour) DO UPDATE SET
                     request_count = request_count + 1,
                     success_count = success_count + 1
                 RETURNING {}",
                BUCKET_COLUMNS
            ),
            params![api_key_id, owner_id, window.date, window.hour],
            row_to_bucket,
        )?;
        Ok(bucket)
    }

    fn get_bucket(
        &self,
        api_key_id: &str,
        window: UsageWindow,
    ) -> Result<Option<UsageBucket>, ApiError> {
        let conn = self.lock()?;
        let bucket = conn
            .query_row(
                &format!(
                    "SELECT {} FROM usage WHERE api_key_id = ?1 AND date = ?2 AND hour = ?3",
                    BUCKET_COLUMNS
                ),
                params![api_key_id, window.date, window.hour],
                row_to_bucket,
            )
            .optional()?;
        Ok(bucket)
    }

    fn recent_buckets(&self, api_key_id: &str, limit: usize) -> Result<Vec<UsageBucket>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM usage WHERE api_key_id = ?1 ORDER BY date DESC, hour DESC LIMIT ?2",
            BUCKET_COLUMNS
        ))?;
        let buckets = stmt
            .query_map(params![api_key_id, limit as i64], row_to_bucket)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(buckets)
    }
}
