//! Persistent attempt counters with SQLite.
//!
//! One row per instance id. Increments are a single upsert statement, so
//! concurrent attempts for the same instance cannot read a stale count.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_attest::{AttemptStore, AuthAttempt, InstanceId, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// SQLite-backed [`AttemptStore`].
#[derive(Clone)]
pub struct SqliteAttemptStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteAttemptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAttemptStore").finish_non_exhaustive()
    }
}

impl SqliteAttemptStore {
    /// Open or create the attempt database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // Single writer
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_attempts (
                instance_id TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS auth_attempts_expires_at ON auth_attempts (expires_at_ms)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Every stored counter, expired ones included, ordered by instance id.
    pub async fn list(&self) -> Result<Vec<(InstanceId, AuthAttempt)>, StoreError> {
        let rows = sqlx::query(
            "SELECT instance_id, count, expires_at_ms FROM auth_attempts ORDER BY instance_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("instance_id")
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                let id = InstanceId::new(id);
                let attempt = parse_attempt_row(&id, row)?;
                Ok((id, attempt))
            })
            .collect()
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn increment(
        &self,
        instance_id: &InstanceId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AuthAttempt, StoreError> {
        // Single statement: SQLite applies it atomically, no read-then-write window
        let row = sqlx::query(
            r#"
            INSERT INTO auth_attempts (instance_id, count, expires_at_ms)
            VALUES (?1, 1, ?2)
            ON CONFLICT(instance_id) DO UPDATE SET
                count = CASE
                    WHEN auth_attempts.expires_at_ms <= ?3 THEN 1
                    ELSE auth_attempts.count + 1
                END,
                expires_at_ms = ?2
            RETURNING count, expires_at_ms
            "#,
        )
        .bind(instance_id.as_str())
        .bind(deadline.timestamp_millis())
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        parse_attempt_row(instance_id, &row)
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthAttempt>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT count, expires_at_ms FROM auth_attempts
            WHERE instance_id = ? AND expires_at_ms > ?
            "#,
        )
        .bind(instance_id.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| parse_attempt_row(instance_id, &row)).transpose()
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM auth_attempts WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() as usize)
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn parse_attempt_row(
    instance_id: &InstanceId,
    row: &SqliteRow,
) -> Result<AuthAttempt, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        instance_id: instance_id.to_string(),
        reason,
    };

    let count: i64 = row.try_get("count").map_err(|e| corrupt(e.to_string()))?;
    let expires_at_ms: i64 = row
        .try_get("expires_at_ms")
        .map_err(|e| corrupt(e.to_string()))?;

    let count =
        u32::try_from(count).map_err(|_| corrupt(format!("count {count} out of range")))?;
    let expires_at = DateTime::from_timestamp_millis(expires_at_ms)
        .ok_or_else(|| corrupt(format!("expiry {expires_at_ms} out of range")))?;

    Ok(AuthAttempt { count, expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn test_store() -> SqliteAttemptStore {
        // One connection, otherwise each pooled connection gets its own memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteAttemptStore::new(pool).await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_increment_counts_up() {
        let store = test_store().await;
        let id = InstanceId::new("test0");

        for expected in 1..=3 {
            let attempt = store.increment(&id, at(30), at(0)).await.unwrap();
            assert_eq!(attempt.count, expected);
            assert_eq!(attempt.expires_at, at(30));
        }
    }

    #[tokio::test]
    async fn test_increment_moves_deadline() {
        let store = test_store().await;
        let id = InstanceId::new("test0");

        store.increment(&id, at(30), at(0)).await.unwrap();
        let attempt = store.increment(&id, at(50), at(20)).await.unwrap();
        assert_eq!(
            attempt,
            AuthAttempt {
                count: 2,
                expires_at: at(50)
            }
        );
    }

    #[tokio::test]
    async fn test_expired_row_restarts() {
        let store = test_store().await;
        let id = InstanceId::new("test0");

        store.increment(&id, at(10), at(0)).await.unwrap();
        store.increment(&id, at(10), at(1)).await.unwrap();
        assert_eq!(store.get(&id, at(10)).await.unwrap(), None);

        let attempt = store.increment(&id, at(40), at(10)).await.unwrap();
        assert_eq!(attempt.count, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = test_store().await;
        assert_eq!(store.get(&InstanceId::new("nobody"), at(0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_rows() {
        let store = test_store().await;
        for (name, deadline) in [("old", at(5)), ("edge", at(10)), ("live", at(11))] {
            store
                .increment(&InstanceId::new(name), deadline, at(0))
                .await
                .unwrap();
        }

        assert_eq!(store.sweep(at(10)).await.unwrap(), 2);

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, InstanceId::new("live"));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM auth_attempts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(test_store().await);
        let id = InstanceId::new("contended");
        let now = at(0);
        let deadline = now + TimeDelta::seconds(60);

        let mut handles = vec![];
        for _ in 0..20 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&id, deadline, now).await.unwrap().count
            }));
        }

        let mut counts = vec![];
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_corrupt_row_reported() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO auth_attempts (instance_id, count, expires_at_ms) VALUES ('bad', -1, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.list().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
