//! SQL-backed [`RealtimeStore`]/[`HistoricalStore`] pair.
//!
//! Backend-agnostic: built on `sqlx::query` (runtime-checked, not the
//! `query!` macro) so the same code path works under the `sqlite`,
//! `postgres`, and `mysql` features. Callers pick the matching [`Dialect`]
//! when constructing the store.

use async_trait::async_trait;
use r2e_core::{DataPoint, HierarchicalPath, Quality};
use r2e_data::{DataError, Dialect, HistoricalStore, RealtimeStore};
use sqlx::{Database, Pool, Row};

use crate::error::SqlxErrorExt;

fn quality_str(q: Quality) -> &'static str {
    match q {
        Quality::Good => "good",
        Quality::Uncertain => "uncertain",
        Quality::Bad => "bad",
        Quality::Stale => "stale",
    }
}

fn quality_from_str(s: &str) -> Quality {
    match s {
        "uncertain" => Quality::Uncertain,
        "bad" => Quality::Bad,
        "stale" => Quality::Stale,
        _ => Quality::Good,
    }
}

fn row_to_point<R: Row>(row: &R) -> Result<DataPoint, DataError>
where
    for<'r> &'r str: sqlx::ColumnIndex<R>,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> Option<String>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    let source_topic: String = row.try_get("source_topic").map_err(|e| e.into_data_error())?;
    let namespace_path: Option<String> = row.try_get("namespace_path").map_err(|e| e.into_data_error())?;
    let value_json: String = row.try_get("value").map_err(|e| e.into_data_error())?;
    let quality: String = row.try_get("quality").map_err(|e| e.into_data_error())?;
    let timestamp: i64 = row.try_get("timestamp").map_err(|e| e.into_data_error())?;
    let connection_id: String = row.try_get("connection_id").map_err(|e| e.into_data_error())?;
    let source_system: String = row.try_get("source_system").map_err(|e| e.into_data_error())?;

    let value: serde_json::Value = serde_json::from_str(&value_json)
        .map_err(|e| DataError::Other(format!("corrupt value column: {e}")))?;

    Ok(DataPoint {
        source_topic,
        namespace_path,
        value,
        quality: quality_from_str(&quality),
        timestamp,
        connection_id,
        source_system,
    })
}

/// Realtime (latest-value) store: one row per `source_topic`, overwritten
/// on every write via `INSERT ... ON CONFLICT`/`REPLACE`.
pub struct SqlRealtimeStore<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    table: &'static str,
}

impl<DB: Database> SqlRealtimeStore<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            table: "realtime_points",
        }
    }
}

#[async_trait]
impl<DB> RealtimeStore for SqlRealtimeStore<DB>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: sqlx::IntoArguments<'q, DB>,
    for<'r> &'r str: sqlx::ColumnIndex<DB::Row>,
    for<'r> String: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
    for<'r> i64: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
    for<'r> Option<String>: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
{
    async fn store(&self, point: &DataPoint) -> Result<(), DataError> {
        let value_json = serde_json::to_string(&point.value)
            .map_err(|e| DataError::Other(format!("failed to encode value: {e}")))?;
        let upsert = match self.dialect {
            Dialect::Postgres => format!(
                "INSERT INTO {table} (source_topic, namespace_path, value, quality, timestamp, connection_id, source_system) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (source_topic) DO UPDATE SET \
                 namespace_path = excluded.namespace_path, value = excluded.value, quality = excluded.quality, \
                 timestamp = excluded.timestamp, connection_id = excluded.connection_id, source_system = excluded.source_system",
                table = self.table
            ),
            Dialect::MySql => format!(
                "REPLACE INTO {table} (source_topic, namespace_path, value, quality, timestamp, connection_id, source_system) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                table = self.table
            ),
            Dialect::Sqlite | Dialect::Generic => format!(
                "INSERT OR REPLACE INTO {table} (source_topic, namespace_path, value, quality, timestamp, connection_id, source_system) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                table = self.table
            ),
        };
        sqlx::query(&upsert)
            .bind(point.source_topic.clone())
            .bind(point.namespace_path.clone())
            .bind(value_json)
            .bind(quality_str(point.quality).to_string())
            .bind(point.timestamp)
            .bind(point.connection_id.clone())
            .bind(point.source_system.clone())
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        Ok(())
    }

    async fn get_latest(&self, topic: &str) -> Result<Option<DataPoint>, DataError> {
        let placeholder = self.dialect.placeholder(1);
        let sql = format!(
            "SELECT source_topic, namespace_path, value, quality, timestamp, connection_id, source_system \
             FROM {} WHERE source_topic = {placeholder}",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(topic.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        row.map(|r| row_to_point(&r)).transpose()
    }

    async fn get_latest_by_path(&self, path: &HierarchicalPath) -> Result<Vec<DataPoint>, DataError> {
        let placeholder = self.dialect.placeholder(1);
        let sql = format!(
            "SELECT source_topic, namespace_path, value, quality, timestamp, connection_id, source_system \
             FROM {} WHERE namespace_path LIKE {placeholder}",
            self.table
        );
        let prefix = format!("{}%", path.full_path());
        let rows = sqlx::query(&sql)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        rows.iter().map(row_to_point).collect()
    }

    async fn delete(&self, topic: &str) -> Result<bool, DataError> {
        let placeholder = self.dialect.placeholder(1);
        let sql = format!("DELETE FROM {} WHERE source_topic = {placeholder}", self.table);
        let result = sqlx::query(&sql)
            .bind(topic.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        Ok(result.rows_affected() > 0)
    }
}

/// Time-ranged series store: append-only, one row per write.
pub struct SqlHistoricalStore<DB: Database> {
    pool: Pool<DB>,
    dialect: Dialect,
    table: &'static str,
}

impl<DB: Database> SqlHistoricalStore<DB> {
    pub fn new(pool: Pool<DB>, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            table: "historical_points",
        }
    }
}

#[async_trait]
impl<DB> HistoricalStore for SqlHistoricalStore<DB>
where
    DB: Database,
    for<'q> <DB as Database>::Arguments<'q>: sqlx::IntoArguments<'q, DB>,
    for<'r> &'r str: sqlx::ColumnIndex<DB::Row>,
    for<'r> String: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
    for<'r> i64: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
    for<'r> Option<String>: sqlx::Decode<'r, DB> + sqlx::Type<DB> + sqlx::Encode<'r, DB>,
{
    async fn store(&self, point: &DataPoint) -> Result<(), DataError> {
        let value_json = serde_json::to_string(&point.value)
            .map_err(|e| DataError::Other(format!("failed to encode value: {e}")))?;
        let placeholders = (1..=7)
            .map(|i| self.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} (source_topic, namespace_path, value, quality, timestamp, connection_id, source_system) \
             VALUES ({placeholders})",
            self.table
        );
        sqlx::query(&sql)
            .bind(point.source_topic.clone())
            .bind(point.namespace_path.clone())
            .bind(value_json)
            .bind(quality_str(point.quality).to_string())
            .bind(point.timestamp)
            .bind(point.connection_id.clone())
            .bind(point.source_system.clone())
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        Ok(())
    }

    async fn get_history(&self, topic: &str, from_ms: i64, to_ms: i64) -> Result<Vec<DataPoint>, DataError> {
        let sql = format!(
            "SELECT source_topic, namespace_path, value, quality, timestamp, connection_id, source_system \
             FROM {} WHERE source_topic = {} AND timestamp >= {} AND timestamp <= {} ORDER BY timestamp ASC",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
        );
        let rows = sqlx::query(&sql)
            .bind(topic.to_string())
            .bind(from_ms)
            .bind(to_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        rows.iter().map(row_to_point).collect()
    }

    async fn get_history_by_path(
        &self,
        path: &HierarchicalPath,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, DataError> {
        let sql = format!(
            "SELECT source_topic, namespace_path, value, quality, timestamp, connection_id, source_system \
             FROM {} WHERE namespace_path LIKE {} AND timestamp >= {} AND timestamp <= {} ORDER BY timestamp ASC",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
        );
        let prefix = format!("{}%", path.full_path());
        let rows = sqlx::query(&sql)
            .bind(prefix)
            .bind(from_ms)
            .bind(to_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        rows.iter().map(row_to_point).collect()
    }

    async fn archive(&self, before_ms: i64) -> Result<u64, DataError> {
        let sql = format!(
            "DELETE FROM {} WHERE timestamp < {}",
            self.table,
            self.dialect.placeholder(1)
        );
        let result = sqlx::query(&sql)
            .bind(before_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        Ok(result.rows_affected())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE realtime_points (\
                source_topic TEXT PRIMARY KEY, namespace_path TEXT, value TEXT NOT NULL, \
                quality TEXT NOT NULL, timestamp BIGINT NOT NULL, connection_id TEXT NOT NULL, \
                source_system TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE historical_points (\
                source_topic TEXT NOT NULL, namespace_path TEXT, value TEXT NOT NULL, \
                quality TEXT NOT NULL, timestamp BIGINT NOT NULL, connection_id TEXT NOT NULL, \
                source_system TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn point(topic: &str, ts: i64) -> DataPoint {
        DataPoint::new(topic, serde_json::json!(1.0), "conn-1", "plc", ts).mapped_to("Acme/Line1/Tag1")
    }

    #[tokio::test]
    async fn realtime_store_overwrites_latest() {
        let pool = pool().await;
        let store = SqlRealtimeStore::new(pool, Dialect::Sqlite);
        store.store(&point("t1", 1)).await.unwrap();
        store.store(&point("t1", 2)).await.unwrap();
        let latest = store.get_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 2);
    }

    #[tokio::test]
    async fn historical_store_keeps_every_write_and_archives_old() {
        let pool = pool().await;
        let store = SqlHistoricalStore::new(pool, Dialect::Sqlite);
        store.store(&point("t1", 1)).await.unwrap();
        store.store(&point("t1", 2)).await.unwrap();
        let history = store.get_history("t1", 0, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        let archived = store.archive(2).await.unwrap();
        assert_eq!(archived, 1);
    }
}
