//! 存储模块
//!
//! 基于 SQLite 的归档记录、按日运行聚合与元数据存储

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::accum::{Accumulator, ArchiveRecord, MergerKind, RunningAggregate};
use crate::timespan::TimeSpan;

pub use memory::{MemoryAggregateStore, MemoryArchive};

/// 元数据中记录最近一次合并区间终点的键
pub const LAST_UPDATE_KEY: &str = "lastUpdate";

/// 归档记录的接收方，每个完成的区间调用一次
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn write(&self, record: &ArchiveRecord) -> Result<()>;
}

/// 运行聚合的持久化存储
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// 将已封存的累积器合并进 `span` 对应的聚合
    async fn merge_into(
        &self,
        obs_type: &str,
        span: &TimeSpan,
        acc: &Accumulator,
        merger: MergerKind,
    ) -> Result<()>;

    /// 读取聚合，不存在时返回 `None`
    async fn aggregate(&self, obs_type: &str, span: &TimeSpan) -> Result<Option<RunningAggregate>>;

    /// 最近一次完成合并的区间终点
    async fn last_update(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_update(&self, ts: DateTime<Utc>) -> Result<()>;
}

/// 存储管理器
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// 创建新的存储实例
    pub async fn new(database_url: &str) -> Result<Self> {
        tracing::info!("正在初始化存储层...");

        // 确保数据库目录存在
        let file = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let file = file.split('?').next().unwrap_or(file);
        if let Some(parent) = Path::new(file).parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                tracing::debug!("创建数据库目录: {:?}", parent);
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!("正在连接数据库: {}", database_url);

        // SQLite 优化参数对池中每个连接生效
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| anyhow::anyhow!("无效的数据库地址 {}: {}", database_url, e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(60))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("无法连接到数据库: {}", e))?;

        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&pool)
            .await?;

        tracing::info!("正在运行数据库迁移...");

        let migrate_result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            sqlx::migrate!("./migrations").run(&pool),
        )
        .await;

        match migrate_result {
            Ok(Ok(_)) => {
                tracing::info!("数据库迁移完成");
            }
            Ok(Err(e)) => {
                return Err(anyhow::anyhow!("数据库迁移失败: {}", e));
            }
            Err(_) => {
                return Err(anyhow::anyhow!("数据库迁移超时（10秒）"));
            }
        }

        tracing::info!("存储层初始化完成");
        Ok(Self { pool })
    }

    // 归档记录

    /// 写入归档记录，同一时间戳已存在时不覆盖，返回是否写入
    pub async fn add_record(&self, record: &ArchiveRecord) -> Result<bool> {
        let query = r#"
            INSERT INTO archive (date_time, interval, us_units, record)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(date_time) DO NOTHING
        "#;

        let result = sqlx::query(query)
            .bind(record.date_time.timestamp())
            .bind(record.interval)
            .bind(record.unit_system.map(|s| s.code()))
            .bind(serde_json::to_value(record)?)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 按区间终点读取归档记录
    pub async fn get_record(&self, date_time: DateTime<Utc>) -> Result<Option<ArchiveRecord>> {
        let query = "SELECT record FROM archive WHERE date_time = ?1";

        let row = sqlx::query(query)
            .bind(date_time.timestamp())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_json(row.get("record"))).transpose()
    }

    /// 读取终点落在 `(start, stop]` 内的归档记录
    pub async fn records_in(&self, span: &TimeSpan) -> Result<Vec<ArchiveRecord>> {
        let query = r#"
            SELECT record FROM archive
            WHERE date_time > ?1 AND date_time <= ?2
            ORDER BY date_time
        "#;

        let rows = sqlx::query(query)
            .bind(span.start.timestamp())
            .bind(span.stop.timestamp())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| decode_json(row.get("record")))
            .collect()
    }

    /// 最新一条归档记录的时间
    pub async fn last_record_time(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(date_time) AS latest FROM archive")
            .fetch_one(&self.pool)
            .await?;

        let latest: Option<i64> = row.get("latest");
        Ok(latest.and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }

    // 按日聚合

    /// 读取一天内全部观测类型的聚合
    pub async fn day_summaries(&self, day: &TimeSpan) -> Result<Vec<RunningAggregate>> {
        let query = r#"
            SELECT aggregate FROM day_summary
            WHERE day_start = ?1
            ORDER BY obs_type
        "#;

        let rows = sqlx::query(query)
            .bind(day.start.timestamp())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| decode_json(row.get("aggregate")))
            .collect()
    }

    // 元数据

    pub async fn get_metadata(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM metadata WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    pub async fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
        let query = r#"
            INSERT INTO metadata (name, value)
            VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
        "#;

        sqlx::query(query)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 获取数据库连接池（用于高级操作）
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value).map_err(|e| anyhow::anyhow!("无法解析存储的 JSON: {}", e))
}

#[async_trait]
impl ArchiveSink for Storage {
    async fn write(&self, record: &ArchiveRecord) -> Result<()> {
        if !self.add_record(record).await? {
            tracing::warn!("归档记录 {} 已存在，跳过写入", record.date_time);
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for Storage {
    async fn merge_into(
        &self,
        obs_type: &str,
        span: &TimeSpan,
        acc: &Accumulator,
        merger: MergerKind,
    ) -> Result<()> {
        // 读-改-写在同一事务内完成
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT aggregate FROM day_summary WHERE obs_type = ?1 AND day_start = ?2")
            .bind(obs_type)
            .bind(span.start.timestamp())
            .fetch_optional(&mut *tx)
            .await?;

        let mut aggregate = match row {
            Some(row) => decode_json(row.get("aggregate"))?,
            None => RunningAggregate::new(obs_type, *span),
        };
        aggregate.merge(acc, merger)?;

        let query = r#"
            INSERT INTO day_summary (obs_type, day_start, day_stop, aggregate)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(obs_type, day_start) DO UPDATE SET
                aggregate = excluded.aggregate,
                updated_at = CURRENT_TIMESTAMP
        "#;
        sqlx::query(query)
            .bind(obs_type)
            .bind(span.start.timestamp())
            .bind(span.stop.timestamp())
            .bind(serde_json::to_value(&aggregate)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn aggregate(&self, obs_type: &str, span: &TimeSpan) -> Result<Option<RunningAggregate>> {
        let row = sqlx::query("SELECT aggregate FROM day_summary WHERE obs_type = ?1 AND day_start = ?2")
            .bind(obs_type)
            .bind(span.start.timestamp())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_json(row.get("aggregate"))).transpose()
    }

    async fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.get_metadata(LAST_UPDATE_KEY).await? else {
            return Ok(None);
        };
        let ts: i64 = value
            .parse()
            .map_err(|e| anyhow::anyhow!("无效的 {} 元数据 '{}': {}", LAST_UPDATE_KEY, value, e))?;
        Ok(DateTime::from_timestamp(ts, 0))
    }

    async fn set_last_update(&self, ts: DateTime<Utc>) -> Result<()> {
        self.set_metadata(LAST_UPDATE_KEY, &ts.timestamp().to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accum::{AccumulatorKind, AdderKind};
    use crate::sample::Sample;
    use crate::units::{Unit, UnitSystem, ValueTuple};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db_url = format!("sqlite:{}", db_path.display());

        let storage = Storage::new(&db_url).await.unwrap();
        (storage, temp_dir)
    }

    fn record(stop: DateTime<Utc>) -> ArchiveRecord {
        let mut values = BTreeMap::new();
        values.insert("outTemp".to_string(), Some(ValueTuple::some(68.5, Unit::DegreeF)));
        values.insert("rain".to_string(), None);
        ArchiveRecord {
            date_time: stop,
            interval: 5,
            unit_system: Some(UnitSystem::Us),
            values,
        }
    }

    #[tokio::test]
    async fn test_write_and_read_record() {
        let (storage, _temp_dir) = setup_test_db().await;
        let stop = Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap();

        storage.write(&record(stop)).await.unwrap();
        let stored = storage.get_record(stop).await.unwrap().unwrap();
        assert_eq!(stored, record(stop));
        assert_eq!(storage.last_record_time().await.unwrap(), Some(stop));

        // 重复写入不覆盖
        assert!(!storage.add_record(&record(stop)).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_into_day_summary() {
        let (storage, _temp_dir) = setup_test_db().await;
        let day = TimeSpan::day_containing(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        for (minute, value) in [(0, 12.0), (5, 16.0)] {
            let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
            let sample = Sample::scalar(
                "outTemp",
                day.start + Duration::minutes(minute),
                Some(ValueTuple::some(value, Unit::DegreeC)),
                UnitSystem::Metric,
            );
            acc.add(&sample, AdderKind::Add).unwrap();
            acc.finalize();
            storage
                .merge_into("outTemp", &day, &acc, MergerKind::MinMax)
                .await
                .unwrap();
        }

        let agg = storage.aggregate("outTemp", &day).await.unwrap().unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.max, Some(16.0));
        assert_eq!(agg.average(), Some(14.0));
        assert_eq!(storage.day_summaries(&day).await.unwrap().len(), 1);
        assert!(storage.aggregate("rain", &day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_update_metadata() {
        let (storage, _temp_dir) = setup_test_db().await;
        assert_eq!(storage.last_update().await.unwrap(), None);

        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap();
        storage.set_last_update(ts).await.unwrap();
        assert_eq!(storage.last_update().await.unwrap(), Some(ts));
    }
}
