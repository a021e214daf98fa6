//! 内存存储
//!
//! 与 SQLite 存储行为一致，用于测试与不落盘的运行

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{AggregateStore, ArchiveSink};
use crate::accum::{Accumulator, ArchiveRecord, MergerKind, RunningAggregate};
use crate::timespan::TimeSpan;

/// 内存归档
#[derive(Default)]
pub struct MemoryArchive {
    records: RwLock<Vec<ArchiveRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的写入全部失败
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn write(&self, record: &ArchiveRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("归档写入失败: {}", record.date_time);
        }
        self.records.write().push(record.clone());
        Ok(())
    }
}

/// 内存运行聚合
#[derive(Default)]
pub struct MemoryAggregateStore {
    aggregates: RwLock<HashMap<(String, DateTime<Utc>), RunningAggregate>>,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已有聚合的条目数
    pub fn len(&self) -> usize {
        self.aggregates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.read().is_empty()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn merge_into(
        &self,
        obs_type: &str,
        span: &TimeSpan,
        acc: &Accumulator,
        merger: MergerKind,
    ) -> Result<()> {
        let mut aggregates = self.aggregates.write();
        let key = (obs_type.to_string(), span.start);

        // 合并失败时不留下新建的空聚合
        let mut aggregate = aggregates
            .get(&key)
            .cloned()
            .unwrap_or_else(|| RunningAggregate::new(obs_type, *span));
        aggregate.merge(acc, merger)?;
        aggregates.insert(key, aggregate);
        Ok(())
    }

    async fn aggregate(&self, obs_type: &str, span: &TimeSpan) -> Result<Option<RunningAggregate>> {
        Ok(self
            .aggregates
            .read()
            .get(&(obs_type.to_string(), span.start))
            .cloned())
    }

    async fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.last_update.read())
    }

    async fn set_last_update(&self, ts: DateTime<Utc>) -> Result<()> {
        *self.last_update.write() = Some(ts);
        Ok(())
    }
}
