//! 运行聚合合并协调器
//!
//! 区间封存后，将每个累积器按其合并策略并入所在 UTC 自然日的聚合

use anyhow::Result;
use std::sync::Arc;

use crate::accum::{FinalizedInterval, StrategyRegistry};
use crate::storage::AggregateStore;
use crate::timespan::TimeSpan;

/// 一次合并的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 已合并的观测类型数量
    Merged(usize),
    /// 区间早已合并过
    Skipped,
}

pub struct MergeCoordinator {
    store: Arc<dyn AggregateStore>,
    registry: Arc<StrategyRegistry>,
}

impl MergeCoordinator {
    pub fn new(store: Arc<dyn AggregateStore>, registry: Arc<StrategyRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    /// 合并一个已封存区间
    ///
    /// 终点不晚于 `lastUpdate` 的区间视为已合并，直接跳过
    pub async fn merge(&self, finalized: &FinalizedInterval) -> Result<MergeOutcome> {
        let span = finalized.span;
        if let Some(last) = self.store.last_update().await? {
            if last >= span.stop {
                tracing::warn!("区间 {} 已于 {} 合并过，跳过", span, last);
                return Ok(MergeOutcome::Skipped);
            }
        }

        let day = TimeSpan::day_containing(span.start);
        let mut merged = 0;
        for (obs_type, acc) in &finalized.accumulators {
            if acc.is_empty() {
                continue;
            }
            let merger = self.registry.lookup(obs_type).merger;
            self.store.merge_into(obs_type, &day, acc, merger).await?;
            tracing::trace!("{} 已按 {} 并入 {}", obs_type, merger, day);
            merged += 1;
        }

        self.store.set_last_update(span.stop).await?;
        tracing::debug!("区间 {} 合并完成，{} 个观测类型", span, merged);
        Ok(MergeOutcome::Merged(merged))
    }
}
