//! 长周期（按日）运行聚合
//!
//! 聚合只通过合并已封存的区间累积器来更新，从不整体替换

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::firstlast::FirstLastStats;
use super::scalar::ScalarStats;
use super::strategy::MergerKind;
use super::{Accumulator, AccumulatorState};
use crate::error::AccumResult;
use crate::timespan::TimeSpan;
use crate::units::{Unit, UnitSystem};

/// 单个观测类型在一个聚合周期内的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningAggregate {
    pub obs_type: String,
    pub span: TimeSpan,
    pub count: u64,
    pub sum: f64,
    /// `avg` 合并器维护的加权均值
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub min_time: Option<DateTime<Utc>>,
    pub max: Option<f64>,
    pub max_time: Option<DateTime<Utc>>,
    pub first: Option<f64>,
    pub first_time: Option<DateTime<Utc>>,
    pub last: Option<f64>,
    pub last_time: Option<DateTime<Utc>>,
    pub sum_x: f64,
    pub sum_y: f64,
    pub vec_count: u64,
    pub max_dir: Option<f64>,
    pub unit_system: Option<UnitSystem>,
    pub unit: Option<Unit>,
}

impl RunningAggregate {
    pub fn new(obs_type: impl Into<String>, span: TimeSpan) -> Self {
        Self {
            obs_type: obs_type.into(),
            span,
            count: 0,
            sum: 0.0,
            mean: None,
            min: None,
            min_time: None,
            max: None,
            max_time: None,
            first: None,
            first_time: None,
            last: None,
            last_time: None,
            sum_x: 0.0,
            sum_y: 0.0,
            vec_count: 0,
            max_dir: None,
            unit_system: None,
            unit: None,
        }
    }

    /// 合并一个已封存的累积器
    ///
    /// 累积器先换算到聚合的单位制；空累积器不产生任何变化。
    /// `minmax` 合并不是幂等的，重复合并同一区间会重复计数
    pub fn merge(&mut self, acc: &Accumulator, merger: MergerKind) -> AccumResult<()> {
        if acc.is_empty() {
            return Ok(());
        }
        let Some(system) = self.unit_system.or(acc.unit_system()) else {
            return Ok(());
        };
        let converted = acc.converted_to(system)?;
        if let (Some(ours), Some(theirs)) = (self.unit, converted.unit()) {
            // 同一观测类型不应跨单位组
            theirs.check_group(ours)?;
        }

        match converted.state() {
            AccumulatorState::Scalar(stats) => {
                self.fold_scalar(stats, merger);
            }
            AccumulatorState::Vector(stats) => {
                if self.fold_scalar(stats.speed(), merger) {
                    self.max_dir = stats.max_dir();
                }
                self.sum_x += stats.sum_x();
                self.sum_y += stats.sum_y();
                self.vec_count += stats.vec_count();
            }
            AccumulatorState::FirstLast(ends) => self.fold_ends(ends),
        }

        self.unit_system = Some(system);
        if self.unit.is_none() {
            self.unit = converted.unit();
        }
        Ok(())
    }

    /// 返回最大值是否被更新
    fn fold_scalar(&mut self, stats: &ScalarStats, merger: MergerKind) -> bool {
        if stats.count() == 0 {
            return false;
        }

        match merger {
            MergerKind::Avg => {
                let (n0, n1) = (self.count as f64, stats.count() as f64);
                let m0 = self.average().unwrap_or_default();
                let m1 = stats.avg().unwrap_or_default();
                self.mean = Some((m0 * n0 + m1 * n1) / (n0 + n1));
            }
            MergerKind::MinMax => {}
        }
        self.sum += stats.sum().unwrap_or_default();
        self.count += stats.count();
        // 中途切换合并器时均值仍需跟上
        if merger == MergerKind::MinMax && self.mean.is_some() {
            self.mean = self.average();
        }

        if let (Some(v), Some(t)) = (stats.min(), stats.min_time()) {
            let wins = match (self.min, self.min_time) {
                (Some(cur), Some(cur_t)) => v < cur || (v == cur && t < cur_t),
                _ => true,
            };
            if wins {
                self.min = Some(v);
                self.min_time = Some(t);
            }
        }

        let mut max_updated = false;
        if let (Some(v), Some(t)) = (stats.max(), stats.max_time()) {
            let wins = match (self.max, self.max_time) {
                (Some(cur), Some(cur_t)) => v > cur || (v == cur && t < cur_t),
                _ => true,
            };
            if wins {
                self.max = Some(v);
                self.max_time = Some(t);
                max_updated = true;
            }
        }

        self.fold_ends(&stats.ends);
        max_updated
    }

    fn fold_ends(&mut self, ends: &FirstLastStats) {
        if let (Some(v), Some(t)) = (ends.first(), ends.first_time()) {
            if self.first_time.map_or(true, |cur| t < cur) {
                self.first = Some(v);
                self.first_time = Some(t);
            }
        }
        if let (Some(v), Some(t)) = (ends.last(), ends.last_time()) {
            if self.last_time.map_or(true, |cur| t >= cur) {
                self.last = Some(v);
                self.last_time = Some(t);
            }
        }
    }

    /// 均值 `sum / count`
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.first.is_none()
    }
}
