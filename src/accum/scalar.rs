//! 标量统计

use chrono::{DateTime, Utc};

use super::firstlast::FirstLastStats;
use super::Stamped;
use crate::error::AccumResult;
use crate::units::Unit;

/// 标量累积状态：计数、和、极值及首末值
///
/// 极值相等时保留时间戳更早的那一个
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarStats {
    pub(crate) count: u64,
    pub(crate) sum: f64,
    pub(crate) min: Option<Stamped>,
    pub(crate) max: Option<Stamped>,
    pub(crate) ends: FirstLastStats,
}

/// 候选值是否应取代当前最小值
fn beats_min(current: Option<Stamped>, candidate: Stamped) -> bool {
    match current {
        None => true,
        Some(cur) => {
            candidate.value < cur.value || (candidate.value == cur.value && candidate.time < cur.time)
        }
    }
}

/// 候选值是否应取代当前最大值
fn beats_max(current: Option<Stamped>, candidate: Stamped) -> bool {
    match current {
        None => true,
        Some(cur) => {
            candidate.value > cur.value || (candidate.value == cur.value && candidate.time < cur.time)
        }
    }
}

impl ScalarStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入一个非空值，返回最大值是否被更新
    pub fn add(&mut self, value: f64, time: DateTime<Utc>) -> bool {
        let stamped = Stamped { value, time };

        self.count += 1;
        self.sum += value;
        if beats_min(self.min, stamped) {
            self.min = Some(stamped);
        }
        let max_updated = beats_max(self.max, stamped);
        if max_updated {
            self.max = Some(stamped);
        }
        self.ends.add(value, time);

        max_updated
    }

    /// 合并另一段统计，返回最大值是否来自 `other`
    pub fn merge(&mut self, other: &ScalarStats) -> bool {
        if other.count == 0 {
            return false;
        }

        self.count += other.count;
        self.sum += other.sum;
        if let Some(min) = other.min {
            if beats_min(self.min, min) {
                self.min = Some(min);
            }
        }
        let mut max_updated = false;
        if let Some(max) = other.max {
            if beats_max(self.max, max) {
                self.max = Some(max);
                max_updated = true;
            }
        }
        self.ends.merge(&other.ends);

        max_updated
    }

    pub(crate) fn convert(&self, from: Unit, to: Unit) -> AccumResult<Self> {
        Ok(Self {
            count: self.count,
            sum: from.convert_sum(self.sum, self.count, to)?,
            min: self.min.map(|s| s.convert(from, to)).transpose()?,
            max: self.max.map(|s| s.convert(from, to)).transpose()?,
            ends: self.ends.convert(from, to)?,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 累加和，无数据时为空
    pub fn sum(&self) -> Option<f64> {
        (self.count > 0).then_some(self.sum)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.min.map(|s| s.value)
    }

    pub fn min_time(&self) -> Option<DateTime<Utc>> {
        self.min.map(|s| s.time)
    }

    pub fn max(&self) -> Option<f64> {
        self.max.map(|s| s.value)
    }

    pub fn max_time(&self) -> Option<DateTime<Utc>> {
        self.max.map(|s| s.time)
    }

    pub fn first(&self) -> Option<f64> {
        self.ends.first()
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.ends.first_time()
    }

    pub fn last(&self) -> Option<f64> {
        self.ends.last()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.ends.last_time()
    }
}
