//! 矢量统计（风）
//!
//! 方向为以正北为零、顺时针的角度；`x = speed·cos(dir)`，`y = speed·sin(dir)`

use chrono::{DateTime, Utc};

use super::scalar::ScalarStats;
use crate::error::AccumResult;
use crate::units::Unit;

/// 合成矢量小于该值时视为静风，方向无定义
pub const CALM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStats {
    /// 大小的标量统计
    pub(crate) speed: ScalarStats,
    pub(crate) sum_x: f64,
    pub(crate) sum_y: f64,
    /// 带方向、参与分量求和的样本数
    pub(crate) vec_count: u64,
    /// 与最大值配对的方向
    pub(crate) max_dir: Option<f64>,
}

impl VectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入一个非空速度；方向为空时只计入大小统计
    pub fn add(&mut self, speed: f64, direction: Option<f64>, time: DateTime<Utc>) {
        if self.speed.add(speed, time) {
            self.max_dir = direction;
        }
        if let Some(dir) = direction {
            let radians = dir.to_radians();
            self.sum_x += speed * radians.cos();
            self.sum_y += speed * radians.sin();
            self.vec_count += 1;
        }
    }

    pub fn merge(&mut self, other: &VectorStats) {
        if self.speed.merge(&other.speed) {
            self.max_dir = other.max_dir;
        }
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.vec_count += other.vec_count;
    }

    pub(crate) fn convert(&self, from: Unit, to: Unit) -> AccumResult<Self> {
        Ok(Self {
            speed: self.speed.convert(from, to)?,
            sum_x: from.convert_sum(self.sum_x, self.vec_count, to)?,
            sum_y: from.convert_sum(self.sum_y, self.vec_count, to)?,
            vec_count: self.vec_count,
            max_dir: self.max_dir,
        })
    }

    pub fn speed(&self) -> &ScalarStats {
        &self.speed
    }

    pub fn sum_x(&self) -> f64 {
        self.sum_x
    }

    pub fn sum_y(&self) -> f64 {
        self.sum_y
    }

    pub fn vec_count(&self) -> u64 {
        self.vec_count
    }

    pub fn max_dir(&self) -> Option<f64> {
        self.max_dir
    }

    /// 合成矢量的平均大小，除数为全部非空速度样本数
    ///
    /// 方向为空的样本不贡献分量，但计入分母
    pub fn vector_speed(&self) -> Option<f64> {
        let count = self.speed.count();
        (count > 0).then(|| self.sum_x.hypot(self.sum_y) / count as f64)
    }

    /// 合成矢量方向，归一化到 `[0, 360)`，静风时为空
    pub fn vector_dir(&self) -> Option<f64> {
        if self.vec_count == 0 || self.sum_x.hypot(self.sum_y) < CALM_EPSILON {
            return None;
        }
        Some(self.sum_y.atan2(self.sum_x).to_degrees().rem_euclid(360.0))
    }
}
