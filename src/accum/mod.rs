//! 累积器模块
//!
//! 单个观测类型在一个时间区间内的累积状态。状态形状由累积器类型决定：
//! - 标量：计数、和、极值、首末值
//! - 矢量：标量统计加上分量和与最大值方向
//! - 首末值：只记录第一个与最后一个值
//!
//! 生命周期为 空 -> 累积中 -> 已封存，封存后再加入采样会报错

pub mod aggregate;
pub mod collection;
pub mod firstlast;
pub mod scalar;
pub mod strategy;
pub mod vector;

pub use aggregate::RunningAggregate;
pub use collection::{ArchiveRecord, FinalizedInterval, IntervalAccumulator};
pub use firstlast::FirstLastStats;
pub use scalar::ScalarStats;
pub use strategy::{
    AccumulatorKind, AdderKind, ExtractorKind, MergerKind, StrategyBinding, StrategyRegistry,
    StrategySpec,
};
pub use vector::VectorStats;

use chrono::{DateTime, Utc};

use crate::error::{AccumError, AccumResult};
use crate::sample::Sample;
use crate::units::{Unit, UnitSystem, ValueTuple};

/// 带时间戳的观测值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped {
    pub value: f64,
    pub time: DateTime<Utc>,
}

impl Stamped {
    pub(crate) fn convert(self, from: Unit, to: Unit) -> AccumResult<Self> {
        Ok(Self {
            value: from.convert(self.value, to)?,
            time: self.time,
        })
    }
}

/// 按累积器类型区分的状态
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorState {
    Scalar(ScalarStats),
    Vector(VectorStats),
    FirstLast(FirstLastStats),
}

impl AccumulatorState {
    pub fn new(kind: AccumulatorKind) -> Self {
        match kind {
            AccumulatorKind::Scalar => Self::Scalar(ScalarStats::new()),
            AccumulatorKind::Vector => Self::Vector(VectorStats::new()),
            AccumulatorKind::FirstLast => Self::FirstLast(FirstLastStats::new()),
        }
    }

    pub fn kind(&self) -> AccumulatorKind {
        match self {
            Self::Scalar(_) => AccumulatorKind::Scalar,
            Self::Vector(_) => AccumulatorKind::Vector,
            Self::FirstLast(_) => AccumulatorKind::FirstLast,
        }
    }

    /// 大小统计（首末值累积器没有）
    pub fn scalar_stats(&self) -> Option<&ScalarStats> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Vector(v) => Some(&v.speed),
            Self::FirstLast(_) => None,
        }
    }

    pub fn ends(&self) -> &FirstLastStats {
        match self {
            Self::Scalar(s) => &s.ends,
            Self::Vector(v) => &v.speed.ends,
            Self::FirstLast(f) => f,
        }
    }

    fn convert(&self, from: Unit, to: Unit) -> AccumResult<Self> {
        Ok(match self {
            Self::Scalar(s) => Self::Scalar(s.convert(from, to)?),
            Self::Vector(v) => Self::Vector(v.convert(from, to)?),
            Self::FirstLast(f) => Self::FirstLast(f.convert(from, to)?),
        })
    }
}

/// wind 提取器的四个输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSummary {
    pub wind_gust: Option<ValueTuple>,
    pub wind_gust_dir: Option<ValueTuple>,
    pub wind_speed: Option<ValueTuple>,
    pub wind_dir: Option<ValueTuple>,
}

impl WindSummary {
    /// 归档记录中的字段名与取值
    pub fn fields(&self) -> [(&'static str, Option<ValueTuple>); 4] {
        [
            ("windGust", self.wind_gust),
            ("windGustDir", self.wind_gust_dir),
            ("windSpeed", self.wind_speed),
            ("windDir", self.wind_dir),
        ]
    }
}

/// 单个观测类型的累积器
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    obs_type: String,
    state: AccumulatorState,
    /// 首个非空采样的单位制，此后固定
    unit_system: Option<UnitSystem>,
    /// 统计量所用的单位
    unit: Option<Unit>,
    finalized: bool,
}

impl Accumulator {
    pub fn new(obs_type: impl Into<String>, kind: AccumulatorKind) -> Self {
        Self {
            obs_type: obs_type.into(),
            state: AccumulatorState::new(kind),
            unit_system: None,
            unit: None,
            finalized: false,
        }
    }

    pub fn obs_type(&self) -> &str {
        &self.obs_type
    }

    pub fn kind(&self) -> AccumulatorKind {
        self.state.kind()
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }

    pub fn unit(&self) -> Option<Unit> {
        self.unit
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// 非空加入次数（首末值累积器按是否有值计 0 或 1）
    pub fn count(&self) -> u64 {
        match &self.state {
            AccumulatorState::FirstLast(f) => u64::from(!f.is_empty()),
            other => other.scalar_stats().map_or(0, ScalarStats::count),
        }
    }

    /// 是否尚未收到任何非空值
    pub fn is_empty(&self) -> bool {
        self.state.ends().is_empty()
    }

    /// 封存累积器，幂等
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// 按加入策略处理一个采样
    ///
    /// 失败时状态保持不变
    pub fn add(&mut self, sample: &Sample, adder: AdderKind) -> AccumResult<()> {
        if self.finalized {
            return Err(AccumError::AccumulatorFinalized {
                obs_type: self.obs_type.clone(),
            });
        }

        match adder {
            AdderKind::Noop => Ok(()),
            AdderKind::CheckUnits => self.check_units(sample),
            AdderKind::Add | AdderKind::AddWind => self.add_value(sample, adder),
        }
    }

    fn check_units(&mut self, sample: &Sample) -> AccumResult<()> {
        match self.unit_system {
            None => {
                self.unit_system = Some(sample.unit_system);
                Ok(())
            }
            Some(expected) if expected != sample.unit_system => {
                Err(AccumError::UnitSystemMismatch {
                    obs_type: self.obs_type.clone(),
                    expected,
                    found: sample.unit_system,
                })
            }
            Some(_) => Ok(()),
        }
    }

    fn add_value(&mut self, sample: &Sample, adder: AdderKind) -> AccumResult<()> {
        // 空值不改变状态
        let Some(value) = sample.value.filter(|v| !v.is_null()) else {
            return Ok(());
        };

        if adder == AdderKind::AddWind && sample.direction.is_none() {
            return Err(AccumError::MissingPairedField {
                obs_type: self.obs_type.clone(),
                field: "direction".to_string(),
            });
        }

        let system = self.unit_system.unwrap_or(sample.unit_system);
        let target = self
            .unit
            .unwrap_or_else(|| system.unit_for(value.group()));
        let converted = value.convert_to(target)?;
        let direction = match sample.direction {
            Some(dir) => dir.convert_to(Unit::DegreeCompass)?.magnitude(),
            None => None,
        };

        self.unit_system = Some(system);
        self.unit = Some(target);

        let Some(x) = converted.magnitude() else {
            return Ok(());
        };
        match &mut self.state {
            AccumulatorState::Scalar(s) => {
                s.add(x, sample.timestamp);
            }
            AccumulatorState::Vector(v) => v.add(x, direction, sample.timestamp),
            AccumulatorState::FirstLast(f) => f.add(x, sample.timestamp),
        }

        tracing::trace!(obs_type = %self.obs_type, value = x, "采样已累积");
        Ok(())
    }

    /// 合并另一个同类型累积器（高低值与累加量）
    pub fn merge(&mut self, other: &Accumulator) -> AccumResult<()> {
        if self.finalized {
            return Err(AccumError::AccumulatorFinalized {
                obs_type: self.obs_type.clone(),
            });
        }
        if self.kind() != other.kind() {
            return Err(AccumError::KindMismatch {
                expected: self.kind(),
                found: other.kind(),
            });
        }
        let Some(their_unit) = other.unit else {
            return Ok(());
        };

        let (system, unit) = match (self.unit_system, self.unit) {
            (Some(system), Some(unit)) => (system, unit),
            _ => {
                let system = self
                    .unit_system
                    .or(other.unit_system)
                    .unwrap_or(UnitSystem::Us);
                (system, system.unit_for(their_unit.group()))
            }
        };
        let incoming = other.state.convert(their_unit, unit)?;

        match (&mut self.state, &incoming) {
            (AccumulatorState::Scalar(a), AccumulatorState::Scalar(b)) => {
                a.merge(b);
            }
            (AccumulatorState::Vector(a), AccumulatorState::Vector(b)) => a.merge(b),
            (AccumulatorState::FirstLast(a), AccumulatorState::FirstLast(b)) => a.merge(b),
            (ours, theirs) => {
                return Err(AccumError::KindMismatch {
                    expected: ours.kind(),
                    found: theirs.kind(),
                })
            }
        }
        self.unit_system = Some(system);
        self.unit = Some(unit);
        Ok(())
    }

    /// 换算到指定单位制后的副本
    pub fn converted_to(&self, system: UnitSystem) -> AccumResult<Accumulator> {
        let mut converted = self.clone();
        if let Some(unit) = self.unit {
            let target = system.unit_for(unit.group());
            converted.state = self.state.convert(unit, target)?;
            converted.unit = Some(target);
        }
        converted.unit_system = Some(system);
        Ok(converted)
    }

    /// 按提取策略读取一个值，不改变状态
    pub fn extract(&self, extractor: ExtractorKind) -> Option<ValueTuple> {
        let stats = self.state.scalar_stats();
        let with_unit = |x: Option<f64>| Some(ValueTuple::some(x?, self.unit?));

        match extractor {
            ExtractorKind::Noop => None,
            ExtractorKind::Count => {
                stats.map(|s| ValueTuple::some(s.count() as f64, Unit::Count))
            }
            ExtractorKind::Avg => with_unit(stats.and_then(ScalarStats::avg)),
            ExtractorKind::Sum => with_unit(stats.and_then(ScalarStats::sum)),
            ExtractorKind::Min => with_unit(stats.and_then(ScalarStats::min)),
            ExtractorKind::Max => with_unit(stats.and_then(ScalarStats::max)),
            ExtractorKind::First => with_unit(self.state.ends().first()),
            ExtractorKind::Last => with_unit(self.state.ends().last()),
            ExtractorKind::Wind => self.extract_wind().and_then(|w| w.wind_speed),
        }
    }

    /// wind 提取器：阵风、阵风方向、合成风速、合成风向
    pub fn extract_wind(&self) -> Option<WindSummary> {
        let AccumulatorState::Vector(v) = &self.state else {
            return None;
        };
        let with_unit = |x: Option<f64>| Some(ValueTuple::some(x?, self.unit?));
        let compass = |x: Option<f64>| x.map(|d| ValueTuple::some(d, Unit::DegreeCompass));

        Some(WindSummary {
            wind_gust: with_unit(v.speed.max()),
            wind_gust_dir: compass(v.max_dir),
            wind_speed: with_unit(v.vector_speed()),
            wind_dir: compass(v.vector_dir()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(offset)
    }

    fn temp(value: Option<f64>, unit: Unit, system: UnitSystem, offset: i64) -> Sample {
        Sample::scalar("outTemp", t(offset), Some(ValueTuple::new(value, unit)), system)
    }

    #[test]
    fn test_avg_min_max_law() {
        let values = [12.5, 18.0, -3.25, 7.0, 7.0, 30.5];
        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        for (i, v) in values.iter().enumerate() {
            acc.add(&temp(Some(*v), Unit::DegreeC, UnitSystem::Metric, i as i64), AdderKind::Add)
                .unwrap();
        }

        let avg = acc.extract(ExtractorKind::Avg).unwrap().magnitude().unwrap();
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert!((avg - expected).abs() < 1e-12);

        let min = acc.extract(ExtractorKind::Min).unwrap().magnitude().unwrap();
        let max = acc.extract(ExtractorKind::Max).unwrap().magnitude().unwrap();
        assert!(values.iter().all(|v| min <= *v && *v <= max));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        acc.add(&temp(Some(1.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();

        let before = acc.clone();
        let first = acc.extract(ExtractorKind::Avg);
        let second = acc.extract(ExtractorKind::Avg);
        assert_eq!(first, second);
        assert_eq!(acc, before);

        acc.finalize();
        assert_eq!(acc.extract(ExtractorKind::Avg), first);
    }

    #[test]
    fn test_only_nulls() {
        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        for i in 0..3 {
            acc.add(&temp(None, Unit::DegreeC, UnitSystem::Metric, i), AdderKind::Add)
                .unwrap();
        }
        acc.add(
            &Sample::scalar("outTemp", t(4), None, UnitSystem::Metric),
            AdderKind::Add,
        )
        .unwrap();

        assert_eq!(acc.count(), 0);
        assert_eq!(acc.unit_system(), None);
        for extractor in [
            ExtractorKind::Avg,
            ExtractorKind::Sum,
            ExtractorKind::Min,
            ExtractorKind::Max,
            ExtractorKind::First,
            ExtractorKind::Last,
            ExtractorKind::Noop,
        ] {
            assert_eq!(acc.extract(extractor), None, "{extractor} 应为空");
        }
        assert_eq!(
            acc.extract(ExtractorKind::Count),
            Some(ValueTuple::some(0.0, Unit::Count))
        );
    }

    #[test]
    fn test_unit_consistency() {
        // 混合单位
        let mut mixed = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        mixed
            .add(&temp(Some(20.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();
        mixed
            .add(&temp(Some(50.0), Unit::DegreeF, UnitSystem::Us, 1), AdderKind::Add)
            .unwrap();

        // 预先换算到同一单位
        let mut uniform = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        uniform
            .add(&temp(Some(20.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();
        uniform
            .add(&temp(Some(10.0), Unit::DegreeC, UnitSystem::Metric, 1), AdderKind::Add)
            .unwrap();

        assert_eq!(mixed.unit_system(), Some(UnitSystem::Metric));
        let a = mixed.extract(ExtractorKind::Sum).unwrap().magnitude().unwrap();
        let b = uniform.extract(ExtractorKind::Sum).unwrap().magnitude().unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_guard() {
        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        acc.add(&temp(Some(5.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();
        acc.finalize();
        acc.finalize();
        let snapshot = acc.clone();

        let result = acc.add(&temp(Some(99.0), Unit::DegreeC, UnitSystem::Metric, 1), AdderKind::Add);
        assert!(matches!(result, Err(AccumError::AccumulatorFinalized { .. })));
        assert_eq!(acc, snapshot);
    }

    #[test]
    fn test_group_mismatch_leaves_state() {
        let mut acc = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        acc.add(&temp(Some(5.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();
        let snapshot = acc.clone();

        let bogus = Sample::scalar(
            "outTemp",
            t(1),
            Some(ValueTuple::some(1000.0, Unit::Mbar)),
            UnitSystem::Metric,
        );
        let result = acc.add(&bogus, AdderKind::Add);
        assert!(matches!(result, Err(AccumError::UnitGroupMismatch { .. })));
        assert_eq!(acc, snapshot);
    }

    #[test]
    fn test_wind_cancellation() {
        let mut acc = Accumulator::new("wind", AccumulatorKind::Vector);
        for (i, dir) in [0.0, 180.0].into_iter().enumerate() {
            let sample = Sample::vector(
                "wind",
                t(i as i64),
                Some(ValueTuple::some(10.0, Unit::MeterPerSecond)),
                Some(ValueTuple::some(dir, Unit::DegreeCompass)),
                UnitSystem::MetricWx,
            );
            acc.add(&sample, AdderKind::AddWind).unwrap();
        }

        let wind = acc.extract_wind().unwrap();
        assert_eq!(wind.wind_gust.unwrap().magnitude(), Some(10.0));
        assert_eq!(wind.wind_gust_dir.unwrap().magnitude(), Some(0.0));
        assert!(wind.wind_speed.unwrap().magnitude().unwrap().abs() < 1e-9);
        assert_eq!(wind.wind_dir, None);
    }

    #[test]
    fn test_wind_speed_divides_by_all_samples() {
        let mut acc = Accumulator::new("wind", AccumulatorKind::Vector);
        let samples = [
            (8.0, ValueTuple::null(Unit::DegreeCompass)),
            (2.0, ValueTuple::some(90.0, Unit::DegreeCompass)),
        ];
        for (i, (speed, dir)) in samples.into_iter().enumerate() {
            let sample = Sample::vector(
                "wind",
                t(i as i64),
                Some(ValueTuple::some(speed, Unit::MeterPerSecond)),
                Some(dir),
                UnitSystem::MetricWx,
            );
            acc.add(&sample, AdderKind::AddWind).unwrap();
        }

        let wind = acc.extract_wind().unwrap();
        assert_eq!(acc.count(), 2);
        assert_eq!(wind.wind_gust.unwrap().magnitude(), Some(8.0));
        let speed = wind.wind_speed.unwrap().magnitude().unwrap();
        assert!((speed - 1.0).abs() < 1e-9);
        assert!((wind.wind_dir.unwrap().magnitude().unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_wind_requires_direction() {
        let mut acc = Accumulator::new("wind", AccumulatorKind::Vector);
        let no_dir = Sample::vector(
            "wind",
            t(0),
            Some(ValueTuple::some(4.0, Unit::MeterPerSecond)),
            None,
            UnitSystem::MetricWx,
        );
        assert!(matches!(
            acc.add(&no_dir, AdderKind::AddWind),
            Err(AccumError::MissingPairedField { .. })
        ));
        assert_eq!(acc.count(), 0);

        // 默认加入策略只计入大小
        acc.add(&no_dir, AdderKind::Add).unwrap();
        assert_eq!(acc.count(), 1);

        // 空速度不要求方向
        let calm = Sample::vector("wind", t(1), None, None, UnitSystem::MetricWx);
        acc.add(&calm, AdderKind::AddWind).unwrap();
    }

    #[test]
    fn test_check_units() {
        let mut acc = Accumulator::new("usUnits", AccumulatorKind::Scalar);
        let us = Sample::scalar("usUnits", t(0), None, UnitSystem::Us);
        let metric = Sample::scalar("usUnits", t(1), None, UnitSystem::Metric);

        acc.add(&us, AdderKind::CheckUnits).unwrap();
        acc.add(&us, AdderKind::CheckUnits).unwrap();
        assert!(matches!(
            acc.add(&metric, AdderKind::CheckUnits),
            Err(AccumError::UnitSystemMismatch { .. })
        ));
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn test_first_last_kind() {
        let mut acc = Accumulator::new("dayRain", AccumulatorKind::FirstLast);
        for (i, v) in [0.1, 0.2, 0.35].into_iter().enumerate() {
            let s = Sample::scalar(
                "dayRain",
                t(i as i64),
                Some(ValueTuple::some(v, Unit::Inch)),
                UnitSystem::Us,
            );
            acc.add(&s, AdderKind::Add).unwrap();
        }

        assert_eq!(acc.extract(ExtractorKind::First).unwrap().magnitude(), Some(0.1));
        assert_eq!(acc.extract(ExtractorKind::Last).unwrap().magnitude(), Some(0.35));
        assert_eq!(acc.extract(ExtractorKind::Max), None);
        assert_eq!(acc.extract(ExtractorKind::Count), None);
    }

    #[test]
    fn test_merge_accumulators() {
        let mut metric = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        metric
            .add(&temp(Some(10.0), Unit::DegreeC, UnitSystem::Metric, 0), AdderKind::Add)
            .unwrap();

        let mut us = Accumulator::new("outTemp", AccumulatorKind::Scalar);
        us.add(&temp(Some(212.0), Unit::DegreeF, UnitSystem::Us, 1), AdderKind::Add)
            .unwrap();

        metric.merge(&us).unwrap();
        assert_eq!(metric.count(), 2);
        let max = metric.extract(ExtractorKind::Max).unwrap();
        assert_eq!(max.unit(), Unit::DegreeC);
        assert!((max.magnitude().unwrap() - 100.0).abs() < 1e-9);

        let vector = Accumulator::new("wind", AccumulatorKind::Vector);
        assert!(matches!(
            metric.merge(&vector),
            Err(AccumError::KindMismatch { .. })
        ));
    }
}
