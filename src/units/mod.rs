//! 单位模块
//!
//! 单位制、单位组与单位之间的换算。只覆盖保持累积值量纲一致所需的单位

pub mod obs_group;
pub mod value;

pub use obs_group::obs_group;
pub use value::ValueTuple;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AccumError, AccumResult};

/// 单位制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// 英制（°F、inHg、mph、inch）
    Us,
    /// 公制（°C、mbar、km/h、cm）
    Metric,
    /// 气象公制（°C、mbar、m/s、mm）
    MetricWx,
}

impl UnitSystem {
    /// 持久化使用的数值编码
    pub const fn code(self) -> i64 {
        match self {
            Self::Us => 0x01,
            Self::Metric => 0x10,
            Self::MetricWx => 0x11,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0x01 => Some(Self::Us),
            0x10 => Some(Self::Metric),
            0x11 => Some(Self::MetricWx),
            _ => None,
        }
    }

    /// 该单位制下某单位组使用的单位
    pub const fn unit_for(self, group: UnitGroup) -> Unit {
        match (self, group) {
            (Self::Us, UnitGroup::Temperature) => Unit::DegreeF,
            (_, UnitGroup::Temperature) => Unit::DegreeC,
            (Self::Us, UnitGroup::Pressure) => Unit::InHg,
            (_, UnitGroup::Pressure) => Unit::Mbar,
            (Self::Us, UnitGroup::Speed) => Unit::MilePerHour,
            (Self::Metric, UnitGroup::Speed) => Unit::KmPerHour,
            (Self::MetricWx, UnitGroup::Speed) => Unit::MeterPerSecond,
            (Self::Us, UnitGroup::Rain) => Unit::Inch,
            (Self::Metric, UnitGroup::Rain) => Unit::Cm,
            (Self::MetricWx, UnitGroup::Rain) => Unit::Mm,
            (Self::Us, UnitGroup::RainRate) => Unit::InchPerHour,
            (Self::Metric, UnitGroup::RainRate) => Unit::CmPerHour,
            (Self::MetricWx, UnitGroup::RainRate) => Unit::MmPerHour,
            (_, UnitGroup::Direction) => Unit::DegreeCompass,
            (_, UnitGroup::Percent) => Unit::Percent,
            (_, UnitGroup::Radiation) => Unit::WattPerMeterSquared,
            (_, UnitGroup::Uv) => Unit::UvIndex,
            (_, UnitGroup::Count) => Unit::Count,
            (_, UnitGroup::Time) => Unit::UnixEpoch,
            (_, UnitGroup::Interval) => Unit::Minute,
            (_, UnitGroup::Unitless) => Unit::Unitless,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Us => "US",
            Self::Metric => "METRIC",
            Self::MetricWx => "METRICWX",
        };
        f.write_str(name)
    }
}

impl FromStr for UnitSystem {
    type Err = AccumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "metric" => Ok(Self::Metric),
            "metricwx" => Ok(Self::MetricWx),
            _ => Err(AccumError::UnknownStrategyKind {
                category: "unit_system",
                name: s.to_string(),
            }),
        }
    }
}

/// 单位组：一族可互相换算的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitGroup {
    Temperature,
    Pressure,
    Speed,
    Direction,
    Rain,
    RainRate,
    Percent,
    Radiation,
    Uv,
    Count,
    Time,
    Interval,
    Unitless,
}

impl fmt::Display for UnitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Temperature => "group_temperature",
            Self::Pressure => "group_pressure",
            Self::Speed => "group_speed",
            Self::Direction => "group_direction",
            Self::Rain => "group_rain",
            Self::RainRate => "group_rainrate",
            Self::Percent => "group_percent",
            Self::Radiation => "group_radiation",
            Self::Uv => "group_uv",
            Self::Count => "group_count",
            Self::Time => "group_time",
            Self::Interval => "group_interval",
            Self::Unitless => "group_unitless",
        };
        f.write_str(name)
    }
}

/// 具体单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "degree_F")]
    DegreeF,
    #[serde(rename = "degree_C")]
    DegreeC,
    #[serde(rename = "degree_K")]
    DegreeK,
    #[serde(rename = "inHg")]
    InHg,
    #[serde(rename = "mbar")]
    Mbar,
    #[serde(rename = "hPa")]
    HPa,
    #[serde(rename = "kPa")]
    KPa,
    #[serde(rename = "mmHg")]
    MmHg,
    #[serde(rename = "mile_per_hour")]
    MilePerHour,
    #[serde(rename = "km_per_hour")]
    KmPerHour,
    #[serde(rename = "meter_per_second")]
    MeterPerSecond,
    #[serde(rename = "knot")]
    Knot,
    #[serde(rename = "degree_compass")]
    DegreeCompass,
    #[serde(rename = "inch")]
    Inch,
    #[serde(rename = "cm")]
    Cm,
    #[serde(rename = "mm")]
    Mm,
    #[serde(rename = "inch_per_hour")]
    InchPerHour,
    #[serde(rename = "cm_per_hour")]
    CmPerHour,
    #[serde(rename = "mm_per_hour")]
    MmPerHour,
    #[serde(rename = "percent")]
    Percent,
    #[serde(rename = "watt_per_meter_squared")]
    WattPerMeterSquared,
    #[serde(rename = "uv_index")]
    UvIndex,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "unix_epoch")]
    UnixEpoch,
    #[serde(rename = "second")]
    Second,
    #[serde(rename = "minute")]
    Minute,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "unitless")]
    Unitless,
}

impl Unit {
    /// 单位所属的组
    pub const fn group(self) -> UnitGroup {
        match self {
            Self::DegreeF | Self::DegreeC | Self::DegreeK => UnitGroup::Temperature,
            Self::InHg | Self::Mbar | Self::HPa | Self::KPa | Self::MmHg => UnitGroup::Pressure,
            Self::MilePerHour | Self::KmPerHour | Self::MeterPerSecond | Self::Knot => {
                UnitGroup::Speed
            }
            Self::DegreeCompass => UnitGroup::Direction,
            Self::Inch | Self::Cm | Self::Mm => UnitGroup::Rain,
            Self::InchPerHour | Self::CmPerHour | Self::MmPerHour => UnitGroup::RainRate,
            Self::Percent => UnitGroup::Percent,
            Self::WattPerMeterSquared => UnitGroup::Radiation,
            Self::UvIndex => UnitGroup::Uv,
            Self::Count => UnitGroup::Count,
            Self::UnixEpoch => UnitGroup::Time,
            Self::Second | Self::Minute | Self::Hour => UnitGroup::Interval,
            Self::Unitless => UnitGroup::Unitless,
        }
    }

    /// 相对组内基准单位的仿射系数 `(scale, offset)`：`base = x * scale + offset`
    ///
    /// 基准单位：°C、hPa、m/s、mm、mm/h、minute
    const fn affine(self) -> (f64, f64) {
        match self {
            Self::DegreeF => (5.0 / 9.0, -32.0 * 5.0 / 9.0),
            Self::DegreeK => (1.0, -273.15),
            Self::InHg => (33.863_886_666_7, 0.0),
            Self::KPa => (10.0, 0.0),
            Self::MmHg => (1.333_223_874_15, 0.0),
            Self::MilePerHour => (0.447_04, 0.0),
            Self::KmPerHour => (1.0 / 3.6, 0.0),
            Self::Knot => (0.514_444_444_4, 0.0),
            Self::Inch | Self::InchPerHour => (25.4, 0.0),
            Self::Cm | Self::CmPerHour => (10.0, 0.0),
            Self::Second => (1.0 / 60.0, 0.0),
            Self::Hour => (60.0, 0.0),
            _ => (1.0, 0.0),
        }
    }

    /// 两个单位必须属于同一单位组
    pub fn check_group(self, target: Unit) -> AccumResult<()> {
        if self.group() != target.group() {
            return Err(AccumError::UnitGroupMismatch {
                from_unit: self,
                from_group: self.group(),
                to_unit: target,
                to_group: target.group(),
            });
        }
        Ok(())
    }

    /// 将数值从本单位换算到 `target`
    pub fn convert(self, x: f64, target: Unit) -> AccumResult<f64> {
        self.check_group(target)?;
        if self == target {
            return Ok(x);
        }
        let (scale_from, offset_from) = self.affine();
        let (scale_to, offset_to) = target.affine();
        let base = x * scale_from + offset_from;
        Ok((base - offset_to) / scale_to)
    }

    /// 换算累加和
    ///
    /// 仿射单位（温度）的和不能直接换算，需先换算均值再乘回计数
    pub fn convert_sum(self, sum: f64, count: u64, target: Unit) -> AccumResult<f64> {
        if count == 0 {
            self.check_group(target).map(|()| 0.0)
        } else {
            let n = count as f64;
            Ok(self.convert(sum / n, target)? * n)
        }
    }
}

impl Unit {
    /// 规范名称，与序列化形式一致
    pub const fn name(self) -> &'static str {
        match self {
            Self::DegreeF => "degree_F",
            Self::DegreeC => "degree_C",
            Self::DegreeK => "degree_K",
            Self::InHg => "inHg",
            Self::Mbar => "mbar",
            Self::HPa => "hPa",
            Self::KPa => "kPa",
            Self::MmHg => "mmHg",
            Self::MilePerHour => "mile_per_hour",
            Self::KmPerHour => "km_per_hour",
            Self::MeterPerSecond => "meter_per_second",
            Self::Knot => "knot",
            Self::DegreeCompass => "degree_compass",
            Self::Inch => "inch",
            Self::Cm => "cm",
            Self::Mm => "mm",
            Self::InchPerHour => "inch_per_hour",
            Self::CmPerHour => "cm_per_hour",
            Self::MmPerHour => "mm_per_hour",
            Self::Percent => "percent",
            Self::WattPerMeterSquared => "watt_per_meter_squared",
            Self::UvIndex => "uv_index",
            Self::Count => "count",
            Self::UnixEpoch => "unix_epoch",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Unitless => "unitless",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_temperature_conversion() {
        assert!(approx(Unit::DegreeF.convert(212.0, Unit::DegreeC).unwrap(), 100.0));
        assert!(approx(Unit::DegreeC.convert(-40.0, Unit::DegreeF).unwrap(), -40.0));
        assert!(approx(Unit::DegreeK.convert(273.15, Unit::DegreeC).unwrap(), 0.0));
    }

    #[test]
    fn test_speed_and_rain_conversion() {
        assert!(approx(Unit::MeterPerSecond.convert(10.0, Unit::KmPerHour).unwrap(), 36.0));
        assert!(approx(Unit::Inch.convert(1.0, Unit::Mm).unwrap(), 25.4));
        assert!(approx(Unit::Cm.convert(2.54, Unit::Inch).unwrap(), 1.0));
    }

    #[test]
    fn test_group_mismatch() {
        let result = Unit::DegreeC.convert(1.0, Unit::Mbar);
        assert!(matches!(result, Err(AccumError::UnitGroupMismatch { .. })));
    }

    #[test]
    fn test_convert_sum_uses_mean() {
        // 0°C + 100°C = 100 (C)，对应 32°F + 212°F = 244
        let sum = Unit::DegreeC.convert_sum(100.0, 2, Unit::DegreeF).unwrap();
        assert!(approx(sum, 244.0));
    }

    #[test]
    fn test_unit_system_tables() {
        assert_eq!(UnitSystem::Us.unit_for(UnitGroup::Temperature), Unit::DegreeF);
        assert_eq!(UnitSystem::MetricWx.unit_for(UnitGroup::Speed), Unit::MeterPerSecond);
        assert_eq!(UnitSystem::Metric.unit_for(UnitGroup::Rain), Unit::Cm);
        assert_eq!(UnitSystem::from_code(UnitSystem::MetricWx.code()), Some(UnitSystem::MetricWx));
        assert_eq!("METRIC".parse::<UnitSystem>().unwrap(), UnitSystem::Metric);
        assert_eq!(Unit::DegreeF.to_string(), "degree_F");
    }

    #[test]
    fn test_unit_name_matches_serde() {
        for unit in [Unit::DegreeC, Unit::InHg, Unit::HPa, Unit::MeterPerSecond, Unit::Unitless] {
            let json = serde_json::to_string(&unit).unwrap();
            assert_eq!(json, format!("\"{}\"", unit.name()));
        }
    }
}
