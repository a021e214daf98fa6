//! 观测类型到单位组的映射
//!
//! 驱动上报的原始数值只带单位制，需要据此确定单位

use super::UnitGroup;

/// 编号观测类型的前缀（如 `extraTemp1`、`soilMoist2`）
const NUMBERED_PREFIXES: &[(&str, UnitGroup)] = &[
    ("extraTemp", UnitGroup::Temperature),
    ("soilTemp", UnitGroup::Temperature),
    ("leafTemp", UnitGroup::Temperature),
    ("extraHumid", UnitGroup::Percent),
    ("leafWet", UnitGroup::Count),
    ("soilMoist", UnitGroup::Count),
];

/// 查询观测类型所属的单位组，未知类型归入无量纲组
pub fn obs_group(obs_type: &str) -> UnitGroup {
    match obs_type {
        "outTemp" | "inTemp" | "dewpoint" | "windchill" | "heatindex" | "appTemp"
        | "humidex" => UnitGroup::Temperature,
        "barometer" | "pressure" | "altimeter" => UnitGroup::Pressure,
        "windSpeed" | "windGust" | "wind" | "windrun_speed" => UnitGroup::Speed,
        "windDir" | "windGustDir" => UnitGroup::Direction,
        "rain" | "ET" | "hail" | "dayRain" | "stormRain" | "monthRain" | "yearRain"
        | "totalRain" | "dayET" | "monthET" | "yearET" => UnitGroup::Rain,
        "rainRate" | "hailRate" => UnitGroup::RainRate,
        "outHumidity" | "inHumidity" => UnitGroup::Percent,
        "radiation" | "maxSolarRad" => UnitGroup::Radiation,
        "UV" => UnitGroup::Uv,
        "lightning_strike_count" | "rxCheckPercent" | "usUnits" => UnitGroup::Count,
        "dateTime" => UnitGroup::Time,
        "interval" => UnitGroup::Interval,
        other => NUMBERED_PREFIXES
            .iter()
            .find(|(prefix, _)| {
                other
                    .strip_prefix(prefix)
                    .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            })
            .map(|(_, group)| *group)
            .unwrap_or(UnitGroup::Unitless),
    }
}
