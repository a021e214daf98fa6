//! 模拟气象站驱动
//!
//! 按 LOOP 间隔产生数据包流：温湿度与气压按日变化曲线加随机扰动，
//! 风速风向随机游走，偶尔下雨

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use super::dispatch::{DispatchError, DispatchHandle};
use crate::sample::Packet;
use crate::units::{Unit, UnitSystem};

/// 模拟驱动
pub struct Simulator {
    unit_system: UnitSystem,
    rng: StdRng,
    wind_speed: f64,
    wind_dir: f64,
    day_rain: f64,
}

impl Simulator {
    pub fn new(unit_system: UnitSystem) -> Self {
        Self::with_rng(unit_system, StdRng::from_entropy())
    }

    /// 固定种子，便于复现
    pub fn seeded(unit_system: UnitSystem, seed: u64) -> Self {
        Self::with_rng(unit_system, StdRng::seed_from_u64(seed))
    }

    fn with_rng(unit_system: UnitSystem, rng: StdRng) -> Self {
        Self {
            unit_system,
            rng,
            wind_speed: 3.0,
            wind_dir: 180.0,
            day_rain: 0.0,
        }
    }

    /// 生成一个数据包，内部数值以公制计算后换算到驱动的单位制
    pub fn packet(&mut self, ts: DateTime<Utc>) -> Packet {
        let hour = f64::from(ts.hour()) + f64::from(ts.minute()) / 60.0;
        let phase = (hour - 9.0) / 24.0 * std::f64::consts::TAU;

        let out_temp = 15.0 + 8.0 * phase.sin() + self.rng.gen_range(-0.3..0.3);
        let humidity = (65.0 - 20.0 * phase.sin() + self.rng.gen_range(-2.0..2.0)).clamp(0.0, 100.0);
        let barometer = 1013.0 + self.rng.gen_range(-0.5..0.5);

        self.wind_speed = (self.wind_speed + self.rng.gen_range(-0.8..0.8)).clamp(0.0, 25.0);
        self.wind_dir = (self.wind_dir + self.rng.gen_range(-20.0..20.0)).rem_euclid(360.0);
        let wind_dir = (self.wind_speed > 0.1).then_some(self.wind_dir);

        let rain = if self.rng.gen_bool(0.02) {
            self.rng.gen_range(0.2..1.0)
        } else {
            0.0
        };
        if ts.hour() == 0 && ts.minute() == 0 {
            self.day_rain = 0.0;
        }
        self.day_rain += rain;

        let system = self.unit_system;
        let local = |x: f64, unit: Unit| {
            unit.convert(x, system.unit_for(unit.group())).unwrap_or(x)
        };

        Packet::new(ts, system)
            .with("outTemp", Some(local(out_temp, Unit::DegreeC)))
            .with("outHumidity", Some(humidity))
            .with("barometer", Some(local(barometer, Unit::Mbar)))
            .with("windSpeed", Some(local(self.wind_speed, Unit::MeterPerSecond)))
            .with("windDir", wind_dir)
            .with("rain", Some(local(rain, Unit::Mm)))
            .with("dayRain", Some(local(self.day_rain, Unit::Mm)))
    }

    /// 按 `loop_interval` 产生数据包的无限流
    pub fn packets(mut self, loop_interval: std::time::Duration) -> impl Stream<Item = Packet> {
        let ticker = tokio::time::interval(loop_interval);
        IntervalStream::new(ticker).map(move |_| self.packet(Utc::now()))
    }
}

/// 将数据包流转发给调度循环，流结束或通道关闭时返回
pub async fn pump<S>(stream: S, handle: DispatchHandle) -> Result<u64, DispatchError>
where
    S: Stream<Item = Packet>,
{
    tokio::pin!(stream);
    let mut forwarded = 0;

    while let Some(packet) = stream.next().await {
        match handle.send_packet(packet).await {
            Ok(()) => forwarded += 1,
            Err(DispatchError::ChannelClosed) => {
                tracing::info!("调度通道已关闭，驱动停止（已转发 {} 个数据包）", forwarded);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(forwarded)
}
