//! 归档时钟
//!
//! 在每个归档区间边界之后等待 `archive_delay`，再向调度循环投递边界事件，
//! 给迟一点到达的最后几个采样留出时间

use chrono::{DateTime, Duration, Utc};

use super::dispatch::{DispatchError, DispatchHandle};
use crate::timespan::TimeSpan;

pub struct ArchiveClock {
    interval: Duration,
    delay: Duration,
    handle: DispatchHandle,
}

/// `now` 之后（不含）的下一个区间边界
pub fn next_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeSpan::aligned(now, interval).stop
}

impl ArchiveClock {
    pub fn new(interval: Duration, delay: Duration, handle: DispatchHandle) -> Self {
        Self {
            interval,
            delay,
            handle,
        }
    }

    /// 运行时钟直到调度通道关闭
    ///
    /// 边界重叠时返回 `BoundaryOverrun`
    pub async fn run(self) -> Result<(), DispatchError> {
        tracing::info!(
            "归档时钟启动: 间隔 {} 秒，延迟 {} 秒",
            self.interval.num_seconds(),
            self.delay.num_seconds()
        );

        loop {
            let now = Utc::now();
            let boundary = next_boundary(now, self.interval);
            let wait = (boundary + self.delay - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;

            match self.handle.boundary(boundary).await {
                Ok(()) => tracing::debug!("已投递区间边界 {}", boundary),
                Err(DispatchError::ChannelClosed) => {
                    tracing::info!("调度通道已关闭，归档时钟停止");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!("投递区间边界 {} 失败: {}", boundary, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_boundary() {
        let interval = Duration::minutes(5);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 3, 17).unwrap();
        assert_eq!(
            next_boundary(now, interval),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap()
        );

        // 恰好在边界上时取下一个
        let on_edge = Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap();
        assert_eq!(
            next_boundary(on_edge, interval),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 10, 0).unwrap()
        );
    }
}
