//! 调度循环
//!
//! 与消息总线相同的两段式设计：
//! - DispatchHandle: 可克隆的发送端，驱动与时钟各持一份
//! - DispatchLoop: 独占的接收端，持有当前区间的累积器集合
//!
//! 所有采样与边界事件都经由同一个通道进入循环，循环任务本身就是临界区，
//! 封存、写归档、合并聚合、开启新区间这几步对采样加入而言是原子的

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::merge::{MergeCoordinator, MergeOutcome};
use crate::accum::{IntervalAccumulator, StrategyRegistry};
use crate::error::AccumError;
use crate::sample::{Packet, Sample};
use crate::storage::ArchiveSink;
use crate::timespan::TimeSpan;

/// 调度错误
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Accum(#[from] AccumError),

    #[error("边界事件重叠: 上一个区间仍在封存")]
    BoundaryOverrun,

    #[error("存储失败: {0:#}")]
    Storage(anyhow::Error),

    #[error("调度通道已关闭")]
    ChannelClosed,
}

/// 进入调度循环的命令
#[derive(Debug)]
pub enum DispatchCommand {
    Sample(Sample),
    Packet(Packet),
    /// 时钟到达区间边界，携带边界时刻
    Boundary(DateTime<Utc>),
    Shutdown,
}

/// 调度统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    pub samples_accepted: u64,
    pub samples_rejected: u64,
    /// 早于当前区间起点的迟到采样
    pub samples_late: u64,
    /// 超出缓冲上限被丢弃的采样
    pub samples_overflow: u64,
    pub intervals_finalized: u64,
    pub intervals_empty: u64,
    pub merges_skipped: u64,
    /// 按错误类别统计的被拒采样
    pub errors: BTreeMap<&'static str, u64>,
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub archive_interval: Duration,
    pub max_pending_samples: usize,
    pub channel_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            archive_interval: Duration::seconds(300),
            max_pending_samples: 10_000,
            channel_buffer: 1000,
        }
    }
}

/// 调度句柄 - 可克隆，用于投递采样与边界事件
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<DispatchCommand>,
    /// 是否有已投递但尚未处理完的边界事件
    boundary_busy: Arc<watch::Sender<bool>>,
    stats: Arc<RwLock<DispatchStats>>,
}

/// 调度循环 - 独占接收端
pub struct DispatchLoop {
    receiver: mpsc::Receiver<DispatchCommand>,
    boundary_busy: Arc<watch::Sender<bool>>,
    stats: Arc<RwLock<DispatchStats>>,
    registry: Arc<StrategyRegistry>,
    sink: Arc<dyn ArchiveSink>,
    coordinator: MergeCoordinator,
    current: IntervalAccumulator,
    /// 属于后续区间的采样，按到达顺序
    pending: VecDeque<Sample>,
    max_pending: usize,
}

/// 创建调度系统，首个区间为包含 `start` 的对齐区间
pub fn create_dispatcher(
    settings: &DispatchSettings,
    start: DateTime<Utc>,
    registry: Arc<StrategyRegistry>,
    sink: Arc<dyn ArchiveSink>,
    coordinator: MergeCoordinator,
) -> (DispatchHandle, DispatchLoop) {
    let (sender, receiver) = mpsc::channel(settings.channel_buffer.max(1));
    let (boundary_busy, _) = watch::channel(false);
    let boundary_busy = Arc::new(boundary_busy);
    let stats = Arc::new(RwLock::new(DispatchStats::default()));

    let span = TimeSpan::aligned(start, settings.archive_interval);
    let handle = DispatchHandle {
        sender,
        boundary_busy: boundary_busy.clone(),
        stats: stats.clone(),
    };

    let dispatch_loop = DispatchLoop {
        receiver,
        boundary_busy,
        stats,
        current: IntervalAccumulator::new(span, registry.clone()),
        registry,
        sink,
        coordinator,
        pending: VecDeque::new(),
        max_pending: settings.max_pending_samples,
    };

    (handle, dispatch_loop)
}

impl DispatchHandle {
    async fn send(&self, command: DispatchCommand) -> Result<(), DispatchError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    pub async fn send_sample(&self, sample: Sample) -> Result<(), DispatchError> {
        self.send(DispatchCommand::Sample(sample)).await
    }

    pub async fn send_packet(&self, packet: Packet) -> Result<(), DispatchError> {
        self.send(DispatchCommand::Packet(packet)).await
    }

    /// 投递边界事件
    ///
    /// 上一个边界尚未处理完时返回 `BoundaryOverrun`
    pub async fn boundary(&self, at: DateTime<Utc>) -> Result<(), DispatchError> {
        let mut overrun = false;
        self.boundary_busy.send_if_modified(|busy| {
            if *busy {
                overrun = true;
                false
            } else {
                *busy = true;
                true
            }
        });
        if overrun {
            return Err(DispatchError::BoundaryOverrun);
        }

        let result = self.send(DispatchCommand::Boundary(at)).await;
        if result.is_err() {
            self.boundary_busy.send_replace(false);
        }
        result
    }

    /// 发送关闭信号
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        self.send(DispatchCommand::Shutdown).await
    }

    /// 等待已投递的边界事件处理完成，循环退出时也会返回
    pub async fn boundary_settled(&self) {
        let mut busy = self.boundary_busy.subscribe();
        tokio::select! {
            _ = busy.wait_for(|busy| !*busy) => {}
            _ = self.sender.closed() => {}
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl DispatchLoop {
    pub fn current_span(&self) -> TimeSpan {
        self.current.span()
    }

    /// 运行调度循环（消耗 self）
    ///
    /// 致命的累积错误或存储错误会终止循环并返回
    pub async fn run(mut self) -> Result<(), DispatchError> {
        tracing::info!("调度循环开始运行，当前区间 {}", self.current.span());

        while let Some(command) = self.receiver.recv().await {
            match command {
                DispatchCommand::Sample(sample) => self.ingest(sample)?,
                DispatchCommand::Packet(packet) => {
                    for sample in packet.to_samples(&self.registry) {
                        self.ingest(sample)?;
                    }
                }
                DispatchCommand::Boundary(at) => {
                    let result = self.on_boundary(at).await;
                    self.boundary_busy.send_replace(false);
                    if let Err(e) = result {
                        tracing::error!("区间封存失败: {}", e);
                        return Err(e);
                    }
                }
                DispatchCommand::Shutdown => {
                    tracing::info!("收到关闭信号，停止调度循环");
                    break;
                }
            }
        }

        if !self.current.is_empty() {
            tracing::info!(
                "丢弃未完成区间 {}（{} 个累积器），{} 个缓冲采样",
                self.current.span(),
                self.current.len(),
                self.pending.len()
            );
        }
        tracing::info!("调度循环已停止");
        Ok(())
    }

    /// 按时间戳路由一个采样：当前区间、缓冲或丢弃
    fn ingest(&mut self, sample: Sample) -> Result<(), DispatchError> {
        let span = self.current.span();

        if sample.timestamp < span.start {
            tracing::warn!(
                "迟到采样被丢弃: {} @ {} 早于区间 {}",
                sample.obs_type,
                sample.timestamp,
                span
            );
            self.stats.write().samples_late += 1;
            return Ok(());
        }

        if sample.timestamp >= span.stop {
            if self.pending.len() >= self.max_pending {
                tracing::warn!("缓冲已满（{}），丢弃采样 {}", self.max_pending, sample.obs_type);
                self.stats.write().samples_overflow += 1;
            } else {
                self.pending.push_back(sample);
            }
            return Ok(());
        }

        self.add_to_current(&sample)
    }

    fn add_to_current(&mut self, sample: &Sample) -> Result<(), DispatchError> {
        match self.current.add_sample(sample) {
            Ok(()) => {
                self.stats.write().samples_accepted += 1;
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("致命的累积错误: {}", e);
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!("采样被拒绝: {}", e);
                let mut stats = self.stats.write();
                stats.samples_rejected += 1;
                *stats.errors.entry(e.kind_name()).or_default() += 1;
                Ok(())
            }
        }
    }

    /// 处理边界：封存当前区间并开启紧随其后的区间，重放缓冲采样
    ///
    /// 边界晚到时，终点不晚于 `at` 的区间逐个封存，缓冲采样落入各自的区间
    async fn on_boundary(&mut self, at: DateTime<Utc>) -> Result<(), DispatchError> {
        loop {
            self.close_current().await?;
            self.replay_pending()?;
            if self.current.span().stop > at {
                return Ok(());
            }
            tracing::debug!("边界 {} 晚到，继续封存区间 {}", at, self.current.span());
        }
    }

    /// 封存、写归档、合并聚合，并以 `span.next()` 开启新区间
    async fn close_current(&mut self) -> Result<(), DispatchError> {
        let span = self.current.span();
        let finished = std::mem::replace(
            &mut self.current,
            IntervalAccumulator::new(span.next(), self.registry.clone()),
        );

        if finished.is_empty() {
            tracing::debug!("区间 {} 没有采样，不生成归档记录", span);
            self.stats.write().intervals_empty += 1;
        } else {
            let finalized = finished.finalize()?;

            self.sink
                .write(&finalized.record)
                .await
                .map_err(DispatchError::Storage)?;

            let outcome = self
                .coordinator
                .merge(&finalized)
                .await
                .map_err(DispatchError::Storage)?;

            {
                let mut stats = self.stats.write();
                stats.intervals_finalized += 1;
                if outcome == MergeOutcome::Skipped {
                    stats.merges_skipped += 1;
                }
            }

            tracing::info!(
                "区间 {} 已归档，{} 个字段",
                span,
                finalized.record.values.len()
            );
        }

        Ok(())
    }

    fn replay_pending(&mut self) -> Result<(), DispatchError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        tracing::debug!("重放 {} 个缓冲采样到区间 {}", pending.len(), self.current.span());
        for sample in pending {
            self.ingest(sample)?;
        }
        Ok(())
    }
}
