//! 引擎模块
//!
//! 负责组装策略注册表、存储、调度循环、归档时钟与驱动，并处理优雅关闭

pub mod clock;
pub mod dispatch;
pub mod driver;
pub mod merge;

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;

use crate::accum::StrategyRegistry;
use crate::config::Config;
use crate::storage::{AggregateStore, ArchiveSink, Storage};
use clock::ArchiveClock;
use dispatch::{create_dispatcher, DispatchError, DispatchHandle};
use driver::Simulator;
use merge::MergeCoordinator;

pub struct Engine {
    config: Config,
    /// 策略注册表（启动后不可变）
    registry: Arc<StrategyRegistry>,
    sink: Arc<dyn ArchiveSink>,
    store: Arc<dyn AggregateStore>,
}

impl Engine {
    /// 使用 SQLite 存储创建引擎
    pub async fn new(config: Config) -> Result<Self> {
        tracing::info!("正在初始化引擎...");

        let storage = Arc::new(Storage::new(&config.database.url).await?);
        Self::with_stores(config, storage.clone(), storage)
    }

    /// 使用指定的归档与聚合存储创建引擎
    pub fn with_stores(
        config: Config,
        sink: Arc<dyn ArchiveSink>,
        store: Arc<dyn AggregateStore>,
    ) -> Result<Self> {
        let registry = Arc::new(config.registry()?);
        tracing::info!("已加载 {} 个观测类型的累积策略", registry.len());

        Ok(Self {
            config,
            registry,
            sink,
            store,
        })
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    /// 创建调度系统，首个区间为包含当前时刻的区间
    pub fn dispatcher(&self) -> (DispatchHandle, dispatch::DispatchLoop) {
        let coordinator = MergeCoordinator::new(self.store.clone(), self.registry.clone());
        create_dispatcher(
            &self.config.engine.dispatch_settings(),
            Utc::now(),
            self.registry.clone(),
            self.sink.clone(),
            coordinator,
        )
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("启动调度循环...");
        let (handle, dispatch_loop) = self.dispatcher();
        let mut loop_task = tokio::spawn(dispatch_loop.run());

        let clock = ArchiveClock::new(
            self.config.engine.archive_interval(),
            self.config.engine.archive_delay(),
            handle.clone(),
        );
        let mut clock_task = tokio::spawn(clock.run());

        tracing::info!(
            "启动模拟驱动: 单位制 {}，LOOP 间隔 {} 毫秒",
            self.config.station.unit_system,
            self.config.station.loop_interval_ms
        );
        let packets = Simulator::new(self.config.station.unit_system).packets(
            std::time::Duration::from_millis(self.config.station.loop_interval_ms),
        );
        let driver_task = tokio::spawn(driver::pump(packets, handle.clone()));

        // 等待关闭信号或任务异常退出
        let outcome: Result<()> = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到 Ctrl+C 信号，正在关闭...");
                Ok(())
            }
            _ = Self::wait_for_term_signal() => {
                tracing::info!("收到 TERM 信号，正在关闭...");
                Ok(())
            }
            result = &mut loop_task => {
                Self::task_result("调度循环", result)
            }
            result = &mut clock_task => {
                Self::task_result("归档时钟", result)
            }
        };

        driver_task.abort();
        clock_task.abort();

        // 发送关闭信号给调度循环
        if let Err(e) = handle.shutdown().await {
            tracing::debug!("发送关闭信号失败: {}", e);
        }

        tracing::info!("正在关闭引擎...");
        if !loop_task.is_finished() {
            match tokio::time::timeout(std::time::Duration::from_secs(5), loop_task).await {
                Ok(Ok(Ok(()))) => tracing::info!("调度循环已正常关闭"),
                Ok(Ok(Err(e))) => tracing::error!("调度循环异常退出: {}", e),
                Ok(Err(e)) => tracing::error!("调度循环任务失败: {}", e),
                Err(_) => tracing::warn!("调度循环关闭超时，强制终止"),
            }
        }

        let stats = handle.stats();
        tracing::info!(
            "引擎已关闭: 归档 {} 个区间，接受 {} 个采样，拒绝 {} 个",
            stats.intervals_finalized,
            stats.samples_accepted,
            stats.samples_rejected
        );
        outcome
    }

    fn task_result(
        name: &str,
        result: std::result::Result<std::result::Result<(), DispatchError>, tokio::task::JoinError>,
    ) -> Result<()> {
        match result {
            Ok(Ok(())) => {
                tracing::warn!("{}提前结束", name);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("{}失败: {}", name, e);
                Err(anyhow!("{}失败: {}", name, e))
            }
            Err(e) => Err(anyhow!("{}任务失败: {}", name, e)),
        }
    }

    /// 等待 TERM 信号
    async fn wait_for_term_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        }

        #[cfg(not(unix))]
        {
            // Windows 不支持 SIGTERM，使用 Ctrl+C 替代
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
