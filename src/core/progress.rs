//! 传输进度通知

use crate::core::planner::{Direction, FileOperation};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 传输观察者
///
/// `on_start` 收到的 token 会在该传输的 IO 结束（成功或失败）时被取消，
/// 绑定在上面的进度显示应随之结束。
pub trait TransferObserver: Send + Sync {
    fn on_start(&self, _op: &FileOperation, _token: CancellationToken) {}

    fn on_finish(&self, _op: &FileOperation, _result: &anyhow::Result<u64>) {}
}

/// 不做任何事
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// 定时输出传输中日志
#[derive(Debug, Clone)]
pub struct LogProgress {
    interval: Duration,
}

impl LogProgress {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

fn label(op: &FileOperation) -> String {
    op.local_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| op.remote_key().to_string())
}

impl TransferObserver for LogProgress {
    fn on_start(&self, op: &FileOperation, token: CancellationToken) {
        let verb = match op.direction() {
            Direction::Upload => "上传中",
            Direction::Download => "下载中",
        };
        let name = label(op);
        let interval = self.interval;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        info!("{} {}... ({}s)", verb, name, started.elapsed().as_secs());
                    }
                }
            }
        });
    }

    fn on_finish(&self, op: &FileOperation, result: &anyhow::Result<u64>) {
        match result {
            Ok(bytes) => info!("{} 完成: {} ({} 字节)", op.direction(), label(op), bytes),
            Err(e) => error!("{} 失败: {}: {:#}", op.direction(), label(op), e),
        }
    }
}
