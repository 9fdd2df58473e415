use crate::core::key::RemoteKey;
use crate::core::planner::{Direction, OperationBatch, OperationPlanner};
use crate::core::progress::{NoopObserver, TransferObserver};
use crate::core::transfer::{TransferExecutor, MAX_CONCURRENT_TRANSFERS};
use crate::error::SyncResult;
use crate::gateway::ObjectGateway;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: MAX_CONCURRENT_TRANSFERS,
        }
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// 上传
    Host,
    /// 下载
    Sync,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Host => write!(f, "host"),
            SyncMode::Sync => write!(f, "sync"),
        }
    }
}

/// 已解析完成的运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Host {
        source: PathBuf,
        key: String,
        replace_existing: bool,
    },
    Sync {
        key: String,
        dest: PathBuf,
    },
}

impl SyncRequest {
    pub fn mode(&self) -> SyncMode {
        match self {
            SyncRequest::Host { .. } => SyncMode::Host,
            SyncRequest::Sync { .. } => SyncMode::Sync,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            SyncRequest::Host { key, .. } | SyncRequest::Sync { key, .. } => key,
        }
    }
}

/// 运行结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// 执行了至少一个传输
    Completed,
    /// 没有需要传输的文件
    UpToDate,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    /// 规范化后的 key 段
    pub key: String,
    pub status: SyncStatus,
    pub planned: usize,
    pub skipped: usize,
    pub transferred: usize,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 同步引擎：规划 + 执行
pub struct SyncEngine {
    gateway: Arc<dyn ObjectGateway>,
    planner: OperationPlanner,
    executor: TransferExecutor,
}

impl SyncEngine {
    pub fn new(gateway: Arc<dyn ObjectGateway>) -> Self {
        Self::with_config(gateway, SyncConfig::default(), Arc::new(NoopObserver))
    }

    pub fn with_config(
        gateway: Arc<dyn ObjectGateway>,
        config: SyncConfig,
        observer: Arc<dyn TransferObserver>,
    ) -> Self {
        Self {
            planner: OperationPlanner::new(gateway.clone()),
            executor: TransferExecutor::new(config.max_concurrent_transfers)
                .with_observer(observer),
            gateway,
        }
    }

    pub fn planner(&self) -> &OperationPlanner {
        &self.planner
    }

    /// 上传本地文件或目录到 key 下
    pub async fn host(
        &self,
        source: &Path,
        key: &str,
        replace_existing: bool,
    ) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        let key = RemoteKey::new(key)?;
        info!(
            "开始上传: {} → {} (替换: {}, 存储: {})",
            source.display(),
            key,
            replace_existing,
            self.gateway.name()
        );

        let batch = self.planner.plan_host(source, &key, replace_existing).await?;
        self.execute(SyncMode::Host, &key, batch, started_at).await
    }

    /// 下载 key 下全部对象到本地路径
    pub async fn sync(&self, key: &str, dest: &Path) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        let key = RemoteKey::new(key)?;
        info!(
            "开始下载: {} → {} (存储: {})",
            key,
            dest.display(),
            self.gateway.name()
        );

        let batch = self.planner.plan_sync(&key, dest).await?;
        self.execute(SyncMode::Sync, &key, batch, started_at).await
    }

    pub async fn run(&self, request: &SyncRequest) -> SyncResult<SyncReport> {
        match request {
            SyncRequest::Host {
                source,
                key,
                replace_existing,
            } => self.host(source, key, *replace_existing).await,
            SyncRequest::Sync { key, dest } => self.sync(key, dest).await,
        }
    }

    async fn execute(
        &self,
        mode: SyncMode,
        key: &RemoteKey,
        batch: OperationBatch,
        started_at: DateTime<Utc>,
    ) -> SyncResult<SyncReport> {
        let planned = batch.len();
        let skipped = batch.skipped().len();

        let mut report = SyncReport {
            mode,
            key: key.key().to_string(),
            status: SyncStatus::UpToDate,
            planned,
            skipped,
            transferred: 0,
            bytes_transferred: 0,
            started_at,
            finished_at: started_at,
        };

        if batch.is_empty() {
            info!("所有文件均为最新，无需传输 ({} 个跳过)", skipped);
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let direction = match mode {
            SyncMode::Host => Direction::Upload,
            SyncMode::Sync => Direction::Download,
        };
        let result = self
            .executor
            .execute_with_gateway(batch, direction, self.gateway.clone())
            .await
            .into_result()?;

        report.status = SyncStatus::Completed;
        report.transferred = result.completed;
        report.bytes_transferred = result.bytes_transferred;
        report.finished_at = Utc::now();

        info!(
            "{} 完成: {} - 传输 {}, 跳过 {}, {} 字节",
            mode, key, report.transferred, report.skipped, report.bytes_transferred
        );
        Ok(report)
    }
}
