//! 新旧判断：比较本地与远程的大小、修改时间，决定是否需要传输
//!
//! 元数据检查本身失败时一律倾向于传输，不会因此跳过文件。

use crate::core::scanner::LocalEntry;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{ObjectGateway, RemoteMetadata};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// 本地文件元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMetadata {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl From<&LocalEntry> for LocalMetadata {
    fn from(entry: &LocalEntry) -> Self {
        Self {
            size: entry.size,
            modified_at: entry.modified_at,
        }
    }
}

/// 判断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    RemoteMissing,
    LocalNewer,
    RemoteCheckFailedUpload,
    LocalMissing,
    SizesDiffer,
    RemoteNewer,
    LocalCheckFailed,
    RemoteCheckFailedDownload,
    UpToDate,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::RemoteMissing => "object not found, uploading",
            DecisionReason::LocalNewer => "local file is newer, uploading",
            DecisionReason::RemoteCheckFailedUpload => "failed to check remote object, uploading",
            DecisionReason::LocalMissing => "local file does not exist",
            DecisionReason::SizesDiffer => "sizes differ",
            DecisionReason::RemoteNewer => "remote is newer",
            DecisionReason::LocalCheckFailed => "failed to check local file, downloading",
            DecisionReason::RemoteCheckFailedDownload => {
                "failed to check remote object, downloading"
            }
            DecisionReason::UpToDate => "up-to-date, skipping",
        };
        f.write_str(s)
    }
}

/// 传输判断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessDecision {
    pub should_transfer: bool,
    pub reason: DecisionReason,
}

impl StalenessDecision {
    fn transfer(reason: DecisionReason) -> Self {
        Self {
            should_transfer: true,
            reason,
        }
    }

    fn skip(reason: DecisionReason) -> Self {
        Self {
            should_transfer: false,
            reason,
        }
    }
}

/// 上传判断：本地修改时间严格晚于远程才上传
pub fn compare_upload(
    local_modified: DateTime<Utc>,
    remote: Option<&RemoteMetadata>,
) -> StalenessDecision {
    match remote {
        None => StalenessDecision::transfer(DecisionReason::RemoteMissing),
        Some(remote) if local_modified > remote.modified_at => {
            StalenessDecision::transfer(DecisionReason::LocalNewer)
        }
        Some(_) => StalenessDecision::skip(DecisionReason::UpToDate),
    }
}

/// 下载判断：大小不同必下载，其次远程时间严格更晚才下载
pub fn compare_download(
    local: Option<&LocalMetadata>,
    remote: &RemoteMetadata,
) -> StalenessDecision {
    let Some(local) = local else {
        return StalenessDecision::transfer(DecisionReason::LocalMissing);
    };

    if local.size != remote.size {
        return StalenessDecision::transfer(DecisionReason::SizesDiffer);
    }

    if remote.modified_at > local.modified_at {
        StalenessDecision::transfer(DecisionReason::RemoteNewer)
    } else {
        StalenessDecision::skip(DecisionReason::UpToDate)
    }
}

/// 每次判断前实时获取两边元数据，不做缓存
#[derive(Clone)]
pub struct StalenessOracle {
    gateway: Arc<dyn ObjectGateway>,
}

impl StalenessOracle {
    pub fn new(gateway: Arc<dyn ObjectGateway>) -> Self {
        Self { gateway }
    }

    pub async fn decide_upload(
        &self,
        remote_key: &str,
        local_modified: DateTime<Utc>,
    ) -> StalenessDecision {
        match self.gateway.head(remote_key).await {
            Ok(remote) => compare_upload(local_modified, remote.as_ref()),
            Err(e) if e.is_not_found() => compare_upload(local_modified, None),
            Err(e) => {
                warn!("检查远程对象失败 {}: {}", remote_key, e);
                StalenessDecision::transfer(DecisionReason::RemoteCheckFailedUpload)
            }
        }
    }

    /// 远程对象必须存在（调用方已从列表中得知），否则返回 `NotFound`
    pub async fn decide_download(
        &self,
        remote_key: &str,
        local_path: &Path,
    ) -> SyncResult<StalenessDecision> {
        let remote = match self.gateway.head(remote_key).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                return Err(SyncError::NotFound(format!(
                    "remote object disappeared: {}",
                    remote_key
                )))
            }
            Err(e) if e.is_not_found() => {
                return Err(SyncError::NotFound(format!(
                    "remote object disappeared: {}",
                    remote_key
                )))
            }
            Err(e) => {
                warn!("检查远程对象失败 {}: {}", remote_key, e);
                return Ok(StalenessDecision::transfer(
                    DecisionReason::RemoteCheckFailedDownload,
                ));
            }
        };

        let local = match tokio::fs::metadata(local_path).await {
            Ok(meta) => match meta.modified() {
                Ok(modified) => LocalMetadata {
                    size: meta.len(),
                    modified_at: DateTime::<Utc>::from(modified),
                },
                Err(e) => {
                    debug!("读取本地修改时间失败 {}: {}", local_path.display(), e);
                    return Ok(StalenessDecision::transfer(DecisionReason::LocalCheckFailed));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(compare_download(None, &remote));
            }
            Err(e) => {
                debug!("读取本地文件失败 {}: {}", local_path.display(), e);
                return Ok(StalenessDecision::transfer(DecisionReason::LocalCheckFailed));
            }
        };

        Ok(compare_download(Some(&local), &remote))
    }
}
