//! 操作规划：把本地目录树 / 远程列表转换成一批待执行的传输操作

use crate::core::comparator::{DecisionReason, StalenessDecision, StalenessOracle};
use crate::core::key::RemoteKey;
use crate::core::scanner::{enumerate_tree_blocking, stat_file};
use crate::error::{SyncError, SyncResult};
use crate::gateway::{ObjectGateway, RemoteObject};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// 单个文件传输操作，创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    local_path: PathBuf,
    remote_key: String,
    direction: Direction,
    is_replace: bool,
}

impl FileOperation {
    pub fn upload(local_path: impl Into<PathBuf>, remote_key: impl Into<String>, is_replace: bool) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            direction: Direction::Upload,
            is_replace,
        }
    }

    pub fn download(remote_key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            direction: Direction::Download,
            is_replace: true,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_replace(&self) -> bool {
        self.is_replace
    }
}

/// 因为已是最新而跳过的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub reason: DecisionReason,
}

/// 一批传输操作
///
/// 同一批次内本地路径与远程 key 都不会重复，执行时各操作互不干扰。
#[derive(Debug, Default)]
pub struct OperationBatch {
    operations: Vec<FileOperation>,
    skipped: Vec<SkippedFile>,
    local_paths: HashSet<PathBuf>,
    remote_keys: HashSet<String>,
}

impl OperationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: impl IntoIterator<Item = FileOperation>) -> SyncResult<Self> {
        let mut batch = Self::new();
        for op in operations {
            batch.push(op)?;
        }
        Ok(batch)
    }

    pub fn push(&mut self, op: FileOperation) -> SyncResult<()> {
        if self.local_paths.contains(&op.local_path) {
            return Err(SyncError::InvalidTarget(format!(
                "duplicate local path in batch: {}",
                op.local_path.display()
            )));
        }
        if self.remote_keys.contains(&op.remote_key) {
            return Err(SyncError::InvalidTarget(format!(
                "duplicate remote key in batch: {}",
                op.remote_key
            )));
        }
        self.local_paths.insert(op.local_path.clone());
        self.remote_keys.insert(op.remote_key.clone());
        self.operations.push(op);
        Ok(())
    }

    fn push_decided(
        &mut self,
        op: FileOperation,
        decision: StalenessDecision,
    ) -> SyncResult<()> {
        if decision.should_transfer {
            self.push(op)
        } else {
            self.skipped.push(SkippedFile {
                local_path: op.local_path,
                remote_key: op.remote_key,
                reason: decision.reason,
            });
            Ok(())
        }
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// 没有需要执行的操作（全部最新或没有文件）
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<FileOperation> {
        self.operations
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn base_name(object_key: &str) -> &str {
    object_key.rsplit('/').next().unwrap_or(object_key)
}

/// 操作规划器
pub struct OperationPlanner {
    gateway: Arc<dyn ObjectGateway>,
    oracle: StalenessOracle,
}

impl OperationPlanner {
    pub fn new(gateway: Arc<dyn ObjectGateway>) -> Self {
        let oracle = StalenessOracle::new(gateway.clone());
        Self { gateway, oracle }
    }

    /// 上传规划
    ///
    /// 新 key（`replace_existing == false`）总是写入；替换已有 key 时逐个文件做新旧判断。
    pub async fn plan_host(
        &self,
        source: &Path,
        key: &RemoteKey,
        replace_existing: bool,
    ) -> SyncResult<OperationBatch> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| SyncError::io(source, e))?;

        if metadata.is_dir() {
            self.plan_host_directory(source, key, replace_existing).await
        } else {
            self.plan_host_file(source, key, replace_existing).await
        }
    }

    async fn plan_host_file(
        &self,
        source: &Path,
        key: &RemoteKey,
        replace_existing: bool,
    ) -> SyncResult<OperationBatch> {
        let mut batch = OperationBatch::new();

        if replace_existing {
            // 替换模式下文件直接占用整个 key
            let remote_key = key.as_str().to_string();
            let entry = stat_file(source)?;
            let decision = self.oracle.decide_upload(&remote_key, entry.modified_at).await;
            info!("{}: {}", file_label(source), decision.reason);
            batch.push_decided(FileOperation::upload(source, remote_key, true), decision)?;
        } else {
            let name = source.file_name().ok_or_else(|| {
                SyncError::InvalidTarget(format!("source has no file name: {}", source.display()))
            })?;
            let remote_key = key.join(&name.to_string_lossy());
            info!("上传 {} → {}", source.display(), remote_key);
            batch.push(FileOperation::upload(source, remote_key, false))?;
        }

        Ok(batch)
    }

    async fn plan_host_directory(
        &self,
        source: &Path,
        key: &RemoteKey,
        replace_existing: bool,
    ) -> SyncResult<OperationBatch> {
        let entries = enumerate_tree_blocking(source.to_path_buf()).await?;
        let mut batch = OperationBatch::new();

        for entry in entries {
            let remote_key = key.join(&entry.relative_path);
            let op = FileOperation::upload(&entry.path, remote_key, replace_existing);

            if replace_existing {
                let decision = self
                    .oracle
                    .decide_upload(op.remote_key(), entry.modified_at)
                    .await;
                info!("{}: {}", file_label(&entry.path), decision.reason);
                batch.push_decided(op, decision)?;
            } else {
                info!("上传 {} → {}", entry.path.display(), op.remote_key());
                batch.push(op)?;
            }
        }

        debug!(
            "上传规划完成: {} 个待传输, {} 个跳过",
            batch.len(),
            batch.skipped().len()
        );
        Ok(batch)
    }

    /// 下载规划：把 key 下的全部对象映射到本地路径
    pub async fn plan_sync(&self, key: &RemoteKey, dest: &Path) -> SyncResult<OperationBatch> {
        info!("同步 {} → {}", key, dest.display());

        let objects: Vec<RemoteObject> = self
            .gateway
            .list(key.as_str())
            .await?
            .into_iter()
            .filter(|obj| key.contains(&obj.key))
            .collect();

        if objects.is_empty() {
            return Err(SyncError::NotFound(format!(
                "no objects found with prefix {:?}",
                key.as_str()
            )));
        }

        let dest_meta = match tokio::fs::metadata(dest).await {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(SyncError::io(dest, e)),
        };
        let dest_is_dir = dest_meta.as_ref().is_some_and(|m| m.is_dir());

        if let [object] = objects.as_slice() {
            let local_path = if dest_is_dir {
                dest.join(base_name(&object.key))
            } else {
                dest.to_path_buf()
            };
            let mut batch = OperationBatch::new();
            self.plan_download(&mut batch, &object.key, local_path).await?;
            return Ok(batch);
        }

        match dest_meta {
            None => tokio::fs::create_dir_all(dest)
                .await
                .map_err(|e| SyncError::io(dest, e))?,
            Some(_) if dest_is_dir => {}
            Some(_) => {
                return Err(SyncError::InvalidTarget(format!(
                    "destination {} must be a directory for multiple objects",
                    dest.display()
                )))
            }
        }

        let mut batch = OperationBatch::new();
        for object in &objects {
            let Some(relative) = key.strip(&object.key) else {
                continue;
            };
            let local_path = Self::local_path_for(dest, key, relative)?;

            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::io(parent, e))?;
            }

            self.plan_download(&mut batch, &object.key, local_path).await?;
        }

        debug!(
            "下载规划完成: {} 个待传输, {} 个跳过",
            batch.len(),
            batch.skipped().len()
        );
        Ok(batch)
    }

    async fn plan_download(
        &self,
        batch: &mut OperationBatch,
        object_key: &str,
        local_path: PathBuf,
    ) -> SyncResult<()> {
        let decision = self.oracle.decide_download(object_key, &local_path).await?;
        info!("{}: {}", file_label(&local_path), decision.reason);
        if decision.should_transfer {
            info!("下载 {} → {}", object_key, local_path.display());
        }
        batch.push_decided(FileOperation::download(object_key, local_path), decision)
    }

    /// 相对路径按 `/` 拆分后拼到目标目录下，拒绝逃出目标目录的路径
    fn local_path_for(dest: &Path, key: &RemoteKey, relative: &str) -> SyncResult<PathBuf> {
        if relative.is_empty() {
            return Ok(dest.join(key.key()));
        }

        let mut path = dest.to_path_buf();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            match Path::new(segment).components().next() {
                Some(Component::Normal(_)) if Path::new(segment).components().count() == 1 => {
                    path.push(segment)
                }
                _ => {
                    return Err(SyncError::InvalidTarget(format!(
                        "object path escapes destination: {}",
                        relative
                    )))
                }
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_rejects_duplicate_targets() {
        let mut batch = OperationBatch::new();
        batch
            .push(FileOperation::upload("/a", "syncThing/K/a", false))
            .unwrap();
        assert!(batch
            .push(FileOperation::upload("/a", "syncThing/K/b", false))
            .is_err());
        assert!(batch
            .push(FileOperation::upload("/b", "syncThing/K/a", false))
            .is_err());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn local_path_keeps_nested_structure() {
        let key = RemoteKey::new("ABCD").unwrap();
        let dest = Path::new("/tmp/out");
        assert_eq!(
            OperationPlanner::local_path_for(dest, &key, "sub/b.txt").unwrap(),
            dest.join("sub").join("b.txt")
        );
        assert_eq!(
            OperationPlanner::local_path_for(dest, &key, "").unwrap(),
            dest.join("ABCD")
        );
    }

    #[test]
    fn local_path_rejects_parent_segments() {
        let key = RemoteKey::new("ABCD").unwrap();
        let err = OperationPlanner::local_path_for(Path::new("/tmp/out"), &key, "../etc/passwd")
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTarget(_)));
    }

    #[test]
    fn base_name_is_last_segment() {
        assert_eq!(base_name("syncThing/ABCD/sub/b.txt"), "b.txt");
        assert_eq!(base_name("syncThing/ABCD"), "ABCD");
    }
}
