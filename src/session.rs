//! 上次运行记录，用于 resync
//!
//! 引擎本身不读写会话，只有入口在运行成功后保存。

use crate::core::{SyncMode, SyncRequest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 会话文件名（位于用户主目录）
pub const SESSION_FILE_NAME: &str = ".syncthing";

/// 上次运行的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub last_key: String,
    #[serde(default)]
    pub last_source_path: PathBuf,
    #[serde(default)]
    pub last_dest_path: PathBuf,
    pub last_sync_time: DateTime<Utc>,
    pub last_operation_mode: SyncMode,
}

impl SessionRecord {
    pub fn from_request(request: &SyncRequest, key: &str, now: DateTime<Utc>) -> Self {
        let (last_source_path, last_dest_path) = match request {
            SyncRequest::Host { source, .. } => (source.clone(), PathBuf::new()),
            SyncRequest::Sync { dest, .. } => (PathBuf::new(), dest.clone()),
        };
        Self {
            last_key: key.to_string(),
            last_source_path,
            last_dest_path,
            last_sync_time: now,
            last_operation_mode: request.mode(),
        }
    }

    /// 按上次参数重新运行；重新上传时总是替换已有 key
    pub fn resync_request(&self) -> Result<SyncRequest> {
        match self.last_operation_mode {
            SyncMode::Host => {
                anyhow::ensure!(
                    !self.last_source_path.as_os_str().is_empty(),
                    "last session has no source path"
                );
                Ok(SyncRequest::Host {
                    source: self.last_source_path.clone(),
                    key: self.last_key.clone(),
                    replace_existing: true,
                })
            }
            SyncMode::Sync => {
                anyhow::ensure!(
                    !self.last_dest_path.as_os_str().is_empty(),
                    "last session has no destination path"
                );
                Ok(SyncRequest::Sync {
                    key: self.last_key.clone(),
                    dest: self.last_dest_path.clone(),
                })
            }
        }
    }
}

/// 会话存储
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>>;

    fn save(&self, record: &SessionRecord) -> Result<()>;
}

/// JSON 文件会话存储
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    path: PathBuf,
}

impl JsonSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.syncthing`
    pub fn default_location() -> Result<Self> {
        let home = crate::dirs::home_dir().context("failed to get home directory")?;
        Ok(Self::new(home.join(SESSION_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("failed to read sync file"),
        };

        let record = serde_json::from_str(&content).context("failed to unmarshal sync data")?;
        Ok(Some(record))
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        let data = serde_json::to_string_pretty(record).context("failed to marshal sync data")?;

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&self.path)
            .with_context(|| format!("failed to write sync file {}", self.path.display()))?;
        file.write_all(data.as_bytes())
            .context("failed to write sync file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join(SESSION_FILE_NAME));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn record_round_trips_and_rehosts_with_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join(SESSION_FILE_NAME));

        let request = SyncRequest::Host {
            source: PathBuf::from("/data/photos"),
            key: "abcd".to_string(),
            replace_existing: false,
        };
        let record = SessionRecord::from_request(&request, "ABCD", Utc::now());
        store.save(&record).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(
            loaded.resync_request().unwrap(),
            SyncRequest::Host {
                source: PathBuf::from("/data/photos"),
                key: "ABCD".to_string(),
                replace_existing: true,
            }
        );
    }

    #[test]
    fn sync_record_resyncs_into_same_destination() {
        let request = SyncRequest::Sync {
            key: "WXYZ".to_string(),
            dest: PathBuf::from("/tmp/out"),
        };
        let record = SessionRecord::from_request(&request, "WXYZ", Utc::now());
        assert_eq!(record.resync_request().unwrap(), request);
    }

    #[test]
    fn reads_snake_case_json() {
        let json = r#"{
            "last_key": "QWER",
            "last_source_path": "",
            "last_dest_path": "/tmp/x",
            "last_sync_time": "2024-05-01T10:00:00Z",
            "last_operation_mode": "sync"
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.last_operation_mode, SyncMode::Sync);
        assert_eq!(record.last_dest_path, PathBuf::from("/tmp/x"));
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join(SESSION_FILE_NAME));
        let request = SyncRequest::Sync {
            key: "K".to_string(),
            dest: PathBuf::from("/tmp/k"),
        };
        store
            .save(&SessionRecord::from_request(&request, "K", Utc::now()))
            .unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
