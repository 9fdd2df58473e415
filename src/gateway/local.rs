use super::{in_listing_scope, ByteStream, ObjectGateway, RemoteMetadata, RemoteObject};
use crate::error::GatewayError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use walkdir::WalkDir;

/// 以本地目录模拟的对象存储，key 中的 `/` 映射为子目录
pub struct LocalGateway {
    base_path: PathBuf,
    name: String,
}

impl LocalGateway {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/');
        key.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.base_path.clone(), |p, s| p.join(s))
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn backend(e: impl Into<anyhow::Error>) -> GatewayError {
        GatewayError::Backend(e.into())
    }
}

#[async_trait]
impl ObjectGateway for LocalGateway {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, GatewayError> {
        let base_path = self.base_path.clone();
        let prefix = prefix.to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let objects = tokio::task::spawn_blocking(move || {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&base_path).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(Self::backend)?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = match entry.path().strip_prefix(&base_path) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let key = match relative.to_str() {
                    Some(s) => Self::normalize_path(s),
                    None => continue,
                };
                if !in_listing_scope(&prefix, &key) {
                    continue;
                }

                let metadata = entry.metadata().map_err(Self::backend)?;
                let modified = metadata.modified().map_err(Self::backend)?;
                objects.push(RemoteObject {
                    key,
                    size: metadata.len(),
                    modified_at: DateTime::<Utc>::from(modified),
                });
            }
            Ok::<_, GatewayError>(objects)
        })
        .await
        .map_err(Self::backend)??;

        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteMetadata>, GatewayError> {
        let full_path = self.resolve_path(key);

        match fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(RemoteMetadata {
                size: metadata.len(),
                modified_at: DateTime::<Utc>::from(metadata.modified().map_err(Self::backend)?),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::backend(e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, GatewayError> {
        match fs::read(self.resolve_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::backend(e)),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), GatewayError> {
        let stream = futures::stream::once(async move { Ok(data) });
        self.put_stream(key, Box::pin(stream)).await?;
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, GatewayError> {
        match fs::File::open(self.resolve_path(key)).await {
            Ok(file) => Ok(Box::pin(ReaderStream::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::backend(e)),
        }
    }

    async fn put_stream(&self, key: &str, stream: ByteStream) -> Result<u64, GatewayError> {
        let full_path = self.resolve_path(key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(Self::backend)?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            let size = tokio::io::copy(&mut StreamReader::new(stream), &mut file).await?;
            file.flush().await?;
            fs::rename(&temp_path, &full_path).await?;
            Ok::<u64, std::io::Error>(size)
        }
        .await;

        written.map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Self::backend(e)
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
