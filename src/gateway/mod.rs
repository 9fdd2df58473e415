pub mod local;
pub mod memory;
pub mod s3;

use crate::config::{StoreConfig, StoreKind};
use crate::error::GatewayError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalGateway;
pub use memory::MemoryGateway;
pub use s3::S3Gateway;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, stat 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 流式传输的数据块
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// 对象是否属于列表范围：等于 `prefix`，或位于 `prefix/` 之下
pub fn in_listing_scope(prefix: &str, key: &str) -> bool {
    if prefix.is_empty() || prefix.ends_with('/') {
        return key.starts_with(prefix);
    }
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// 远程对象（列表结果）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// 远程对象元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl From<&RemoteObject> for RemoteMetadata {
    fn from(obj: &RemoteObject) -> Self {
        Self {
            size: obj.size,
            modified_at: obj.modified_at,
        }
    }
}

/// 对象存储网关
///
/// 所有 key 在调用前已经由 [`RemoteKey`](crate::core::RemoteKey) 规范化。
#[async_trait]
pub trait ObjectGateway: Send + Sync {
    /// 列出等于 `prefix` 或位于 `prefix/` 之下的全部对象（不含目录占位）
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, GatewayError>;

    /// 获取对象元数据，不存在时返回 `None`
    async fn head(&self, key: &str) -> Result<Option<RemoteMetadata>, GatewayError>;

    /// 读取整个对象
    async fn get(&self, key: &str) -> Result<Bytes, GatewayError>;

    /// 写入整个对象
    async fn put(&self, key: &str, data: Bytes) -> Result<(), GatewayError>;

    /// 流式读取（用于大文件）
    async fn get_stream(&self, key: &str) -> Result<ByteStream, GatewayError> {
        // 默认实现：整体读取后作为单个数据块返回
        let data = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    /// 流式写入（用于大文件），返回写入的字节数
    async fn put_stream(&self, key: &str, mut stream: ByteStream) -> Result<u64, GatewayError> {
        // 默认实现：收集所有数据后写入
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.try_next().await.map_err(GatewayError::backend)? {
            data.extend_from_slice(&chunk);
        }
        let size = data.len() as u64;
        self.put(key, data.freeze()).await?;
        Ok(size)
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建网关实例
pub async fn create_gateway(config: &StoreConfig) -> Result<Arc<dyn ObjectGateway>> {
    match config.kind {
        StoreKind::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires bucket"))?;
            let access_key = config
                .access_key_id
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires accessKeyId"))?;
            let secret_key = config
                .secret_access_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires secretAccessKey"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, config.region);
            Ok(Arc::new(S3Gateway::new(
                bucket,
                &config.region,
                access_key,
                secret_key,
                config.endpoint.clone(),
            )?) as Arc<dyn ObjectGateway>)
        }
        StoreKind::Local => {
            let root = config
                .local_root
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local store requires localRoot"))?;
            tracing::info!("初始化本地存储: {}", root.display());
            Ok(Arc::new(LocalGateway::new(root)?) as Arc<dyn ObjectGateway>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_scope_stops_at_key_boundary() {
        assert!(in_listing_scope("syncThing/ABCD", "syncThing/ABCD"));
        assert!(in_listing_scope("syncThing/ABCD", "syncThing/ABCD/a.txt"));
        assert!(!in_listing_scope("syncThing/ABCD", "syncThing/ABCDE/a.txt"));
        assert!(in_listing_scope("syncThing/ABCD/", "syncThing/ABCD/sub/b.txt"));
        assert!(!in_listing_scope("syncThing/ABCD/", "syncThing/ABCD"));
        assert!(in_listing_scope("", "anything"));
    }

    #[tokio::test]
    async fn default_stream_methods_round_trip_through_put_and_get() {
        let gateway = MemoryGateway::new();
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];

        let written = gateway
            .put_stream("syncThing/K/f", Box::pin(futures::stream::iter(chunks)))
            .await
            .unwrap();
        assert_eq!(written, 11);

        let data: Vec<Bytes> = gateway
            .get_stream("syncThing/K/f")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(data.concat(), b"hello world");
    }

    #[tokio::test]
    async fn local_store_is_created_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            kind: StoreKind::Local,
            local_root: Some(dir.path().join("objects")),
            ..Default::default()
        };

        let gateway = create_gateway(&config).await.unwrap();
        assert!(gateway.name().starts_with("local:"));
        assert!(dir.path().join("objects").is_dir());
    }

    #[tokio::test]
    async fn s3_store_requires_bucket() {
        let err = create_gateway(&StoreConfig::default()).await.err().unwrap();
        assert!(err.to_string().contains("bucket"));
    }
}
