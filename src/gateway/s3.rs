use super::{
    in_listing_scope, ByteStream, ObjectGateway, RemoteMetadata, RemoteObject, IO_TIMEOUT_SECS,
    OP_TIMEOUT_SECS,
};
use crate::error::GatewayError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;

/// 分块读写大小，同时也是分片上传的分片大小（S3 要求至少 5MB）
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

pub struct S3Gateway {
    operator: Operator,
    name: String,
}

impl S3Gateway {
    pub fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 只设置单次请求超时，整批传输不设超时
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("s3://{}", bucket),
        })
    }

    /// 递归列表的目录：只列出 `prefix/` 之下，不会扫到前缀相同的其他 key
    fn list_dir(prefix: &str) -> String {
        if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        }
    }

    fn modified_at(meta: &Metadata) -> DateTime<Utc> {
        meta.last_modified().unwrap_or_default()
    }
}

#[async_trait]
impl ObjectGateway for S3Gateway {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, GatewayError> {
        let mut objects = Vec::new();

        // 单文件替换上传时对象正好位于 key 本身
        if !prefix.is_empty() && !prefix.ends_with('/') {
            if let Some(meta) = self.head(prefix).await? {
                objects.push(RemoteObject {
                    key: prefix.to_string(),
                    size: meta.size,
                    modified_at: meta.modified_at,
                });
            }
        }

        let mut lister = self
            .operator
            .lister_with(&Self::list_dir(prefix))
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let key = entry.path().trim_start_matches('/');
            let meta = entry.metadata();

            // 跳过目录占位对象
            if meta.is_dir() || key.is_empty() || !in_listing_scope(prefix, key) {
                continue;
            }

            objects.push(RemoteObject {
                key: key.to_string(),
                size: meta.content_length(),
                modified_at: Self::modified_at(meta),
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteMetadata>, GatewayError> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(RemoteMetadata {
                size: meta.content_length(),
                modified_at: Self::modified_at(&meta),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, GatewayError> {
        let data = self.operator.read(key).await?;
        Ok(data.to_bytes())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), GatewayError> {
        self.operator.write(key, data).await?;
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, GatewayError> {
        let reader = self.operator.reader_with(key).chunk(CHUNK_SIZE).await?;
        let stream = reader.into_bytes_stream(..).await?;
        Ok(Box::pin(stream))
    }

    async fn put_stream(&self, key: &str, mut stream: ByteStream) -> Result<u64, GatewayError> {
        let mut writer = self.operator.writer_with(key).chunk(CHUNK_SIZE).await?;
        let mut size = 0u64;

        let written = async {
            while let Some(chunk) = stream.try_next().await.map_err(GatewayError::backend)? {
                size += chunk.len() as u64;
                writer.write(chunk).await?;
            }
            writer.close().await?;
            Ok::<(), GatewayError>(())
        }
        .await;

        if let Err(e) = written {
            // 放弃未完成的分片上传
            let _ = writer.abort().await;
            return Err(e);
        }
        Ok(size)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
