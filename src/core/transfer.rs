//! 传输执行：固定并发池，单个失败不影响其他操作，全部结束后汇总错误

use crate::core::planner::{Direction, FileOperation, OperationBatch};
use crate::core::progress::{NoopObserver, TransferObserver};
use crate::error::{AggregateError, TransferError};
use crate::gateway::{ByteStream, ObjectGateway};
use anyhow::{Context, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 最大并发传输数
pub const MAX_CONCURRENT_TRANSFERS: usize = 5;

/// 读取本地文件的缓冲大小
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// 单次传输的上下文
///
/// token 从批次的根 token 派生，传输结束时立即取消，只用于结束进度显示，
/// 不会影响同批次的其他操作。
#[derive(Debug, Clone)]
pub struct TransferContext {
    token: CancellationToken,
}

impl TransferContext {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// 批次执行结果
#[derive(Debug, Default)]
pub struct BatchResult {
    pub completed: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<TransferError>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self, AggregateError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(AggregateError {
                failures: self.failures,
            })
        }
    }
}

/// 传输执行器
pub struct TransferExecutor {
    max_concurrent: usize,
    observer: Arc<dyn TransferObserver>,
}

impl TransferExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 执行整批操作，所有操作结束（成功或失败）后才返回
    pub async fn execute<F, Fut>(&self, batch: OperationBatch, transfer: F) -> BatchResult
    where
        F: Fn(TransferContext, String, PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64>> + Send + 'static,
    {
        let operations = batch.into_operations();
        let mut result = BatchResult::default();
        if operations.is_empty() {
            return result;
        }

        debug!(
            "开始执行 {} 个传输操作 (并发 {})",
            operations.len(),
            self.max_concurrent
        );

        let transfer = Arc::new(transfer);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let root = CancellationToken::new();
        let mut outcomes: Vec<Option<Result<u64>>> = Vec::with_capacity(operations.len());
        outcomes.resize_with(operations.len(), || None);
        let mut tasks = JoinSet::new();

        for (index, op) in operations.iter().enumerate() {
            // 先占用槽位再启动任务，permit 随任务结束自动释放
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    outcomes[index] = Some(Err(anyhow::anyhow!("no transfer slot: {}", e)));
                    continue;
                }
            };

            let op = op.clone();
            let transfer = transfer.clone();
            let observer = self.observer.clone();
            let token = root.child_token();

            tasks.spawn(async move {
                let ctx = TransferContext {
                    token: token.clone(),
                };
                observer.on_start(&op, token.clone());

                let outcome = {
                    let _done = token.drop_guard();
                    let fut = transfer(
                        ctx,
                        op.remote_key().to_string(),
                        op.local_path().to_path_buf(),
                    );
                    AssertUnwindSafe(fut)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("transfer task panicked")))
                };

                observer.on_finish(&op, &outcome);
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!("传输任务异常结束: {}", e),
            }
        }

        for (op, outcome) in operations.into_iter().zip(outcomes) {
            let outcome =
                outcome.unwrap_or_else(|| Err(anyhow::anyhow!("transfer task was aborted")));
            match outcome {
                Ok(bytes) => {
                    result.completed += 1;
                    result.bytes_transferred += bytes;
                }
                Err(source) => result.failures.push(TransferError {
                    local_path: op.local_path().to_path_buf(),
                    remote_key: op.remote_key().to_string(),
                    direction: op.direction(),
                    source,
                }),
            }
        }

        debug!(
            "传输执行完成: 成功 {}, 失败 {}, {} 字节",
            result.completed,
            result.failures.len(),
            result.bytes_transferred
        );
        result
    }

    /// 使用网关按批次方向执行
    pub async fn execute_with_gateway(
        &self,
        batch: OperationBatch,
        direction: Direction,
        gateway: Arc<dyn ObjectGateway>,
    ) -> BatchResult {
        match direction {
            Direction::Upload => {
                self.execute(batch, move |ctx, key, path| {
                    upload_file(gateway.clone(), ctx, key, path)
                })
                .await
            }
            Direction::Download => {
                self.execute(batch, move |ctx, key, path| {
                    download_file(gateway.clone(), ctx, key, path)
                })
                .await
            }
        }
    }
}

impl Default for TransferExecutor {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_TRANSFERS)
    }
}

/// 上传单个文件，按块读取，返回字节数
pub async fn upload_file(
    gateway: Arc<dyn ObjectGateway>,
    _ctx: TransferContext,
    remote_key: String,
    local_path: PathBuf,
) -> Result<u64> {
    let file = tokio::fs::File::open(&local_path)
        .await
        .with_context(|| format!("open {}", local_path.display()))?;
    let stream: ByteStream = Box::pin(ReaderStream::with_capacity(file, READ_BUFFER_SIZE));

    let size = gateway
        .put_stream(&remote_key, stream)
        .await
        .with_context(|| format!("put object {}", remote_key))?;

    debug!("已上传 {} → {} ({} 字节)", local_path.display(), remote_key, size);
    Ok(size)
}

/// 下载单个对象，先流式写入临时文件再重命名，失败时清理临时文件
pub async fn download_file(
    gateway: Arc<dyn ObjectGateway>,
    _ctx: TransferContext,
    remote_key: String,
    local_path: PathBuf,
) -> Result<u64> {
    let stream = gateway
        .get_stream(&remote_key)
        .await
        .with_context(|| format!("get object {}", remote_key))?;

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("mkdir for {}", local_path.display()))?;
    }

    let mut temp_name = local_path.as_os_str().to_os_string();
    temp_name.push(".keysync-part");
    let temp_path = PathBuf::from(temp_name);

    let cleanup = scopeguard::guard(temp_path.clone(), |p| {
        let _ = std::fs::remove_file(p);
    });

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .with_context(|| format!("create file {}", temp_path.display()))?;
    let size = tokio::io::copy(&mut StreamReader::new(stream), &mut file)
        .await
        .with_context(|| format!("copy to file {}", local_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("copy to file {}", local_path.display()))?;
    drop(file);

    tokio::fs::rename(&temp_path, &local_path)
        .await
        .with_context(|| format!("create file {}", local_path.display()))?;

    scopeguard::ScopeGuard::into_inner(cleanup);
    debug!("已下载 {} → {} ({} 字节)", remote_key, local_path.display(), size);
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::MemoryGateway;
    use chrono::Utc;

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let result = TransferExecutor::default()
            .execute(OperationBatch::new(), move |_ctx, _key, _path| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<u64, anyhow::Error>(0) }
            })
            .await;
        assert!(result.is_success());
        assert_eq!(result.completed, 0);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_transfer_is_reported_as_failure() {
        let batch = OperationBatch::from_operations(vec![
            FileOperation::upload("/a", "syncThing/K/a", false),
            FileOperation::upload("/b", "syncThing/K/b", false),
        ])
        .unwrap();

        let result = TransferExecutor::default()
            .execute(batch, |_ctx, key, _path| async move {
                if key.ends_with("/a") {
                    panic!("boom");
                }
                Ok::<u64, anyhow::Error>(1)
            })
            .await;

        assert_eq!(result.completed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].remote_key, "syncThing/K/a");
    }

    #[tokio::test]
    async fn download_then_upload_through_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        gateway
            .insert("syncThing/K/sub/b.txt", "hello", Utc::now())
            .await;

        let local = dir.path().join("sub").join("b.txt");
        let ctx = TransferContext {
            token: CancellationToken::new(),
        };
        let n = download_file(
            gateway.clone(),
            ctx.clone(),
            "syncThing/K/sub/b.txt".to_string(),
            local.clone(),
        )
        .await
        .unwrap();
        assert_eq!(n, 5);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "hello");

        let n = upload_file(gateway.clone(), ctx, "syncThing/K/copy".to_string(), local)
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert!(gateway.head("syncThing/K/copy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let local = dir.path().join("missing.txt");
        let ctx = TransferContext {
            token: CancellationToken::new(),
        };

        let err = download_file(gateway, ctx, "syncThing/K/missing".to_string(), local.clone())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("get object"));
        assert!(!local.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// 只支持流式读写的网关，整体读写会直接失败
    struct ChunkedGateway {
        inner: MemoryGateway,
        chunks_received: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectGateway for ChunkedGateway {
        async fn list(
            &self,
            prefix: &str,
        ) -> Result<Vec<crate::gateway::RemoteObject>, GatewayError> {
            self.inner.list(prefix).await
        }

        async fn head(
            &self,
            key: &str,
        ) -> Result<Option<crate::gateway::RemoteMetadata>, GatewayError> {
            self.inner.head(key).await
        }

        async fn get(&self, _key: &str) -> Result<bytes::Bytes, GatewayError> {
            Err(GatewayError::backend(anyhow::anyhow!("whole-object read")))
        }

        async fn put(&self, _key: &str, _data: bytes::Bytes) -> Result<(), GatewayError> {
            Err(GatewayError::backend(anyhow::anyhow!("whole-object write")))
        }

        async fn get_stream(&self, key: &str) -> Result<ByteStream, GatewayError> {
            let data = self.inner.get(key).await?;
            let chunks: Vec<std::io::Result<bytes::Bytes>> = data
                .chunks(4)
                .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn put_stream(&self, key: &str, stream: ByteStream) -> Result<u64, GatewayError> {
            use futures::TryStreamExt;
            let chunks: Vec<bytes::Bytes> =
                stream.try_collect().await.map_err(GatewayError::backend)?;
            self.chunks_received
                .fetch_add(chunks.len(), std::sync::atomic::Ordering::SeqCst);
            let data = chunks.concat();
            let size = data.len() as u64;
            self.inner.put(key, data.into()).await?;
            Ok(size)
        }

        fn name(&self) -> &str {
            "chunked"
        }
    }

    #[tokio::test]
    async fn transfers_use_streaming_gateway_calls() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ChunkedGateway {
            inner: MemoryGateway::new(),
            chunks_received: std::sync::atomic::AtomicUsize::new(0),
        });
        gateway
            .inner
            .insert("syncThing/S/data.bin", "0123456789", Utc::now())
            .await;
        let ctx = TransferContext {
            token: CancellationToken::new(),
        };

        let local = dir.path().join("data.bin");
        let n = download_file(
            gateway.clone(),
            ctx.clone(),
            "syncThing/S/data.bin".to_string(),
            local.clone(),
        )
        .await
        .unwrap();
        assert_eq!(n, 10);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "0123456789");

        let n = upload_file(gateway.clone(), ctx, "syncThing/S/copy.bin".to_string(), local)
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert!(gateway.chunks_received.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        assert_eq!(
            gateway.inner.get("syncThing/S/copy.bin").await.unwrap(),
            bytes::Bytes::from_static(b"0123456789")
        );
    }
}
