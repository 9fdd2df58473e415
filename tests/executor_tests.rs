use keysync_lib::core::{
    FileOperation, OperationBatch, TransferExecutor, TransferObserver, MAX_CONCURRENT_TRANSFERS,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn uploads(count: usize) -> OperationBatch {
    OperationBatch::from_operations((0..count).map(|i| {
        FileOperation::upload(
            format!("/data/file-{i}.bin"),
            format!("syncThing/LOAD/file-{i}.bin"),
            false,
        )
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_exceeds_concurrency_limit() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let executor = TransferExecutor::default();
    let result = executor
        .execute(uploads(20), {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |_ctx, _key, _path| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u64, anyhow::Error>(1)
                }
            }
        })
        .await;

    assert_eq!(result.completed, 20);
    assert_eq!(result.bytes_transferred, 20);
    assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_TRANSFERS);
    assert!(peak.load(Ordering::SeqCst) > 1);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failures_are_isolated_and_reported_in_order() {
    let attempted = Arc::new(AtomicUsize::new(0));

    let executor = TransferExecutor::new(2);
    let result = executor
        .execute(uploads(6), {
            let attempted = attempted.clone();
            move |_ctx, key: String, _path: PathBuf| {
                let attempted = attempted.clone();
                async move {
                    attempted.fetch_add(1, Ordering::SeqCst);
                    if key.ends_with("file-1.bin") || key.ends_with("file-4.bin") {
                        anyhow::bail!("disk full");
                    }
                    Ok::<u64, anyhow::Error>(10)
                }
            }
        })
        .await;

    assert_eq!(attempted.load(Ordering::SeqCst), 6);
    assert_eq!(result.completed, 4);
    assert_eq!(result.bytes_transferred, 40);

    let keys: Vec<&str> = result
        .failures
        .iter()
        .map(|f| f.remote_key.as_str())
        .collect();
    assert_eq!(
        keys,
        vec!["syncThing/LOAD/file-1.bin", "syncThing/LOAD/file-4.bin"]
    );

    let err = result.into_result().unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("2 transfer(s) failed"));
    assert!(message.contains("disk full"));
    assert!(!message.contains("file-0.bin"));
}

#[derive(Default)]
struct RecordingObserver {
    tokens: Mutex<Vec<CancellationToken>>,
    finished: AtomicUsize,
}

impl TransferObserver for RecordingObserver {
    fn on_start(&self, _op: &FileOperation, token: CancellationToken) {
        assert!(!token.is_cancelled());
        self.tokens.lock().unwrap().push(token);
    }

    fn on_finish(&self, _op: &FileOperation, _result: &anyhow::Result<u64>) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_tokens_are_cancelled_after_each_transfer() {
    let observer = Arc::new(RecordingObserver::default());
    let executor = TransferExecutor::new(3).with_observer(observer.clone());

    let result = executor
        .execute(uploads(4), |ctx, key, _path| async move {
            assert!(!ctx.token().is_cancelled());
            if key.ends_with("file-2.bin") {
                anyhow::bail!("network reset");
            }
            Ok::<u64, anyhow::Error>(0)
        })
        .await;

    assert_eq!(result.completed, 3);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(observer.finished.load(Ordering::SeqCst), 4);

    let tokens = observer.tokens.lock().unwrap();
    assert_eq!(tokens.len(), 4);
    assert!(tokens.iter().all(|t| t.is_cancelled()));
}
