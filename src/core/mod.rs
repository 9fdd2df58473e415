pub mod comparator;
pub mod engine;
pub mod key;
pub mod planner;
pub mod progress;
pub mod scanner;
pub mod transfer;

pub use comparator::{
    compare_download, compare_upload, DecisionReason, LocalMetadata, StalenessDecision,
    StalenessOracle,
};
pub use engine::{SyncConfig, SyncEngine, SyncMode, SyncReport, SyncRequest, SyncStatus};
pub use key::{KeyGenerator, RandomKeyGenerator, RemoteKey, SYNC_ROOT};
pub use planner::{Direction, FileOperation, OperationBatch, OperationPlanner, SkippedFile};
pub use progress::{LogProgress, NoopObserver, TransferObserver};
pub use scanner::{enumerate_tree, enumerate_tree_blocking, LocalEntry, TreeWalk};
pub use transfer::{
    download_file, upload_file, BatchResult, TransferContext, TransferExecutor,
    MAX_CONCURRENT_TRANSFERS,
};
