//! 错误类型

use crate::core::planner::Direction;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// 对象存储网关错误
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    pub fn backend(e: impl Into<anyhow::Error>) -> Self {
        GatewayError::Backend(e.into())
    }
}

impl From<opendal::Error> for GatewayError {
    fn from(e: opendal::Error) -> Self {
        match e.kind() {
            opendal::ErrorKind::NotFound => GatewayError::NotFound(e.to_string()),
            _ => GatewayError::Backend(e.into()),
        }
    }
}

/// 同步引擎错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<walkdir::Error> for SyncError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(PathBuf::from).unwrap_or_default();
        let source = e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
        SyncError::Io { path, source }
    }
}

/// 单个传输操作失败
#[derive(Debug, Error)]
#[error("failed to process {} ({remote_key}): {source:#}", local_path.display())]
pub struct TransferError {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub direction: Direction,
    #[source]
    pub source: anyhow::Error,
}

/// 一批操作中的全部失败
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<TransferError>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} transfer(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
