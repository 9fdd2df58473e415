pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod session;

pub use config::{AppConfig, StoreConfig, StoreKind};
pub use core::{SyncConfig, SyncEngine, SyncMode, SyncReport, SyncRequest, SyncStatus};
pub use error::{AggregateError, GatewayError, SyncError, SyncResult, TransferError};
pub use gateway::{create_gateway, ObjectGateway};
pub use session::{JsonSessionStore, SessionRecord, SessionStore};

// 平台目录，避免额外的 dirs 依赖
pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        } else {
            std::env::var("HOME").ok().map(PathBuf::from)
        }
        .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        }
    }
}
