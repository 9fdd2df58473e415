//! 应用配置模块
//!
//! `config.json` 按关注点分段（`store`、`transfer`、`log`），缺失或无法解析的段使用默认值，
//! 之后再由 `KEYSYNC_*` 环境变量覆盖。

use crate::core::SyncConfig;
use crate::core::MAX_CONCURRENT_TRANSFERS;
use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "config.json";

/// 对象存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    S3,
    Local,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub kind: StoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    /// 本地存储根目录（type = local）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,
}

fn default_region() -> String {
    "auto".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            bucket: None,
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            local_root: None,
        }
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
}

fn default_max_concurrent() -> usize {
    MAX_CONCURRENT_TRANSFERS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
        }
    }
}

impl From<&TransferConfig> for SyncConfig {
    fn from(config: &TransferConfig) -> Self {
        SyncConfig {
            max_concurrent_transfers: config.max_concurrent_transfers.max(1),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// 从配置目录加载，并应用环境变量覆盖
    pub fn load(config_dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// 只读取配置文件
    pub fn load_file(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let value = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str::<serde_json::Value>(&content)
                .with_context(|| format!("invalid config file {}", config_file.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", config_file.display()))
            }
        };

        Ok(Self {
            store: section(&value, "store"),
            transfer: section(&value, "transfer"),
            log: section(&value, "log"),
        })
    }

    /// 环境变量覆盖
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let store = &mut self.store;
        if let Some(v) = var("KEYSYNC_BUCKET") {
            store.bucket = Some(v);
        }
        if let Some(v) = var("KEYSYNC_REGION") {
            store.region = v;
        }
        if let Some(v) = var("KEYSYNC_ENDPOINT") {
            store.endpoint = Some(v);
        }
        if let Some(v) = var("KEYSYNC_ACCESS_KEY_ID") {
            store.access_key_id = Some(v);
        }
        if let Some(v) = var("KEYSYNC_SECRET_ACCESS_KEY") {
            store.secret_access_key = Some(v);
        }
        if let Some(v) = var("KEYSYNC_LOCAL_ROOT") {
            store.kind = StoreKind::Local;
            store.local_root = Some(PathBuf::from(v));
        }
    }

    /// 保存配置文件（保留未知段）
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);

        let mut value: serde_json::Value = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({})),
            Err(_) => serde_json::json!({}),
        };

        value["store"] = serde_json::to_value(&self.store)?;
        value["transfer"] = serde_json::to_value(&self.transfer)?;
        value["log"] = serde_json::to_value(&self.log)?;

        fs::create_dir_all(config_dir)?;
        fs::write(&config_file, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}

fn section<T: DeserializeOwned + Default>(value: &serde_json::Value, name: &str) -> T {
    value
        .get(name)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("keysync"))
        .unwrap_or_else(|| PathBuf::from(".keysync"))
}
