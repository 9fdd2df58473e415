//! 远程 key 命名空间
//!
//! 所有对象都位于 `syncThing/<KEY>/...` 之下。`KEY` 只在 [`RemoteKey::new`] 中转为大写，
//! 之后的列表、比较、拼接都使用规范化后的形式。

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::fmt;

/// 固定的根前缀
pub const SYNC_ROOT: &str = "syncThing";

/// 随机 key 长度
pub const DEFAULT_KEY_LENGTH: usize = 6;

/// 规范化后的同步 key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey {
    key: String,
    full: String,
}

impl RemoteKey {
    pub fn new(raw: &str) -> SyncResult<Self> {
        let key = raw.trim().trim_matches('/').to_uppercase();
        if key.is_empty() {
            return Err(SyncError::InvalidKey("key must not be empty".to_string()));
        }
        // key 只能是单个路径段，strip 依赖这一点
        if key.contains('/') {
            return Err(SyncError::InvalidKey(format!(
                "key must be a single path segment: {}",
                raw
            )));
        }

        let full = format!("{}/{}", SYNC_ROOT, key);
        Ok(Self { key, full })
    }

    /// 规范化后的 key 段，例如 `ABCD`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 完整对象前缀，例如 `syncThing/ABCD`
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// 拼接相对路径，相对部分保持原样
    pub fn join(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.full.clone()
        } else {
            format!("{}/{}", self.full, relative)
        }
    }

    /// 对象是否属于该 key（等于 key 本身或位于 key 目录下）
    pub fn contains(&self, object_key: &str) -> bool {
        object_key == self.full
            || object_key
                .strip_prefix(self.full.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// 剥离 `syncThing/KEY/`，返回剩余的相对路径
    ///
    /// 对象正好位于 key 本身时返回空串；不属于该 key 时返回 `None`。
    pub fn strip<'a>(&self, object_key: &'a str) -> Option<&'a str> {
        if object_key == self.full {
            return Some("");
        }
        object_key
            .strip_prefix(self.full.as_str())?
            .strip_prefix('/')
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// 新 key 生成策略
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 随机大写字母 key
#[derive(Debug, Clone)]
pub struct RandomKeyGenerator {
    length: usize,
}

impl RandomKeyGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> String {
        const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
            .collect()
    }
}
