//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "keysync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct RotatingFile {
    file_path: PathBuf,
    max_size: u64,
    writer: Option<BufWriter<File>>,
}

impl RotatingFile {
    fn open(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 已有文件超过限制时先轮转
        if fs::metadata(file_path).is_ok_and(|m| m.len() > max_size) {
            rotate_log(file_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        if !fs::metadata(&self.file_path).is_ok_and(|m| m.len() > self.max_size) {
            return Ok(());
        }

        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        rotate_log(&self.file_path)?;
        self.writer = Some(Self::open(&self.file_path, self.max_size)?);
        Ok(())
    }
}

/// 轮转日志文件：keysync.log -> keysync.log.old
fn rotate_log(file_path: &Path) -> io::Result<()> {
    let backup_path = file_path.with_extension("log.old");
    if backup_path.exists() {
        fs::remove_file(&backup_path)?;
    }
    fs::rename(file_path, &backup_path)
}

/// 带大小限制的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = RotatingFile::open(&file_path, max_size)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile {
                file_path,
                max_size,
                writer: Some(writer),
            })),
        })
    }

    fn lock(inner: &Mutex<RotatingFile>) -> MutexGuard<'_, RotatingFile> {
        inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = SizeRotatingWriter::lock(&self.inner);
        let written = match guard.writer.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                n
            }
            None => return Err(io::Error::new(io::ErrorKind::Other, "Writer not available")),
        };
        let _ = guard.rotate_if_needed();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = SizeRotatingWriter::lock(&self.inner);
        match guard.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.inner.clone(),
        }
    }
}

/// 获取日志目录路径（跟随配置目录）
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}
