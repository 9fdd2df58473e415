//! 本地目录遍历
//!
//! 不进入符号链接指向的目录（walkdir `follow_links(false)`）。指向普通文件的符号链接
//! 按链接路径产出，大小和修改时间取自目标文件；失效链接和指向目录的链接跳过。
//! 任一目录或元数据读取失败都会终止整个遍历，不返回部分结果。

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 本地文件条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// 文件完整路径
    pub path: PathBuf,
    /// 相对根目录的路径，统一使用 `/`；根本身是文件时为空
    pub relative_path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// 惰性遍历器，只产出普通文件
pub struct TreeWalk {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl TreeWalk {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let inner = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self { root, inner }
    }

    fn to_entry(
        &self,
        entry: walkdir::DirEntry,
        metadata: std::fs::Metadata,
    ) -> SyncResult<LocalEntry> {
        let modified = metadata
            .modified()
            .map_err(|e| SyncError::io(entry.path(), e))?;

        let relative_path = entry
            .path()
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| Path::new(""))
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(LocalEntry {
            path: entry.into_path(),
            relative_path,
            size: metadata.len(),
            modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

impl Iterator for TreeWalk {
    type Item = SyncResult<LocalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            if file_type.is_symlink() {
                match std::fs::metadata(entry.path()) {
                    Ok(target) if target.is_file() => return Some(self.to_entry(entry, target)),
                    Ok(_) => debug!("跳过指向目录的符号链接: {}", entry.path().display()),
                    Err(e) => debug!("跳过失效的符号链接 {}: {}", entry.path().display(), e),
                }
                continue;
            }

            // 设备、管道等特殊文件不上传
            if !file_type.is_file() {
                continue;
            }

            return Some(
                entry
                    .metadata()
                    .map_err(SyncError::from)
                    .and_then(|metadata| self.to_entry(entry, metadata)),
            );
        }
    }
}

/// 读取单个本地文件的元数据
pub fn stat_file(path: &Path) -> SyncResult<LocalEntry> {
    let metadata = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
    let modified = metadata.modified().map_err(|e| SyncError::io(path, e))?;
    Ok(LocalEntry {
        path: path.to_path_buf(),
        relative_path: String::new(),
        size: metadata.len(),
        modified_at: DateTime::<Utc>::from(modified),
    })
}

/// 遍历整棵目录树，遇到任何错误立即失败
pub fn enumerate_tree(root: &Path) -> SyncResult<Vec<LocalEntry>> {
    let metadata = std::fs::metadata(root).map_err(|e| SyncError::io(root, e))?;
    if metadata.is_file() {
        debug!("扫描目标是单个文件: {}", root.display());
        return Ok(vec![stat_file(root)?]);
    }

    let entries = TreeWalk::new(root).collect::<SyncResult<Vec<_>>>()?;
    info!("扫描完成: {} 个文件 ({})", entries.len(), root.display());
    Ok(entries)
}

/// 在阻塞线程池中遍历，供 async 调用方使用
pub async fn enumerate_tree_blocking(root: PathBuf) -> SyncResult<Vec<LocalEntry>> {
    let path = root.clone();
    tokio::task::spawn_blocking(move || enumerate_tree(&path))
        .await
        .map_err(|e| SyncError::io(root, std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn yields_only_files_with_slash_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), "bb").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let entries = enumerate_tree(dir.path()).unwrap();
        let rel: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(rel, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(entries[1].size, 2);
        assert_eq!(entries[1].path, dir.path().join("sub").join("b.txt"));
    }

    #[test]
    fn single_file_root_has_empty_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();

        let entries = enumerate_tree(&file).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "");
        assert_eq!(entries[0].size, 5);
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = enumerate_tree(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_yielded_with_target_metadata() {
        use std::os::unix::fs::symlink;

        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("shared.txt"), "shared!").unwrap();
        fs::create_dir(outside.path().join("folder")).unwrap();
        fs::write(outside.path().join("folder").join("inner.txt"), "i").unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), "x").unwrap();
        symlink(outside.path().join("shared.txt"), dir.path().join("link.txt")).unwrap();
        symlink(outside.path().join("folder"), dir.path().join("dirlink")).unwrap();
        symlink(outside.path().join("gone.txt"), dir.path().join("dangling.txt")).unwrap();

        let entries = enumerate_tree(dir.path()).unwrap();
        let rel: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(rel, vec!["link.txt", "real.txt"]);
        assert_eq!(entries[0].size, 7);
        assert_eq!(entries[0].path, dir.path().join("link.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_aborts_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("b.txt"), "b").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root 用户可以绕过权限检查
        let readable = fs::read_dir(&locked).is_ok();
        let result = enumerate_tree(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert!(matches!(result, Err(SyncError::Io { .. })));
        }
    }
}
