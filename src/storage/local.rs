//! 本地文件系统辅助：文件状态、目录遍历、删除、修改时间

use super::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地文件状态，每次决策时现读，不缓存
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileState {
    pub exists: bool,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

impl LocalFileState {
    pub fn missing() -> Self {
        Self {
            exists: false,
            size: 0,
            mtime: None,
        }
    }

    /// 读取文件状态；目录和不存在的路径都视为“没有文件”
    pub async fn read(path: &Path) -> StorageResult<Self> {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {
                let mtime = metadata
                    .modified()
                    .map_err(|e| StorageError::io(path, e))?;
                Ok(Self {
                    exists: true,
                    size: metadata.len(),
                    mtime: Some(DateTime::<Utc>::from(mtime)),
                })
            }
            Ok(_) => Ok(Self::missing()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::missing()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}

/// 递归列出目录下的所有普通文件（目录不存在时返回空）
pub async fn list_files(root: &Path) -> StorageResult<Vec<PathBuf>> {
    if !fs::try_exists(root)
        .await
        .map_err(|e| StorageError::io(root, e))?
    {
        return Ok(Vec::new());
    }

    let base = root.to_path_buf();
    // 使用 spawn_blocking 避免阻塞 async runtime
    let files = tokio::task::spawn_blocking(move || {
        let mut files: Vec<PathBuf> = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    })
    .await
    .map_err(|e| StorageError::io(root, std::io::Error::other(e)))?;

    Ok(files)
}

/// 删除单个文件，已经不存在时不报错
pub async fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// 创建父目录；并发创建同一目录是幂等的
pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }
    Ok(())
}

/// 设置文件修改时间（同时写 atime）
pub fn set_modified_time(path: &Path, modified: DateTime<Utc>) -> std::io::Result<()> {
    let time = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    filetime::set_file_times(path, time, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_missing_and_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.nc");

        assert_eq!(
            LocalFileState::read(&path).await.unwrap(),
            LocalFileState::missing()
        );

        std::fs::write(&path, b"hello").unwrap();
        let state = LocalFileState::read(&path).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.size, 5);
        assert!(state.mtime.is_some());

        // 目录不算文件
        let state = LocalFileState::read(temp_dir.path()).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn lists_nested_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("p/d/2024");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("x.nc"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("p/d/y.nc"), b"y").unwrap();

        let files = list_files(&temp_dir.path().join("p/d")).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(list_files(&temp_dir.path().join("missing"))
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sets_modified_time_to_whole_seconds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.nc");
        std::fs::write(&path, b"a").unwrap();

        let when = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        set_modified_time(&path, when).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        assert_eq!(mtime.unix_seconds(), 1_700_000_000);
    }
}
