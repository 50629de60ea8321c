use crate::core::path_mapper::PathMapper;
use crate::storage::local::{self, LocalFileState};
use crate::storage::{RemoteObject, StorageResult};
use chrono::SubsecRound;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// 同步决策结果，两个列表都保持输入顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDecision {
    pub to_fetch: Vec<RemoteObject>,
    /// 已经同步、无需下载
    pub to_skip: Vec<RemoteObject>,
}

impl SyncDecision {
    pub fn fetch_bytes(&self) -> u64 {
        self.to_fetch.iter().map(|o| o.size).sum()
    }
}

/// 远程对象是否需要下载：
/// 本地不存在，或大小不同，或远程修改时间（截断到秒）晚于本地修改时间
pub fn needs_fetch(remote: &RemoteObject, local: &LocalFileState) -> bool {
    if !local.exists {
        return true;
    }
    if local.size != remote.size {
        debug!(
            "文件大小不同: {} (remote={}, local={})",
            remote.key, remote.size, local.size
        );
        return true;
    }
    match local.mtime {
        // 部分列表接口带亚秒精度，元数据接口不带
        Some(mtime) => remote.last_modified.trunc_subsecs(0) > mtime,
        None => true,
    }
}

/// 对每个远程条目算出本地目标路径并决定下载或跳过。
/// `sync` 为 false 时全部下载。
pub async fn decide(
    entries: Vec<RemoteObject>,
    mapper: &PathMapper,
    sync: bool,
) -> StorageResult<SyncDecision> {
    if !sync {
        return Ok(SyncDecision {
            to_fetch: entries,
            to_skip: Vec::new(),
        });
    }

    let mut decision = SyncDecision::default();
    for entry in entries {
        let destination = mapper.destination(&entry.key);
        let state = LocalFileState::read(&destination).await?;
        if needs_fetch(&entry, &state) {
            decision.to_fetch.push(entry);
        } else {
            debug!("已同步，跳过: {}", destination.display());
            decision.to_skip.push(entry);
        }
    }
    Ok(decision)
}

/// sync-delete 的删除集合：数据集目录下没有对应远程键的本地文件。
///
/// 数据集目录取自第一个远程键；没有远程条目时不删除任何东西。
pub async fn deletion_candidates(
    remote: &[RemoteObject],
    mapper: &PathMapper,
) -> StorageResult<Vec<PathBuf>> {
    let Some(folder) = remote.iter().find_map(|o| mapper.dataset_folder(&o.key)) else {
        return Ok(Vec::new());
    };

    let keep: HashSet<PathBuf> = remote.iter().map(|o| mapper.destination(&o.key)).collect();
    let files = local::list_files(&folder).await?;

    Ok(files
        .into_iter()
        .filter(|path| path.starts_with(&folder) && !keep.contains(path))
        .collect())
}
