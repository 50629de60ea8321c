use crate::storage::{DatasetLocator, ListMode, Lookup, ObjectStore, RemoteObject, StorageResult};
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use tracing::{debug, info, warn};

/// 直接下载的解析结果
#[derive(Debug, Default)]
pub struct DirectResolution {
    /// 按请求顺序找到的对象
    pub found: Vec<RemoteObject>,
    /// 找不到的文件（数据集内的相对路径）
    pub not_found: Vec<String>,
}

impl DirectResolution {
    /// 由找不到的文件名拼出的补救正则（逐个转义后用 `|` 连接）
    pub fn not_found_regex(&self) -> Option<String> {
        if self.not_found.is_empty() {
            return None;
        }
        Some(
            self.not_found
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|"),
        )
    }
}

/// 远程列表服务：列表 + 正则过滤 + 直接下载的 HEAD 查询
pub struct RemoteScanner<'a> {
    store: &'a dyn ObjectStore,
    locator: &'a DatasetLocator,
    max_concurrent: usize,
}

impl<'a> RemoteScanner<'a> {
    pub fn new(store: &'a dyn ObjectStore, locator: &'a DatasetLocator) -> Self {
        Self {
            store,
            locator,
            max_concurrent: 8,
        }
    }

    /// HEAD 查询的并发数（至少 1）
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// 列出数据集下的对象，按列表顺序返回匹配 `regex` 的条目
    pub async fn scan(
        &self,
        mode: ListMode,
        regex: Option<&Regex>,
    ) -> StorageResult<Vec<RemoteObject>> {
        let prefix = self.locator.listing_prefix();
        info!("Listing files on remote server...");
        debug!("列表: {} prefix={} mode={:?}", self.store.name(), prefix, mode);

        let bucket = self.store.bucket().to_string();
        let mut listing = self.store.list(&prefix, mode).await?;
        let mut matched = Vec::new();
        let mut listed = 0usize;

        while let Some(object) = listing.try_next().await? {
            listed += 1;
            if regex.map_or(true, |re| re.is_match(&object.url(&bucket))) {
                matched.push(object);
            }
        }

        info!("列表完成: {} 个对象, {} 个匹配", listed, matched.len());
        Ok(matched)
    }

    /// 把用户给的路径换成桶内键：取数据集标签之后的部分，挂到数据集前缀下
    pub fn direct_key(&self, entry: &str) -> Option<String> {
        let segments = self.locator.prefix_segments();
        let relative = match segments.last() {
            Some(tag) => {
                let marker = format!("{}/", tag);
                entry
                    .rsplit_once(marker.as_str())
                    .map_or(entry, |(_, rest)| rest)
            }
            None => entry,
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return None;
        }

        Some(if self.locator.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.locator.prefix, relative)
        })
    }

    /// 逐个 HEAD 直接下载列表；404 记入 `not_found`，其它错误直接返回
    pub async fn resolve_direct(&self, entries: &[String]) -> StorageResult<DirectResolution> {
        let mut resolution = DirectResolution::default();
        let mut keys = Vec::new();

        for entry in entries {
            match self.direct_key(entry) {
                Some(key) => keys.push(key),
                None => warn!("{} does not seem to be valid. Skipping.", entry),
            }
        }

        // buffered 保持请求顺序
        let lookups: Vec<(String, Lookup)> = stream::iter(keys)
            .map(|key| async move {
                let lookup = self.store.head(&key).await?;
                Ok::<_, crate::storage::StorageError>((key, lookup))
            })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let root = self.locator.listing_prefix();
        for (key, lookup) in lookups {
            match lookup {
                Lookup::Found(object) => resolution.found.push(object),
                Lookup::NotFound => {
                    warn!(
                        "File s3://{}/{} not found on the server. Skipping.",
                        self.store.bucket(),
                        key
                    );
                    let relative = key.strip_prefix(root.as_str()).unwrap_or(&key);
                    resolution.not_found.push(relative.to_string());
                }
            }
        }

        if resolution.found.is_empty() && !entries.is_empty() {
            warn!(
                "No files found to download for direct download. \
                 Listing the dataset to compare with the requested files."
            );
        }
        Ok(resolution)
    }
}
