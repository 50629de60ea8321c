use super::{ListMode, Lookup, ObjectStore, RemoteObject, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// 进程内对象存储，按键排序，行为与 S3 列表一致
pub struct MemoryStore {
    endpoint: String,
    bucket: String,
    name: String,
    objects: RwLock<BTreeMap<String, (RemoteObject, Bytes)>>,
    gets: AtomicUsize,
}

impl MemoryStore {
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            name: format!("memory://{}", bucket),
            objects: RwLock::new(BTreeMap::new()),
            gets: AtomicUsize::new(0),
        }
    }

    /// 写入对象，etag 使用内容长度和时间戳拼出的稳定值
    pub fn put(&self, key: &str, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        let data = data.into();
        let etag = format!("{:x}-{:x}", data.len(), last_modified.timestamp());
        let object = RemoteObject::new(key, data.len() as u64, last_modified, etag);
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.to_string(), (object, data));
        }
    }

    /// 已执行的下载次数
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<RemoteObject> {
        self.objects
            .read()
            .map(|objects| objects.values().map(|(o, _)| o.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        mode: ListMode,
    ) -> StorageResult<BoxStream<'static, StorageResult<RemoteObject>>> {
        let entries: Vec<StorageResult<RemoteObject>> = self
            .snapshot()
            .into_iter()
            .filter(|o| o.key.starts_with(prefix))
            .filter(|o| match mode {
                ListMode::Recursive => true,
                ListMode::Shallow => !o.key[prefix.len()..].contains('/'),
            })
            .map(Ok)
            .collect();
        Ok(stream::iter(entries).boxed())
    }

    async fn head(&self, key: &str) -> StorageResult<Lookup> {
        let found = self
            .objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|(o, _)| o.clone()));
        Ok(found.map_or(Lookup::NotFound, Lookup::Found))
    }

    async fn get(&self, key: &str, destination: &Path) -> StorageResult<u64> {
        let data = self
            .objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|(_, d)| d.clone()))
            .ok_or_else(|| StorageError::Backend {
                key: key.to_string(),
                message: "object not found".to_string(),
                retryable: false,
            })?;

        tokio::fs::write(destination, &data)
            .await
            .map_err(|e| StorageError::io(destination, e))?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(data.len() as u64)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn shallow_listing_only_returns_direct_children() {
        let store = MemoryStore::new("https://host", "b");
        let now = Utc::now();
        store.put("p/d/a.nc", "aa", now);
        store.put("p/d/sub/b.nc", "bbb", now);

        let shallow: Vec<_> = store
            .list("p/d/", ListMode::Shallow)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].key, "p/d/a.nc");

        let recursive: Vec<_> = store
            .list("p/d/", ListMode::Recursive)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(recursive.len(), 2);
    }

    #[tokio::test]
    async fn head_reports_missing_keys_as_not_found() {
        let store = MemoryStore::new("https://host", "b");
        assert_eq!(store.head("nope").await.unwrap(), Lookup::NotFound);
    }
}
