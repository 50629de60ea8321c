use super::{
    normalize_etag, ListMode, Lookup, ObjectStore, RemoteObject, StorageError, StorageResult,
};
use crate::config::S3Config;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use opendal::{
    layers::{RetryLayer, TimeoutLayer},
    Metakey, Operator,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// 匿名访问的 S3 兼容存储（数据湖是公开读的）
pub struct S3Store {
    operator: Operator,
    endpoint: String,
    bucket: String,
    name: String,
}

impl S3Store {
    pub fn new(endpoint: &str, bucket: &str, config: &S3Config) -> StorageResult<Self> {
        use opendal::services::S3;

        let builder = S3::default()
            .bucket(bucket)
            .region(&config.region)
            .endpoint(endpoint)
            .allow_anonymous()
            .disable_config_load()
            .disable_ec2_metadata();

        // 超时层 + 重试层（opendal 只会重试临时性错误）
        let operator = Operator::new(builder)
            .map_err(|e| backend_error(bucket, e))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(config.op_timeout_secs))
                    .with_io_timeout(Duration::from_secs(config.io_timeout_secs)),
            )
            .layer(RetryLayer::new().with_max_times(config.max_retries))
            .finish();

        tracing::info!("初始化S3存储: endpoint={}, bucket={}", endpoint, bucket);

        Ok(Self {
            operator,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            name: format!("s3://{}", bucket),
        })
    }
}

fn backend_error(key: &str, err: opendal::Error) -> StorageError {
    StorageError::Backend {
        key: key.to_string(),
        retryable: err.is_temporary(),
        message: err.to_string(),
    }
}

fn to_remote_object(key: String, meta: &opendal::Metadata) -> RemoteObject {
    let last_modified = last_modified_or_now(&key, meta.last_modified());
    RemoteObject {
        key,
        size: meta.content_length(),
        last_modified,
        etag: meta.etag().map(normalize_etag).unwrap_or_default(),
    }
}

/// 缺少修改时间时取当前时间：同步时总比本地文件新，从而重新下载
fn last_modified_or_now(key: &str, last_modified: Option<DateTime<Utc>>) -> DateTime<Utc> {
    last_modified.unwrap_or_else(|| {
        tracing::warn!("No last-modified date for {}, it will be downloaded again", key);
        Utc::now()
    })
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(
        &self,
        prefix: &str,
        mode: ListMode,
    ) -> StorageResult<BoxStream<'static, StorageResult<RemoteObject>>> {
        let lister = self
            .operator
            .lister_with(prefix)
            .recursive(mode == ListMode::Recursive)
            .metakey(
                Metakey::ContentLength | Metakey::LastModified | Metakey::Etag | Metakey::Mode,
            )
            .await
            .map_err(|e| backend_error(prefix, e))?;

        let prefix = prefix.to_string();
        let stream = lister
            .map_err(move |e| backend_error(&prefix, e))
            .try_filter_map(|entry| async move {
                let meta = entry.metadata();
                // 跳过目录占位
                if meta.is_dir() || entry.path().ends_with('/') {
                    return Ok::<_, StorageError>(None);
                }
                let key = entry.path().trim_start_matches('/').to_string();
                Ok(Some(to_remote_object(key, meta)))
            });

        Ok(stream.boxed())
    }

    async fn head(&self, key: &str) -> StorageResult<Lookup> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Lookup::Found(to_remote_object(key.to_string(), &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(Lookup::NotFound),
            Err(e) => Err(backend_error(key, e)),
        }
    }

    async fn get(&self, key: &str, destination: &Path) -> StorageResult<u64> {
        let reader = self
            .operator
            .reader_with(key)
            .await
            .map_err(|e| backend_error(key, e))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| backend_error(key, e))?;

        // 流式写入，避免整个文件进内存
        let mut body = StreamReader::new(Box::pin(stream));
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| StorageError::io(destination, e))?;
        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| StorageError::io(destination, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::io(destination, e))?;

        Ok(written)
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
