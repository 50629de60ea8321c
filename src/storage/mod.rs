pub mod local;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use local::LocalFileState;
pub use memory::MemoryStore;
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象快照（列表 / HEAD 时刻的状态）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// 桶内的对象键，不含 `s3://bucket/` 前缀
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// 去掉引号后的 etag
    pub etag: String,
}

impl RemoteObject {
    pub fn new(
        key: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
        etag: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            etag: normalize_etag(&etag.into()),
        }
    }

    /// `s3://bucket/key` 形式的完整地址，正则过滤和清单都基于它
    pub fn url(&self, bucket: &str) -> String {
        format!("s3://{}/{}", bucket, self.key)
    }
}

/// 去掉 S3 返回的 etag 两侧引号
pub fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// HEAD 查询结果：404 不是错误，而是一个明确的分支
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(RemoteObject),
    NotFound,
}

/// 列表模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// 前缀下的全部键
    Recursive,
    /// 只列直接子项
    Shallow,
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error for '{key}': {message}")]
    Backend {
        key: String,
        message: String,
        retryable: bool,
    },

    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid dataset url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl StorageError {
    /// 是否值得重试（网络抖动、超时、5xx 之类）
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Backend { retryable, .. } => *retryable,
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            StorageError::InvalidUrl { .. } => false,
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// 对象存储抽象接口（列表 / HEAD / 下载）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 惰性列出前缀下的对象，分页对调用方透明
    async fn list(
        &self,
        prefix: &str,
        mode: ListMode,
    ) -> StorageResult<BoxStream<'static, StorageResult<RemoteObject>>>;

    /// 按精确键查询单个对象；普通 404 返回 `Lookup::NotFound`
    async fn head(&self, key: &str) -> StorageResult<Lookup>;

    /// 把对象内容写入 `destination`，返回写入的字节数
    async fn get(&self, key: &str, destination: &Path) -> StorageResult<u64>;

    /// 端点地址（用于生成 https 地址）
    fn endpoint(&self) -> &str;

    fn bucket(&self) -> &str;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 数据集地址：`https://<host>/<bucket>/<root...>/<product>/<dataset>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocator {
    pub endpoint: String,
    pub bucket: String,
    /// 桶内前缀，不带首尾斜杠
    pub prefix: String,
}

impl DatasetLocator {
    pub fn parse(url: &str) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme != "https" && scheme != "http" {
            return Err(invalid("scheme must be http or https"));
        }

        let mut parts = rest.trim_end_matches('/').splitn(3, '/');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let bucket = parts
            .next()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?;
        let prefix = parts.next().unwrap_or("").trim_matches('/').to_string();

        Ok(Self {
            endpoint: format!("{}://{}", scheme, host),
            bucket: bucket.to_string(),
            prefix,
        })
    }

    pub fn prefix_segments(&self) -> Vec<&str> {
        self.prefix.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// 产品目录之前的存储根段数（例如 `native/<product>/<dataset>` 为 1）
    pub fn root_depth(&self) -> usize {
        self.prefix_segments().len().saturating_sub(2)
    }

    /// 列表用的目录前缀，保证以 `/` 结尾，避免匹配到同名前缀的兄弟数据集
    pub fn listing_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}
