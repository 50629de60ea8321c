use std::sync::Arc;

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod retry;
pub mod storage;

pub use crate::config::ClientConfig;
pub use crate::core::{Confirmation, DownloadEngine, DownloadError, Outcome};
pub use crate::models::{FileGet, GetRequest, ResponseGet, StatusCode};

use crate::auth::{AuthError, HttpAuthenticator};
use crate::config::TransferConfig;
use crate::core::TransferProgress;
use crate::storage::{DatasetLocator, ObjectStore, S3Store, StorageResult};
use tokio::sync::mpsc;

/// 客户端入口：持有配置，按请求打开存储并运行下载引擎
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            progress_tx: None,
        }
    }

    /// 每个文件下载完成后发送一条进度
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// 覆盖传输配置（命令行参数优先于配置文件）
    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        Arc::make_mut(&mut self.config).transfer = transfer;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 数据集所在桶的匿名 S3 存储
    pub fn open_store(&self, locator: &DatasetLocator) -> StorageResult<Arc<dyn ObjectStore>> {
        let store = S3Store::new(&locator.endpoint, &locator.bucket, &self.config.s3)?;
        Ok(Arc::new(store))
    }

    pub fn authenticator(&self) -> Result<HttpAuthenticator, AuthError> {
        HttpAuthenticator::new(&self.config.auth)
    }

    /// 执行一次 `get` 请求
    pub async fn get(
        &self,
        request: &GetRequest,
        confirmation: &dyn Confirmation,
    ) -> Result<Outcome, DownloadError> {
        request.validate()?;
        let dataset_url = request.dataset_url.as_deref().unwrap_or_default();
        let locator = DatasetLocator::parse(dataset_url)?;
        let store = self.open_store(&locator)?;
        self.get_with_store(store, request, confirmation).await
    }

    /// 使用给定存储执行请求（测试或自定义后端）
    pub async fn get_with_store(
        &self,
        store: Arc<dyn ObjectStore>,
        request: &GetRequest,
        confirmation: &dyn Confirmation,
    ) -> Result<Outcome, DownloadError> {
        tracing::debug!("使用存储 {} 执行请求", store.name());
        let mut engine = DownloadEngine::new(store, &self.config.transfer);
        if let Some(tx) = &self.progress_tx {
            engine = engine.with_progress(tx.clone());
        }
        engine.run(request, confirmation).await
    }
}

/// 平台配置目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
