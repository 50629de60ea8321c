//! 客户端配置模块
//!
//! 配置保存在 `<config_dir>/config.json`，按 `transfer` / `s3` / `auth` / `log`
//! 分节读取；缺失的文件、节或字段都回落到默认值。

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "MARINESYNC_CONFIG_DIR";
pub const ENV_HTTPS_TIMEOUT: &str = "MARINESYNC_HTTPS_TIMEOUT";
pub const ENV_HTTPS_RETRIES: &str = "MARINESYNC_HTTPS_RETRIES";

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 最大并发下载数，0 表示逐个下载
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// 单个文件的最大尝试次数
    #[serde(default = "default_transfer_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_concurrent_requests() -> usize {
    15
}

fn default_transfer_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_transfer_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// S3 连接配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_s3_retries")]
    pub max_retries: usize,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_op_timeout_secs() -> u64 {
    crate::storage::OP_TIMEOUT_SECS
}

fn default_io_timeout_secs() -> u64 {
    crate::storage::IO_TIMEOUT_SECS
}

fn default_s3_retries() -> usize {
    5
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            op_timeout_secs: default_op_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            max_retries: default_s3_retries(),
        }
    }
}

/// 认证系统配置（OpenID Connect 密码模式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_userinfo_endpoint")]
    pub userinfo_endpoint: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
    /// 连接失败时的最大尝试次数
    #[serde(default = "default_auth_attempts")]
    pub max_attempts: u32,
}

fn default_token_endpoint() -> String {
    "https://auth.marine.copernicus.eu/realms/MIS/protocol/openid-connect/token".to_string()
}

fn default_userinfo_endpoint() -> String {
    "https://auth.marine.copernicus.eu/realms/MIS/protocol/openid-connect/userinfo".to_string()
}

fn default_client_id() -> String {
    "toolbox".to_string()
}

fn default_auth_timeout_secs() -> u64 {
    60
}

fn default_auth_attempts() -> u32 {
    3
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_endpoint: default_token_endpoint(),
            userinfo_endpoint: default_userinfo_endpoint(),
            client_id: default_client_id(),
            timeout_secs: default_auth_timeout_secs(),
            max_attempts: default_auth_attempts(),
        }
    }
}

/// 完整客户端配置，显式构造后传给 `Client`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// 配置目录（不序列化）
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl ClientConfig {
    /// 从配置目录加载，随后应用环境变量覆盖
    ///
    /// 此时日志尚未初始化，解析失败的警告随结果返回，由调用方输出
    pub fn load(config_dir: &Path) -> (Self, Option<String>) {
        let (mut config, warning) = match Self::from_file(config_dir) {
            Ok(config) => (config.unwrap_or_default(), None),
            Err(warning) => (Self::default(), Some(warning)),
        };
        config.config_dir = config_dir.to_path_buf();
        config.apply_env(|key| std::env::var(key).ok());
        (config, warning)
    }

    /// 文件不存在时返回 `Ok(None)`，无法解析时返回警告文本
    fn from_file(config_dir: &Path) -> Result<Option<Self>, String> {
        let config_file = config_dir.join("config.json");
        let Ok(content) = fs::read_to_string(&config_file) else {
            return Ok(None);
        };
        serde_json::from_str::<ClientConfig>(&content)
            .map(Some)
            .map_err(|e| {
                format!(
                    "Invalid configuration file {}, using defaults: {}",
                    config_file.display(),
                    e
                )
            })
    }

    /// 环境变量覆盖；非法数值忽略并保留原值
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = lookup(ENV_HTTPS_TIMEOUT).and_then(|v| v.parse::<f64>().ok()) {
            let secs = timeout.max(1.0) as u64;
            self.auth.timeout_secs = secs;
            self.s3.op_timeout_secs = secs;
        }
        if let Some(retries) = lookup(ENV_HTTPS_RETRIES).and_then(|v| v.parse::<usize>().ok()) {
            self.s3.max_retries = retries;
        }
    }
}

/// 默认配置目录：环境变量优先，其次 `~/.config/marinesync`
pub fn default_config_dir() -> PathBuf {
    std::env::var(ENV_CONFIG_DIR)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| crate::dirs::config_dir().map(|p| p.join("marinesync")))
        .unwrap_or_else(|| PathBuf::from(".marinesync"))
}
