//! 认证：校验用户名密码（OpenID Connect 密码模式），连接失败有限次重试

pub mod credentials;

use crate::config::AuthConfig;
use crate::retry::{retry, RetryError, RetryPolicy, Verdict};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub use credentials::{Credentials, CredentialSource};

/// 认证相关错误
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error(
        "could not connect to the authentication system after {attempts} attempts; \
         check your internet connection or try again later"
    )]
    Unreachable { attempts: u32 },

    #[error("{0} cannot be empty: pass it as an argument, set it in the environment or run `marinesync login`")]
    CredentialsMissing(&'static str),

    #[error("credentials file {}: {reason}", .path.display())]
    CredentialsFile { path: PathBuf, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// 认证接口：只回答“有效 / 无效”，连接问题单独报错
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn validate(&self, username: &str, password: &str) -> Result<bool, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// 单次校验的失败原因
#[derive(Debug, Error)]
enum CheckError {
    /// 连接超时 / 连接被拒绝，可以重试
    #[error("{0}")]
    Connect(reqwest::Error),
    /// 协议层错误（4xx、返回体不对等），直接视为凭据无效
    #[error("{0}")]
    Rejected(String),
}

/// 基于 HTTP 的认证实现：先换 token，再用 token 请求 userinfo
pub struct HttpAuthenticator {
    client: reqwest::Client,
    config: AuthConfig,
    policy: RetryPolicy,
}

impl HttpAuthenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let policy = RetryPolicy::fixed(config.max_attempts, Duration::from_secs(1));
        Self::with_policy(config, policy)
    }

    pub fn with_policy(config: &AuthConfig, policy: RetryPolicy) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            policy,
        })
    }

    async fn check_once(&self, username: &str, password: &str) -> Result<bool, CheckError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", "openid profile email"),
        ];

        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(classify_reqwest)?;
        if !response.status().is_success() {
            debug!("token 请求被拒绝: {}", response.status());
            return Ok(false);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CheckError::Rejected(e.to_string()))?;

        let response = self
            .client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(classify_reqwest)?;

        Ok(response.status().is_success())
    }
}

fn classify_reqwest(err: reqwest::Error) -> CheckError {
    if err.is_connect() || err.is_timeout() {
        CheckError::Connect(err)
    } else {
        CheckError::Rejected(err.to_string())
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn validate(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        debug!("校验用户凭据: {}", username);

        let result = retry(
            &self.policy,
            "连接认证系统",
            |e: &CheckError| match e {
                CheckError::Connect(_) => Verdict::Transient,
                CheckError::Rejected(_) => Verdict::Fatal,
            },
            |_| self.check_once(username, password),
        )
        .await;

        match result {
            Ok(valid) => {
                info!("凭据校验完成: {}", if valid { "有效" } else { "无效" });
                Ok(valid)
            }
            Err(RetryError::Fatal(e)) => {
                debug!("认证协议错误，按无效凭据处理: {}", e);
                Ok(false)
            }
            Err(RetryError::Exhausted { attempts, .. }) => Err(AuthError::Unreachable { attempts }),
        }
    }
}

/// 校验并返回错误（无效凭据变成 `AuthError::InvalidCredentials`）
pub async fn ensure_valid(
    authenticator: &dyn Authenticator,
    credentials: &Credentials,
) -> Result<(), AuthError> {
    if authenticator
        .validate(&credentials.username, &credentials.password)
        .await?
    {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}
