//! 凭据解析与凭据文件读写
//!
//! 解析顺序：显式参数 → 环境变量 → 凭据文件 → 交互式输入。
//! 凭据文件是 base64 编码的 INI：
//!
//! ```text
//! [credentials]
//! username=...
//! password=...
//! ```

use super::AuthError;
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CREDENTIALS_FILENAME: &str = ".marinesync-credentials";
pub const ENV_USERNAME: &str = "MARINESYNC_USERNAME";
pub const ENV_PASSWORD: &str = "MARINESYNC_PASSWORD";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// 密码不进日志
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 凭据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Argument,
    Environment,
    File,
    Prompt,
}

/// 交互式输入
pub trait Prompt {
    fn ask(&self, label: &str, hidden: bool) -> io::Result<String>;
}

/// 终端输入；非终端时拒绝提示
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&self, label: &str, hidden: bool) -> io::Result<String> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is not a terminal",
            ));
        }
        if hidden {
            return rpassword::prompt_password(format!("{}: ", label));
        }

        eprint!("{}: ", label);
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

pub fn credentials_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CREDENTIALS_FILENAME)
}

pub fn encode_credentials(credentials: &Credentials) -> String {
    let ini = format!(
        "[credentials]\nusername={}\npassword={}\n",
        credentials.username, credentials.password
    );
    general_purpose::STANDARD.encode(ini)
}

/// 解码凭据文件内容；缺少任一字段时返回 `None`
pub fn decode_credentials(content: &str) -> Result<Option<Credentials>, String> {
    let raw = general_purpose::STANDARD
        .decode(content.trim())
        .map_err(|e| format!("not valid base64: {}", e))?;
    let text = String::from_utf8(raw).map_err(|e| format!("not valid UTF-8: {}", e))?;

    let mut in_section = false;
    let mut username = None;
    let mut password = None;
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            in_section = &line[1..line.len() - 1] == "credentials";
            continue;
        }
        if !in_section || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "username" => username = Some(value.trim().to_string()),
                "password" => password = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    Ok(match (username, password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credentials::new(u, p)),
        _ => None,
    })
}

/// 读取凭据文件；文件不存在返回 `None`
pub fn read_credentials_file(path: &Path) -> Result<Option<Credentials>, AuthError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(AuthError::CredentialsFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    decode_credentials(&content).map_err(|reason| AuthError::CredentialsFile {
        path: path.to_path_buf(),
        reason,
    })
}

/// 写入凭据文件，返回文件路径
pub fn write_credentials_file(
    config_dir: &Path,
    credentials: &Credentials,
) -> Result<PathBuf, AuthError> {
    let path = credentials_file_path(config_dir);
    let to_error = |e: io::Error| AuthError::CredentialsFile {
        path: path.clone(),
        reason: e.to_string(),
    };
    fs::create_dir_all(config_dir).map_err(to_error)?;
    fs::write(&path, encode_credentials(credentials)).map_err(to_error)?;
    Ok(path)
}

/// 凭据解析器
pub struct CredentialResolver<'a> {
    config_dir: PathBuf,
    env: Box<dyn Fn(&str) -> Option<String> + 'a>,
    prompt: Option<&'a dyn Prompt>,
    /// 是否查凭据文件（`login` 重新录入时跳过）
    use_file: bool,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            env: Box::new(|key| std::env::var(key).ok()),
            prompt: None,
            use_file: true,
        }
    }

    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'a,
    {
        self.env = Box::new(env);
        self
    }

    pub fn with_prompt(mut self, prompt: &'a dyn Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn without_file(mut self) -> Self {
        self.use_file = false;
        self
    }

    /// 逐字段解析用户名和密码，返回凭据和用户名的来源
    pub fn resolve(
        &self,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<(Credentials, CredentialSource), AuthError> {
        let from_file = if self.use_file
            && (username.as_deref().map_or(true, str::is_empty)
                || password.as_deref().map_or(true, str::is_empty))
        {
            read_credentials_file(&credentials_file_path(&self.config_dir))?
        } else {
            None
        };

        let (username, source) = self.resolve_field(
            username,
            ENV_USERNAME,
            from_file.as_ref().map(|c| c.username.clone()),
            "username",
            false,
        )?;
        let (password, _) = self.resolve_field(
            password,
            ENV_PASSWORD,
            from_file.map(|c| c.password),
            "password",
            true,
        )?;

        Ok((Credentials::new(username, password), source))
    }

    fn resolve_field(
        &self,
        argument: Option<String>,
        env_key: &str,
        from_file: Option<String>,
        label: &'static str,
        hidden: bool,
    ) -> Result<(String, CredentialSource), AuthError> {
        let non_empty = |v: &String| !v.is_empty();

        if let Some(value) = argument.filter(non_empty) {
            debug!("{} 来自参数", label);
            return Ok((value, CredentialSource::Argument));
        }
        if let Some(value) = (self.env)(env_key).filter(non_empty) {
            debug!("{} 来自环境变量 {}", label, env_key);
            return Ok((value, CredentialSource::Environment));
        }
        if let Some(value) = from_file.filter(non_empty) {
            debug!("{} 来自凭据文件", label);
            return Ok((value, CredentialSource::File));
        }
        if let Some(prompt) = self.prompt {
            if let Ok(value) = prompt.ask(label, hidden) {
                if !value.is_empty() {
                    return Ok((value, CredentialSource::Prompt));
                }
            }
        }
        Err(AuthError::CredentialsMissing(label))
    }
}
