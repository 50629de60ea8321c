//! 日志模块 - 控制台日志 + 可选的文件日志（带大小轮转）

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 是否同时写入配置目录下的 app.log
    #[serde(default)]
    pub to_file: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            to_file: false,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" | "critical" => tracing::Level::ERROR,
            "warn" | "warning" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 日志文件名；超过上限时改名为 `app.log.old`，只保留一份旧日志
const LOG_FILE: &str = "app.log";

struct LogFile {
    writer: BufWriter<File>,
    /// 当前文件已写入的字节数（含打开时已有的内容）
    written: u64,
}

/// 按大小轮转的日志写入器，所有 `LogWriter` 共享同一个文件句柄
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    file: Arc<Mutex<LogFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;
        let existing = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            rotate(&file_path)?;
        }
        let file = open_append(&file_path)?;

        Ok(Self {
            file_path,
            max_size,
            file: Arc::new(Mutex::new(file)),
        })
    }
}

fn open_append(path: &Path) -> io::Result<LogFile> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let written = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok(LogFile {
        writer: BufWriter::new(file),
        written,
    })
}

fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    match fs::remove_file(&backup) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(path, backup)
}

/// 单条日志的写入句柄
pub struct LogWriter {
    file_path: PathBuf,
    max_size: u64,
    file: Arc<Mutex<LogFile>>,
}

impl LogWriter {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, LogFile>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.lock()?;

        // 写入前检查，一条日志不会被拆到两个文件里
        if file.written > 0 && file.written + buf.len() as u64 > self.max_size {
            file.writer.flush()?;
            rotate(&self.file_path)?;
            *file = open_append(&self.file_path)?;
        }

        file.writer.write_all(buf)?;
        file.writer.flush()?;
        file.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.writer.flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            file: self.file.clone(),
        }
    }
}

/// 初始化日志系统。控制台日志写 stderr，stdout 留给 JSON 输出。
///
/// 返回的 guard 必须活到进程结束，否则缓冲中的日志会丢失。
pub fn init_logging(config: &LogConfig, log_dir: &Path) -> Option<WorkerGuard> {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into())
        .add_directive("hyper=warn".parse().unwrap_or_default())
        .add_directive("reqwest=warn".parse().unwrap_or_default())
        .add_directive("opendal=warn".parse().unwrap_or_default());

    let (stderr, guard) = tracing_appender::non_blocking(io::stderr());
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_layer = if config.to_file {
        match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            Ok(file_writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    Some(guard)
}
