//! 传输执行器 - 有界并发下载，保留远程修改时间

use crate::config::TransferConfig;
use crate::core::DownloadError;
use crate::retry::{retry, RetryError, RetryPolicy, Verdict};
use crate::storage::local;
use crate::storage::{ObjectStore, RemoteObject, StorageError, StorageResult};
use chrono::{DateTime, SubsecRound, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// 一个下载任务：远程对象 → 本地目标路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub object: RemoteObject,
    pub destination: PathBuf,
}

/// 单个文件完成时发出的进度
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub key: String,
    pub destination: PathBuf,
    pub bytes: u64,
    pub files_completed: usize,
    pub files_total: usize,
    pub bytes_transferred: u64,
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    files_completed: AtomicUsize,
    bytes_transferred: AtomicU64,
}

/// 下载完成后写本地修改时间的函数
pub type MtimeSetter = fn(&Path, DateTime<Utc>) -> std::io::Result<()>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
}

pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    /// 0 表示逐个下载
    max_concurrent: usize,
    policy: RetryPolicy,
    set_mtime: MtimeSetter,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn ObjectStore>, config: &TransferConfig) -> Self {
        Self {
            store,
            max_concurrent: config.max_concurrent_requests,
            policy: RetryPolicy::exponential(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            set_mtime: local::set_modified_time,
            progress_tx: None,
        }
    }

    /// 替换写修改时间的方式（默认 `local::set_modified_time`）
    pub fn with_mtime_setter(mut self, set_mtime: MtimeSetter) -> Self {
        self.set_mtime = set_mtime;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// 下载一批文件。任意一个文件失败都会让整批失败：
    /// 不再派发新任务，等已派发的任务结束后返回第一个错误。
    pub async fn execute(&self, jobs: Vec<TransferJob>) -> Result<TransferSummary, DownloadError> {
        if jobs.is_empty() {
            return Ok(TransferSummary::default());
        }

        // 先建好所有父目录；并发创建同一目录是幂等的
        for job in &jobs {
            local::ensure_parent_dir(&job.destination).await?;
        }

        if self.max_concurrent == 0 {
            self.execute_sequential(jobs).await
        } else {
            self.execute_parallel(jobs).await
        }
    }

    async fn execute_sequential(
        &self,
        jobs: Vec<TransferJob>,
    ) -> Result<TransferSummary, DownloadError> {
        info!("Downloading files one by one...");
        let total = jobs.len();
        let stats = TransferStats::default();

        for (index, job) in jobs.iter().enumerate() {
            let bytes =
                fetch_with_retry(self.store.as_ref(), job, &self.policy, self.set_mtime).await?;
            stats.files_completed.fetch_add(1, Ordering::Relaxed);
            stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
            info!("Downloading files [{}/{}] {}", index + 1, total, job.destination.display());
            send_progress(&self.progress_tx, job, bytes, &stats, total).await;
        }

        Ok(TransferSummary {
            files: stats.files_completed.load(Ordering::Relaxed),
            bytes: stats.bytes_transferred.load(Ordering::Relaxed),
        })
    }

    async fn execute_parallel(
        &self,
        jobs: Vec<TransferJob>,
    ) -> Result<TransferSummary, DownloadError> {
        let total = jobs.len();
        info!("Downloading {} files ({} concurrent)...", total, self.max_concurrent);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let stats = Arc::new(TransferStats::default());
        let failed = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(total);

        for job in jobs {
            if failed.load(Ordering::SeqCst) {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            // 等许可期间可能已有任务失败
            if failed.load(Ordering::SeqCst) {
                break;
            }

            let store = self.store.clone();
            let policy = self.policy.clone();
            let stats = stats.clone();
            let failed = failed.clone();
            let progress_tx = self.progress_tx.clone();
            let set_mtime = self.set_mtime;
            let key = job.object.key.clone();

            let handle = tokio::spawn(async move {
                // 除非正常成功，否则（包括 panic 展开时）都标记失败
                let mark_failed = scopeguard::guard(failed, |failed| {
                    failed.store(true, Ordering::SeqCst);
                });
                let result = fetch_with_retry(store.as_ref(), &job, &policy, set_mtime).await;
                match &result {
                    Ok(bytes) => {
                        scopeguard::ScopeGuard::into_inner(mark_failed);
                        stats.files_completed.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(*bytes, Ordering::Relaxed);
                        send_progress(&progress_tx, &job, *bytes, &stats, total).await;
                    }
                    Err(_) => drop(mark_failed),
                }
                drop(permit);
                result
            });
            handles.push((key, handle));
        }

        let dispatched = handles.len();
        if dispatched < total {
            warn!("已有文件下载失败，剩余 {} 个文件未派发", total - dispatched);
        }

        // 等待所有已派发的任务完成
        let mut first_error = None;
        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(DownloadError::Transfer {
                    key: key.clone(),
                    source: StorageError::Backend {
                        key,
                        message: join_error.to_string(),
                        retryable: false,
                    },
                }),
            };
            if let Err(e) = outcome {
                error!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(TransferSummary {
            files: stats.files_completed.load(Ordering::Relaxed),
            bytes: stats.bytes_transferred.load(Ordering::Relaxed),
        })
    }
}

async fn send_progress(
    tx: &Option<mpsc::Sender<TransferProgress>>,
    job: &TransferJob,
    bytes: u64,
    stats: &TransferStats,
    total: usize,
) {
    if let Some(tx) = tx {
        let _ = tx
            .send(TransferProgress {
                key: job.object.key.clone(),
                destination: job.destination.clone(),
                bytes,
                files_completed: stats.files_completed.load(Ordering::Relaxed),
                files_total: total,
                bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
            })
            .await;
    }
}

async fn fetch_with_retry(
    store: &dyn ObjectStore,
    job: &TransferJob,
    policy: &RetryPolicy,
    set_mtime: MtimeSetter,
) -> Result<u64, DownloadError> {
    let label = format!("下载 {}", job.object.key);
    retry(
        policy,
        &label,
        |e: &StorageError| {
            if e.is_retryable() {
                Verdict::Transient
            } else {
                Verdict::Fatal
            }
        },
        |_| fetch_one(store, job, set_mtime),
    )
    .await
    .map_err(|e: RetryError<StorageError>| DownloadError::Transfer {
        key: job.object.key.clone(),
        source: e.into_inner(),
    })
}

/// `<dest>.part` 临时文件
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// 下载到临时文件再改名，成功后设置修改时间
async fn fetch_one(
    store: &dyn ObjectStore,
    job: &TransferJob,
    set_mtime: MtimeSetter,
) -> StorageResult<u64> {
    let part = part_path(&job.destination);

    // 失败时删除残留的临时文件
    let cleanup = scopeguard::guard(part.clone(), |p| {
        let _ = std::fs::remove_file(p);
    });

    let bytes = store.get(&job.object.key, &part).await?;
    tokio::fs::rename(&part, &job.destination)
        .await
        .map_err(|e| StorageError::io(&job.destination, e))?;
    scopeguard::ScopeGuard::into_inner(cleanup);

    let modified = job.object.last_modified.trunc_subsecs(0);
    if let Err(e) = set_mtime(&job.destination, modified) {
        warn!(
            "Permission to modify the last modified date of the file {} is denied: {}",
            job.destination.display(),
            e
        );
    }

    debug!("下载完成: {} -> {} ({} bytes)", job.object.key, job.destination.display(), bytes);
    Ok(bytes)
}
