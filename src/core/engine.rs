use crate::config::TransferConfig;
use crate::core::comparator::{self, SyncDecision};
use crate::core::manifest::{self, ManifestFormat};
use crate::core::path_mapper::{PathMapper, UniqueNamer};
use crate::core::scanner::RemoteScanner;
use crate::core::transfer::{TransferExecutor, TransferJob, TransferProgress};
use crate::core::DownloadError;
use crate::models::{
    compile_regex, format_file_size, overload_regex, size_to_MB, FileGet, GetRequest,
    ResponseGet, StatusCode,
};
use crate::storage::{local, DatasetLocator, ListMode, ObjectStore, RemoteObject};
use chrono::SecondsFormat;
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 摘要里最多列出的文件数
const SUMMARY_MAX_FILES: usize = 20;

/// 执行任何写操作前的确认
pub trait Confirmation: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// 从标准输入读取 y/n，回车默认同意
pub struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, message: &str) -> bool {
        eprint!("{} [Y/n]: ", message);
        let _ = io::stderr().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            // EOF 视为拒绝
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(line.trim().to_lowercase().as_str(), "" | "y" | "yes"),
        }
    }
}

/// `--force-download`：总是同意
pub struct AlwaysConfirm;

impl Confirmation for AlwaysConfirm {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// 一次请求的结局；用户拒绝确认不是错误
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished(ResponseGet),
    Aborted,
}

/// 下载计划：按顺序的下载任务 + 待删除的本地文件
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub jobs: Vec<TransferJob>,
    pub deletions: Vec<PathBuf>,
}

impl TransferPlan {
    pub fn total_bytes(&self) -> u64 {
        self.jobs.iter().map(|j| j.object.size).sum()
    }
}

/// 请求编排：解析目标 → 清单导出 → 同步决策 → 确认 → dry-run / 执行
pub struct DownloadEngine {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
}

impl DownloadEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: &TransferConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            progress_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub async fn run(
        &self,
        request: &GetRequest,
        confirmation: &dyn Confirmation,
    ) -> Result<Outcome, DownloadError> {
        request.validate()?;
        let dataset_url = request.dataset_url.as_deref().unwrap_or_default();
        let locator = DatasetLocator::parse(dataset_url)?;
        let mapper = PathMapper::new(&request.output_directory, &locator, request.no_directories);
        let sync = request.effective_sync();

        // 1. 解析目标集合
        let matched = self.resolve_targets(request, &locator).await?;
        let decision = comparator::decide(matched.clone(), &mapper, sync).await?;
        debug!(
            "同步决策: {} 个下载, {} 个已同步",
            decision.to_fetch.len(),
            decision.to_skip.len()
        );

        // 2. 只导出清单
        if let Some(name) = &request.create_file_list {
            return self.export_manifest(request, name, &decision).await;
        }

        // 3. 计算目标路径和删除集合
        let plan = self.build_plan(request, &mapper, &matched, decision).await?;
        if plan.jobs.is_empty() && plan.deletions.is_empty() {
            info!("No data to download");
            return Ok(Outcome::Finished(ResponseGet::empty(
                StatusCode::NoDataToDownload,
            )));
        }

        if !plan.jobs.is_empty() {
            info!("{}", summary_message(&plan.jobs, self.store.bucket()));
        }
        if request.show_outputnames {
            for job in &plan.jobs {
                info!("{}", job.destination.display());
            }
        }
        if !plan.deletions.is_empty() {
            info!("Some files will be deleted due to sync delete:");
            for path in &plan.deletions {
                info!("{}", path.display());
            }
        }

        // 4. 确认
        if !request.force_download && !confirmation.confirm("Do you want to proceed with download?")
        {
            info!("Download aborted, nothing was written or deleted");
            return Ok(Outcome::Aborted);
        }

        let mut response = self.build_response(request, &plan);

        // 5. dry-run：不写、不删
        if request.dry_run {
            response.status = StatusCode::DryRun;
            response.message = StatusCode::DryRun.message().to_string();
            return Ok(Outcome::Finished(response));
        }

        // 6. 先删后下
        for path in &plan.deletions {
            local::remove_file(path).await?;
            debug!("已删除: {}", path.display());
        }

        let mut executor = TransferExecutor::new(self.store.clone(), &self.config);
        if let Some(tx) = &self.progress_tx {
            executor = executor.with_progress(tx.clone());
        }
        let summary = executor.execute(plan.jobs).await?;
        info!(
            "下载完成: {} 个文件, {}",
            summary.files,
            format_file_size(summary.bytes)
        );

        Ok(Outcome::Finished(response))
    }

    /// 直接下载列表 + 前缀列表，按出现顺序合并去重
    async fn resolve_targets(
        &self,
        request: &GetRequest,
        locator: &DatasetLocator,
    ) -> Result<Vec<RemoteObject>, DownloadError> {
        let scanner = RemoteScanner::new(self.store.as_ref(), locator)
            .with_max_concurrent(self.config.max_concurrent_requests);
        let user_regex = request.full_regex()?;

        let mut matched = Vec::new();
        let mut not_found_regex = None;
        if !request.direct_download.is_empty() {
            let resolution = scanner.resolve_direct(&request.direct_download).await?;
            not_found_regex = resolution.not_found_regex();
            matched = resolution.found;
        }

        let needs_listing = request.direct_download.is_empty()
            || not_found_regex.is_some()
            || user_regex.is_some();
        if !needs_listing {
            return Ok(matched);
        }

        // 找不到的文件名并入用户正则，再列一次做补救
        let regex = match not_found_regex {
            Some(names) => Some(compile_regex(&overload_regex(
                &names,
                user_regex.as_ref().map(|r| r.as_str()),
            ))?),
            None => user_regex,
        };
        let mode = if request.index_parts {
            ListMode::Shallow
        } else {
            ListMode::Recursive
        };

        let listed = scanner.scan(mode, regex.as_ref()).await?;
        let mut seen: HashSet<String> = matched.iter().map(|o| o.key.clone()).collect();
        matched.extend(listed.into_iter().filter(|o| seen.insert(o.key.clone())));
        Ok(matched)
    }

    async fn export_manifest(
        &self,
        request: &GetRequest,
        name: &str,
        decision: &SyncDecision,
    ) -> Result<Outcome, DownloadError> {
        let format = ManifestFormat::from_name(name).ok_or_else(|| {
            DownloadError::InvalidRequest(format!("unsupported file list name '{}'", name))
        })?;
        let mut namer = UniqueNamer::new(request.overwrite);
        let path = namer.assign(request.output_directory.join(name));

        manifest::write(&path, format, self.store.bucket(), &decision.to_fetch).await?;

        let mut response = ResponseGet::empty(StatusCode::FileListCreated);
        response.file_list = Some(path);
        Ok(Outcome::Finished(response))
    }

    async fn build_plan(
        &self,
        request: &GetRequest,
        mapper: &PathMapper,
        matched: &[RemoteObject],
        decision: SyncDecision,
    ) -> Result<TransferPlan, DownloadError> {
        let mut namer = UniqueNamer::new(request.reuses_destinations());
        let jobs = decision
            .to_fetch
            .into_iter()
            .map(|object| {
                let destination = namer.assign(mapper.destination(&object.key));
                TransferJob {
                    object,
                    destination,
                }
            })
            .collect();

        let deletions = if request.sync_delete {
            comparator::deletion_candidates(matched, mapper).await?
        } else {
            Vec::new()
        };

        Ok(TransferPlan { jobs, deletions })
    }

    fn build_response(&self, request: &GetRequest, plan: &TransferPlan) -> ResponseGet {
        let bucket = self.store.bucket();
        let endpoint = self.store.endpoint();

        let files = plan
            .jobs
            .iter()
            .map(|job| {
                let s3_url = job.object.url(bucket);
                let https_url = s3_url.replacen("s3://", &format!("{}/", endpoint), 1);
                FileGet {
                    https_url,
                    s3_url,
                    file_size: size_to_MB(job.object.size),
                    last_modified_datetime: job
                        .object
                        .last_modified
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    output_directory: request.output_directory.clone(),
                    filename: job
                        .destination
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    file_path: job.destination.clone(),
                    etag: job.object.etag.clone(),
                    file_format: job
                        .destination
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default(),
                }
            })
            .collect();

        ResponseGet {
            files,
            files_deleted: plan.deletions.clone(),
            total_size: Some(size_to_MB(plan.total_bytes())),
            status: StatusCode::Success,
            message: StatusCode::Success.message().to_string(),
            file_list: None,
        }
    }
}

/// 下载前的摘要：最多列 20 个文件，附总大小
pub fn summary_message(jobs: &[TransferJob], bucket: &str) -> String {
    let mut message = String::from("You requested the download of the following files:\n");
    for job in jobs.iter().take(SUMMARY_MAX_FILES) {
        message.push_str(&format!(
            "{} - {} - {}\n",
            job.object.url(bucket),
            format_file_size(job.object.size),
            job.object
                .last_modified
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if jobs.len() > SUMMARY_MAX_FILES {
        message.push_str(&format!(
            "Printed {} out of {} files\n",
            SUMMARY_MAX_FILES,
            jobs.len()
        ));
    }
    let total: u64 = jobs.iter().map(|j| j.object.size).sum();
    message.push_str(&format!(
        "\nTotal size of the download: {}\n",
        format_file_size(total)
    ));
    message
}
