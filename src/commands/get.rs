use crate::auth;
use crate::cli::GetArgs;
use crate::config::TransferConfig;
use crate::core::{AlwaysConfirm, Confirmation, Outcome, StdinConfirmation, TransferProgress};
use crate::models::{format_file_size, GetRequest};
use crate::Client;
use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 请求文件打底，命令行参数覆盖，最后读入 `--file-list`
pub fn build_request(args: &GetArgs) -> anyhow::Result<GetRequest> {
    let mut request = match &args.request_file {
        Some(path) => GetRequest::from_file(path)
            .with_context(|| format!("加载请求文件失败: {}", path.display()))?,
        None => GetRequest::default(),
    };

    if let Some(url) = &args.dataset_url {
        request.dataset_url = Some(url.clone());
    }
    if let Some(dir) = &args.output_directory {
        request.output_directory = dir.clone();
    }
    if let Some(path) = &args.file_list {
        request.file_list = Some(path.clone());
    }
    if let Some(filter) = &args.filter {
        request.filter = Some(filter.clone());
    }
    if let Some(regex) = &args.regex {
        request.regex = Some(regex.clone());
    }
    if let Some(name) = &args.create_file_list {
        request.create_file_list = Some(name.clone());
    }

    request.no_directories |= args.no_directories;
    request.show_outputnames |= args.show_outputnames;
    request.force_download |= args.force_download;
    request.overwrite |= args.overwrite;
    request.sync |= args.sync;
    request.sync_delete |= args.sync_delete;
    request.index_parts |= args.index_parts;
    request.dry_run |= args.dry_run;

    request.load_file_list().context("读取文件列表失败")?;
    Ok(request)
}

/// 命令行的传输参数覆盖配置文件
pub fn configure_client(client: Client, args: &GetArgs) -> Client {
    match args.max_concurrent_requests {
        Some(max_concurrent_requests) => {
            let transfer = TransferConfig {
                max_concurrent_requests,
                ..client.config().transfer.clone()
            };
            client.with_transfer_config(transfer)
        }
        None => client,
    }
}

/// `get` 命令：校验凭据，执行下载，把 JSON 结果写到 stdout
pub async fn run(client: Client, args: GetArgs) -> anyhow::Result<()> {
    let request = build_request(&args)?;
    request.validate()?;

    let config_dir = client.config().config_dir.clone();
    let (credentials, source) = super::resolve_credentials(&config_dir, &args.credentials, true)?;
    debug!("凭据来源: {:?}", source);
    let authenticator = client.authenticator()?;
    auth::ensure_valid(&authenticator, &credentials).await?;

    let confirmation: Box<dyn Confirmation> = if request.force_download {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(StdinConfirmation)
    };

    let (tx, rx) = mpsc::channel(64);
    let reporter = tokio::spawn(report_progress(rx));
    let client = configure_client(client, &args).with_progress(tx);

    let outcome = client.get(&request, confirmation.as_ref()).await;
    // 发送端随 client 释放后进度任务自然结束
    drop(client);
    let _ = reporter.await;

    match outcome.context("下载失败")? {
        Outcome::Finished(response) => {
            let json = serde_json::to_string_pretty(&response)?;
            println!("{}", json);
        }
        Outcome::Aborted => info!("Abort"),
    }
    Ok(())
}

async fn report_progress(mut rx: mpsc::Receiver<TransferProgress>) {
    while let Some(progress) = rx.recv().await {
        info!(
            "[{}/{}] {} ({})",
            progress.files_completed,
            progress.files_total,
            progress.destination.display(),
            format_file_size(progress.bytes_transferred)
        );
    }
}
