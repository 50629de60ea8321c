use chrono::{DateTime, TimeZone, Utc};
use marinesync_lib::config::{ClientConfig, TransferConfig};
use marinesync_lib::core::AlwaysConfirm;
use marinesync_lib::models::size_to_MB;
use marinesync_lib::storage::{local, MemoryStore};
use marinesync_lib::{Client, GetRequest, Outcome, ResponseGet, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

/// s3://b/p/d/a.nc (100 B, T0) + s3://b/p/d/b.nc (200 B, T1)
fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new("https://h", "b");
    store.put("p/d/a.nc", vec![1u8; 100], t0());
    store.put("p/d/b.nc", vec![2u8; 200], t1());
    Arc::new(store)
}

fn client() -> Client {
    let mut config = ClientConfig::default();
    config.transfer = TransferConfig {
        max_concurrent_requests: 2,
        max_retries: 1,
        retry_base_delay_ms: 0,
    };
    Client::new(config)
}

fn request(out: &Path) -> GetRequest {
    GetRequest {
        dataset_url: Some("https://h/b/p/d".to_string()),
        output_directory: out.to_path_buf(),
        force_download: true,
        ..GetRequest::default()
    }
}

async fn run(store: &Arc<MemoryStore>, request: &GetRequest) -> ResponseGet {
    match client()
        .get_with_store(store.clone(), request, &AlwaysConfirm)
        .await
        .unwrap()
    {
        Outcome::Finished(response) => response,
        Outcome::Aborted => panic!("request was aborted"),
    }
}

fn paths(response: &ResponseGet) -> Vec<PathBuf> {
    response.files.iter().map(|f| f.file_path.clone()).collect()
}

fn write_local(path: &Path, size: usize, mtime: DateTime<Utc>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![0u8; size]).unwrap();
    local::set_modified_time(path, mtime).unwrap();
}

fn tree(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn fresh_download_keeps_listing_order_and_layout() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();

    let response = run(&store, &request(out)).await;

    assert_eq!(response.status, StatusCode::Success);
    assert_eq!(paths(&response), vec![out.join("p/d/a.nc"), out.join("p/d/b.nc")]);
    assert_eq!(response.total_size, Some(size_to_MB(300)));
    assert_eq!(std::fs::read(out.join("p/d/b.nc")).unwrap(), vec![2u8; 200]);

    // 本地修改时间对齐远程时间
    let state = local::LocalFileState::read(&out.join("p/d/b.nc")).await.unwrap();
    assert_eq!(state.mtime, Some(t1()));
}

#[tokio::test]
async fn sync_skips_files_already_up_to_date() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();
    write_local(&out.join("p/d/a.nc"), 100, t0());

    let mut req = request(out);
    req.sync = true;
    let response = run(&store, &req).await;

    assert_eq!(paths(&response), vec![out.join("p/d/b.nc")]);
    assert_eq!(store.get_count(), 1);
}

#[tokio::test]
async fn sync_refetches_stale_or_resized_files() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();
    write_local(&out.join("p/d/a.nc"), 99, t1());
    write_local(&out.join("p/d/b.nc"), 200, t0());

    let mut req = request(out);
    req.sync = true;
    let response = run(&store, &req).await;

    // 同步时复用原路径，不产生后缀
    assert_eq!(paths(&response), vec![out.join("p/d/a.nc"), out.join("p/d/b.nc")]);
    assert_eq!(tree(out).len(), 2);
    assert_eq!(std::fs::metadata(out.join("p/d/a.nc")).unwrap().len(), 100);
}

#[tokio::test]
async fn sync_delete_removes_files_missing_remotely() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();
    write_local(&out.join("p/d/stale.nc"), 10, t0());
    write_local(&out.join("p/other/keep.nc"), 10, t0());

    let mut req = request(out);
    req.sync_delete = true;
    let response = run(&store, &req).await;

    assert_eq!(response.files_deleted, vec![out.join("p/d/stale.nc")]);
    assert!(!out.join("p/d/stale.nc").exists());
    assert!(out.join("p/other/keep.nc").exists());
    assert!(out.join("p/d/a.nc").exists());
}

#[tokio::test]
async fn rerun_without_overwrite_never_clobbers() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();

    run(&store, &request(out)).await;
    let second = run(&store, &request(out)).await;

    assert_eq!(
        paths(&second),
        vec![out.join("p/d/a_(1).nc"), out.join("p/d/b_(1).nc")]
    );
    assert_eq!(tree(out).len(), 4);
}

#[tokio::test]
async fn rerun_with_overwrite_reuses_destinations() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();

    let mut req = request(out);
    req.overwrite = true;
    run(&store, &req).await;
    let second = run(&store, &req).await;

    assert_eq!(paths(&second), vec![out.join("p/d/a.nc"), out.join("p/d/b.nc")]);
    assert_eq!(tree(out).len(), 2);
    assert_eq!(store.get_count(), 4);
}

#[tokio::test]
async fn dry_run_reports_everything_and_touches_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();
    write_local(&out.join("p/d/stale.nc"), 10, t0());

    let mut req = request(out);
    req.sync_delete = true;
    req.dry_run = true;
    let response = run(&store, &req).await;

    assert_eq!(response.status, StatusCode::DryRun);
    assert_eq!(response.total_size, Some(size_to_MB(300)));
    assert_eq!(response.files.len(), 2);
    assert_eq!(response.files_deleted, vec![out.join("p/d/stale.nc")]);

    assert_eq!(tree(out), vec![out.join("p/d/stale.nc")]);
    assert_eq!(store.get_count(), 0);
}

#[tokio::test]
async fn text_manifest_is_the_only_output() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();
    write_local(&out.join("p/d/stale.nc"), 10, t0());

    let mut req = request(out);
    req.sync_delete = true;
    req.create_file_list = Some("files.txt".to_string());
    let response = run(&store, &req).await;

    assert_eq!(response.status, StatusCode::FileListCreated);
    assert_eq!(response.total_size, None);
    assert_eq!(response.file_list, Some(out.join("files.txt")));
    assert_eq!(
        std::fs::read_to_string(out.join("files.txt")).unwrap(),
        "s3://b/p/d/a.nc\ns3://b/p/d/b.nc\n"
    );
    assert_eq!(tree(out), vec![out.join("files.txt"), out.join("p/d/stale.nc")]);
    assert_eq!(store.get_count(), 0);
}

#[tokio::test]
async fn csv_manifest_lists_sizes_and_etags() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();

    let mut req = request(out);
    req.filter = Some("*b.nc".to_string());
    req.create_file_list = Some("files.csv".to_string());
    run(&store, &req).await;

    let csv = std::fs::read_to_string(out.join("files.csv")).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "filename,size,last_modified_datetime,etag");
    assert!(lines[1].starts_with("s3://b/p/d/b.nc,200,2024-01-02T00:00:00+00:00,"));
}

#[tokio::test]
async fn nothing_matching_reports_no_data() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = store();

    let mut req = request(out);
    req.regex = Some("\\.zarr$".to_string());
    let response = run(&store, &req).await;

    assert_eq!(response.status, StatusCode::NoDataToDownload);
    assert!(response.files.is_empty());
    assert!(tree(out).is_empty());
}

#[tokio::test]
async fn flattened_names_stay_unique_within_one_plan() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();
    let store = MemoryStore::new("https://h", "b");
    store.put("p/d/2023/x.nc", vec![1u8; 3], t0());
    store.put("p/d/2024/x.nc", vec![2u8; 4], t0());
    let store = Arc::new(store);

    let mut req = request(out);
    req.no_directories = true;
    let response = run(&store, &req).await;

    assert_eq!(paths(&response), vec![out.join("x.nc"), out.join("x_(1).nc")]);
    assert_eq!(std::fs::read(out.join("x_(1).nc")).unwrap(), vec![2u8; 4]);
}

#[tokio::test]
async fn invalid_requests_fail_before_any_io() {
    let temp_dir = TempDir::new().unwrap();
    let store = store();

    let mut req = request(temp_dir.path());
    req.sync_delete = true;
    req.no_directories = true;
    let err = client()
        .get_with_store(store.clone(), &req, &AlwaysConfirm)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no-directories"));
    assert_eq!(store.get_count(), 0);
}
