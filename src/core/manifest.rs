//! 清单导出：`.txt` 每行一个地址，`.csv` 带大小 / 修改时间 / etag

use crate::storage::{RemoteObject, StorageError, StorageResult};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Text,
    Csv,
}

impl ManifestFormat {
    /// 按扩展名判断格式，其它扩展名返回 `None`
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".txt") {
            Some(Self::Text)
        } else if name.ends_with(".csv") {
            Some(Self::Csv)
        } else {
            None
        }
    }
}

pub const CSV_HEADER: &str = "filename,size,last_modified_datetime,etag";

pub fn render(format: ManifestFormat, bucket: &str, objects: &[RemoteObject]) -> String {
    let mut out = String::new();
    match format {
        ManifestFormat::Text => {
            for object in objects {
                let _ = writeln!(out, "{}", object.url(bucket));
            }
        }
        ManifestFormat::Csv => {
            let _ = writeln!(out, "{}", CSV_HEADER);
            for object in objects {
                let _ = writeln!(
                    out,
                    "{},{},{},{}",
                    object.url(bucket),
                    object.size,
                    object.last_modified.to_rfc3339(),
                    object.etag
                );
            }
        }
    }
    out
}

/// 写清单文件，父目录不存在时创建
pub async fn write(
    path: &Path,
    format: ManifestFormat,
    bucket: &str,
    objects: &[RemoteObject],
) -> StorageResult<()> {
    crate::storage::local::ensure_parent_dir(path).await?;
    tokio::fs::write(path, render(format, bucket, objects))
        .await
        .map_err(|e| StorageError::io(path, e))?;
    tracing::info!("The file list is written at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn objects() -> Vec<RemoteObject> {
        let lm = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        vec![
            RemoteObject::new("p/d/a.nc", 100, lm, "\"e1\""),
            RemoteObject::new("p/d/b.nc", 200, lm, "e2"),
        ]
    }

    #[test]
    fn formats_from_extension() {
        assert_eq!(ManifestFormat::from_name("list.txt"), Some(ManifestFormat::Text));
        assert_eq!(ManifestFormat::from_name("list.csv"), Some(ManifestFormat::Csv));
        assert_eq!(ManifestFormat::from_name("list.json"), None);
    }

    #[test]
    fn text_manifest_has_one_url_per_line() {
        assert_eq!(
            render(ManifestFormat::Text, "b", &objects()),
            "s3://b/p/d/a.nc\ns3://b/p/d/b.nc\n"
        );
    }

    #[test]
    fn csv_manifest_has_header_and_columns() {
        let csv = render(ManifestFormat::Csv, "b", &objects());
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "s3://b/p/d/a.nc,100,2024-03-01T12:00:00+00:00,e1");
        assert_eq!(lines.len(), 3);
    }
}
