//! 请求与响应模型

use crate::core::DownloadError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 一次 `get` 请求。创建后只读。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GetRequest {
    /// 数据集地址：`https://<host>/<bucket>/<root>/<product>/<dataset>`
    pub dataset_url: Option<String>,
    pub output_directory: PathBuf,
    /// 直接下载的文件列表（相对数据集或完整地址）
    pub direct_download: Vec<String>,
    /// 从文件读取直接下载列表，每行一个
    pub file_list: Option<PathBuf>,
    /// 在 `s3://bucket/key` 上做非锚定匹配
    pub regex: Option<String>,
    /// glob 过滤，转换成正则后与 `regex` 合并
    pub filter: Option<String>,
    pub no_directories: bool,
    pub show_outputnames: bool,
    pub force_download: bool,
    pub overwrite: bool,
    pub sync: bool,
    pub sync_delete: bool,
    /// 只列数据集根目录（浅列表）
    pub index_parts: bool,
    pub dry_run: bool,
    /// 只导出清单，文件名必须以 `.txt` 或 `.csv` 结尾
    pub create_file_list: Option<String>,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            dataset_url: None,
            output_directory: PathBuf::from("."),
            direct_download: Vec::new(),
            file_list: None,
            regex: None,
            filter: None,
            no_directories: false,
            show_outputnames: false,
            force_download: false,
            overwrite: false,
            sync: false,
            sync_delete: false,
            index_parts: false,
            dry_run: false,
            create_file_list: None,
        }
    }
}

impl GetRequest {
    /// 从 JSON 请求文件加载；过时的键名按对照表改写
    pub fn from_file(path: &Path) -> Result<Self, DownloadError> {
        let request_error = |reason: String| DownloadError::RequestFile {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| request_error(e.to_string()))?;
        let raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| request_error(e.to_string()))?;
        let object = raw
            .as_object()
            .ok_or_else(|| request_error("expected a JSON object".to_string()))?;

        let mut mapped = serde_json::Map::new();
        for (key, value) in object {
            let key = match crate::cli::deprecated_option(key, "get") {
                Some(option) if option.severity == crate::cli::Severity::Removed => {
                    return Err(request_error(format!(
                        "'{}' has been removed, use '{}' instead",
                        key, option.new_name
                    )));
                }
                Some(option) => {
                    tracing::warn!(
                        "请求文件中的 '{}' 已过时，请改用 '{}'",
                        key,
                        option.new_name
                    );
                    option.new_name.replace('-', "_")
                }
                None => key.clone(),
            };
            mapped.insert(key, value.clone());
        }

        serde_json::from_value(serde_json::Value::Object(mapped))
            .map_err(|e| request_error(e.to_string()))
    }

    /// `sync_delete` 隐含 `sync`
    pub fn effective_sync(&self) -> bool {
        self.sync || self.sync_delete
    }

    /// sync / overwrite 时重新使用同一目标路径，否则生成不冲突的新名字
    pub fn reuses_destinations(&self) -> bool {
        self.effective_sync() || self.overwrite
    }

    /// 校验请求的组合是否合法
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.dataset_url.as_deref().map_or(true, str::is_empty) {
            return Err(DownloadError::InvalidRequest(
                "a dataset url is required".to_string(),
            ));
        }
        if self.sync_delete && self.no_directories {
            return Err(DownloadError::InvalidRequest(
                "sync-delete cannot be combined with no-directories".to_string(),
            ));
        }
        if let Some(name) = &self.create_file_list {
            if !(name.ends_with(".txt") || name.ends_with(".csv")) {
                return Err(DownloadError::InvalidRequest(format!(
                    "file list name '{}' must end with .txt or .csv",
                    name
                )));
            }
        }
        self.full_regex()?;
        Ok(())
    }

    /// 读入 `file_list` 指向的文件，追加到直接下载列表
    pub fn load_file_list(&mut self) -> Result<(), DownloadError> {
        let Some(path) = self.file_list.clone() else {
            return Ok(());
        };
        let content = std::fs::read_to_string(&path).map_err(|e| DownloadError::RequestFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        self.direct_download.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        Ok(())
    }

    /// 合并 `filter` 与 `regex`，编译后返回
    pub fn full_regex(&self) -> Result<Option<Regex>, DownloadError> {
        let mut pattern = self.regex.clone().filter(|r| !r.is_empty());
        if let Some(glob) = self.filter.as_deref().filter(|f| !f.is_empty()) {
            pattern = Some(overload_regex(&filter_to_regex(glob), pattern.as_deref()));
        }
        pattern.map(|p| compile_regex(&p)).transpose()
    }
}

pub fn compile_regex(pattern: &str) -> Result<Regex, DownloadError> {
    Regex::new(pattern).map_err(|source| DownloadError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// 把新的正则并入已有正则：`(new|existing)`
pub fn overload_regex(regex: &str, existing: Option<&str>) -> String {
    match existing.filter(|e| !e.is_empty()) {
        Some(existing) => format!("({}|{})", regex, existing),
        None => regex.to_string(),
    }
}

/// glob 转正则，锚定在结尾：`*` → `.*`，`?` → `.`，`[...]` 转成字符类
pub fn filter_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // 找到配对的 `]`，找不到就当普通字符
                let close = chars[i + 1..]
                    .iter()
                    .enumerate()
                    .skip(usize::from(chars.get(i + 1) == Some(&']')))
                    .find(|(_, c)| **c == ']')
                    .map(|(offset, _)| i + 1 + offset);
                match close {
                    Some(end) => {
                        out.push('[');
                        out.push_str(&class_body(&chars[i + 1..end]));
                        out.push(']');
                        i = end;
                    }
                    None => out.push_str("\\["),
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    format!("(?s:{})\\z", out)
}

/// `[...]` 的内容转成正则字符类：开头的 `!` 取反，`a-z` 保留为区间，
/// 其余字符一律按字面量处理（正则里 `[`、`&&`、`--`、`~~` 在类里有特殊含义）
fn class_body(body: &[char]) -> String {
    let (negated, body) = match body.split_first() {
        Some(('!', rest)) => (true, rest),
        _ => (false, body),
    };

    let literal = |out: &mut String, c: char| {
        if matches!(c, '[' | ']' | '\\' | '^' | '-' | '&' | '~') {
            out.push('\\');
        }
        out.push(c);
    };

    let mut out = String::new();
    if negated {
        out.push('^');
    }
    let mut i = 0;
    while i < body.len() {
        literal(&mut out, body[i]);
        if body.get(i + 1) == Some(&'-') && i + 2 < body.len() {
            out.push('-');
            literal(&mut out, body[i + 2]);
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

/// 终止状态，互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    DryRun,
    NoDataToDownload,
    FileListCreated,
}

impl StatusCode {
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Success => "The request was successfully processed.",
            StatusCode::DryRun => {
                "The request was run with the dry-run option. No data was downloaded."
            }
            StatusCode::NoDataToDownload => {
                "No data to download from the remote server corresponding to your request."
            }
            StatusCode::FileListCreated => {
                "The file list was created successfully. No data was downloaded."
            }
        }
    }
}

/// 单个文件的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileGet {
    pub s3_url: String,
    pub https_url: String,
    /// MB（字节 / 1024²）
    pub file_size: f64,
    /// RFC 3339，UTC
    pub last_modified_datetime: String,
    pub output_directory: PathBuf,
    pub filename: String,
    pub file_path: PathBuf,
    pub etag: String,
    /// 带点的扩展名，例如 `.nc`
    pub file_format: String,
}

/// 一次请求的最终结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseGet {
    pub files: Vec<FileGet>,
    pub files_deleted: Vec<PathBuf>,
    /// MB；导出清单时为空
    pub total_size: Option<f64>,
    pub status: StatusCode,
    pub message: String,
    /// 导出的清单文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_list: Option<PathBuf>,
}

impl ResponseGet {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            files: Vec::new(),
            files_deleted: Vec::new(),
            total_size: match status {
                StatusCode::FileListCreated => None,
                _ => Some(0.0),
            },
            status,
            message: status.message().to_string(),
            file_list: None,
        }
    }
}

#[allow(non_snake_case)]
pub fn size_to_MB(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// 十进制单位的可读大小，保留两位小数
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1000.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1000.0;
    }
    format!("{:.2} YB", size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GetRequest {
        GetRequest {
            dataset_url: Some("https://host/bucket/native/p/d".to_string()),
            ..GetRequest::default()
        }
    }

    #[test]
    fn glob_translation_matches_like_fnmatch() {
        let re = Regex::new(&filter_to_regex("*_2023??.nc")).unwrap();
        assert!(re.is_match("s3://b/native/p/d/file_202301.nc"));
        assert!(!re.is_match("s3://b/native/p/d/file_202301.nc.md5"));

        let re = Regex::new(&filter_to_regex("*[!0-9].nc")).unwrap();
        assert!(re.is_match("s3://b/x/a.nc"));
        assert!(!re.is_match("s3://b/x/1.nc"));

        // 点号被转义
        let re = Regex::new(&filter_to_regex("a.nc")).unwrap();
        assert!(!re.is_match("abnc"));
    }

    #[test]
    fn bracket_classes_escape_regex_class_operators() {
        // 类里的 `[`、`&`、`~` 按字面量匹配
        let re = Regex::new(&filter_to_regex("*[[]*")).unwrap();
        assert!(re.is_match("s3://b/a[1].nc"));
        assert!(!re.is_match("s3://b/a1.nc"));

        let re = Regex::new(&filter_to_regex("*[&&~~]x")).unwrap();
        assert!(re.is_match("a&x"));
        assert!(re.is_match("a~x"));
        assert!(!re.is_match("abx"));

        // 区间保留，首尾的 `-` 是字面量
        let re = Regex::new(&filter_to_regex("[a-c-]")).unwrap();
        assert!(re.is_match("b"));
        assert!(re.is_match("-"));
        assert!(!re.is_match("d"));

        let mut req = request();
        req.filter = Some("*[[]*".to_string());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn filter_overloads_regex() {
        let mut req = request();
        req.regex = Some("2024".to_string());
        req.filter = Some("*.nc".to_string());

        let re = req.full_regex().unwrap().unwrap();
        assert_eq!(re.as_str(), "((?s:.*\\.nc)\\z|2024)");
        assert!(re.is_match("s3://b/2024.txt"));
        assert!(re.is_match("s3://b/x.nc"));
        assert!(!re.is_match("s3://b/x.txt"));
    }

    #[test]
    fn validation_rules() {
        assert!(request().validate().is_ok());
        assert!(GetRequest::default().validate().is_err());

        let mut req = request();
        req.sync_delete = true;
        req.no_directories = true;
        assert!(matches!(req.validate(), Err(DownloadError::InvalidRequest(_))));

        let mut req = request();
        req.create_file_list = Some("files.json".to_string());
        assert!(req.validate().is_err());

        let mut req = request();
        req.regex = Some("(unclosed".to_string());
        assert!(matches!(req.validate(), Err(DownloadError::InvalidRegex { .. })));
    }

    #[test]
    fn sync_delete_implies_sync() {
        let mut req = request();
        req.sync_delete = true;
        assert!(req.effective_sync());
        assert!(req.reuses_destinations());
        assert!(!request().reuses_destinations());
    }

    #[test]
    fn request_file_maps_deprecated_keys() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"dataset_url": "https://host/b/p/d", "filter_with_globbing_pattern": "*.nc", "sync": true}"#,
        )
        .unwrap();

        let req = GetRequest::from_file(&path).unwrap();
        assert_eq!(req.filter.as_deref(), Some("*.nc"));
        assert!(req.sync);
        assert_eq!(req.output_directory, PathBuf::from("."));
    }

    #[test]
    fn file_list_skips_blank_lines() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("files.txt");
        std::fs::write(&path, "a.nc\n\n  b.nc  \n").unwrap();

        let mut req = request();
        req.file_list = Some(path);
        req.load_file_list().unwrap();
        assert_eq!(req.direct_download, vec!["a.nc", "b.nc"]);
    }

    #[test]
    fn sizes() {
        assert_eq!(format_file_size(999), "999.00 B");
        assert_eq!(format_file_size(1_500_000), "1.50 MB");
        assert_eq!(size_to_MB(1024 * 1024 * 3), 3.0);
    }
}
