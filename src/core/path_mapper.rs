//! 远程键 → 本地路径
//!
//! 布局：`<output>/<product>/<dataset>/<relative...>`；`no_directories` 时只取文件名。
//! 存储根（`native/` 之类）由 `DatasetLocator::root_depth` 决定，映射时去掉。

use crate::storage::DatasetLocator;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathMapper {
    output_directory: PathBuf,
    root_depth: usize,
    no_directories: bool,
}

impl PathMapper {
    pub fn new(output_directory: &Path, locator: &DatasetLocator, no_directories: bool) -> Self {
        Self {
            output_directory: output_directory.to_path_buf(),
            root_depth: locator.root_depth(),
            no_directories,
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// 去掉存储根后的段
    fn segments<'k>(&self, key: &'k str) -> impl Iterator<Item = &'k str> {
        key.split('/')
            .filter(|s| !s.is_empty())
            .skip(self.root_depth)
    }

    /// 保留目录结构时的相对路径
    pub fn relative_path(&self, key: &str) -> PathBuf {
        self.segments(key).collect()
    }

    /// 目标路径（未做唯一化）
    pub fn destination(&self, key: &str) -> PathBuf {
        if self.no_directories {
            let name = key.rsplit('/').find(|s| !s.is_empty()).unwrap_or(key);
            self.output_directory.join(name)
        } else {
            self.output_directory.join(self.relative_path(key))
        }
    }

    /// 数据集级别的本地目录：`<output>/<product>/<dataset>`
    pub fn dataset_folder(&self, key: &str) -> Option<PathBuf> {
        let mut segments = self.segments(key);
        let product = segments.next()?;
        let dataset = segments.next()?;
        // 至少还要有一个文件名段，否则算不上数据集下的文件
        segments.next()?;
        Some(self.output_directory.join(product).join(dataset))
    }
}

/// `name.ext` → `name_(n).ext`
pub fn numbered_path(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_({})", stem, n),
    };
    path.with_file_name(name)
}

/// 本次计划内的唯一命名：磁盘上已存在或前面已分配的路径都算占用
#[derive(Debug, Default)]
pub struct UniqueNamer {
    reuse: bool,
    claimed: HashSet<PathBuf>,
}

impl UniqueNamer {
    /// `reuse` 为 true（sync / overwrite）时直接使用原路径
    pub fn new(reuse: bool) -> Self {
        Self {
            reuse,
            claimed: HashSet::new(),
        }
    }

    pub fn assign(&mut self, path: PathBuf) -> PathBuf {
        if self.reuse {
            self.claimed.insert(path.clone());
            return path;
        }

        let mut candidate = path.clone();
        let mut n = 0;
        while self.claimed.contains(&candidate) || candidate.exists() {
            n += 1;
            candidate = numbered_path(&path, n);
        }
        self.claimed.insert(candidate.clone());
        candidate
    }
}
