pub mod comparator;
pub mod engine;
pub mod manifest;
pub mod path_mapper;
pub mod scanner;
pub mod transfer;

use crate::auth::AuthError;
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

pub use comparator::{decide, SyncDecision};
pub use engine::{AlwaysConfirm, Confirmation, DownloadEngine, Outcome, StdinConfirmation};
pub use manifest::ManifestFormat;
pub use path_mapper::{PathMapper, UniqueNamer};
pub use scanner::{DirectResolution, RemoteScanner};
pub use transfer::{TransferExecutor, TransferJob, TransferProgress};

/// 下载流程的错误
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid regular expression '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read request file {}: {reason}", .path.display())]
    RequestFile { path: PathBuf, reason: String },

    #[error("failed to download {key}: {source}")]
    Transfer {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
