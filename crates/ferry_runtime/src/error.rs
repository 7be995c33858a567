use ferry_client::ClientError;
use ferry_core::error::{ConsistencyError, ManifestError};
use ferry_fs::{CacheError, VerifyResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Transient network error: {0}")]
    Transient(#[from] ClientError),

    #[error("Integrity check failed for {bundle_name}: {result:?}")]
    Integrity {
        bundle_name: String,
        result: VerifyResult,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download task ended without a result")]
    TaskLost,

    #[error("Failed to download {bundle_name} after {attempts} attempts: {last_error}")]
    Terminal {
        bundle_name: String,
        attempts: usize,
        last_error: String,
    },
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transient(e) => e.is_retryable(),
            DownloadError::Terminal { .. } => false,
            DownloadError::Cache(CacheError::InvalidHash(_)) => false,
            _ => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid initialize parameters: {0}")]
    InvalidParameters(String),

    #[error("No tokio runtime available, pass one to the builder")]
    NoAsyncRuntime,

    #[error("Package {0} has no active manifest, run initialization first")]
    NotInitialized(String),

    #[error("Manifest of package version {0} has not been loaded")]
    ManifestNotLoaded(String),

    #[error("Location not found in the active manifest: {0}")]
    LocationNotFound(String),

    #[error("{operation} is not supported in {mode} play mode")]
    WrongPlayMode {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("Bundle {0} is not a raw file")]
    NotRawFile(String),

    #[error("Provider handed out a handle of another content kind")]
    UnexpectedHandleKind,

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
