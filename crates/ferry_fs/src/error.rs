use crate::integrity::VerifyResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache info serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache file hash: {0:?}")]
    InvalidHash(String),

    #[error("Integrity check failed: {0:?}")]
    Integrity(VerifyResult),
}
