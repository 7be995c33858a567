use thiserror::Error;

/// Failures while decoding or validating a package manifest.
///
/// A manifest that fails any of these checks is never installed; the
/// previously loaded manifest stays in effect.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported manifest file version: {0}")]
    UnsupportedVersion(String),

    #[error("Duplicate bundle name: {0}")]
    DuplicateBundle(String),

    #[error("Bundle {bundle} has an invalid file hash: {hash:?}")]
    InvalidFileHash { bundle: String, hash: String },

    #[error("Duplicate asset path: {0}")]
    DuplicateAssetPath(String),

    #[error("Duplicate address: {0}")]
    DuplicateAddress(String),

    #[error("Asset {asset} references bundle id {id} but the manifest has {len} bundles")]
    BundleIdOutOfRange { asset: String, id: usize, len: usize },

    #[error("Asset {asset} lists its own bundle id {id} as a dependency")]
    SelfDependency { asset: String, id: usize },

    #[error("Asset {asset} lists dependency bundle id {id} more than once")]
    DuplicateDependency { asset: String, id: usize },

    #[error("Addressable asset {0} has an empty address")]
    EmptyAddress(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Caller misuse of the handle layer.
///
/// These never indicate corrupted state on our side, so they are reported
/// instead of panicking.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("Handle {0} is not tracked by its provider")]
    UntrackedHandle(u64),

    #[error("Provider {0} reference count is already zero")]
    ReferenceCountUnderflow(String),

    #[error("Provider behind handle {0} has been destroyed")]
    ProviderDestroyed(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Content type mismatch for {path}: expected {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("Content loader error: {0}")]
    Generic(String),
}
