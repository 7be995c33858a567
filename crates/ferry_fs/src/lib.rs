//! # Ferry Cache Storage
//!
//! Local, content-addressed storage of bundle files.
//!
//! Every cached bundle lives in its own directory keyed by the file hash:
//!
//! ```text
//! {cache_root}/{package}/CacheFiles/{hash[..2]}/{hash}/__data
//! {cache_root}/{package}/CacheFiles/{hash[..2]}/{hash}/__info
//! ```
//!
//! The `__info` side file records size and CRC so a restart can re-verify
//! entries without the manifest. Verified entries are tracked in the
//! [`CacheLedger`].
//!
//! ## Usage
//!
//! ```no_run
//! use ferry_fs::{CacheLayout, CacheLedger};
//!
//! let layout = CacheLayout::new("./ferry_cache", "DefaultPackage");
//! let ledger = CacheLedger::default();
//! assert!(!ledger.contains(""));
//! # let _ = layout;
//! ```

pub mod error;
pub mod integrity;
pub mod layout;
pub mod ledger;
pub mod operations;
pub mod verifier;

pub use error::CacheError;
pub use integrity::{FileFingerprint, VerifyLevel, VerifyResult, atomic_write, verify_file};
pub use layout::{CacheInfo, CacheLayout};
pub use ledger::{CacheLedger, CacheRecord, SharedLedger};
pub use operations::{
    ClearAllCacheFilesOperation, ClearUnusedCacheFilesOperation, FindCacheFilesOperation,
    VerifyCacheFilesOperation,
};
pub use verifier::{AsyncVerifier, InlineVerifier, ThreadedVerifier, VerifierKind, VerifyElement};
