//! Verification strategies.
//!
//! [`ThreadedVerifier`] hashes files on tokio's blocking pool and hands the
//! results back through a channel drained on the scheduling thread.
//! [`InlineVerifier`] does the same work synchronously for targets without
//! threads.

use crate::error::CacheError;
use crate::integrity::{FileFingerprint, VerifyLevel, VerifyResult, verify_file};
use crate::layout::{CacheInfo, CacheLayout, DATA_FILE_NAME, INFO_FILE_NAME};
use crate::ledger::CacheRecord;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fs;
use std::path::PathBuf;
use tokio::runtime::Handle;

/// One cache entry waiting for, or done with, verification.
#[derive(Debug, Clone)]
pub struct VerifyElement {
    pub package_name: String,
    pub file_hash: String,
    pub file_root: PathBuf,
    pub data_file_path: PathBuf,
    pub info_file_path: PathBuf,
    /// Manifest fingerprint, when verifying against a manifest. The info
    /// file alone is trusted otherwise.
    pub expected: Option<(u32, u64)>,
    /// Written once by whoever verifies the element.
    pub result: Option<VerifyResult>,
    info: Option<CacheInfo>,
}

impl VerifyElement {
    pub fn new(layout: &CacheLayout, file_hash: &str) -> Result<Self, CacheError> {
        let file_root = layout.file_root(file_hash)?;
        Ok(Self {
            package_name: layout.package_name().to_string(),
            file_hash: file_hash.to_string(),
            data_file_path: file_root.join(DATA_FILE_NAME),
            info_file_path: file_root.join(INFO_FILE_NAME),
            file_root,
            expected: None,
            result: None,
            info: None,
        })
    }

    pub fn with_expected(mut self, crc: u32, size: u64) -> Self {
        self.expected = Some((crc, size));
        self
    }

    pub fn verify(&mut self, level: VerifyLevel) -> VerifyResult {
        let result = self.check(level);
        self.result = Some(result);
        result
    }

    fn check(&mut self, level: VerifyLevel) -> VerifyResult {
        if !self.info_file_path.exists() {
            return VerifyResult::InfoFileNotExisted;
        }
        let info = match CacheInfo::read(&self.info_file_path) {
            Ok(info) => info,
            Err(_) => return VerifyResult::Exception,
        };
        if self.expected.is_some_and(|(crc, size)| info.crc != crc || info.size != size) {
            return VerifyResult::InfoMismatch;
        }
        self.info = Some(info);

        let fingerprint = FileFingerprint::new(&self.file_hash, info.crc, info.size);
        verify_file(&self.data_file_path, &fingerprint, level)
    }

    pub fn is_succeed(&self) -> bool {
        self.result == Some(VerifyResult::Succeed)
    }

    /// Ledger record of a successfully verified element.
    pub fn record(&self) -> Option<CacheRecord> {
        let info = self.info.filter(|_| self.is_succeed())?;
        Some(CacheRecord {
            info_file_path: self.info_file_path.clone(),
            data_file_path: self.data_file_path.clone(),
            data_file_crc: info.crc,
            data_file_size: info.size,
        })
    }

    pub fn delete_files(&self) {
        if self.file_root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.file_root) {
                tracing::warn!("Failed to delete cache files {}: {e}", self.file_root.display());
            }
        }
    }
}

pub trait AsyncVerifier {
    /// Maximum number of elements in flight.
    fn capacity(&self) -> usize;

    fn dispatch(&mut self, element: VerifyElement);

    /// Elements whose verification finished since the last call.
    fn drain(&mut self) -> Vec<VerifyElement>;
}

pub struct ThreadedVerifier {
    level: VerifyLevel,
    capacity: usize,
    runtime: Handle,
    sender: Sender<VerifyElement>,
    receiver: Receiver<VerifyElement>,
}

impl ThreadedVerifier {
    pub fn new(runtime: Handle, level: VerifyLevel) -> Self {
        let capacity = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1);
        tracing::debug!("Verification worker count : {capacity}");
        let (sender, receiver) = unbounded();
        Self {
            level,
            capacity,
            runtime,
            sender,
            receiver,
        }
    }
}

impl AsyncVerifier for ThreadedVerifier {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn dispatch(&mut self, mut element: VerifyElement) {
        let sender = self.sender.clone();
        let level = self.level;
        self.runtime.spawn_blocking(move || {
            element.verify(level);
            // The receiving side is gone when the operation was dropped.
            let _ = sender.send(element);
        });
    }

    fn drain(&mut self) -> Vec<VerifyElement> {
        self.receiver.try_iter().collect()
    }
}

pub struct InlineVerifier {
    level: VerifyLevel,
    batch_size: usize,
    completed: Vec<VerifyElement>,
}

impl InlineVerifier {
    pub const DEFAULT_BATCH_SIZE: usize = 32;

    pub fn new(level: VerifyLevel) -> Self {
        Self::with_batch_size(level, Self::DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(level: VerifyLevel, batch_size: usize) -> Self {
        Self {
            level,
            batch_size: batch_size.max(1),
            completed: Vec::new(),
        }
    }
}

impl AsyncVerifier for InlineVerifier {
    fn capacity(&self) -> usize {
        self.batch_size
    }

    fn dispatch(&mut self, mut element: VerifyElement) {
        element.verify(self.level);
        self.completed.push(element);
    }

    fn drain(&mut self) -> Vec<VerifyElement> {
        std::mem::take(&mut self.completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifierKind {
    /// Pick by platform capability.
    #[default]
    Auto,
    Threaded,
    Inline,
}

impl VerifierKind {
    pub fn detect() -> Self {
        if cfg!(target_family = "wasm") {
            VerifierKind::Inline
        } else {
            VerifierKind::Threaded
        }
    }

    pub fn create(self, level: VerifyLevel, runtime: &Handle) -> Box<dyn AsyncVerifier> {
        let kind = match self {
            VerifierKind::Auto => Self::detect(),
            kind => kind,
        };
        match kind {
            VerifierKind::Inline => Box::new(InlineVerifier::new(level)),
            _ => Box::new(ThreadedVerifier::new(runtime.clone(), level)),
        }
    }
}
