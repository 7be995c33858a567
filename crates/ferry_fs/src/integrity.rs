use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// How much of a file is checked before it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerifyLevel {
    /// The data file exists.
    Low,
    /// Plus the size matches.
    Middle,
    /// Plus the CRC32 matches.
    #[default]
    High,
    /// Plus the SHA-256 matches.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Succeed,
    InfoFileNotExisted,
    InfoMismatch,
    DataFileNotExisted,
    FileNotComplete,
    FileOverflow,
    FileCrcError,
    FileHashError,
    Exception,
}

impl VerifyResult {
    pub fn is_ok(self) -> bool {
        self == VerifyResult::Succeed
    }
}

/// What a file is expected to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub hash: String,
    pub crc: u32,
    pub size: u64,
}

impl FileFingerprint {
    pub fn new(hash: impl Into<String>, crc: u32, size: u64) -> Self {
        Self {
            hash: hash.into(),
            crc,
            size,
        }
    }

    pub fn of_bundle(bundle: &ferry_core::manifest::PackageBundle) -> Self {
        Self::new(&bundle.file_hash, bundle.file_crc, bundle.file_size)
    }
}

/// CRC32 and optionally hex SHA-256 of a file, in one pass.
pub fn digest_file(path: &Path, with_sha256: bool) -> io::Result<(u32, Option<String>)> {
    let mut file = fs::File::open(path)?;
    let mut crc = crc32fast::Hasher::new();
    let mut sha = with_sha256.then(Sha256::new);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        crc.update(&buffer[..read]);
        if let Some(sha) = sha.as_mut() {
            sha.update(&buffer[..read]);
        }
    }
    Ok((crc.finalize(), sha.map(|sha| hex::encode(sha.finalize()))))
}

pub fn bytes_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn verify_file(path: &Path, expected: &FileFingerprint, level: VerifyLevel) -> VerifyResult {
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return VerifyResult::DataFileNotExisted,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return VerifyResult::DataFileNotExisted,
        Err(_) => return VerifyResult::Exception,
    };
    if level == VerifyLevel::Low {
        return VerifyResult::Succeed;
    }

    let size = metadata.len();
    if size < expected.size {
        return VerifyResult::FileNotComplete;
    }
    if size > expected.size {
        return VerifyResult::FileOverflow;
    }
    if level == VerifyLevel::Middle {
        return VerifyResult::Succeed;
    }

    let (crc, sha) = match digest_file(path, level == VerifyLevel::Strict) {
        Ok(digest) => digest,
        Err(_) => return VerifyResult::Exception,
    };
    if crc != expected.crc {
        return VerifyResult::FileCrcError;
    }
    match sha {
        Some(sha) if !sha.eq_ignore_ascii_case(&expected.hash) => VerifyResult::FileHashError,
        _ => VerifyResult::Succeed,
    }
}

/// Writes through a temporary sibling and a rename so readers never see a
/// partial file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");

    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;

    Ok(())
}
