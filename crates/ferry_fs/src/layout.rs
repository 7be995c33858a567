use crate::error::CacheError;
use crate::integrity::atomic_write;
use crate::ledger::CacheRecord;
use ferry_core::naming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_FILES_FOLDER: &str = "CacheFiles";
pub const MANIFEST_FILES_FOLDER: &str = "ManifestFiles";
pub const TEMP_FILES_FOLDER: &str = "TempFiles";
pub const DATA_FILE_NAME: &str = "__data";
pub const INFO_FILE_NAME: &str = "__info";

/// Contents of the `__info` side file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub crc: u32,
    pub size: u64,
}

impl CacheInfo {
    pub fn read(path: &Path) -> Result<Self, CacheError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), CacheError> {
        atomic_write(path, &serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// Paths of one package's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    package_name: String,
    package_root: PathBuf,
}

impl CacheLayout {
    pub fn new(cache_root: impl AsRef<Path>, package_name: &str) -> Self {
        Self {
            package_name: package_name.to_string(),
            package_root: cache_root.as_ref().join(package_name),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    pub fn cache_files_root(&self) -> PathBuf {
        self.package_root.join(CACHE_FILES_FOLDER)
    }

    pub fn manifest_files_root(&self) -> PathBuf {
        self.package_root.join(MANIFEST_FILES_FOLDER)
    }

    /// Directory holding the data and info file of one hash.
    ///
    /// The hash must be at least two ASCII alphanumerics, so the result is
    /// always two levels below [`Self::cache_files_root`].
    pub fn file_root(&self, file_hash: &str) -> Result<PathBuf, CacheError> {
        check_hash(file_hash)?;
        Ok(self.cache_files_root().join(&file_hash[..2]).join(file_hash))
    }

    pub fn data_file_path(&self, file_hash: &str) -> Result<PathBuf, CacheError> {
        Ok(self.file_root(file_hash)?.join(DATA_FILE_NAME))
    }

    pub fn info_file_path(&self, file_hash: &str) -> Result<PathBuf, CacheError> {
        Ok(self.file_root(file_hash)?.join(INFO_FILE_NAME))
    }

    /// Partial download target.
    pub fn temp_file_path(&self, file_hash: &str) -> Result<PathBuf, CacheError> {
        check_hash(file_hash)?;
        Ok(self
            .package_root
            .join(TEMP_FILES_FOLDER)
            .join(format!("{file_hash}.temp")))
    }

    pub fn sandbox_manifest_path(&self, package_version: &str) -> PathBuf {
        self.manifest_files_root()
            .join(naming::manifest_file_name(&self.package_name, package_version))
    }

    pub fn sandbox_hash_path(&self, package_version: &str) -> PathBuf {
        self.manifest_files_root()
            .join(naming::manifest_hash_file_name(&self.package_name, package_version))
    }

    /// Moves a verified temp file into the cache and writes its info file.
    pub fn commit(
        &self,
        file_hash: &str,
        temp_path: &Path,
        info: CacheInfo,
    ) -> Result<CacheRecord, CacheError> {
        let file_root = self.file_root(file_hash)?;
        fs::create_dir_all(&file_root)?;

        let data_file_path = file_root.join(DATA_FILE_NAME);
        if data_file_path.exists() {
            fs::remove_file(&data_file_path)?;
        }
        fs::rename(temp_path, &data_file_path)?;

        let info_file_path = file_root.join(INFO_FILE_NAME);
        info.write(&info_file_path)?;

        Ok(CacheRecord {
            info_file_path,
            data_file_path,
            data_file_crc: info.crc,
            data_file_size: info.size,
        })
    }

    /// Removes the whole package sandbox except the saved manifests.
    pub fn delete_cache_files(&self) -> Result<(), CacheError> {
        for folder in [CACHE_FILES_FOLDER, TEMP_FILES_FOLDER] {
            let path = self.package_root.join(folder);
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
        }
        Ok(())
    }
}

fn check_hash(file_hash: &str) -> Result<(), CacheError> {
    if file_hash.len() < 2 || !file_hash.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CacheError::InvalidHash(file_hash.to_string()));
    }
    Ok(())
}
