use crate::error::CacheError;
use ferry_core::manifest::PackageBundle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// Location and fingerprint of one verified cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub info_file_path: PathBuf,
    pub data_file_path: PathBuf,
    pub data_file_crc: u32,
    pub data_file_size: u64,
}

/// The ledger is owned by the runtime context and only touched on the
/// scheduling thread.
pub type SharedLedger = Rc<RefCell<CacheLedger>>;

/// Verified cache entries keyed by content hash.
#[derive(Debug, Default)]
pub struct CacheLedger {
    records: HashMap<String, CacheRecord>,
}

impl CacheLedger {
    pub fn shared() -> SharedLedger {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, file_hash: &str) -> bool {
        self.records.contains_key(file_hash)
    }

    /// The hash is recorded and its fingerprint matches the bundle.
    pub fn is_cached(&self, bundle: &PackageBundle) -> bool {
        self.records
            .get(&bundle.file_hash)
            .is_some_and(|record| {
                record.data_file_crc == bundle.file_crc && record.data_file_size == bundle.file_size
            })
    }

    pub fn get(&self, file_hash: &str) -> Option<&CacheRecord> {
        self.records.get(file_hash)
    }

    pub fn record(&mut self, file_hash: impl Into<String>, record: CacheRecord) {
        self.records.insert(file_hash.into(), record);
    }

    /// Forgets the entry and deletes its files. Returns whether the hash was
    /// recorded.
    pub fn purge(&mut self, file_hash: &str) -> Result<bool, CacheError> {
        let Some(record) = self.records.remove(file_hash) else {
            return Ok(false);
        };

        for path in [&record.data_file_path, &record.info_file_path] {
            match fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        if let Some(file_root) = record.data_file_path.parent() {
            // Only succeeds once the directory is empty.
            let _ = fs::remove_dir(file_root);
        }
        Ok(true)
    }

    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{CacheInfo, CacheLayout};

    #[test]
    fn cached_requires_matching_fingerprint() {
        let mut ledger = CacheLedger::default();
        let bundle = PackageBundle::new("a.bundle", "aa11", 7, 10, vec![]);
        ledger.record(
            "aa11",
            CacheRecord {
                info_file_path: "i".into(),
                data_file_path: "d".into(),
                data_file_crc: 7,
                data_file_size: 10,
            },
        );
        assert!(ledger.is_cached(&bundle));

        let changed = PackageBundle::new("a.bundle", "aa11", 8, 10, vec![]);
        assert!(!ledger.is_cached(&changed));
        assert!(ledger.contains("aa11"));
    }

    #[test]
    fn purge_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(dir.path(), "Main");
        let temp = layout.temp_file_path("bb22").unwrap();
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, b"xyz").unwrap();
        let record = layout.commit("bb22", &temp, CacheInfo { crc: 1, size: 3 }).unwrap();

        let mut ledger = CacheLedger::default();
        ledger.record("bb22", record.clone());
        assert!(ledger.purge("bb22").unwrap());
        assert!(!record.data_file_path.exists());
        assert!(!layout.file_root("bb22").unwrap().exists());
        assert!(!ledger.purge("bb22").unwrap());
    }
}
