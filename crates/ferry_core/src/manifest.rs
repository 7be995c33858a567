use crate::error::ManifestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::path::Path;

/// Format version written by publishers and accepted by the runtime.
pub const MANIFEST_FILE_VERSION: &str = "1.0.0";

/// One content-addressed bundle file.
///
/// The position in [`ManifestData::bundle_list`] is the bundle id that asset
/// records refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBundle {
    /// Unique within a manifest. Shared dependency bundles carry a
    /// hash-derived dedup name.
    pub bundle_name: String,

    /// Hex SHA-256 of the file bytes. Cache key and remote file name.
    pub file_hash: String,

    /// CRC32 of the file bytes.
    pub file_crc: u32,

    /// Size in bytes
    pub file_size: u64,

    /// Labels used for selective download.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub flags: u8,
}

impl PackageBundle {
    pub const FLAG_RAW_FILE: u8 = 1 << 0;
    pub const FLAG_ENCRYPTED: u8 = 1 << 1;

    pub fn new(
        bundle_name: impl Into<String>,
        file_hash: impl Into<String>,
        file_crc: u32,
        file_size: u64,
        tags: Vec<String>,
    ) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            file_hash: file_hash.into(),
            file_crc,
            file_size,
            tags,
            flags: 0,
        }
    }

    pub fn with_flags(mut self, is_raw_file: bool, is_encrypted: bool) -> Self {
        self.flags = 0;
        if is_raw_file {
            self.flags |= Self::FLAG_RAW_FILE;
        }
        if is_encrypted {
            self.flags |= Self::FLAG_ENCRYPTED;
        }
        self
    }

    pub fn is_raw_file(&self) -> bool {
        self.flags & Self::FLAG_RAW_FILE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & Self::FLAG_ENCRYPTED != 0
    }

    /// Name of the file on the content server: the content hash plus the
    /// extension of the bundle name, e.g. `9f86d0...e3.bundle`.
    pub fn file_name(&self) -> String {
        match Path::new(&self.bundle_name).extension() {
            Some(ext) => format!("{}.{}", self.file_hash, ext.to_string_lossy()),
            None => self.file_hash.clone(),
        }
    }

    pub fn has_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter()
            .any(|tag| self.tags.iter().any(|t| t == tag.as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAsset {
    /// Only set when the manifest is addressable.
    #[serde(default)]
    pub address: String,

    /// Source path e.g. "assets/ui/main_menu.prefab"
    pub asset_path: String,

    #[serde(default)]
    pub asset_tags: Vec<String>,

    /// Index of the owning bundle.
    pub bundle_id: usize,

    /// Other bundles that must be present for this asset to resolve.
    /// Never contains `bundle_id`, never contains duplicates.
    #[serde(default)]
    pub depend_ids: Vec<usize>,
}

/// The serialized form of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestData {
    pub file_version: String,

    pub enable_addressable: bool,

    pub package_name: String,

    /// The version id e.g. "v1.0" or a build number.
    pub human_readable_version: String,

    /// Standard UTC timestamp.
    #[serde(default)]
    pub published_at: DateTime<Utc>,

    /// Who triggered the build.
    #[serde(default)]
    pub published_by: String,

    pub bundle_list: Vec<PackageBundle>,

    pub asset_list: Vec<PackageAsset>,
}

/// A validated, indexed and immutable manifest.
///
/// Construction goes through [`PackageManifest::from_bytes`] or
/// `TryFrom<ManifestData>`, both of which reject the build-time invariants
/// a corrupted file could break.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    data: ManifestData,
    bundle_ids: HashMap<String, usize>,
    asset_paths: HashMap<String, usize>,
    addresses: HashMap<String, usize>,
}

impl PartialEq for PackageManifest {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Deref for PackageManifest {
    type Target = ManifestData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Non-empty lowercase hex. File hashes name cache directories and remote
/// files, so nothing else is accepted.
pub fn is_file_hash(file_hash: &str) -> bool {
    !file_hash.is_empty()
        && file_hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl TryFrom<ManifestData> for PackageManifest {
    type Error = ManifestError;

    fn try_from(data: ManifestData) -> Result<Self, Self::Error> {
        if data.file_version != MANIFEST_FILE_VERSION {
            return Err(ManifestError::UnsupportedVersion(data.file_version));
        }

        let mut bundle_ids = HashMap::with_capacity(data.bundle_list.len());
        for (index, bundle) in data.bundle_list.iter().enumerate() {
            if !is_file_hash(&bundle.file_hash) {
                return Err(ManifestError::InvalidFileHash {
                    bundle: bundle.bundle_name.clone(),
                    hash: bundle.file_hash.clone(),
                });
            }
            if bundle_ids.insert(bundle.bundle_name.clone(), index).is_some() {
                return Err(ManifestError::DuplicateBundle(bundle.bundle_name.clone()));
            }
        }

        let len = data.bundle_list.len();
        let mut asset_paths = HashMap::with_capacity(data.asset_list.len());
        let mut addresses = HashMap::new();
        for (index, asset) in data.asset_list.iter().enumerate() {
            if asset.bundle_id >= len {
                return Err(ManifestError::BundleIdOutOfRange {
                    asset: asset.asset_path.clone(),
                    id: asset.bundle_id,
                    len,
                });
            }

            let mut seen = HashSet::with_capacity(asset.depend_ids.len());
            for &id in &asset.depend_ids {
                if id >= len {
                    return Err(ManifestError::BundleIdOutOfRange {
                        asset: asset.asset_path.clone(),
                        id,
                        len,
                    });
                }
                if id == asset.bundle_id {
                    return Err(ManifestError::SelfDependency {
                        asset: asset.asset_path.clone(),
                        id,
                    });
                }
                if !seen.insert(id) {
                    return Err(ManifestError::DuplicateDependency {
                        asset: asset.asset_path.clone(),
                        id,
                    });
                }
            }

            if asset_paths.insert(asset.asset_path.clone(), index).is_some() {
                return Err(ManifestError::DuplicateAssetPath(asset.asset_path.clone()));
            }

            if data.enable_addressable {
                if asset.address.is_empty() {
                    return Err(ManifestError::EmptyAddress(asset.asset_path.clone()));
                }
                if addresses.insert(asset.address.clone(), index).is_some() {
                    return Err(ManifestError::DuplicateAddress(asset.address.clone()));
                }
            }
        }

        Ok(Self {
            data,
            bundle_ids,
            asset_paths,
            addresses,
        })
    }
}

impl PackageManifest {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        let data: ManifestData = serde_json::from_slice(bytes)?;
        Self::try_from(data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(&self.data)?)
    }

    pub fn data(&self) -> &ManifestData {
        &self.data
    }

    pub fn bundle_id(&self, bundle_name: &str) -> Result<usize, ManifestError> {
        self.bundle_ids
            .get(bundle_name)
            .copied()
            .ok_or_else(|| ManifestError::NotFound(bundle_name.to_string()))
    }

    pub fn bundle(&self, bundle_name: &str) -> Option<&PackageBundle> {
        self.bundle_ids
            .get(bundle_name)
            .map(|&id| &self.data.bundle_list[id])
    }

    pub fn asset(&self, asset_path: &str) -> Option<&PackageAsset> {
        self.asset_paths
            .get(asset_path)
            .map(|&id| &self.data.asset_list[id])
    }

    /// Resolves a location by address first (addressable manifests only),
    /// then by asset path.
    pub fn resolve_location(&self, location: &str) -> Option<&PackageAsset> {
        if self.data.enable_addressable {
            if let Some(&id) = self.addresses.get(location) {
                return Some(&self.data.asset_list[id]);
            }
        }
        self.asset(location)
    }

    pub fn main_bundle(&self, asset: &PackageAsset) -> &PackageBundle {
        &self.data.bundle_list[asset.bundle_id]
    }

    /// Dependency bundles of `asset` in manifest order of `depend_ids`.
    pub fn dependencies(&self, asset: &PackageAsset) -> Vec<&PackageBundle> {
        asset
            .depend_ids
            .iter()
            .map(|&id| &self.data.bundle_list[id])
            .collect()
    }

    /// Main bundle followed by dependencies, without duplicates.
    pub fn required_bundles(&self, asset: &PackageAsset) -> Vec<&PackageBundle> {
        let mut result = Vec::with_capacity(asset.depend_ids.len() + 1);
        result.push(self.main_bundle(asset));
        result.extend(self.dependencies(asset));
        result
    }

    pub fn bundles_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<&PackageBundle> {
        self.data
            .bundle_list
            .iter()
            .filter(|bundle| bundle.has_tag(tags))
            .collect()
    }

    pub fn assets_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<&PackageAsset> {
        self.data
            .asset_list
            .iter()
            .filter(|asset| {
                tags.iter()
                    .any(|tag| asset.asset_tags.iter().any(|t| t == tag.as_ref()))
            })
            .collect()
    }

    pub fn assets_in_bundle(&self, bundle_name: &str) -> Vec<&PackageAsset> {
        match self.bundle_ids.get(bundle_name) {
            Some(&id) => self
                .data
                .asset_list
                .iter()
                .filter(|asset| asset.bundle_id == id)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn contains_hash(&self, file_hash: &str) -> bool {
        self.data
            .bundle_list
            .iter()
            .any(|bundle| bundle.file_hash == file_hash)
    }
}
