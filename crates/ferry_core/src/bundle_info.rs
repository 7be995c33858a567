use crate::manifest::PackageBundle;
use std::path::PathBuf;

/// Where the bytes of a bundle come from right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Shipped by the developer through a side channel (see [`crate::traits::DeliveryQuery`]).
    FromDelivery,
    /// Built-in content next to the application binary.
    FromStreaming,
    /// A verified entry in the cache ledger.
    FromCache,
    /// Must be downloaded first.
    FromRemote,
    /// Editor simulation, assets are read from the editor asset root.
    FromEditor,
}

/// Resolved load strategy of one bundle. Computed per query, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleInfo {
    pub bundle: PackageBundle,
    pub load_mode: LoadMode,
    pub remote_main_url: String,
    pub remote_fallback_url: String,
    /// File to read from, or for [`LoadMode::FromRemote`] the cache data file
    /// the download lands in.
    pub local_path: PathBuf,
}

impl BundleInfo {
    pub fn local(bundle: PackageBundle, load_mode: LoadMode, local_path: PathBuf) -> Self {
        Self {
            bundle,
            load_mode,
            remote_main_url: String::new(),
            remote_fallback_url: String::new(),
            local_path,
        }
    }

    pub fn remote(
        bundle: PackageBundle,
        main_url: String,
        fallback_url: String,
        local_path: PathBuf,
    ) -> Self {
        Self {
            bundle,
            load_mode: LoadMode::FromRemote,
            remote_main_url: main_url,
            remote_fallback_url: fallback_url,
            local_path,
        }
    }

    pub fn bundle_name(&self) -> &str {
        &self.bundle.bundle_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.bundle.file_size
    }

    /// Content has to be transferred before it can be loaded.
    pub fn requires_download(&self) -> bool {
        self.load_mode == LoadMode::FromRemote
    }
}
