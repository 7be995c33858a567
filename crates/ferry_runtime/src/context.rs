use crate::download::{DownloadSystem, DownloaderSettings};
use crate::error::RuntimeError;
use crate::params::{InitializeParameters, PlayMode};
use ferry_client::{FerryClient, HostServers};
use ferry_core::bundle_info::{BundleInfo, LoadMode};
use ferry_core::manifest::{PackageAsset, PackageBundle, PackageManifest};
use ferry_core::naming;
use ferry_core::traits::{DeliveryQuery, LocationResolver};
use ferry_fs::{AsyncVerifier, CacheLayout, CacheLedger, SharedLedger};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Everything one package's operations share.
///
/// Lives on the scheduling thread for the lifetime of an
/// [`crate::AssetRuntime`]. Operations hold it through an `Rc`, the context
/// itself never points back at operations or providers.
pub struct PackageContext {
    params: InitializeParameters,
    layout: CacheLayout,
    ledger: SharedLedger,
    client: FerryClient,
    runtime: Handle,
    cancel: CancellationToken,
    hosts: Option<HostServers>,
    resolver: Box<dyn LocationResolver>,
    delivery: Option<Box<dyn DeliveryQuery>>,
    downloads: DownloadSystem,
    active_manifest: RefCell<Option<Rc<PackageManifest>>>,
    buildin_manifest: RefCell<Option<Rc<PackageManifest>>>,
    request_count: Cell<usize>,
}

impl PackageContext {
    pub(crate) fn new(
        params: InitializeParameters,
        client: FerryClient,
        runtime: Handle,
        resolver: Box<dyn LocationResolver>,
        delivery: Option<Box<dyn DeliveryQuery>>,
    ) -> Self {
        let hosts = match &params.play_mode {
            PlayMode::Host {
                default_host,
                fallback_host,
            } => Some(HostServers::new(default_host, fallback_host)),
            _ => None,
        };
        Self {
            layout: CacheLayout::new(&params.cache_root, &params.package_name),
            ledger: CacheLedger::shared(),
            client,
            runtime,
            cancel: CancellationToken::new(),
            hosts,
            resolver,
            delivery,
            downloads: DownloadSystem::default(),
            active_manifest: RefCell::new(None),
            buildin_manifest: RefCell::new(None),
            request_count: Cell::new(0),
            params,
        }
    }

    pub fn params(&self) -> &InitializeParameters {
        &self.params
    }

    pub fn package_name(&self) -> &str {
        &self.params.package_name
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn client(&self) -> &FerryClient {
        &self.client
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn downloads(&self) -> &DownloadSystem {
        &self.downloads
    }

    pub fn hosts(&self) -> Option<&HostServers> {
        self.hosts.as_ref()
    }

    pub fn active_manifest(&self) -> Option<Rc<PackageManifest>> {
        self.active_manifest.borrow().clone()
    }

    pub fn require_manifest(&self) -> Result<Rc<PackageManifest>, RuntimeError> {
        self.active_manifest()
            .ok_or_else(|| RuntimeError::NotInitialized(self.package_name().to_string()))
    }

    pub fn set_active_manifest(&self, manifest: Rc<PackageManifest>) {
        *self.active_manifest.borrow_mut() = Some(manifest);
    }

    pub fn buildin_manifest(&self) -> Option<Rc<PackageManifest>> {
        self.buildin_manifest.borrow().clone()
    }

    pub fn set_buildin_manifest(&self, manifest: Rc<PackageManifest>) {
        *self.buildin_manifest.borrow_mut() = Some(manifest);
    }

    pub(crate) fn downloader_settings(&self) -> DownloaderSettings {
        DownloaderSettings {
            layout: self.layout.clone(),
            ledger: self.ledger.clone(),
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            cancel: self.cancel.child_token(),
            breakpoint_resume_file_size: self.params.breakpoint_resume_file_size,
            verify_level: self.params.verify_level,
            retry_delay: self.params.retry_delay,
        }
    }

    pub(crate) fn create_verifier(&self) -> Box<dyn AsyncVerifier> {
        self.params
            .verifier_kind
            .create(self.params.verify_level, &self.runtime)
    }

    /// Alternates main and fallback host, starting with main.
    pub(crate) fn next_request_url(&self, file_name: &str) -> Result<String, RuntimeError> {
        let hosts = self.hosts.as_ref().ok_or(RuntimeError::WrongPlayMode {
            operation: "remote request",
            mode: self.params.play_mode.name(),
        })?;
        let count = self.request_count.get() + 1;
        self.request_count.set(count);
        Ok(if count % 2 == 0 {
            hosts.fallback_url(file_name)
        } else {
            hosts.main_url(file_name)
        })
    }

    pub fn streaming_path(&self, bundle: &PackageBundle) -> PathBuf {
        self.params.buildin_root.join(bundle.file_name())
    }

    /// The built-in manifest ships an identical copy of the bundle.
    pub fn is_buildin(&self, bundle: &PackageBundle) -> bool {
        self.buildin_manifest
            .borrow()
            .as_ref()
            .and_then(|manifest| manifest.bundle(&bundle.bundle_name))
            .is_some_and(|buildin| buildin.file_hash == bundle.file_hash)
    }

    /// Resolves where the bytes of `bundle` come from right now.
    pub fn bundle_info(&self, bundle: &PackageBundle) -> BundleInfo {
        if let PlayMode::EditorSimulate { asset_root, .. } = &self.params.play_mode {
            return BundleInfo::local(bundle.clone(), LoadMode::FromEditor, asset_root.clone());
        }

        if let Some(path) = self
            .delivery
            .as_ref()
            .and_then(|delivery| delivery.delivery_file_path(self.package_name(), &bundle.file_name()))
        {
            return BundleInfo::local(bundle.clone(), LoadMode::FromDelivery, path);
        }

        if self.is_buildin(bundle) {
            return BundleInfo::local(bundle.clone(), LoadMode::FromStreaming, self.streaming_path(bundle));
        }

        {
            let ledger = self.ledger.borrow();
            if ledger.is_cached(bundle) {
                if let Some(record) = ledger.get(&bundle.file_hash) {
                    return BundleInfo::local(bundle.clone(), LoadMode::FromCache, record.data_file_path.clone());
                }
            }
        }

        match &self.hosts {
            Some(hosts) => {
                let file_name = bundle.file_name();
                // Installed manifests only carry well-formed hashes.
                let cache_path = self.layout.data_file_path(&bundle.file_hash).unwrap_or_default();
                BundleInfo::remote(
                    bundle.clone(),
                    hosts.main_url(&file_name),
                    hosts.fallback_url(&file_name),
                    cache_path,
                )
            }
            // Offline content is built-in by definition.
            None => BundleInfo::local(bundle.clone(), LoadMode::FromStreaming, self.streaming_path(bundle)),
        }
    }

    /// Maps a caller location to the asset record of the active manifest.
    pub fn resolve_asset(&self, location: &str) -> Result<PackageAsset, RuntimeError> {
        if location.is_empty() {
            warn!("Found blank asset location");
        } else if location.ends_with(char::is_whitespace) {
            warn!("Found blank char in location : \"{location}\"");
        }

        let manifest = self.require_manifest()?;
        let mut asset_path = self.resolver.convert_location_to_asset_path(location);
        if self.params.location_to_lower {
            asset_path = asset_path.to_lowercase();
        }

        manifest
            .resolve_location(&asset_path)
            .or_else(|| manifest.resolve_location(location))
            .cloned()
            .ok_or_else(|| RuntimeError::LocationNotFound(location.to_string()))
    }

    /// Those of `bundles` that still have to come from a host.
    pub fn download_list_of<'a>(
        &self,
        bundles: impl IntoIterator<Item = &'a PackageBundle>,
    ) -> Vec<BundleInfo> {
        bundles
            .into_iter()
            .map(|bundle| self.bundle_info(bundle))
            .filter(BundleInfo::requires_download)
            .collect()
    }

    pub fn download_list_by_all(&self) -> Result<Vec<BundleInfo>, RuntimeError> {
        let manifest = self.require_manifest()?;
        Ok(self.download_list_of(&manifest.bundle_list))
    }

    pub fn download_list_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<BundleInfo>, RuntimeError> {
        let manifest = self.require_manifest()?;
        Ok(self.download_list_of(manifest.bundles_by_tags(tags)))
    }

    /// Main and dependency bundles of every location, each bundle once.
    pub fn download_list_by_locations<S: AsRef<str>>(
        &self,
        locations: &[S],
    ) -> Result<Vec<BundleInfo>, RuntimeError> {
        let manifest = self.require_manifest()?;
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for location in locations {
            let asset = self.resolve_asset(location.as_ref())?;
            for bundle in manifest.required_bundles(&asset) {
                if !seen.insert(bundle.bundle_name.clone()) {
                    continue;
                }
                let info = self.bundle_info(bundle);
                if info.requires_download() {
                    result.push(info);
                }
            }
        }
        Ok(result)
    }

    /// Built-in bundles carrying one of `tags` that are not cached yet.
    pub fn unpack_list_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<BundleInfo> {
        let Some(buildin) = self.buildin_manifest() else {
            return Vec::new();
        };
        let ledger = self.ledger.borrow();
        buildin
            .bundles_by_tags(tags)
            .into_iter()
            .filter(|bundle| !ledger.is_cached(bundle))
            .map(|bundle| BundleInfo::local(bundle.clone(), LoadMode::FromStreaming, self.streaming_path(bundle)))
            .collect()
    }

    /// Reads `{package}_version.txt` and the manifest it names from the
    /// built-in root. `None` when no version file ships.
    pub fn load_buildin_manifest(&self) -> Result<Option<PackageManifest>, RuntimeError> {
        let version_path = self
            .params
            .buildin_root
            .join(naming::package_version_file_name(self.package_name()));
        if !version_path.exists() {
            return Ok(None);
        }

        let version = fs::read_to_string(&version_path)?;
        let manifest_path = self
            .params
            .buildin_root
            .join(naming::manifest_file_name(self.package_name(), version.trim()));
        let bytes = fs::read(&manifest_path)?;
        Ok(Some(PackageManifest::from_bytes(&bytes)?))
    }
}
