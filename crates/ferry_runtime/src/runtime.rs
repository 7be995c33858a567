use crate::assets::{AssetHandle, AssetInfo, AssetSystem, SceneHandle, SharedProvider, SubAssetsHandle};
use crate::context::PackageContext;
use crate::download::DownloaderOperation;
use crate::error::RuntimeError;
use crate::operations::{
    InitializationOperation, PreDownloadContentOperation, RawFileOperation,
    UpdateManifestOperation, UpdatePackageVersionOperation,
};
use crate::params::{InitializeParameters, PlayMode};
use ferry_client::FerryClient;
use ferry_core::bundle_info::{BundleInfo, LoadMode};
use ferry_core::manifest::PackageAsset;
use ferry_core::operation::{AsyncOperation, OperationHandle, OperationStatus, OperationSystem};
use ferry_core::traits::{
    AddressLocationResolver, BytesContentLoader, ContentKind, ContentLoader, DeliveryQuery,
    LocationResolver,
};
use ferry_fs::{ClearAllCacheFilesOperation, ClearUnusedCacheFilesOperation};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::runtime::Handle;
use tracing::info;

/// A batch downloader or unpacker that has not been started yet.
pub type PackageDownloader = OperationHandle<DownloaderOperation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearCacheMode {
    /// Every cached file of the package.
    All,
    /// Cached files the active manifest no longer references.
    Unused,
}

/// Either kind of cache clearing operation.
pub enum ClearCacheHandle {
    All(OperationHandle<ClearAllCacheFilesOperation>),
    Unused(OperationHandle<ClearUnusedCacheFilesOperation>),
}

impl ClearCacheHandle {
    pub fn status(&self) -> OperationStatus {
        match self {
            ClearCacheHandle::All(handle) => handle.status(),
            ClearCacheHandle::Unused(handle) => handle.status(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn error(&self) -> String {
        match self {
            ClearCacheHandle::All(handle) => handle.error(),
            ClearCacheHandle::Unused(handle) => handle.error(),
        }
    }

    pub fn task(&self) -> LocalBoxFuture<'static, OperationStatus> {
        match self {
            ClearCacheHandle::All(handle) => handle.task().boxed_local(),
            ClearCacheHandle::Unused(handle) => handle.task().boxed_local(),
        }
    }
}

/// Collects the collaborators of an [`AssetRuntime`].
pub struct AssetRuntimeBuilder {
    params: InitializeParameters,
    loader: Option<Rc<dyn ContentLoader>>,
    resolver: Option<Box<dyn LocationResolver>>,
    delivery: Option<Box<dyn DeliveryQuery>>,
    runtime: Option<Handle>,
}

impl AssetRuntimeBuilder {
    pub fn new(params: InitializeParameters) -> Self {
        Self {
            params,
            loader: None,
            resolver: None,
            delivery: None,
            runtime: None,
        }
    }

    /// Defaults to [`BytesContentLoader`].
    pub fn with_loader(mut self, loader: impl ContentLoader) -> Self {
        self.loader = Some(Rc::new(loader));
        self
    }

    /// Defaults to [`AddressLocationResolver`].
    pub fn with_location_resolver(mut self, resolver: impl LocationResolver) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_delivery(mut self, delivery: impl DeliveryQuery) -> Self {
        self.delivery = Some(Box::new(delivery));
        self
    }

    /// Runtime for network and file tasks. Defaults to the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<AssetRuntime, RuntimeError> {
        let params = self.params.validated()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?,
        };
        let client = FerryClient::with_timeout(params.request_timeout)?;
        let operations = OperationSystem::new(params.operation_max_time_slice);
        let loader = self
            .loader
            .unwrap_or_else(|| Rc::new(BytesContentLoader));
        let assets = AssetSystem::new(loader, params.asset_loading_max_number);
        let resolver = self
            .resolver
            .unwrap_or_else(|| Box::new(AddressLocationResolver));

        info!(
            package = %params.package_name,
            mode = params.play_mode.name(),
            "Asset runtime created"
        );
        let context = PackageContext::new(params, client, runtime, resolver, self.delivery);
        Ok(AssetRuntime {
            context: Rc::new(context),
            operations,
            assets,
            destroyed: Cell::new(false),
        })
    }
}

/// One package's runtime: scheduler, downloads and loaded assets.
///
/// Everything lives on the thread that calls [`AssetRuntime::update`]. Only
/// network and file transfers run on the tokio runtime.
pub struct AssetRuntime {
    context: Rc<PackageContext>,
    operations: OperationSystem,
    assets: AssetSystem,
    destroyed: Cell<bool>,
}

impl AssetRuntime {
    pub fn builder(params: InitializeParameters) -> AssetRuntimeBuilder {
        AssetRuntimeBuilder::new(params)
    }

    pub fn package_name(&self) -> &str {
        self.context.package_name()
    }

    pub fn params(&self) -> &InitializeParameters {
        self.context.params()
    }

    pub fn context(&self) -> &Rc<PackageContext> {
        &self.context
    }

    pub fn operations(&self) -> &OperationSystem {
        &self.operations
    }

    pub fn assets(&self) -> &AssetSystem {
        &self.assets
    }

    /// One tick: operations, then downloads, then asset providers.
    pub fn update(&self) {
        if self.destroyed.get() {
            return;
        }
        self.operations.update();
        self.context.downloads().update();
        self.assets.update(&self.context);
    }

    fn start<T: AsyncOperation>(&self, operation: T) -> OperationHandle<T> {
        self.operations.start_operation(self.context.package_name(), operation)
    }

    pub fn initialize(&self) -> OperationHandle<InitializationOperation> {
        self.start(InitializationOperation::new(self.context.clone()))
    }

    pub fn update_package_version(&self) -> OperationHandle<UpdatePackageVersionOperation> {
        self.start(UpdatePackageVersionOperation::new(self.context.clone()))
    }

    pub fn update_manifest(&self, package_version: &str) -> OperationHandle<UpdateManifestOperation> {
        self.start(UpdateManifestOperation::new(self.context.clone(), package_version))
    }

    /// Loads the manifest of `package_version` next to the active one. Its
    /// downloaders fill the cache without switching versions.
    pub fn pre_download_content(&self, package_version: &str) -> OperationHandle<PreDownloadContentOperation> {
        self.start(PreDownloadContentOperation::new(self.context.clone(), package_version))
    }

    /// Version of the active manifest.
    pub fn package_version(&self) -> Option<String> {
        self.context
            .active_manifest()
            .map(|manifest| manifest.human_readable_version.clone())
    }

    fn downloader(&self, list: Vec<BundleInfo>, max: usize, try_again: usize) -> PackageDownloader {
        OperationHandle::new(DownloaderOperation::new(self.context.clone(), list, max, try_again))
    }

    /// Everything the active manifest lists that is not local yet.
    pub fn create_patch_downloader(
        &self,
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Result<PackageDownloader, RuntimeError> {
        let list = self.context.download_list_by_all()?;
        Ok(self.downloader(list, downloading_max_number, failed_try_again))
    }

    pub fn create_patch_downloader_by_tags<S: AsRef<str>>(
        &self,
        tags: &[S],
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Result<PackageDownloader, RuntimeError> {
        let list = self.context.download_list_by_tags(tags)?;
        Ok(self.downloader(list, downloading_max_number, failed_try_again))
    }

    /// Main and dependency bundles of the given locations.
    pub fn create_patch_downloader_by_locations<S: AsRef<str>>(
        &self,
        locations: &[S],
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Result<PackageDownloader, RuntimeError> {
        let list = self.context.download_list_by_locations(locations)?;
        Ok(self.downloader(list, downloading_max_number, failed_try_again))
    }

    /// Copies built-in bundles carrying one of `tags` into the cache.
    pub fn create_patch_unpacker<S: AsRef<str>>(
        &self,
        tags: &[S],
        unpacking_max_number: usize,
        failed_try_again: usize,
    ) -> PackageDownloader {
        let list = self.context.unpack_list_by_tags(tags);
        self.downloader(list, unpacking_max_number, failed_try_again)
    }

    /// Submits a downloader created by one of the `create_patch_*` methods.
    pub fn begin_download(&self, downloader: &PackageDownloader) {
        self.operations.start(self.context.package_name(), downloader);
    }

    fn create_provider(
        &self,
        location: &str,
        kind: ContentKind,
        asset_type: Option<&'static str>,
    ) -> Result<(SharedProvider, crate::assets::ProviderHandle), RuntimeError> {
        let asset = self.context.resolve_asset(location)?;
        self.assets.create_handle(&self.context, &asset, kind, asset_type)
    }

    pub fn load_asset_async<T: 'static>(&self, location: &str) -> Result<AssetHandle, RuntimeError> {
        let (_, handle) = self.create_provider(location, ContentKind::Asset, Some(std::any::type_name::<T>()))?;
        handle.into_asset().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    /// Loads on the calling thread. Fails if a bundle must be downloaded.
    pub fn load_asset_sync<T: 'static>(&self, location: &str) -> Result<AssetHandle, RuntimeError> {
        let (provider, handle) =
            self.create_provider(location, ContentKind::Asset, Some(std::any::type_name::<T>()))?;
        self.assets.wait_for_async_complete(&self.context, &provider);
        handle.into_asset().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    pub fn load_sub_assets_async<T: 'static>(&self, location: &str) -> Result<SubAssetsHandle, RuntimeError> {
        let (_, handle) =
            self.create_provider(location, ContentKind::SubAssets, Some(std::any::type_name::<T>()))?;
        handle.into_sub_assets().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    pub fn load_sub_assets_sync<T: 'static>(&self, location: &str) -> Result<SubAssetsHandle, RuntimeError> {
        let (provider, handle) =
            self.create_provider(location, ContentKind::SubAssets, Some(std::any::type_name::<T>()))?;
        self.assets.wait_for_async_complete(&self.context, &provider);
        handle.into_sub_assets().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    pub fn load_scene_async(&self, location: &str) -> Result<SceneHandle, RuntimeError> {
        let (_, handle) = self.create_provider(location, ContentKind::Scene, None)?;
        handle.into_scene().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    pub fn load_scene_sync(&self, location: &str) -> Result<SceneHandle, RuntimeError> {
        let (provider, handle) = self.create_provider(location, ContentKind::Scene, None)?;
        self.assets.wait_for_async_complete(&self.context, &provider);
        handle.into_scene().ok_or(RuntimeError::UnexpectedHandleKind)
    }

    /// Destroys providers whose load finished and whose handles were all
    /// released.
    pub fn unload_unused_assets(&self) -> usize {
        self.assets.unload_unused()
    }

    pub fn force_unload_all_assets(&self) {
        self.assets.force_unload_all();
    }

    pub fn clear_cache(&self, mode: ClearCacheMode) -> Result<ClearCacheHandle, RuntimeError> {
        Ok(match mode {
            ClearCacheMode::All => ClearCacheHandle::All(self.start(ClearAllCacheFilesOperation::new(
                self.context.layout().clone(),
                self.context.ledger().clone(),
            ))),
            ClearCacheMode::Unused => {
                let manifest = self.context.require_manifest()?;
                ClearCacheHandle::Unused(self.start(ClearUnusedCacheFilesOperation::new(
                    self.context.ledger().clone(),
                    manifest,
                )))
            }
        })
    }

    /// Makes a raw file bundle local, optionally copying it to `copy_path`.
    pub fn get_raw_file(
        &self,
        location: &str,
        copy_path: Option<PathBuf>,
    ) -> Result<OperationHandle<RawFileOperation>, RuntimeError> {
        let asset = self.context.resolve_asset(location)?;
        let manifest = self.context.require_manifest()?;
        let bundle = manifest.main_bundle(&asset);
        if !bundle.is_raw_file() {
            return Err(RuntimeError::NotRawFile(bundle.bundle_name.clone()));
        }

        let info = match &self.context.params().play_mode {
            PlayMode::EditorSimulate { asset_root, .. } => BundleInfo::local(
                bundle.clone(),
                LoadMode::FromEditor,
                asset_root.join(&asset.asset_path),
            ),
            _ => self.context.bundle_info(bundle),
        };
        Ok(self.start(RawFileOperation::new(self.context.clone(), info, copy_path)))
    }

    /// Load strategy of the main bundle of `location`.
    pub fn get_bundle_info(&self, location: &str) -> Result<BundleInfo, RuntimeError> {
        let asset = self.context.resolve_asset(location)?;
        let manifest = self.context.require_manifest()?;
        Ok(self.context.bundle_info(manifest.main_bundle(&asset)))
    }

    /// Any bundle of `location` still has to be downloaded.
    pub fn is_need_download_from_remote(&self, location: &str) -> Result<bool, RuntimeError> {
        let asset = self.context.resolve_asset(location)?;
        let manifest = self.context.require_manifest()?;
        Ok(manifest
            .required_bundles(&asset)
            .into_iter()
            .any(|bundle| self.context.bundle_info(bundle).requires_download()))
    }

    pub fn check_location_valid(&self, location: &str) -> bool {
        self.context.resolve_asset(location).is_ok()
    }

    pub fn asset_infos_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<AssetInfo>, RuntimeError> {
        let manifest = self.context.require_manifest()?;
        Ok(manifest
            .assets_by_tags(tags)
            .into_iter()
            .map(|asset: &PackageAsset| AssetInfo::new(asset, None))
            .collect())
    }

    /// Assets packed into the bundle of `bundle_info`.
    pub fn asset_infos_by_bundle(&self, bundle_info: &BundleInfo) -> Result<Vec<AssetInfo>, RuntimeError> {
        let manifest = self.context.require_manifest()?;
        Ok(manifest
            .assets_in_bundle(bundle_info.bundle_name())
            .into_iter()
            .map(|asset| AssetInfo::new(asset, None))
            .collect())
    }

    /// Aborts every operation and download, unloads every asset and forgets
    /// the ledger. Files on disk stay.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.operations.destroy();
        self.context.downloads().cancel_all();
        self.assets.force_unload_all();
        self.context.ledger().borrow_mut().clear_all();
        self.context.cancel_token().cancel();
        info!(package = self.context.package_name(), "Asset runtime destroyed");
    }
}

impl Drop for AssetRuntime {
    fn drop(&mut self) {
        self.destroy();
    }
}
