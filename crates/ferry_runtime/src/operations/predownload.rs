use super::manifest::ManifestFetch;
use crate::context::PackageContext;
use crate::download::DownloaderOperation;
use crate::error::RuntimeError;
use crate::runtime::PackageDownloader;
use ferry_core::bundle_info::BundleInfo;
use ferry_core::manifest::PackageManifest;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationHandle, OperationSystem};
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    FetchManifest,
    Done,
}

/// Loads the manifest of another package version without installing it,
/// so its bundles can be downloaded before switching to it.
///
/// Downloads land in the shared cache; the active manifest is never
/// touched. Outside host mode the active manifest stands in and there is
/// nothing left to download.
pub struct PreDownloadContentOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    package_version: String,
    fetch: Option<ManifestFetch>,
    manifest: Option<Rc<PackageManifest>>,
}

impl PreDownloadContentOperation {
    pub fn new(context: Rc<PackageContext>, package_version: impl Into<String>) -> Self {
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            package_version: package_version.into(),
            fetch: None,
            manifest: None,
        }
    }

    pub fn package_version(&self) -> &str {
        &self.package_version
    }

    /// The loaded manifest, once the operation succeeded.
    pub fn manifest(&self) -> Option<&Rc<PackageManifest>> {
        self.manifest.as_ref()
    }

    fn require_manifest(&self) -> Result<&PackageManifest, RuntimeError> {
        self.manifest
            .as_deref()
            .ok_or_else(|| RuntimeError::ManifestNotLoaded(self.package_version.clone()))
    }

    fn downloader(&self, list: Vec<BundleInfo>, max: usize, try_again: usize) -> PackageDownloader {
        OperationHandle::new(DownloaderOperation::new(self.context.clone(), list, max, try_again))
    }

    /// Every bundle of the loaded version that is not local yet.
    pub fn create_patch_downloader(
        &self,
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Result<PackageDownloader, RuntimeError> {
        let manifest = self.require_manifest()?;
        let list = self.context.download_list_of(&manifest.bundle_list);
        Ok(self.downloader(list, downloading_max_number, failed_try_again))
    }

    pub fn create_patch_downloader_by_tags<S: AsRef<str>>(
        &self,
        tags: &[S],
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Result<PackageDownloader, RuntimeError> {
        let manifest = self.require_manifest()?;
        let list = self.context.download_list_of(manifest.bundles_by_tags(tags));
        Ok(self.downloader(list, downloading_max_number, failed_try_again))
    }
}

impl AsyncOperation for PreDownloadContentOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        if self.context.hosts().is_some() {
            self.fetch = Some(ManifestFetch::new(self.context.clone(), &self.package_version));
            self.steps = Steps::FetchManifest;
        } else {
            self.manifest = self.context.active_manifest();
            self.steps = Steps::Done;
            self.base.succeed();
        }
    }

    fn on_update(&mut self, _system: &OperationSystem) {
        if self.steps == Steps::FetchManifest {
            let Some(fetch) = self.fetch.as_mut() else {
                return;
            };
            let Some(result) = fetch.poll() else {
                return;
            };
            self.fetch = None;
            self.steps = Steps::Done;
            match result {
                Ok(manifest) => {
                    info!(
                        "Loaded manifest {} for pre-download : {} bundles",
                        self.package_version,
                        manifest.bundle_list.len()
                    );
                    self.manifest = Some(Rc::new(manifest));
                    self.base.succeed();
                }
                Err(e) => self.base.fail(e),
            }
        }
    }
}
