use crate::context::PackageContext;
use crate::task::{BackgroundTask, Polled};
use bytes::Bytes;
use ferry_client::ClientError;
use ferry_core::manifest::PackageManifest;
use ferry_core::naming;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationHandle, OperationSystem};
use ferry_fs::integrity::bytes_sha256;
use ferry_fs::{VerifyCacheFilesOperation, VerifyElement, atomic_write};
use std::fs;
use std::rc::Rc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchSteps {
    LoadWebManifestHash,
    CheckWebManifestHash,
    LoadWebManifest,
    CheckWebManifest,
    Done,
}

/// Fetches the manifest of one package version from the hosts.
///
/// The hash file is fetched first. A sandbox copy with the same SHA-256 is
/// reused without downloading the manifest again; a downloaded manifest is
/// saved to the sandbox once it decodes.
pub(crate) struct ManifestFetch {
    steps: FetchSteps,
    context: Rc<PackageContext>,
    package_version: String,
    web_manifest_hash: String,
    text_request: Option<BackgroundTask<Result<String, ClientError>>>,
    bytes_request: Option<BackgroundTask<Result<Bytes, ClientError>>>,
}

impl ManifestFetch {
    pub(crate) fn new(context: Rc<PackageContext>, package_version: &str) -> Self {
        Self {
            steps: FetchSteps::LoadWebManifestHash,
            context,
            package_version: package_version.to_string(),
            web_manifest_hash: String::new(),
            text_request: None,
            bytes_request: None,
        }
    }

    fn finish(
        &mut self,
        result: Result<PackageManifest, String>,
    ) -> Option<Result<PackageManifest, String>> {
        self.steps = FetchSteps::Done;
        Some(result)
    }

    fn sandbox_manifest_hash(&self) -> Option<String> {
        let path = self.context.layout().sandbox_manifest_path(&self.package_version);
        fs::read(path).ok().map(|bytes| bytes_sha256(&bytes))
    }

    fn load_sandbox_manifest(&self) -> Result<PackageManifest, String> {
        let path = self.context.layout().sandbox_manifest_path(&self.package_version);
        let bytes = fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        PackageManifest::from_bytes(&bytes).map_err(|e| e.to_string())
    }

    fn save_sandbox_manifest(&self, bytes: &[u8]) {
        let layout = self.context.layout();
        let manifest_path = layout.sandbox_manifest_path(&self.package_version);
        let hash_path = layout.sandbox_hash_path(&self.package_version);
        let result = atomic_write(&manifest_path, bytes)
            .and_then(|_| atomic_write(&hash_path, self.web_manifest_hash.as_bytes()));
        if let Err(e) = result {
            warn!("Failed to save manifest to sandbox {}: {e}", manifest_path.display());
        }
    }

    /// Advances the fetch by one step. Yields the outcome exactly once.
    pub(crate) fn poll(&mut self) -> Option<Result<PackageManifest, String>> {
        if self.steps == FetchSteps::LoadWebManifestHash {
            if self.package_version.is_empty() {
                return self.finish(Err("Package version is empty".to_string()));
            }
            let file_name =
                naming::manifest_hash_file_name(self.context.package_name(), &self.package_version);
            let url = match self.context.next_request_url(&file_name) {
                Ok(url) => url,
                Err(e) => return self.finish(Err(e.to_string())),
            };
            let client = self.context.client().clone();
            self.text_request = Some(BackgroundTask::spawn(self.context.runtime(), async move {
                client.fetch_text(&url).await
            }));
            self.steps = FetchSteps::CheckWebManifestHash;
        }

        if self.steps == FetchSteps::CheckWebManifestHash {
            let request = self.text_request.as_mut()?;
            let result = match request.poll() {
                Polled::Pending => return None,
                Polled::Ready(result) => result.map_err(|e| e.to_string()),
                Polled::Lost => Err("Request task ended without a result".to_string()),
            };
            self.text_request = None;

            let hash = match result {
                Ok(text) => text.trim().to_lowercase(),
                Err(e) => return self.finish(Err(e)),
            };
            if hash.is_empty() {
                return self.finish(Err(format!("Web manifest hash is empty : {}", self.package_version)));
            }
            self.web_manifest_hash = hash;

            if self.sandbox_manifest_hash().as_deref() == Some(self.web_manifest_hash.as_str()) {
                info!("Package manifest hash not changed, loading sandbox manifest");
                match self.load_sandbox_manifest() {
                    Ok(manifest) => return self.finish(Ok(manifest)),
                    Err(e) => {
                        warn!("Failed to load sandbox manifest, downloading again : {e}");
                        self.steps = FetchSteps::LoadWebManifest;
                    }
                }
            } else {
                info!(
                    "Package manifest hash changed : {}",
                    self.web_manifest_hash
                );
                self.steps = FetchSteps::LoadWebManifest;
            }
        }

        if self.steps == FetchSteps::LoadWebManifest {
            let file_name =
                naming::manifest_file_name(self.context.package_name(), &self.package_version);
            let url = match self.context.next_request_url(&file_name) {
                Ok(url) => url,
                Err(e) => return self.finish(Err(e.to_string())),
            };
            let client = self.context.client().clone();
            self.bytes_request = Some(BackgroundTask::spawn(self.context.runtime(), async move {
                client.fetch_bytes(&url).await
            }));
            self.steps = FetchSteps::CheckWebManifest;
        }

        if self.steps == FetchSteps::CheckWebManifest {
            let request = self.bytes_request.as_mut()?;
            let result = match request.poll() {
                Polled::Pending => return None,
                Polled::Ready(result) => result.map_err(|e| e.to_string()),
                Polled::Lost => Err("Request task ended without a result".to_string()),
            };
            self.bytes_request = None;

            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => return self.finish(Err(e)),
            };
            let actual = bytes_sha256(&bytes);
            if actual != self.web_manifest_hash {
                return self.finish(Err(format!(
                    "Web manifest file hash mismatch : expected {} got {actual}",
                    self.web_manifest_hash
                )));
            }
            return match PackageManifest::from_bytes(&bytes) {
                Ok(manifest) => {
                    self.save_sandbox_manifest(&bytes);
                    self.finish(Ok(manifest))
                }
                Err(e) => self.finish(Err(format!("Failed to deserialize web manifest : {e}"))),
            };
        }

        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    FetchManifest,
    InitVerifyingCache,
    UpdateVerifyingCache,
    Done,
}

/// Installs the manifest of `package_version` as the active manifest.
///
/// The manifest is fetched as described on `ManifestFetch`. Afterwards cache
/// entries the ledger does not know yet are verified against the new
/// manifest.
///
/// A manifest that fails to decode leaves the previous one active.
pub struct UpdateManifestOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    package_version: String,
    fetch: Option<ManifestFetch>,
    verify: Option<OperationHandle<VerifyCacheFilesOperation>>,
}

impl UpdateManifestOperation {
    pub fn new(context: Rc<PackageContext>, package_version: impl Into<String>) -> Self {
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            package_version: package_version.into(),
            fetch: None,
            verify: None,
        }
    }

    pub fn package_version(&self) -> &str {
        &self.package_version
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.steps = Steps::Done;
        self.base.fail(error);
    }

    fn install(&mut self, manifest: PackageManifest) {
        if manifest.package_name != self.context.package_name() {
            warn!(
                "Manifest package name {} does not match {}",
                manifest.package_name,
                self.context.package_name()
            );
        }
        self.context.set_active_manifest(Rc::new(manifest));
        self.steps = Steps::InitVerifyingCache;
    }

    /// Data files on disk the ledger has not confirmed yet.
    fn verify_elements(&self) -> Vec<VerifyElement> {
        let Some(manifest) = self.context.active_manifest() else {
            return Vec::new();
        };
        let layout = self.context.layout();
        let ledger = self.context.ledger().borrow();
        manifest
            .bundle_list
            .iter()
            .filter(|bundle| !ledger.contains(&bundle.file_hash))
            .filter(|bundle| !self.context.is_buildin(bundle))
            .filter(|bundle| {
                layout
                    .data_file_path(&bundle.file_hash)
                    .is_ok_and(|path| path.exists())
            })
            .filter_map(|bundle| {
                VerifyElement::new(layout, &bundle.file_hash)
                    .ok()
                    .map(|element| element.with_expected(bundle.file_crc, bundle.file_size))
            })
            .collect()
    }
}

impl AsyncOperation for UpdateManifestOperation {
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
            // Nothing to update outside host mode.
            self.steps = Steps::Done;
            self.base.succeed();
        }
    }

    fn on_update(&mut self, system: &OperationSystem) {
        if self.steps == Steps::FetchManifest {
            let Some(fetch) = self.fetch.as_mut() else {
                return;
            };
            match fetch.poll() {
                None => return,
                Some(Ok(manifest)) => {
                    self.fetch = None;
                    self.install(manifest);
                }
                Some(Err(e)) => {
                    self.fetch = None;
                    self.fail(e);
                    return;
                }
            }
        }

        if self.steps == Steps::InitVerifyingCache {
            let elements = self.verify_elements();
            let operation = VerifyCacheFilesOperation::new(
                self.context.ledger().clone(),
                self.context.create_verifier(),
                elements,
            );
            self.verify = Some(system.start_operation(self.context.package_name(), operation));
            self.steps = Steps::UpdateVerifyingCache;
        }

        if self.steps == Steps::UpdateVerifyingCache {
            let Some(verify) = self.verify.as_ref() else {
                return;
            };
            self.base.set_progress(verify.progress());
            if verify.is_done() {
                self.steps = Steps::Done;
                self.base.succeed();
            }
        }
    }
}
