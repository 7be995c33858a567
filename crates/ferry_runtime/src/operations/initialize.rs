use crate::context::PackageContext;
use crate::params::PlayMode;
use ferry_core::manifest::PackageManifest;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationHandle, OperationSystem};
use ferry_fs::{FindCacheFilesOperation, VerifyCacheFilesOperation};
use std::fs;
use std::rc::Rc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    LoadManifest,
    FindCacheFiles,
    CheckFindCacheFiles,
    VerifyCacheFiles,
    CheckVerifyCacheFiles,
    Done,
}

/// Boots a package for its play mode.
///
/// Editor simulation reads the manifest from disk and is done. Offline and
/// host modes load the built-in manifest (offline requires it), then scan
/// the cache directory and verify what they find.
pub struct InitializationOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    find: Option<OperationHandle<FindCacheFilesOperation>>,
    verify: Option<OperationHandle<VerifyCacheFilesOperation>>,
}

impl InitializationOperation {
    pub fn new(context: Rc<PackageContext>) -> Self {
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            find: None,
            verify: None,
        }
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.steps = Steps::Done;
        self.base.fail(error);
    }

    fn load_manifest(&mut self) -> Result<(), String> {
        match &self.context.params().play_mode {
            PlayMode::EditorSimulate { manifest_path, .. } => {
                let bytes = fs::read(manifest_path)
                    .map_err(|e| format!("Failed to read manifest {} : {e}", manifest_path.display()))?;
                let manifest = PackageManifest::from_bytes(&bytes).map_err(|e| e.to_string())?;
                self.context.set_active_manifest(Rc::new(manifest));
            }
            PlayMode::Offline => {
                let manifest = self
                    .context
                    .load_buildin_manifest()
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| {
                        format!(
                            "Not found built-in manifest of package {}",
                            self.context.package_name()
                        )
                    })?;
                let manifest = Rc::new(manifest);
                self.context.set_buildin_manifest(manifest.clone());
                self.context.set_active_manifest(manifest);
            }
            PlayMode::Host { .. } => match self.context.load_buildin_manifest() {
                Ok(Some(manifest)) => {
                    let manifest = Rc::new(manifest);
                    self.context.set_buildin_manifest(manifest.clone());
                    self.context.set_active_manifest(manifest);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load built-in manifest : {e}"),
            },
        }
        Ok(())
    }
}

impl AsyncOperation for InitializationOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        self.steps = Steps::LoadManifest;
    }

    fn on_update(&mut self, system: &OperationSystem) {
        if self.steps == Steps::LoadManifest {
            if let Err(e) = self.load_manifest() {
                self.fail(e);
                return;
            }
            if matches!(self.context.params().play_mode, PlayMode::EditorSimulate { .. }) {
                self.steps = Steps::Done;
                self.base.succeed();
                return;
            }
            self.steps = Steps::FindCacheFiles;
        }

        if self.steps == Steps::FindCacheFiles {
            let operation = FindCacheFilesOperation::new(
                self.context.layout().clone(),
                self.context.ledger().clone(),
            );
            self.find = Some(system.start_operation(self.context.package_name(), operation));
            self.steps = Steps::CheckFindCacheFiles;
        }

        if self.steps == Steps::CheckFindCacheFiles {
            let Some(find) = self.find.as_ref() else {
                return;
            };
            if !find.is_done() {
                return;
            }
            self.steps = Steps::VerifyCacheFiles;
        }

        if self.steps == Steps::VerifyCacheFiles {
            let elements = match self.find.take() {
                Some(find) => find.borrow_mut().take_elements(),
                None => Vec::new(),
            };
            let operation = VerifyCacheFilesOperation::new(
                self.context.ledger().clone(),
                self.context.create_verifier(),
                elements,
            );
            self.verify = Some(system.start_operation(self.context.package_name(), operation));
            self.steps = Steps::CheckVerifyCacheFiles;
        }

        if self.steps == Steps::CheckVerifyCacheFiles {
            let Some(verify) = self.verify.as_ref() else {
                return;
            };
            self.base.set_progress(verify.progress());
            if verify.is_done() {
                info!(
                    package = self.context.package_name(),
                    "Package initialized, cached files : {}",
                    self.context.ledger().borrow().len()
                );
                self.steps = Steps::Done;
                self.base.succeed();
            }
        }
    }
}
