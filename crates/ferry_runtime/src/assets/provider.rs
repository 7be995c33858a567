use super::info::AssetInfo;
use crate::context::PackageContext;
use crate::download::SharedDownloader;
use crate::params::PlayMode;
use ferry_core::bundle_info::BundleInfo;
use ferry_core::error::{ConsistencyError, LoadError};
use ferry_core::manifest::PackageBundle;
use ferry_core::traits::{
    ContentKind, ContentLoader, ContentObject, LoadRequest, LoadedContent, PendingLoad,
};
use futures::channel::oneshot;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderStatus {
    #[default]
    None,
    CheckBundle,
    Loading,
    Checking,
    Success,
    Fail,
}

impl ProviderStatus {
    pub fn is_done(self) -> bool {
        matches!(self, ProviderStatus::Success | ProviderStatus::Fail)
    }
}

/// What completion listeners receive.
#[derive(Debug, Clone)]
pub struct CompletedLoad {
    pub asset_path: String,
    pub status: ProviderStatus,
    pub error: String,
    pub content: Option<LoadedContent>,
}

impl CompletedLoad {
    pub fn is_succeed(&self) -> bool {
        self.status == ProviderStatus::Success
    }

    pub fn asset<T: Send + Sync + 'static>(&self) -> Option<std::sync::Arc<T>> {
        match &self.content {
            Some(LoadedContent::Asset(object)) | Some(LoadedContent::Scene(object)) => {
                downcast(object)
            }
            _ => None,
        }
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(object: &ContentObject) -> Option<std::sync::Arc<T>> {
    object.clone().downcast::<T>().ok()
}

pub(crate) type CompletedCallback = Box<dyn FnOnce(&CompletedLoad)>;
pub(crate) type SharedProvider = Rc<RefCell<Provider>>;

/// Owner of one loaded asset, shared by every handle requesting the same
/// asset path, type and content kind.
///
/// Handles are tracked by id. The provider outlives its handles only until
/// the next unload pass after the load finished and the last handle was
/// released.
pub struct Provider {
    guid: String,
    kind: ContentKind,
    info: AssetInfo,
    /// Main bundle first, then dependencies.
    bundles: Vec<PackageBundle>,
    status: ProviderStatus,
    last_error: String,
    progress: f32,
    ref_count: i32,
    handle_ids: Vec<u64>,
    downloaders: Vec<SharedDownloader>,
    pending: Option<Box<dyn PendingLoad>>,
    content: Option<LoadedContent>,
    callbacks: Vec<(u64, CompletedCallback)>,
    waiters: Vec<oneshot::Sender<ProviderStatus>>,
    finished: bool,
    destroyed: bool,
}

impl Provider {
    pub(crate) fn new(
        guid: String,
        kind: ContentKind,
        info: AssetInfo,
        bundles: Vec<PackageBundle>,
    ) -> Self {
        Self {
            guid,
            kind,
            info,
            bundles,
            status: ProviderStatus::None,
            last_error: String::new(),
            progress: 0.0,
            ref_count: 0,
            handle_ids: Vec::new(),
            downloaders: Vec::new(),
            pending: None,
            content: None,
            callbacks: Vec::new(),
            waiters: Vec::new(),
            finished: false,
            destroyed: false,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn asset_info(&self) -> &AssetInfo {
        &self.info
    }

    pub fn status(&self) -> ProviderStatus {
        self.status
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn content(&self) -> Option<&LoadedContent> {
        self.content.as_ref()
    }

    /// Never while loading, never while a handle is out.
    pub fn can_destroy(&self) -> bool {
        self.is_done() && self.ref_count <= 0
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn tracks(&self, handle_id: u64) -> bool {
        !self.destroyed && self.handle_ids.contains(&handle_id)
    }

    pub(crate) fn add_handle(&mut self, handle_id: u64) {
        self.ref_count += 1;
        self.handle_ids.push(handle_id);
    }

    pub(crate) fn release_handle(&mut self, handle_id: u64) -> Result<(), ConsistencyError> {
        if self.ref_count <= 0 {
            warn!(
                "Provider {} reference count is already zero, there may be resource leaks",
                self.guid
            );
            return Err(ConsistencyError::ReferenceCountUnderflow(self.guid.clone()));
        }
        let Some(index) = self.handle_ids.iter().position(|&id| id == handle_id) else {
            return Err(ConsistencyError::UntrackedHandle(handle_id));
        };
        self.handle_ids.swap_remove(index);
        self.ref_count -= 1;
        Ok(())
    }

    pub(crate) fn add_callback(&mut self, handle_id: u64, callback: CompletedCallback) {
        self.callbacks.push((handle_id, callback));
    }

    pub(crate) fn add_waiter(&mut self) -> Option<oneshot::Receiver<ProviderStatus>> {
        if self.finished {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        self.waiters.push(sender);
        Some(receiver)
    }

    pub(crate) fn completed_load(&self) -> CompletedLoad {
        CompletedLoad {
            asset_path: self.info.asset_path.clone(),
            status: self.status,
            error: self.last_error.clone(),
            content: self.content.clone(),
        }
    }

    /// Marks the provider finished, resolves waiters and hands back the
    /// callbacks. Empty on every call after the first.
    pub(crate) fn take_completion(&mut self) -> Vec<(u64, CompletedCallback)> {
        if self.finished || !self.is_done() {
            return Vec::new();
        }
        self.finished = true;
        self.progress = 1.0;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(self.status);
        }
        std::mem::take(&mut self.callbacks)
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.pending = None;
        self.downloaders.clear();
        self.last_error = error.into();
        self.status = ProviderStatus::Fail;
        warn!("Failed to load {} : {}", self.guid, self.last_error);
    }

    fn bundle_infos(&self, context: &PackageContext) -> Vec<BundleInfo> {
        self.bundles
            .iter()
            .map(|bundle| context.bundle_info(bundle))
            .collect()
    }

    fn load_request(&self, context: &PackageContext) -> Option<LoadRequest> {
        let mut infos = self.bundle_infos(context).into_iter();
        let main = infos.next()?;
        let bundle_path = match &context.params().play_mode {
            PlayMode::EditorSimulate { asset_root, .. } => asset_root.join(&self.info.asset_path),
            _ => main.local_path.clone(),
        };
        Some(LoadRequest {
            asset_path: self.info.asset_path.clone(),
            asset_type: self.info.asset_type.unwrap_or("null"),
            kind: self.kind,
            load_mode: main.load_mode,
            bundle_path,
            dependency_paths: infos.map(|info| info.local_path).collect(),
        })
    }

    /// One step of the async load. `may_load` is the loading slot granted by
    /// the asset system.
    pub(crate) fn update(&mut self, context: &PackageContext, loader: &dyn ContentLoader, may_load: bool) {
        if self.destroyed || self.is_done() {
            return;
        }

        if self.status == ProviderStatus::None {
            self.status = ProviderStatus::CheckBundle;
            for info in self.bundle_infos(context) {
                if info.requires_download() {
                    let downloader = context.downloads().begin_download(
                        context,
                        &info,
                        context.params().download_failed_try_again,
                    );
                    self.downloaders.push(downloader);
                }
            }
        }

        if self.status == ProviderStatus::CheckBundle {
            if !self.check_downloads() {
                return;
            }
            self.status = ProviderStatus::Loading;
        }

        if self.status == ProviderStatus::Loading {
            if !may_load {
                return;
            }
            self.start_load(context, loader);
        }

        if self.status == ProviderStatus::Checking {
            let Some(pending) = self.pending.as_mut() else {
                self.fail("Content load lost");
                return;
            };
            if let Some(result) = pending.poll() {
                self.pending = None;
                self.accept(result);
            }
        }
    }

    /// Runs the load to completion on the calling thread. Fails instead of
    /// waiting when a bundle is only available remotely.
    pub(crate) fn wait_for_async_complete(&mut self, context: &PackageContext, loader: &dyn ContentLoader) {
        if self.destroyed || self.is_done() {
            return;
        }

        if matches!(self.status, ProviderStatus::None | ProviderStatus::CheckBundle) {
            self.downloaders.clear();
            if let Some(info) = self
                .bundle_infos(context)
                .into_iter()
                .find(BundleInfo::requires_download)
            {
                self.fail(format!(
                    "Cannot load synchronously, bundle must be downloaded first : {}",
                    info.bundle_name()
                ));
                return;
            }
            self.status = ProviderStatus::Loading;
        }

        if self.status == ProviderStatus::Loading {
            self.start_load(context, loader);
        }

        if self.status == ProviderStatus::Checking {
            let result = match self.pending.as_mut() {
                Some(pending) => pending.wait(),
                None => Err(LoadError::Generic("content load lost".into())),
            };
            self.pending = None;
            self.accept(result);
        }
    }

    /// True once every download finished. Fails the provider on the first
    /// failed download.
    fn check_downloads(&mut self) -> bool {
        let mut total = 0u64;
        let mut current = 0u64;
        let mut failed = None;
        let mut all_done = true;
        for downloader in &self.downloaders {
            let downloader = downloader.borrow();
            total += downloader.bundle_info().size_bytes();
            current += downloader.downloaded_bytes();
            if !downloader.is_done() {
                all_done = false;
            } else if downloader.has_error() && failed.is_none() {
                failed = Some(format!(
                    "Failed to download bundle : {} : {}",
                    downloader.bundle_info().bundle_name(),
                    downloader.last_error()
                ));
            }
        }
        if total > 0 {
            self.progress = current as f32 / total as f32;
        }
        if !all_done {
            return false;
        }
        if let Some(error) = failed {
            self.fail(error);
            return false;
        }
        self.downloaders.clear();
        true
    }

    fn start_load(&mut self, context: &PackageContext, loader: &dyn ContentLoader) {
        match self.load_request(context) {
            Some(request) => {
                self.pending = Some(loader.load(&request));
                self.status = ProviderStatus::Checking;
            }
            None => self.fail(format!("Asset has no bundle : {}", self.info.asset_path)),
        }
    }

    fn accept(&mut self, result: Result<LoadedContent, LoadError>) {
        match result {
            Ok(content) if content_kind(&content) == self.kind => {
                self.content = Some(content);
                self.status = ProviderStatus::Success;
            }
            Ok(_) => self.fail(
                LoadError::TypeMismatch {
                    path: self.info.asset_path.clone(),
                    expected: format!("{:?}", self.kind),
                }
                .to_string(),
            ),
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Aborts an unfinished load. Completion still has to be delivered.
    pub(crate) fn abort(&mut self) {
        if !self.is_done() {
            self.fail(ferry_core::operation::ABORT_ERROR);
        }
    }

    pub(crate) fn destroy(&mut self, loader: &dyn ContentLoader) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pending = None;
        self.downloaders.clear();
        if let Some(content) = self.content.take() {
            loader.unload(&self.info.asset_path, &content);
        }
    }
}

fn content_kind(content: &LoadedContent) -> ContentKind {
    match content {
        LoadedContent::Asset(_) => ContentKind::Asset,
        LoadedContent::SubAssets(_) => ContentKind::SubAssets,
        LoadedContent::Scene(_) => ContentKind::Scene,
    }
}
