use super::system::SharedDownloader;
use crate::context::PackageContext;
use ferry_core::bundle_info::BundleInfo;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationSystem};
use std::rc::Rc;
use tracing::info;

/// Hard ceiling of concurrent downloads per coordinator.
pub const MAX_LOADER_COUNT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadProgress {
    pub total_download_count: usize,
    pub current_download_count: usize,
    pub total_download_bytes: u64,
    pub current_download_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    Loading,
    Done,
}

type DownloadOverCallback = Box<dyn FnMut(bool)>;
type DownloadProgressCallback = Box<dyn FnMut(DownloadProgress)>;
type DownloadFileFailedCallback = Box<dyn FnMut(&str, &str)>;

/// Drives a batch of bundle downloads with bounded concurrency.
///
/// New downloaders are pulled from the end of the pending list, one per
/// tick, while fewer than the maximum are active. After the first failure
/// nothing new starts; the downloads already running finish, then the
/// operation fails with the first failed bundle's name.
///
/// When the scheduler aborts the operation, the downloaders only it holds
/// are cancelled and the over callback fires with `false`.
///
/// Callbacks run inside the scheduler tick and must not borrow the handle
/// of this operation.
pub struct DownloaderOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    downloading_max_number: usize,
    failed_try_again: usize,
    download_list: Vec<BundleInfo>,
    failed_list: Vec<(BundleInfo, String)>,
    downloaders: Vec<SharedDownloader>,
    last_download_bytes: u64,
    last_download_count: usize,
    total_download_count: usize,
    total_download_bytes: u64,
    current_download_count: usize,
    current_download_bytes: u64,
    on_download_over: Option<DownloadOverCallback>,
    on_download_progress: Option<DownloadProgressCallback>,
    on_download_file_failed: Option<DownloadFileFailedCallback>,
}

impl DownloaderOperation {
    pub fn new(
        context: Rc<PackageContext>,
        download_list: Vec<BundleInfo>,
        downloading_max_number: usize,
        failed_try_again: usize,
    ) -> Self {
        let total_download_bytes = download_list.iter().map(BundleInfo::size_bytes).sum();
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            downloading_max_number: downloading_max_number.clamp(1, MAX_LOADER_COUNT),
            failed_try_again,
            total_download_count: download_list.len(),
            total_download_bytes,
            download_list,
            failed_list: Vec::new(),
            downloaders: Vec::new(),
            last_download_bytes: 0,
            last_download_count: 0,
            current_download_count: 0,
            current_download_bytes: 0,
            on_download_over: None,
            on_download_progress: None,
            on_download_file_failed: None,
        }
    }

    pub fn total_download_count(&self) -> usize {
        self.total_download_count
    }

    pub fn total_download_bytes(&self) -> u64 {
        self.total_download_bytes
    }

    pub fn current_download_count(&self) -> usize {
        self.current_download_count
    }

    pub fn current_download_bytes(&self) -> u64 {
        self.current_download_bytes
    }

    /// Downloaders currently in flight.
    pub fn downloading_count(&self) -> usize {
        self.downloaders.len()
    }

    pub fn downloading_max_number(&self) -> usize {
        self.downloading_max_number
    }

    pub fn progress_snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            total_download_count: self.total_download_count,
            current_download_count: self.last_download_count,
            total_download_bytes: self.total_download_bytes,
            current_download_bytes: self.last_download_bytes,
        }
    }

    pub fn set_on_download_over(&mut self, callback: impl FnMut(bool) + 'static) {
        self.on_download_over = Some(Box::new(callback));
    }

    pub fn set_on_download_progress(&mut self, callback: impl FnMut(DownloadProgress) + 'static) {
        self.on_download_progress = Some(Box::new(callback));
    }

    /// Receives the bundle name and the error of the first failed download.
    pub fn set_on_download_file_failed(&mut self, callback: impl FnMut(&str, &str) + 'static) {
        self.on_download_file_failed = Some(Box::new(callback));
    }

    /// Stops the batch. Downloads already running keep going and still land
    /// in the cache.
    pub fn cancel_download(&mut self) {
        if self.steps != Steps::Done {
            self.steps = Steps::Done;
            self.base.fail("User cancel.");
            if let Some(callback) = self.on_download_over.as_mut() {
                callback(false);
            }
        }
    }

    fn fire_over(&mut self, succeed: bool) {
        if let Some(callback) = self.on_download_over.as_mut() {
            callback(succeed);
        }
    }

    fn update_loading(&mut self) {
        let mut finished = Vec::new();
        self.downloaders.retain(|downloader| {
            if downloader.borrow().is_done() {
                finished.push(downloader.clone());
                false
            } else {
                true
            }
        });
        for downloader in finished {
            let downloader = downloader.borrow();
            let info = downloader.bundle_info().clone();
            if downloader.has_error() {
                self.failed_list.push((info, downloader.last_error().to_string()));
            } else {
                self.current_download_count += 1;
                self.current_download_bytes += info.size_bytes();
            }
        }

        let in_flight: u64 = self
            .downloaders
            .iter()
            .map(|downloader| downloader.borrow().downloaded_bytes())
            .sum();
        let download_bytes = self.current_download_bytes + in_flight;
        if self.last_download_bytes != download_bytes
            || self.last_download_count != self.current_download_count
        {
            self.last_download_bytes = download_bytes;
            self.last_download_count = self.current_download_count;
            let progress = self.progress_snapshot();
            if let Some(callback) = self.on_download_progress.as_mut() {
                callback(progress);
            }
        }
        if self.total_download_bytes > 0 {
            self.base
                .set_progress(self.last_download_bytes as f32 / self.total_download_bytes as f32);
        }

        // Paused for good once anything failed.
        if !self.download_list.is_empty()
            && self.failed_list.is_empty()
            && self.downloaders.len() < self.downloading_max_number
        {
            if let Some(info) = self.download_list.pop() {
                let downloader =
                    self.context
                        .downloads()
                        .begin_download(&self.context, &info, self.failed_try_again);
                self.downloaders.push(downloader);
            }
        }

        if self.downloaders.is_empty() {
            self.steps = Steps::Done;
            if let Some((info, error)) = self.failed_list.first().cloned() {
                let bundle_name = info.bundle_name().to_string();
                self.base
                    .fail(format!("Failed to download file : {bundle_name}"));
                if let Some(callback) = self.on_download_file_failed.as_mut() {
                    callback(&bundle_name, &error);
                }
                self.fire_over(false);
            } else {
                self.base.succeed();
                self.fire_over(true);
            }
        }
    }
}

impl AsyncOperation for DownloaderOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        info!(
            "Begin to download : {} files and {} bytes",
            self.total_download_count, self.total_download_bytes
        );
        self.steps = Steps::Loading;
    }

    fn on_update(&mut self, _system: &OperationSystem) {
        if self.steps == Steps::Loading {
            self.update_loading();
        }
    }

    fn on_abort(&mut self) {
        if self.steps == Steps::Done {
            return;
        }
        self.steps = Steps::Done;
        for downloader in self.downloaders.drain(..) {
            // Held by the download system and us only. Joined downloads keep
            // running for their other consumers.
            if Rc::strong_count(&downloader) <= 2 {
                downloader.borrow_mut().cancel();
            }
        }
        info!("Downloader aborted : {} files left", self.download_list.len());
        self.fire_over(false);
    }
}
