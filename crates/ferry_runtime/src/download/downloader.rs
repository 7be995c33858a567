use crate::error::DownloadError;
use crate::task::{BackgroundTask, Polled};
use ferry_client::{DownloadRequest, FerryClient};
use ferry_core::bundle_info::{BundleInfo, LoadMode};
use ferry_core::manifest::PackageBundle;
use ferry_core::operation::ABORT_ERROR;
use ferry_fs::{
    CacheInfo, CacheLayout, CacheRecord, FileFingerprint, SharedLedger, VerifyLevel, verify_file,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// What a downloader needs from its package, detached from the context so
/// the download system never owns the context.
#[derive(Clone)]
pub struct DownloaderSettings {
    pub layout: CacheLayout,
    pub ledger: SharedLedger,
    pub client: FerryClient,
    pub runtime: Handle,
    pub cancel: CancellationToken,
    pub breakpoint_resume_file_size: u64,
    pub verify_level: VerifyLevel,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CheckTempFile,
    CreateDownload,
    CheckDownload,
    TryAgain,
    Succeed,
    Failed,
}

#[derive(Debug, Clone)]
enum Source {
    Remote { url: String, resume_from: u64, verify_only: bool },
    Local(PathBuf),
}

/// Brings one bundle file into the cache, from a host or from a local copy.
///
/// Downloads land in a temp file, are checked for length and CRC (and the
/// SHA-256 under [`VerifyLevel::Strict`]) and only then move into the cache.
pub struct FileDownloader {
    info: BundleInfo,
    settings: DownloaderSettings,
    steps: Steps,
    failed_try_again: usize,
    attempt: usize,
    source: Option<Source>,
    temp_path: PathBuf,
    downloaded: Arc<AtomicU64>,
    task: Option<BackgroundTask<Result<CacheRecord, DownloadError>>>,
    retry_at: Instant,
    last_error: String,
}

impl FileDownloader {
    pub fn new(info: BundleInfo, settings: DownloaderSettings, failed_try_again: usize) -> Self {
        Self {
            info,
            settings,
            steps: Steps::None,
            failed_try_again,
            attempt: 0,
            source: None,
            temp_path: PathBuf::new(),
            downloaded: Arc::new(AtomicU64::new(0)),
            task: None,
            retry_at: Instant::now(),
            last_error: String::new(),
        }
    }

    pub fn start(&mut self) {
        if self.steps == Steps::None {
            self.steps = Steps::CheckTempFile;
        }
    }

    pub fn bundle_info(&self) -> &BundleInfo {
        &self.info
    }

    pub fn is_done(&self) -> bool {
        matches!(self.steps, Steps::Succeed | Steps::Failed)
    }

    pub fn has_error(&self) -> bool {
        self.steps == Steps::Failed
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Attempts started so far, including the first.
    pub fn attempts(&self) -> usize {
        self.attempt + usize::from(self.steps != Steps::None)
    }

    fn bundle(&self) -> &PackageBundle {
        &self.info.bundle
    }

    pub fn update(&mut self) {
        if self.steps == Steps::CheckTempFile {
            match self.settings.layout.temp_file_path(&self.info.bundle.file_hash) {
                Ok(temp_path) => self.temp_path = temp_path,
                Err(e) => {
                    self.fail_attempt(e.into());
                    return;
                }
            }
            self.source = Some(self.prepare_source());
            self.steps = Steps::CreateDownload;
        }

        if self.steps == Steps::CreateDownload {
            self.spawn_attempt();
            self.steps = Steps::CheckDownload;
        }

        if self.steps == Steps::CheckDownload {
            let Some(task) = self.task.as_mut() else {
                self.fail_attempt(DownloadError::TaskLost);
                return;
            };
            match task.poll() {
                Polled::Pending => {}
                Polled::Ready(Ok(record)) => {
                    self.task = None;
                    self.downloaded.store(self.bundle().file_size, Ordering::Relaxed);
                    self.settings
                        .ledger
                        .borrow_mut()
                        .record(&self.info.bundle.file_hash, record);
                    self.steps = Steps::Succeed;
                }
                Polled::Ready(Err(e)) => self.fail_attempt(e),
                Polled::Lost => self.fail_attempt(DownloadError::TaskLost),
            }
        }

        if self.steps == Steps::TryAgain && Instant::now() >= self.retry_at {
            self.attempt += 1;
            self.steps = Steps::CheckTempFile;
        }
    }

    /// Decides between resuming, re-verifying a complete partial file and
    /// starting from scratch.
    fn prepare_source(&self) -> Source {
        let temp_path = &self.temp_path;
        let expected = self.bundle().file_size;
        let partial = fs::metadata(temp_path).map(|m| m.len()).ok();

        if self.info.load_mode != LoadMode::FromRemote {
            remove_quietly(temp_path);
            return Source::Local(self.info.local_path.clone());
        }

        let url = if self.attempt % 2 == 0 {
            self.info.remote_main_url.clone()
        } else {
            self.info.remote_fallback_url.clone()
        };

        let (resume_from, verify_only) = match partial {
            Some(len) if len == expected && expected > 0 => (0, true),
            Some(len) if len > 0 && len < expected && expected >= self.settings.breakpoint_resume_file_size => {
                (len, false)
            }
            Some(_) => {
                remove_quietly(temp_path);
                (0, false)
            }
            None => (0, false),
        };
        Source::Remote {
            url,
            resume_from,
            verify_only,
        }
    }

    fn spawn_attempt(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let attempt = Attempt {
            source,
            client: self.settings.client.clone(),
            cancel: self.settings.cancel.clone(),
            layout: self.settings.layout.clone(),
            level: self.settings.verify_level,
            temp_path: self.temp_path.clone(),
            bundle: self.bundle().clone(),
            downloaded: self.downloaded.clone(),
        };
        self.task = Some(BackgroundTask::spawn(&self.settings.runtime, attempt.run()));
    }

    fn fail_attempt(&mut self, e: DownloadError) {
        self.task = None;
        self.last_error = e.to_string();

        if e.is_retryable() && self.failed_try_again > 0 {
            self.failed_try_again -= 1;
            warn!(
                bundle = %self.bundle().bundle_name,
                "Failed download, try again : {e}"
            );
            self.retry_at = Instant::now() + self.settings.retry_delay;
            self.steps = Steps::TryAgain;
            return;
        }

        let terminal = DownloadError::Terminal {
            bundle_name: self.bundle().bundle_name.clone(),
            attempts: self.attempt + 1,
            last_error: self.last_error.clone(),
        };
        error!("{terminal}");
        self.last_error = terminal.to_string();
        self.steps = Steps::Failed;
    }

    pub fn cancel(&mut self) {
        self.settings.cancel.cancel();
        if !self.is_done() {
            self.task = None;
            self.last_error = ABORT_ERROR.to_string();
            self.steps = Steps::Failed;
        }
    }
}

/// One transfer attempt. Only `Send` parts of the settings go along.
struct Attempt {
    source: Source,
    client: FerryClient,
    cancel: CancellationToken,
    layout: CacheLayout,
    level: VerifyLevel,
    temp_path: PathBuf,
    bundle: PackageBundle,
    downloaded: Arc<AtomicU64>,
}

impl Attempt {
    async fn run(self) -> Result<CacheRecord, DownloadError> {
        match self.source {
            Source::Remote {
                url,
                resume_from,
                verify_only,
            } => {
                if !verify_only {
                    let request = DownloadRequest {
                        url,
                        path: self.temp_path.clone(),
                        resume_from,
                    };
                    self.client
                        .download_to_file(request, self.downloaded.clone(), self.cancel.clone())
                        .await?;
                }
            }
            Source::Local(path) => {
                if let Some(parent) = self.temp_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let copied = tokio::fs::copy(&path, &self.temp_path).await?;
                self.downloaded.store(copied, Ordering::Relaxed);
            }
        }

        let Attempt {
            layout,
            bundle,
            temp_path,
            level,
            ..
        } = self;
        tokio::task::spawn_blocking(move || commit_verified(&layout, &bundle, &temp_path, level))
            .await
            .map_err(|_| DownloadError::TaskLost)?
    }
}

/// Downloads are always checked for length and CRC before they enter the
/// cache, whatever the boot verify level is.
fn commit_verified(
    layout: &CacheLayout,
    bundle: &PackageBundle,
    temp_path: &Path,
    level: VerifyLevel,
) -> Result<CacheRecord, DownloadError> {
    let result = verify_file(temp_path, &FileFingerprint::of_bundle(bundle), level.max(VerifyLevel::High));
    if !result.is_ok() {
        remove_quietly(temp_path);
        return Err(DownloadError::Integrity {
            bundle_name: bundle.bundle_name.clone(),
            result,
        });
    }

    let info = CacheInfo {
        crc: bundle.file_crc,
        size: bundle.file_size,
    };
    Ok(layout.commit(&bundle.file_hash, temp_path, info)?)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete temp file {}: {e}", path.display());
        }
    }
}
