use crate::context::PackageContext;
use crate::download::SharedDownloader;
use ferry_core::bundle_info::BundleInfo;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationSystem};
use ferry_fs::{FileFingerprint, VerifyLevel, verify_file};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    DownloadBundle,
    CheckDownload,
    CheckAndCopyFile,
    Done,
}

/// Makes a raw file bundle available on local disk.
///
/// Remote files go through the download system first. With a copy path
/// the file is copied there. An existing copy is kept only when it matches
/// the bundle's size and CRC.
pub struct RawFileOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    info: BundleInfo,
    copy_path: Option<PathBuf>,
    downloader: Option<SharedDownloader>,
    downloaded: bool,
    file_path: PathBuf,
}

impl RawFileOperation {
    pub fn new(context: Rc<PackageContext>, info: BundleInfo, copy_path: Option<PathBuf>) -> Self {
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            file_path: info.local_path.clone(),
            info,
            copy_path,
            downloader: None,
            downloaded: false,
        }
    }

    pub fn bundle_info(&self) -> &BundleInfo {
        &self.info
    }

    /// Where the file can be read once the operation succeeded.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_data(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.file_path)
    }

    pub fn file_text(&self) -> io::Result<String> {
        fs::read_to_string(&self.file_path)
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.steps = Steps::Done;
        self.base.fail(error);
    }

    fn copy_file(&self, copy_path: &Path) -> io::Result<()> {
        if copy_path.exists() {
            let fingerprint = FileFingerprint::of_bundle(&self.info.bundle);
            if !self.downloaded && verify_file(copy_path, &fingerprint, VerifyLevel::High).is_ok() {
                return Ok(());
            }
            fs::remove_file(copy_path)?;
        }
        if let Some(parent) = copy_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.file_path, copy_path)?;
        Ok(())
    }
}

impl AsyncOperation for RawFileOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        if !self.info.bundle.is_raw_file() {
            self.fail(format!("Bundle is not a raw file : {}", self.info.bundle_name()));
            return;
        }
        self.steps = if self.info.requires_download() {
            Steps::DownloadBundle
        } else {
            Steps::CheckAndCopyFile
        };
    }

    fn on_update(&mut self, _system: &OperationSystem) {
        if self.steps == Steps::DownloadBundle {
            let downloader = self.context.downloads().begin_download(
                &self.context,
                &self.info,
                self.context.params().download_failed_try_again,
            );
            self.downloader = Some(downloader);
            self.steps = Steps::CheckDownload;
        }

        if self.steps == Steps::CheckDownload {
            let Some(downloader) = self.downloader.as_ref() else {
                return;
            };
            let (done, error) = {
                let downloader = downloader.borrow();
                let bytes = downloader.downloaded_bytes();
                if self.info.size_bytes() > 0 {
                    self.base
                        .set_progress(bytes as f32 / self.info.size_bytes() as f32);
                }
                (
                    downloader.is_done(),
                    downloader.has_error().then(|| downloader.last_error().to_string()),
                )
            };
            if !done {
                return;
            }
            self.downloader = None;
            if let Some(error) = error {
                self.fail(error);
                return;
            }
            self.downloaded = true;
            match self.context.layout().data_file_path(&self.info.bundle.file_hash) {
                Ok(path) => self.file_path = path,
                Err(e) => {
                    self.fail(e.to_string());
                    return;
                }
            }
            self.steps = Steps::CheckAndCopyFile;
        }

        if self.steps == Steps::CheckAndCopyFile {
            if let Some(copy_path) = self.copy_path.clone() {
                if let Err(e) = self.copy_file(&copy_path) {
                    self.fail(format!("Failed to copy raw file to {} : {e}", copy_path.display()));
                    return;
                }
                self.file_path = copy_path;
            }
            if !self.file_path.exists() {
                self.fail(format!("Raw file not found : {}", self.file_path.display()));
                return;
            }
            self.steps = Steps::Done;
            self.base.succeed();
        }
    }
}
