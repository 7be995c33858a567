mod downloader;
mod operation;
mod system;

pub use downloader::{DownloaderSettings, FileDownloader};
pub use operation::{DownloadProgress, DownloaderOperation, MAX_LOADER_COUNT};
pub use system::{DownloadSystem, SharedDownloader};
