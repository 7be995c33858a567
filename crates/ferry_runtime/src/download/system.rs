use super::downloader::FileDownloader;
use crate::context::PackageContext;
use ferry_core::bundle_info::BundleInfo;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type SharedDownloader = Rc<RefCell<FileDownloader>>;

/// At most one downloader per content hash, ticked once per runtime tick.
#[derive(Default)]
pub struct DownloadSystem {
    downloaders: RefCell<HashMap<String, SharedDownloader>>,
}

impl DownloadSystem {
    /// Starts a download or joins the one already running for the same hash.
    pub fn begin_download(
        &self,
        context: &PackageContext,
        info: &BundleInfo,
        failed_try_again: usize,
    ) -> SharedDownloader {
        let mut downloaders = self.downloaders.borrow_mut();
        if let Some(existing) = downloaders.get(&info.bundle.file_hash) {
            return existing.clone();
        }

        let mut downloader =
            FileDownloader::new(info.clone(), context.downloader_settings(), failed_try_again);
        downloader.start();
        let downloader = Rc::new(RefCell::new(downloader));
        downloaders.insert(info.bundle.file_hash.clone(), downloader.clone());
        downloader
    }

    pub fn update(&self) {
        let active: Vec<SharedDownloader> = self.downloaders.borrow().values().cloned().collect();
        for downloader in &active {
            downloader.borrow_mut().update();
        }
        self.downloaders
            .borrow_mut()
            .retain(|_, downloader| !downloader.borrow().is_done());
    }

    pub fn len(&self) -> usize {
        self.downloaders.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_all(&self) {
        let downloaders: Vec<SharedDownloader> =
            self.downloaders.borrow_mut().drain().map(|(_, d)| d).collect();
        for downloader in downloaders {
            downloader.borrow_mut().cancel();
        }
    }
}
