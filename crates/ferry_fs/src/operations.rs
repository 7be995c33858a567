use crate::layout::CacheLayout;
use crate::ledger::SharedLedger;
use crate::verifier::{AsyncVerifier, VerifyElement};
use ferry_core::manifest::PackageManifest;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationSystem};
use std::rc::Rc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifySteps {
    None,
    InitVerify,
    UpdateVerify,
    Done,
}

/// Verifies cache entries and records the survivors in the ledger.
///
/// Entries that fail are deleted from disk so a corrupt file is never
/// reused. Results that arrive after an abort are dropped.
pub struct VerifyCacheFilesOperation {
    base: OperationBase,
    steps: VerifySteps,
    ledger: SharedLedger,
    verifier: Box<dyn AsyncVerifier>,
    waiting: Vec<VerifyElement>,
    verifying: usize,
    capacity: usize,
    total: usize,
    succeed_count: usize,
    failed_count: usize,
    started_at: Instant,
}

impl VerifyCacheFilesOperation {
    pub fn new(
        ledger: SharedLedger,
        verifier: Box<dyn AsyncVerifier>,
        elements: Vec<VerifyElement>,
    ) -> Self {
        Self {
            base: OperationBase::default(),
            steps: VerifySteps::None,
            ledger,
            verifier,
            waiting: elements,
            verifying: 0,
            capacity: 1,
            total: 0,
            succeed_count: 0,
            failed_count: 0,
            started_at: Instant::now(),
        }
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    pub fn succeed_count(&self) -> usize {
        self.succeed_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.succeed_count + self.failed_count) as f32 / self.total as f32
    }

    fn collect_results(&mut self) {
        for element in self.verifier.drain() {
            self.verifying = self.verifying.saturating_sub(1);
            if self.base.is_done() {
                continue;
            }

            match element.record() {
                Some(record) => {
                    self.succeed_count += 1;
                    self.ledger.borrow_mut().record(&element.file_hash, record);
                }
                None => {
                    self.failed_count += 1;
                    warn!(
                        "Failed verify file and delete files : {} ({:?})",
                        element.file_root.display(),
                        element.result
                    );
                    element.delete_files();
                }
            }
        }
    }
}

impl AsyncOperation for VerifyCacheFilesOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        self.steps = VerifySteps::InitVerify;
        self.started_at = Instant::now();
    }

    fn on_update(&mut self, system: &OperationSystem) {
        if self.steps == VerifySteps::InitVerify {
            self.total = self.waiting.len();
            self.capacity = self.verifier.capacity().max(1);
            self.steps = VerifySteps::UpdateVerify;
        }

        if self.steps == VerifySteps::UpdateVerify {
            self.collect_results();

            while self.verifying < self.capacity {
                let Some(element) = self.waiting.pop() else {
                    break;
                };
                self.verifier.dispatch(element);
                self.verifying += 1;
                if system.is_busy() {
                    break;
                }
            }

            self.collect_results();
            self.base.set_progress(self.progress());

            if self.waiting.is_empty() && self.verifying == 0 {
                self.steps = VerifySteps::Done;
                self.base.succeed();
                info!(
                    succeed = self.succeed_count,
                    failed = self.failed_count,
                    "Verify cache files elapsed time {:.1} seconds",
                    self.started_at.elapsed().as_secs_f32()
                );
            }
        }
    }

    fn on_abort(&mut self) {
        self.steps = VerifySteps::Done;
        self.waiting.clear();
    }
}

/// Scans the package cache directory for entries the ledger does not know.
pub struct FindCacheFilesOperation {
    base: OperationBase,
    layout: CacheLayout,
    ledger: SharedLedger,
    walker: Option<walkdir::IntoIter>,
    elements: Vec<VerifyElement>,
}

impl FindCacheFilesOperation {
    pub fn new(layout: CacheLayout, ledger: SharedLedger) -> Self {
        Self {
            base: OperationBase::default(),
            layout,
            ledger,
            walker: None,
            elements: Vec::new(),
        }
    }

    /// Elements found, ready for [`VerifyCacheFilesOperation`].
    pub fn take_elements(&mut self) -> Vec<VerifyElement> {
        std::mem::take(&mut self.elements)
    }
}

impl AsyncOperation for FindCacheFilesOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        let root = self.layout.cache_files_root();
        if root.is_dir() {
            // {prefix}/{hash} directories only.
            self.walker = Some(walkdir::WalkDir::new(root).min_depth(2).max_depth(2).into_iter());
        }
    }

    fn on_update(&mut self, system: &OperationSystem) {
        let Some(walker) = self.walker.as_mut() else {
            self.base.succeed();
            return;
        };

        loop {
            match walker.next() {
                Some(Ok(entry)) => {
                    if entry.file_type().is_dir() {
                        let file_hash = entry.file_name().to_string_lossy();
                        if !self.ledger.borrow().contains(&file_hash) {
                            match VerifyElement::new(&self.layout, &file_hash) {
                                Ok(element) => self.elements.push(element),
                                Err(e) => warn!("Skipping cache directory {}: {e}", entry.path().display()),
                            }
                        }
                    }
                }
                Some(Err(e)) => warn!("Failed to scan cache directory: {e}"),
                None => {
                    info!(
                        package = self.layout.package_name(),
                        "Found cache files count : {}",
                        self.elements.len()
                    );
                    self.walker = None;
                    self.base.succeed();
                    return;
                }
            }

            if system.is_busy() {
                return;
            }
        }
    }
}

/// Purges ledger entries the given manifest no longer references.
pub struct ClearUnusedCacheFilesOperation {
    base: OperationBase,
    ledger: SharedLedger,
    manifest: Rc<PackageManifest>,
    unused: Vec<String>,
    total: usize,
    cleared: usize,
}

impl ClearUnusedCacheFilesOperation {
    pub fn new(ledger: SharedLedger, manifest: Rc<PackageManifest>) -> Self {
        Self {
            base: OperationBase::default(),
            ledger,
            manifest,
            unused: Vec::new(),
            total: 0,
            cleared: 0,
        }
    }

    pub fn cleared_count(&self) -> usize {
        self.cleared
    }
}

impl AsyncOperation for ClearUnusedCacheFilesOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        self.unused = self
            .ledger
            .borrow()
            .hashes()
            .filter(|hash| !self.manifest.contains_hash(hash))
            .map(str::to_string)
            .collect();
        self.total = self.unused.len();
    }

    fn on_update(&mut self, system: &OperationSystem) {
        while let Some(hash) = self.unused.pop() {
            match self.ledger.borrow_mut().purge(&hash) {
                Ok(_) => self.cleared += 1,
                Err(e) => warn!("Failed to delete cache file {hash}: {e}"),
            }
            if system.is_busy() {
                break;
            }
        }

        if self.total > 0 {
            let remaining = self.unused.len() as f32 / self.total as f32;
            self.base.set_progress(1.0 - remaining);
        }

        if self.unused.is_empty() {
            info!("Cleared unused cache files count : {}", self.cleared);
            self.base.succeed();
        }
    }
}

/// Drops every ledger entry and deletes the package cache directory.
pub struct ClearAllCacheFilesOperation {
    base: OperationBase,
    layout: CacheLayout,
    ledger: SharedLedger,
}

impl ClearAllCacheFilesOperation {
    pub fn new(layout: CacheLayout, ledger: SharedLedger) -> Self {
        Self {
            base: OperationBase::default(),
            layout,
            ledger,
        }
    }
}

impl AsyncOperation for ClearAllCacheFilesOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {}

    fn on_update(&mut self, _system: &OperationSystem) {
        let count = {
            let mut ledger = self.ledger.borrow_mut();
            let count = ledger.len();
            ledger.clear_all();
            count
        };

        match self.layout.delete_cache_files() {
            Ok(()) => {
                info!("Cleared all cache files count : {count}");
                self.base.succeed();
            }
            Err(e) => self.base.fail(e.to_string()),
        }
    }
}
