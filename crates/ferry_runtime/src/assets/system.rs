use super::handle::{AssetHandle, ProviderHandle, SceneHandle, SubAssetsHandle};
use super::info::AssetInfo;
use super::provider::{Provider, ProviderStatus, SharedProvider};
use crate::context::PackageContext;
use crate::error::RuntimeError;
use ferry_core::manifest::PackageAsset;
use ferry_core::traits::{ContentKind, ContentLoader};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::info;

/// Creates, ticks and destroys the providers of one package.
pub struct AssetSystem {
    loader: Rc<dyn ContentLoader>,
    loading_max_number: usize,
    providers: RefCell<Vec<SharedProvider>>,
    provider_map: RefCell<HashMap<String, SharedProvider>>,
    next_handle_id: Cell<u64>,
}

impl AssetSystem {
    pub fn new(loader: Rc<dyn ContentLoader>, loading_max_number: usize) -> Self {
        Self {
            loader,
            loading_max_number: loading_max_number.max(1),
            providers: RefCell::new(Vec::new()),
            provider_map: RefCell::new(HashMap::new()),
            next_handle_id: Cell::new(1),
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.borrow().len()
    }

    /// Reference count of the provider behind `guid`, if it exists.
    pub fn ref_count(&self, guid: &str) -> Option<i32> {
        self.provider_map
            .borrow()
            .get(guid)
            .map(|provider| provider.borrow().ref_count())
    }

    /// Returns the provider for `asset` as `kind`, creating it on first use,
    /// together with a new handle to it.
    pub(crate) fn create_handle(
        &self,
        context: &PackageContext,
        asset: &PackageAsset,
        kind: ContentKind,
        asset_type: Option<&'static str>,
    ) -> Result<(SharedProvider, ProviderHandle), RuntimeError> {
        let info = AssetInfo::new(asset, asset_type);
        let guid = info.provider_guid(kind);

        let existing = self.provider_map.borrow().get(&guid).cloned();
        let provider = match existing {
            Some(provider) => provider,
            None => {
                let manifest = context.require_manifest()?;
                let bundles = manifest
                    .required_bundles(asset)
                    .into_iter()
                    .cloned()
                    .collect();
                let provider = Rc::new(RefCell::new(Provider::new(guid.clone(), kind, info, bundles)));
                self.providers.borrow_mut().push(provider.clone());
                self.provider_map.borrow_mut().insert(guid, provider.clone());
                provider
            }
        };

        let id = self.next_handle_id.get();
        self.next_handle_id.set(id + 1);
        provider.borrow_mut().add_handle(id);

        // The provider's own kind decides the handle type.
        let handle = match provider.borrow().kind() {
            ContentKind::Asset => ProviderHandle::Asset(AssetHandle::new(id, &provider)),
            ContentKind::SubAssets => ProviderHandle::SubAssets(SubAssetsHandle::new(id, &provider)),
            ContentKind::Scene => ProviderHandle::Scene(SceneHandle::new(id, &provider)),
        };
        Ok((provider, handle))
    }

    pub fn update(&self, context: &PackageContext) {
        let providers: Vec<SharedProvider> = self.providers.borrow().clone();
        let mut loading = providers
            .iter()
            .filter(|provider| provider.borrow().status() == ProviderStatus::Checking)
            .count();

        for provider in &providers {
            {
                let mut guard = provider.borrow_mut();
                if guard.is_finished() {
                    continue;
                }
                let was_checking = guard.status() == ProviderStatus::Checking;
                guard.update(context, self.loader.as_ref(), loading < self.loading_max_number);
                if !was_checking && guard.status() == ProviderStatus::Checking {
                    loading += 1;
                }
            }
            finish(provider);
        }
    }

    /// Synchronous completion of one provider.
    pub(crate) fn wait_for_async_complete(&self, context: &PackageContext, provider: &SharedProvider) {
        provider
            .borrow_mut()
            .wait_for_async_complete(context, self.loader.as_ref());
        finish(provider);
    }

    /// Destroys every provider that finished loading and has no handle.
    pub fn unload_unused(&self) -> usize {
        let mut removed = Vec::new();
        self.providers.borrow_mut().retain(|provider| {
            if provider.borrow().can_destroy() {
                removed.push(provider.clone());
                false
            } else {
                true
            }
        });

        let mut provider_map = self.provider_map.borrow_mut();
        for provider in &removed {
            let mut provider = provider.borrow_mut();
            provider_map.remove(provider.guid());
            provider.destroy(self.loader.as_ref());
        }
        if !removed.is_empty() {
            info!("Unloaded unused providers count : {}", removed.len());
        }
        removed.len()
    }

    /// Destroys every provider regardless of reference count. Unfinished
    /// loads complete as failed first.
    pub fn force_unload_all(&self) {
        let providers: Vec<SharedProvider> = self.providers.borrow_mut().drain(..).collect();
        self.provider_map.borrow_mut().clear();
        for provider in &providers {
            provider.borrow_mut().abort();
            finish(provider);
            provider.borrow_mut().destroy(self.loader.as_ref());
        }
    }
}

/// Delivers completion of a finished provider. Listeners run outside the
/// provider borrow and are skipped for handles released meanwhile.
fn finish(provider: &SharedProvider) {
    let callbacks = provider.borrow_mut().take_completion();
    if callbacks.is_empty() {
        return;
    }
    let completed = provider.borrow().completed_load();
    for (handle_id, callback) in callbacks {
        if provider.borrow().tracks(handle_id) {
            callback(&completed);
        }
    }
}
