use super::provider::{CompletedLoad, Provider, ProviderStatus, downcast};
use ferry_core::error::ConsistencyError;
use ferry_core::traits::LoadedContent;
use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Shared part of every handle: an id and a lookup-only link to the
/// provider.
struct HandleBase {
    id: u64,
    provider: Weak<RefCell<Provider>>,
}

impl HandleBase {
    fn provider(&self) -> Option<Rc<RefCell<Provider>>> {
        self.provider.upgrade()
    }

    fn is_valid(&self) -> bool {
        self.provider()
            .is_some_and(|provider| provider.borrow().tracks(self.id))
    }

    fn status(&self) -> ProviderStatus {
        self.provider()
            .map_or(ProviderStatus::None, |provider| provider.borrow().status())
    }

    fn last_error(&self) -> String {
        self.provider()
            .map(|provider| provider.borrow().last_error().to_string())
            .unwrap_or_default()
    }

    fn progress(&self) -> f32 {
        self.provider()
            .map_or(0.0, |provider| provider.borrow().progress())
    }

    fn content(&self) -> Option<LoadedContent> {
        let provider = self.provider()?;
        let provider = provider.borrow();
        if !provider.tracks(self.id) {
            return None;
        }
        provider.content().cloned()
    }

    fn release(&self) -> Result<(), ConsistencyError> {
        let provider = self
            .provider()
            .ok_or(ConsistencyError::ProviderDestroyed(self.id))?;
        let mut provider = provider.borrow_mut();
        if provider.is_destroyed() {
            return Err(ConsistencyError::ProviderDestroyed(self.id));
        }
        provider.release_handle(self.id)
    }

    fn on_completed(&self, callback: impl FnOnce(&CompletedLoad) + 'static) {
        let Some(provider) = self.provider() else {
            return;
        };
        if provider.borrow().is_finished() {
            let completed = provider.borrow().completed_load();
            callback(&completed);
            return;
        }
        provider
            .borrow_mut()
            .add_callback(self.id, Box::new(callback));
    }

    fn task(&self) -> impl Future<Output = ProviderStatus> + 'static {
        let provider = self.provider();
        let (status, receiver) = match &provider {
            Some(provider) => {
                let mut provider = provider.borrow_mut();
                (provider.status(), provider.add_waiter())
            }
            None => (ProviderStatus::Fail, None),
        };
        async move {
            match receiver {
                Some(receiver) => receiver.await.unwrap_or(ProviderStatus::Fail),
                None => status,
            }
        }
    }
}

macro_rules! handle_common {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(id: u64, provider: &Rc<RefCell<Provider>>) -> Self {
                Self {
                    base: HandleBase {
                        id,
                        provider: Rc::downgrade(provider),
                    },
                }
            }

            pub fn id(&self) -> u64 {
                self.base.id
            }

            /// Still tracked by a live provider.
            pub fn is_valid(&self) -> bool {
                self.base.is_valid()
            }

            pub fn status(&self) -> ProviderStatus {
                self.base.status()
            }

            pub fn is_done(&self) -> bool {
                self.base.status().is_done()
            }

            pub fn last_error(&self) -> String {
                self.base.last_error()
            }

            pub fn progress(&self) -> f32 {
                self.base.progress()
            }

            /// Runs once the load finished, or right away if it already has.
            /// Skipped when this handle was released in the meantime.
            pub fn on_completed(&self, callback: impl FnOnce(&CompletedLoad) + 'static) {
                self.base.on_completed(callback)
            }

            /// Resolves with the terminal status of the load.
            pub fn task(&self) -> impl Future<Output = ProviderStatus> + 'static {
                self.base.task()
            }

            /// Gives the reference back to the provider. Releasing twice, or
            /// after the provider was force-unloaded, is reported.
            pub fn release(&self) -> Result<(), ConsistencyError> {
                self.base.release()
            }
        }
    };
}

pub struct AssetHandle {
    base: HandleBase,
}

handle_common!(AssetHandle);

impl AssetHandle {
    pub fn asset<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.base.content()? {
            LoadedContent::Asset(object) => downcast(&object),
            _ => None,
        }
    }
}

pub struct SubAssetsHandle {
    base: HandleBase,
}

handle_common!(SubAssetsHandle);

impl SubAssetsHandle {
    /// Every sub object of type `T`, in loader order.
    pub fn sub_assets<T: Send + Sync + 'static>(&self) -> Vec<Arc<T>> {
        match self.base.content() {
            Some(LoadedContent::SubAssets(objects)) => objects.iter().filter_map(downcast::<T>).collect(),
            _ => Vec::new(),
        }
    }
}

pub struct SceneHandle {
    base: HandleBase,
}

handle_common!(SceneHandle);

impl SceneHandle {
    pub fn scene<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.base.content()? {
            LoadedContent::Scene(object) => downcast(&object),
            _ => None,
        }
    }
}

/// A handle as created by a provider, typed by the provider's content kind.
pub enum ProviderHandle {
    Asset(AssetHandle),
    SubAssets(SubAssetsHandle),
    Scene(SceneHandle),
}

impl ProviderHandle {
    pub fn release(&self) -> Result<(), ConsistencyError> {
        match self {
            ProviderHandle::Asset(handle) => handle.release(),
            ProviderHandle::SubAssets(handle) => handle.release(),
            ProviderHandle::Scene(handle) => handle.release(),
        }
    }

    pub fn into_asset(self) -> Option<AssetHandle> {
        match self {
            ProviderHandle::Asset(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_sub_assets(self) -> Option<SubAssetsHandle> {
        match self {
            ProviderHandle::SubAssets(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_scene(self) -> Option<SceneHandle> {
        match self {
            ProviderHandle::Scene(handle) => Some(handle),
            _ => None,
        }
    }
}
