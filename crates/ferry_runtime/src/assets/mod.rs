//! Reference-counted loading.
//!
//! One [`Provider`] per asset path, requested type and content kind owns the
//! loaded object. Callers get handles; the provider is destroyed by an
//! unload pass once its load finished and the last handle was released.

mod handle;
mod info;
mod provider;
mod system;

pub use handle::{AssetHandle, ProviderHandle, SceneHandle, SubAssetsHandle};
pub use info::AssetInfo;
pub use provider::{CompletedLoad, Provider, ProviderStatus};
pub use system::AssetSystem;

pub(crate) use provider::SharedProvider;
