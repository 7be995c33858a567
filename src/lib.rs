pub use ferry_core::*;

#[cfg(feature = "runtime")]
pub mod runtime {
    pub use ferry_runtime::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use ferry_server::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use ferry_client::*;
}

#[cfg(feature = "fs")]
pub mod fs {
    pub use ferry_fs::*;
}

pub mod prelude {
    pub use ferry_core::prelude::*;

    #[cfg(feature = "runtime")]
    pub use ferry_runtime::{
        AssetHandle, AssetRuntime, ClearCacheMode, InitializeParameters, PackageDownloader,
        PlayMode, ProviderStatus, SceneHandle, SubAssetsHandle,
    };

    #[cfg(feature = "server")]
    pub use ferry_server::PackageServer;

    #[cfg(feature = "client")]
    pub use ferry_client::FerryClient;

    #[cfg(feature = "fs")]
    pub use ferry_fs::{CacheLayout, CacheLedger, VerifyLevel};
}
