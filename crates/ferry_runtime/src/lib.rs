//! # Ferry Runtime
//!
//! Keeps one content package up to date and loads assets out of it.
//!
//! An [`AssetRuntime`] is ticked by the host once per frame. Each tick steps
//! the cooperative scheduler, then the active downloads, then the asset
//! providers. Network transfers and file hashing run on tokio and report
//! back without ever blocking the tick.
//!
//! ## Usage
//!
//! ```no_run
//! use ferry_runtime::{AssetRuntime, InitializeParameters, PlayMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tokio = tokio::runtime::Runtime::new()?;
//! let params = InitializeParameters {
//!     package_name: "DefaultPackage".into(),
//!     play_mode: PlayMode::Host {
//!         default_host: "http://127.0.0.1:8088/DefaultPackage".into(),
//!         fallback_host: "http://127.0.0.1:8088/DefaultPackage".into(),
//!     },
//!     ..Default::default()
//! };
//! let runtime = AssetRuntime::builder(params)
//!     .with_runtime(tokio.handle().clone())
//!     .build()?;
//!
//! let init = runtime.initialize();
//! while !init.is_done() {
//!     runtime.update();
//! }
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod context;
pub mod download;
pub mod error;
pub mod operations;
pub mod params;
pub mod runtime;
mod task;

pub use assets::{
    AssetHandle, AssetInfo, AssetSystem, CompletedLoad, ProviderHandle, ProviderStatus,
    SceneHandle, SubAssetsHandle,
};
pub use context::PackageContext;
pub use download::{DownloadProgress, DownloaderOperation, MAX_LOADER_COUNT};
pub use error::{DownloadError, RuntimeError};
pub use operations::{
    InitializationOperation, PreDownloadContentOperation, RawFileOperation,
    UpdateManifestOperation, UpdatePackageVersionOperation,
};
pub use params::{InitializeParameters, MIN_OPERATION_TIME_SLICE, PlayMode};
pub use runtime::{AssetRuntime, AssetRuntimeBuilder, ClearCacheHandle, ClearCacheMode, PackageDownloader};
