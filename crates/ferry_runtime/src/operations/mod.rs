//! Package level operations driven by the scheduler.

mod initialize;
mod manifest;
mod predownload;
mod raw_file;
mod version;

pub use initialize::InitializationOperation;
pub use manifest::UpdateManifestOperation;
pub use predownload::PreDownloadContentOperation;
pub use raw_file::RawFileOperation;
pub use version::UpdatePackageVersionOperation;
