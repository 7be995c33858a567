use crate::bundle_info::LoadMode;
use crate::error::LoadError;

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// An in-memory content object produced by a [`ContentLoader`].
pub type ContentObject = Arc<dyn Any + Send + Sync>;

/// What a provider loads and therefore which handle type it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Asset,
    SubAssets,
    Scene,
}

#[derive(Clone)]
pub enum LoadedContent {
    Asset(ContentObject),
    SubAssets(Vec<ContentObject>),
    Scene(ContentObject),
}

impl std::fmt::Debug for LoadedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedContent::Asset(_) => f.write_str("Asset(..)"),
            LoadedContent::SubAssets(objects) => write!(f, "SubAssets({})", objects.len()),
            LoadedContent::Scene(_) => f.write_str("Scene(..)"),
        }
    }
}

/// Everything the content loader needs to turn local bytes into an object.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub asset_path: String,
    /// `std::any::type_name` of the requested type.
    pub asset_type: &'static str,
    pub kind: ContentKind,
    pub load_mode: LoadMode,
    /// Data file of the owning bundle, or the source asset file in editor
    /// simulation.
    pub bundle_path: PathBuf,
    pub dependency_paths: Vec<PathBuf>,
}

/// A load the content loader has started but may not have finished.
pub trait PendingLoad {
    /// Non-blocking; `None` while the load is still running.
    fn poll(&mut self) -> Option<Result<LoadedContent, LoadError>>;

    /// Block until the load finishes. Used by synchronous loads.
    fn wait(&mut self) -> Result<LoadedContent, LoadError>;
}

/// A load that finished at creation time.
pub struct ReadyLoad(Option<Result<LoadedContent, LoadError>>);

impl ReadyLoad {
    pub fn new(result: Result<LoadedContent, LoadError>) -> Self {
        Self(Some(result))
    }
}

impl PendingLoad for ReadyLoad {
    fn poll(&mut self) -> Option<Result<LoadedContent, LoadError>> {
        self.0.take()
    }

    fn wait(&mut self) -> Result<LoadedContent, LoadError> {
        self.0
            .take()
            .unwrap_or_else(|| Err(LoadError::Generic("load result already taken".into())))
    }
}

/// Turns a resolved local bundle file into a content object.
///
/// This is the seam to the engine; the runtime only decides which bundle
/// files must be present and where they live.
pub trait ContentLoader: 'static {
    fn load(&self, request: &LoadRequest) -> Box<dyn PendingLoad>;

    /// Called once when the owning provider is destroyed.
    fn unload(&self, _asset_path: &str, _content: &LoadedContent) {}
}

/// Reads the whole main bundle file into an `Arc<Vec<u8>>`.
///
/// Good enough for raw files and for tools that only move bytes around.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesContentLoader;

impl ContentLoader for BytesContentLoader {
    fn load(&self, request: &LoadRequest) -> Box<dyn PendingLoad> {
        let result = std::fs::read(&request.bundle_path)
            .map_err(|e| LoadError::NotFound(format!("{}: {e}", request.bundle_path.display())))
            .map(|bytes| {
                let object: ContentObject = Arc::new(bytes);
                match request.kind {
                    ContentKind::Asset => LoadedContent::Asset(object),
                    ContentKind::SubAssets => LoadedContent::SubAssets(vec![object]),
                    ContentKind::Scene => LoadedContent::Scene(object),
                }
            });
        Box::new(ReadyLoad::new(result))
    }
}

/// Maps a caller-facing location string to a source path the manifest knows.
pub trait LocationResolver: 'static {
    fn convert_location_to_asset_path(&self, location: &str) -> String;
}

impl<F> LocationResolver for F
where
    F: Fn(&str) -> String + 'static,
{
    fn convert_location_to_asset_path(&self, location: &str) -> String {
        self(location)
    }
}

/// Passes locations through unchanged. Addresses are resolved by the
/// manifest itself when addressable mode is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressLocationResolver;

impl LocationResolver for AddressLocationResolver {
    fn convert_location_to_asset_path(&self, location: &str) -> String {
        location.to_string()
    }
}

/// Prefixes every location with a fixed root e.g. "assets/".
#[derive(Debug, Clone)]
pub struct RootLocationResolver {
    root: String,
}

impl RootLocationResolver {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl LocationResolver for RootLocationResolver {
    fn convert_location_to_asset_path(&self, location: &str) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), location)
    }
}

/// Optional: bundles the developer ships outside of the normal channels.
pub trait DeliveryQuery: 'static {
    fn delivery_file_path(&self, package_name: &str, file_name: &str) -> Option<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolvers() {
        let root = RootLocationResolver::new("assets/");
        assert_eq!(root.convert_location_to_asset_path("ui/menu"), "assets/ui/menu");

        let lower = |location: &str| location.to_lowercase();
        assert_eq!(lower.convert_location_to_asset_path("UI/Menu"), "ui/menu");
    }

    #[test]
    fn ready_load_yields_once() {
        let mut load = ReadyLoad::new(Err(LoadError::NotFound("x".into())));
        assert!(matches!(load.poll(), Some(Err(LoadError::NotFound(_)))));
        assert!(load.poll().is_none());
    }
}
