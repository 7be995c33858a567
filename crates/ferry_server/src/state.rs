use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Directory holding one or more published packages.
    pub root: Arc<PathBuf>,
}
