pub mod bundle_info;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod operation;
pub mod traits;

pub mod prelude {
    pub use super::bundle_info::*;
    pub use super::error::*;
    pub use super::manifest::*;
    pub use super::naming::*;
    pub use super::operation::*;
    pub use super::traits::*;
}
