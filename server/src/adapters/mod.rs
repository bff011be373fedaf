//! Adapters that connect the engine's store traits to the outside world.

mod files;
mod http_store;

pub use files::FsAttachments;
pub use http_store::HttpStore;
