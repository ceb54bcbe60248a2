pub mod check;
pub mod config;
pub mod errors;
pub mod git_scan;
pub mod pointer;
pub mod progress;
pub mod queue;
pub mod remote;
pub mod store;
pub mod upload;
pub mod uploaded;

pub use pointer::Pointer;
pub use upload::{PushReport, UploadContext};
pub use uploaded::UploadedSet;

/// Work descriptor handed to a [`queue::TransferQueue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Working-tree name the blob was referenced under.
    pub name: String,
    /// Location of the blob's bytes in the local object store.
    pub path: std::path::PathBuf,
    pub oid: String,
    pub size: u64,
}

impl Transfer {
    /// Descriptor used for existence checks, where no local bytes are involved.
    pub fn for_check(pointer: &Pointer) -> Self {
        Self {
            name: pointer.name.clone(),
            path: std::path::PathBuf::new(),
            oid: pointer.oid.clone(),
            size: pointer.size,
        }
    }
}
