//! Filesystem capability consumed by the gadget tree
//!
//! The scanner and the mutation engine never call `std::fs` directly. They go
//! through [`Storage`], which exposes exactly the primitives ConfigFS needs:
//! reading and writing attribute files, creating and removing groups
//! (directories), creating and reading symlinks, and listing directories with
//! entry types.
//!
//! ```text
//! State / GadgetMut
//!     └── dyn Storage
//!             ├── LocalStorage   (real mount, std::fs)
//!             └── MemoryStorage  (in-memory ConfigFS double)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Type of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// A single directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Storage primitives used to mirror the object tree
///
/// Every call is a single blocking operation; no handle outlives the call.
/// Errors are plain [`io::Error`]s and are classified by the caller with
/// [`UsbgError::from_io`](crate::error::UsbgError::from_io).
pub trait Storage: Send + Sync {
    /// Read the whole content of a file
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the content of a file with `content` in a single write
    fn write_str(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Create one directory (the parent must exist)
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or symlink
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create a symlink at `link` pointing to `target`
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// List directory entries, sorted by name
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read the target of a symlink
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
}
