//! In-memory storage with optional ConfigFS group emulation
//!
//! In ConfigFS the kernel, not userspace, creates attribute files and default
//! groups: `mkdir usb_gadget/g1` makes `idVendor`, `UDC`, `functions/`,
//! `configs/`, `strings/` and friends appear. [`MemoryStorage::configfs`]
//! reproduces that behaviour closely enough to exercise the scanner and the
//! mutation engine without a kernel:
//!
//! - gadget groups get the eight device attributes, an empty `UDC` and the
//!   `functions`, `configs` and `strings` default groups
//! - config groups get `MaxPower`, `bmAttributes` and a `strings` default group
//! - language groups get their string attribute files
//! - default groups cannot be removed directly; a group can be removed when it
//!   holds only attribute files and default groups
//! - attribute files can be written but neither created nor removed

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{DirEntry, EntryKind, Storage};
use crate::utils::path::normalize;

/// Device attribute files created with every gadget group
const GADGET_ATTR_FILES: &[(&str, &str)] = &[
    ("bcdUSB", "0x0000\n"),
    ("bDeviceClass", "0x00\n"),
    ("bDeviceSubClass", "0x00\n"),
    ("bDeviceProtocol", "0x00\n"),
    ("bMaxPacketSize0", "0x00\n"),
    ("idVendor", "0x0000\n"),
    ("idProduct", "0x0000\n"),
    ("bcdDevice", "0x0000\n"),
    ("UDC", "\n"),
];

const CONFIG_ATTR_FILES: &[(&str, &str)] = &[("MaxPower", "0\n"), ("bmAttributes", "0x80\n")];

const GADGET_STRING_FILES: &[&str] = &["serialnumber", "manufacturer", "product"];

const CONFIG_STRING_FILES: &[&str] = &["configuration"];

#[derive(Debug, Clone)]
enum Node {
    /// `default` marks kernel-created groups
    Dir { default: bool },
    File(String),
    Symlink(PathBuf),
}

static ROOT: Node = Node::Dir { default: true };

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<PathBuf, Node>,
    failures: HashMap<PathBuf, i32>,
}

impl Inner {
    fn children(&self, dir: &Path) -> Vec<(PathBuf, Node)> {
        self.descendants(dir)
            .into_iter()
            .filter(|(p, _)| p.parent() == Some(dir))
            .collect()
    }

    fn descendants(&self, dir: &Path) -> Vec<(PathBuf, Node)> {
        self.nodes
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(|(p, _)| p.starts_with(dir))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect()
    }

    fn get(&self, path: &Path) -> Option<&Node> {
        if path == Path::new("/") {
            return Some(&ROOT);
        }
        self.nodes.get(path)
    }

    fn require_dir(&self, path: &Path) -> io::Result<()> {
        match self.get(path) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(errno(libc::ENOTDIR)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn require_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => self.require_dir(parent),
            None => Err(errno(libc::EINVAL)),
        }
    }

    fn take_failure(&mut self, path: &Path) -> io::Result<()> {
        match self.failures.remove(path) {
            Some(code) => Err(errno(code)),
            None => Ok(()),
        }
    }

    fn add_files(&mut self, dir: &Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            self.nodes
                .insert(dir.join(name), Node::File((*content).to_string()));
        }
    }

    fn add_default_dir(&mut self, path: PathBuf) {
        self.nodes.insert(path, Node::Dir { default: true });
    }
}

/// In-memory [`Storage`] implementation
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    configfs: bool,
}

impl MemoryStorage {
    /// Plain in-memory tree, no ConfigFS emulation
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory tree emulating ConfigFS group semantics
    pub fn configfs() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            configfs: true,
        }
    }

    /// Create a directory and all of its missing parents
    pub fn mkdir_all(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        let mut inner = self.inner.lock();
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            if ancestor == Path::new("/") || ancestor.as_os_str().is_empty() {
                continue;
            }
            inner
                .nodes
                .entry(ancestor.to_path_buf())
                .or_insert(Node::Dir { default: false });
        }
    }

    /// Put a file in place, bypassing ConfigFS rules
    pub fn put_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = normalize(path.as_ref());
        if let Some(parent) = path.parent() {
            self.mkdir_all(parent);
        }
        self.inner
            .lock()
            .nodes
            .insert(path, Node::File(content.to_string()));
    }

    /// Put a symlink in place, bypassing ConfigFS rules
    pub fn put_symlink(&self, link: impl AsRef<Path>, target: impl AsRef<Path>) {
        let link = normalize(link.as_ref());
        if let Some(parent) = link.parent() {
            self.mkdir_all(parent);
        }
        self.inner
            .lock()
            .nodes
            .insert(link, Node::Symlink(target.as_ref().to_path_buf()));
    }

    /// Content of a file, if it exists
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.inner.lock().get(&normalize(path.as_ref())) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    /// Target of a symlink, if it exists
    pub fn link(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        match self.inner.lock().get(&normalize(path.as_ref())) {
            Some(Node::Symlink(target)) => Some(target.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(
            self.inner.lock().get(&normalize(path.as_ref())),
            Some(Node::Dir { .. })
        )
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().get(&normalize(path.as_ref())).is_some()
    }

    /// Make the next operation on `path` fail with `code`
    pub fn fail_next(&self, path: impl AsRef<Path>, code: i32) {
        self.inner
            .lock()
            .failures
            .insert(normalize(path.as_ref()), code);
    }

    /// Populate the kernel-created content of a freshly made group
    fn populate_group(&self, inner: &mut Inner, path: &Path) {
        let parent_name = path.parent().and_then(file_name);
        let grandparent = path.parent().and_then(Path::parent);

        match parent_name {
            Some("usb_gadget") => {
                inner.add_files(path, GADGET_ATTR_FILES);
                for group in ["functions", "configs", "strings"] {
                    inner.add_default_dir(path.join(group));
                }
            }
            Some("configs") if grandparent.map(is_gadget_dir).unwrap_or(false) => {
                inner.add_files(path, CONFIG_ATTR_FILES);
                inner.add_default_dir(path.join("strings"));
            }
            Some("strings") => {
                let Some(owner) = grandparent else { return };
                let files = if is_gadget_dir(owner) {
                    GADGET_STRING_FILES
                } else if is_config_dir(owner) {
                    CONFIG_STRING_FILES
                } else {
                    return;
                };
                for name in files {
                    inner
                        .nodes
                        .insert(path.join(name), Node::File("\n".to_string()));
                }
            }
            _ => {}
        }
    }

    /// Whether the subtree under `dir` only holds kernel-created content
    fn removable(&self, inner: &Inner, dir: &Path) -> bool {
        inner.descendants(dir).iter().all(|(_, node)| match node {
            Node::File(_) => self.configfs,
            Node::Dir { default } => self.configfs && *default,
            Node::Symlink(_) => false,
        })
    }
}

impl Storage for MemoryStorage {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        match inner.get(&path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir { .. }) => Err(errno(libc::EISDIR)),
            Some(Node::Symlink(_)) => Err(errno(libc::EINVAL)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn write_str(&self, path: &Path, content: &str) -> io::Result<()> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        inner.require_parent(&path)?;
        match inner.get(&path) {
            Some(Node::File(_)) => {}
            Some(Node::Dir { .. }) => return Err(errno(libc::EISDIR)),
            Some(Node::Symlink(_)) => return Err(errno(libc::EINVAL)),
            None if self.configfs => return Err(errno(libc::ENOENT)),
            None => {}
        }
        inner.nodes.insert(path, Node::File(content.to_string()));
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        inner.require_parent(&path)?;
        if inner.get(&path).is_some() {
            return Err(errno(libc::EEXIST));
        }
        inner
            .nodes
            .insert(path.clone(), Node::Dir { default: false });
        if self.configfs {
            self.populate_group(&mut inner, &path);
        }
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        match inner.get(&path) {
            Some(Node::Dir { default: true }) if self.configfs => {
                return Err(errno(libc::EPERM))
            }
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(errno(libc::ENOTDIR)),
            None => return Err(errno(libc::ENOENT)),
        }
        if !self.removable(&inner, &path) {
            return Err(errno(libc::ENOTEMPTY));
        }
        for (child, _) in inner.descendants(&path) {
            inner.nodes.remove(&child);
        }
        inner.nodes.remove(&path);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        match inner.get(&path) {
            Some(Node::Symlink(_)) => {}
            Some(Node::File(_)) if self.configfs => return Err(errno(libc::EPERM)),
            Some(Node::File(_)) => {}
            Some(Node::Dir { .. }) => return Err(errno(libc::EISDIR)),
            None => return Err(errno(libc::ENOENT)),
        }
        inner.nodes.remove(&path);
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let link = normalize(link);
        let mut inner = self.inner.lock();
        inner.take_failure(&link)?;
        inner.require_parent(&link)?;
        if inner.get(&link).is_some() {
            return Err(errno(libc::EEXIST));
        }
        inner
            .nodes
            .insert(link, Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        inner.require_dir(&path)?;

        let mut entries: Vec<DirEntry> = inner
            .children(&path)
            .into_iter()
            .filter_map(|(child, node)| {
                let name = file_name(&child)?.to_string();
                let kind = match node {
                    Node::Dir { .. } => EntryKind::Dir,
                    Node::File(_) => EntryKind::File,
                    Node::Symlink(_) => EntryKind::Symlink,
                };
                Some(DirEntry::new(name, kind))
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        inner.take_failure(&path)?;
        match inner.get(&path) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(errno(libc::EINVAL)),
            None => Err(errno(libc::ENOENT)),
        }
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn is_gadget_dir(path: &Path) -> bool {
    path.parent().and_then(file_name) == Some("usb_gadget")
}

fn is_config_dir(path: &Path) -> bool {
    path.parent().and_then(file_name) == Some("configs")
        && path.parent().and_then(Path::parent).map(is_gadget_dir) == Some(true)
}
