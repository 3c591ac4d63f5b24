//! Lexical path helpers
//!
//! None of these touch the filesystem: ConfigFS symlink targets are resolved
//! by comparing normalised paths, and entity names are ordered with a
//! collation that treats runs of `/` as a single separator.

use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, UsbgError};

/// Lexically normalise a path
///
/// Removes `.` components, folds `..` into the preceding component and
/// collapses repeated separators. A leading `..` on a relative path is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    out.iter().collect()
}

/// Resolve a symlink target relative to the directory holding the link
pub fn resolve_link(link_dir: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        normalize(target)
    } else {
        normalize(&link_dir.join(target))
    }
}

/// Compare two names byte-wise, treating runs of `/` as one separator
pub fn collate(a: &str, b: &str) -> Ordering {
    let mut a = a.bytes().peekable();
    let mut b = b.bytes().peekable();

    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                if x == b'/' {
                    while a.peek() == Some(&b'/') {
                        a.next();
                    }
                    while b.peek() == Some(&b'/') {
                        b.next();
                    }
                }
            }
        }
    }
}

/// Join `name` onto `base`, rejecting results longer than `max_len` bytes
pub fn bounded_join(base: &Path, name: &str, max_len: usize) -> Result<PathBuf> {
    let path = base.join(name);
    check_len(&path, max_len)?;
    Ok(path)
}

/// Reject paths longer than `max_len` bytes
pub fn check_len(path: &Path, max_len: usize) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= max_len {
        return Err(UsbgError::InvalidParam(format!(
            "Path too long ({} >= {}): {}",
            len,
            max_len,
            path.display()
        )));
    }
    Ok(())
}
