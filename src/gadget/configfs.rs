//! ConfigFS file operations for USB Gadget
//!
//! Thin wrappers pairing a [`Storage`] call with error classification and
//! logging, plus the leaf file codecs for typed reads and writes.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::codec::{decode_dec, decode_hex, decode_str, encode_dec, encode_hex, encode_str};
use crate::error::{ErrorKind, Result, UsbgError};
use crate::storage::{DirEntry, Storage};

/// Read string content from a file
pub fn read_file(fs: &dyn Storage, path: &Path) -> Result<String> {
    trace!("Reading {}", path.display());
    fs.read_to_string(path)
        .map_err(|e| UsbgError::from_io(path, e))
}

/// Write content to a file in a single write
pub fn write_file(fs: &dyn Storage, path: &Path, content: &str) -> Result<()> {
    debug!("Writing {:?} to {}", content, path.display());
    fs.write_str(path, content)
        .map_err(|e| UsbgError::from_io(path, e))
}

/// Create directory
pub fn create_dir(fs: &dyn Storage, path: &Path) -> Result<()> {
    debug!("Creating directory {}", path.display());
    fs.create_dir(path).map_err(|e| UsbgError::from_io(path, e))
}

/// Create directory, treating an existing one as success
pub fn ensure_dir(fs: &dyn Storage, path: &Path) -> Result<()> {
    match create_dir(fs, path) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Remove directory
pub fn remove_dir(fs: &dyn Storage, path: &Path) -> Result<()> {
    debug!("Removing directory {}", path.display());
    fs.remove_dir(path).map_err(|e| UsbgError::from_io(path, e))
}

/// Remove file or symlink
pub fn remove_file(fs: &dyn Storage, path: &Path) -> Result<()> {
    debug!("Removing {}", path.display());
    fs.remove_file(path).map_err(|e| UsbgError::from_io(path, e))
}

/// Create symlink
pub fn create_symlink(fs: &dyn Storage, target: &Path, link: &Path) -> Result<()> {
    debug!("Linking {} -> {}", link.display(), target.display());
    fs.symlink(target, link)
        .map_err(|e| UsbgError::from_io(link, e))
}

/// List a directory with entry types
pub fn list_dir(fs: &dyn Storage, path: &Path) -> Result<Vec<DirEntry>> {
    trace!("Listing {}", path.display());
    fs.read_dir(path).map_err(|e| UsbgError::from_io(path, e))
}

/// Read symlink target
pub fn read_link(fs: &dyn Storage, path: &Path) -> Result<PathBuf> {
    fs.read_link(path).map_err(|e| UsbgError::from_io(path, e))
}

/// Read a hex attribute no larger than `max`
pub fn read_hex(fs: &dyn Storage, path: &Path, max: u32) -> Result<u32> {
    let content = read_file(fs, path)?;
    decode_hex(&content, max)
        .ok_or_else(|| UsbgError::parse(path, format!("expected hex value, got {:?}", content)))
}

pub fn write_hex(fs: &dyn Storage, path: &Path, value: u32, digits: usize) -> Result<()> {
    write_file(fs, path, &encode_hex(value, digits))
}

/// Read a decimal attribute no larger than `max`
pub fn read_dec(fs: &dyn Storage, path: &Path, max: u32) -> Result<u32> {
    let content = read_file(fs, path)?;
    decode_dec(&content, max).ok_or_else(|| {
        UsbgError::parse(path, format!("expected decimal value, got {:?}", content))
    })
}

pub fn write_dec(fs: &dyn Storage, path: &Path, value: u32) -> Result<()> {
    write_file(fs, path, &encode_dec(value))
}

pub fn read_string(fs: &dyn Storage, path: &Path) -> Result<String> {
    read_file(fs, path).map(|content| decode_str(&content))
}

pub fn write_string(fs: &dyn Storage, path: &Path, value: &str) -> Result<()> {
    write_file(fs, path, &encode_str(value))
}
