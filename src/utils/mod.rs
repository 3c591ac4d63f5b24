//! Utility modules for usbg

pub mod path;

pub use path::{collate, normalize};
