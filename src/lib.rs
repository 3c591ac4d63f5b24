//! usbg - USB gadget ConfigFS object tree
//!
//! This crate scans the Linux ConfigFS `usb_gadget` hierarchy into an
//! in-memory tree of gadgets, functions, configurations and bindings, and
//! offers operations that modify the filesystem and the tree together.

pub mod config;
pub mod error;
pub mod gadget;
pub mod storage;
pub mod utils;

pub use config::UsbgConfig;
pub use error::{ErrorKind, Result, UsbgError};
pub use gadget::{
    Binding, Config, ConfigAttrs, ConfigKey, Function, FunctionKey, FunctionType, Gadget,
    GadgetAttr, GadgetAttrs, GadgetMut, GadgetStrings, State, StringField, LANG_US_ENG,
};
pub use storage::{LocalStorage, MemoryStorage, Storage};
