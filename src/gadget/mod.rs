//! USB gadget object tree synchronised with ConfigFS
//!
//! This module mirrors the `usb_gadget` hierarchy of a ConfigFS mount as an
//! in-memory tree and keeps both sides in step:
//!
//! ```text
//! State (one mount point, enumerated UDCs)
//!     └── Gadget (device attributes, strings per language, UDC binding)
//!             ├── Function (<type>.<instance>)
//!             └── Config   (<label>.<id>, attributes, strings)
//!                     └── Binding (symlink → ../../functions/<type>.<instance>)
//! ```
//!
//! A [`State`] is built by scanning the filesystem. Every mutation goes
//! through [`State`] or a [`GadgetMut`] handle, which performs the filesystem
//! operation first and only then updates the tree, so a failed call leaves the
//! tree untouched.
//!
//! Iteration order is the name collation for gadgets, functions and configs,
//! and creation order for bindings.

pub mod attrs;
pub mod codec;
pub mod config;
pub mod configfs;
pub mod function;
pub mod gadget;
pub mod mutate;
pub mod scan;
pub mod state;

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

pub use attrs::{ConfigAttrs, GadgetAttr, GadgetAttrs, GadgetStrings, StringField, LANG_US_ENG};
pub use config::{Binding, Config, ConfigKey};
pub use function::{Function, FunctionKey, FunctionType};
pub use gadget::Gadget;
pub use mutate::GadgetMut;
pub use state::State;

/// Gadget subdirectory holding function groups
pub const FUNCTIONS_DIR: &str = "functions";

/// Gadget subdirectory holding config groups
pub const CONFIGS_DIR: &str = "configs";

/// Per-language string directory parent (gadgets and configs)
pub const STRINGS_DIR: &str = "strings";

/// UDC binding file of a gadget
pub const UDC_FILE: &str = "UDC";

/// Config attribute files
pub const CONFIG_MAX_POWER: &str = "MaxPower";
pub const CONFIG_BM_ATTRIBUTES: &str = "bmAttributes";

/// Config string file inside a language directory
pub const CONFIG_STRING_FILE: &str = "configuration";

/// Serialize the values of a keyed table as a sequence
fn serialize_values<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    V: Serialize,
    S: Serializer,
{
    serializer.collect_seq(map.values())
}
