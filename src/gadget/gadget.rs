//! Gadget entity and read-only lookups

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::attrs::{GadgetAttr, GadgetAttrs, GadgetStrings};
use super::codec::encode_lang;
use super::config::{Binding, Config, ConfigKey};
use super::function::{validate_component, Function, FunctionKey, FunctionType};
use super::{serialize_values, CONFIGS_DIR, FUNCTIONS_DIR, STRINGS_DIR, UDC_FILE};
use crate::error::Result;
use crate::utils::path::bounded_join;

/// A USB gadget: device descriptor, strings, functions and configurations
#[derive(Debug, Clone, Serialize)]
pub struct Gadget {
    name: String,
    path: PathBuf,
    pub(crate) attrs: GadgetAttrs,
    pub(crate) strings: BTreeMap<u16, GadgetStrings>,
    /// Language directory names as found on disk
    #[serde(skip)]
    pub(crate) lang_dirs: BTreeMap<u16, String>,
    pub(crate) udc: Option<String>,
    #[serde(serialize_with = "serialize_values")]
    pub(crate) functions: BTreeMap<FunctionKey, Function>,
    #[serde(serialize_with = "serialize_values")]
    pub(crate) configs: BTreeMap<ConfigKey, Config>,
}

impl Gadget {
    /// Empty gadget living in the gadget container
    pub(crate) fn new(name: &str, container: &Path, max_path_len: usize) -> Result<Self> {
        validate_component(name, "gadget name")?;
        let path = bounded_join(container, name, max_path_len)?;

        // Children are joined onto these; reject up front rather than mid-scan
        bounded_join(&path, FUNCTIONS_DIR, max_path_len)?;
        bounded_join(&path, CONFIGS_DIR, max_path_len)?;

        Ok(Self {
            name: name.to_string(),
            path,
            attrs: GadgetAttrs::default(),
            strings: BTreeMap::new(),
            lang_dirs: BTreeMap::new(),
            udc: None,
            functions: BTreeMap::new(),
            configs: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attrs(&self) -> &GadgetAttrs {
        &self.attrs
    }

    pub fn attr(&self, attr: GadgetAttr) -> u32 {
        self.attrs.get(attr)
    }

    /// Strings for a language id
    pub fn strings(&self, lang: u16) -> Option<&GadgetStrings> {
        self.strings.get(&lang)
    }

    /// Language ids with strings defined, ascending
    pub fn langs(&self) -> impl Iterator<Item = u16> + '_ {
        self.strings.keys().copied()
    }

    /// Bound UDC name, if the gadget is enabled
    pub fn udc(&self) -> Option<&str> {
        self.udc.as_deref()
    }

    /// Functions sorted by name
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function(&self, ftype: FunctionType, instance: &str) -> Option<&Function> {
        self.functions.get(&FunctionKey::new(ftype, instance))
    }

    /// Configs sorted by name
    pub fn configs(&self) -> impl Iterator<Item = &Config> {
        self.configs.values()
    }

    pub fn config(&self, id: u8, label: &str) -> Option<&Config> {
        self.configs.get(&ConfigKey::new(id, label))
    }

    /// Resolve a binding to the function it targets
    pub fn binding_target(&self, binding: &Binding) -> Option<&Function> {
        self.functions.get(binding.target())
    }

    /// Whether any config still binds `function`
    pub fn is_function_bound(&self, function: &FunctionKey) -> bool {
        self.configs.values().any(|c| c.binds(function))
    }

    pub fn functions_path(&self) -> PathBuf {
        self.path.join(FUNCTIONS_DIR)
    }

    pub fn configs_path(&self) -> PathBuf {
        self.path.join(CONFIGS_DIR)
    }

    pub(crate) fn strings_path(&self) -> PathBuf {
        self.path.join(STRINGS_DIR)
    }

    pub(crate) fn udc_path(&self) -> PathBuf {
        self.path.join(UDC_FILE)
    }

    /// Directory name of a language, canonical unless scanned otherwise
    pub(crate) fn lang_dir(&self, lang: u16) -> String {
        self.lang_dirs
            .get(&lang)
            .cloned()
            .unwrap_or_else(|| encode_lang(lang))
    }
}

impl PartialEq for Gadget {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Gadget {}
