//! Gadget configurations and their function bindings

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::attrs::ConfigAttrs;
use super::codec::encode_lang;
use super::function::{validate_component, FunctionKey};
use crate::error::{Result, UsbgError};
use crate::utils::path::{bounded_join, collate};

/// Identity of a configuration within its gadget
///
/// Ordered by the derived `<label>.<id>` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConfigKey {
    pub id: u8,
    pub label: String,
}

impl ConfigKey {
    pub fn new(id: u8, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Directory name (e.g., "c.1")
    pub fn name(&self) -> String {
        format!("{}.{}", self.label, self.id)
    }

    /// Parse a `<label>.<id>` directory name
    pub fn parse(name: &str) -> Result<Self> {
        let (label, id) = name.rsplit_once('.').ok_or_else(|| {
            UsbgError::InvalidParam(format!("Config name without id: {}", name))
        })?;

        // Only the canonical decimal form maps back to the same directory
        let canonical = !id.is_empty()
            && id.bytes().all(|b| b.is_ascii_digit())
            && !(id.len() > 1 && id.starts_with('0'));
        let id = id
            .parse::<u8>()
            .ok()
            .filter(|_| canonical)
            .ok_or_else(|| UsbgError::InvalidParam(format!("Invalid config id in {}", name)))?;

        let key = Self::new(id, label);
        key.validate()?;
        Ok(key)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(UsbgError::InvalidParam(
                "Config id must be between 1 and 255".to_string(),
            ));
        }
        validate_component(&self.label, "config label")
    }
}

impl Ord for ConfigKey {
    fn cmp(&self, other: &Self) -> Ordering {
        collate(&self.name(), &other.name())
    }
}

impl PartialOrd for ConfigKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.label, self.id)
    }
}

/// A config → function link
///
/// The target is a key into the owning gadget's function table, never the
/// function itself.
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    name: String,
    target: FunctionKey,
    path: PathBuf,
}

impl Binding {
    pub(crate) fn new(name: String, target: FunctionKey, path: PathBuf) -> Self {
        Self { name, target, path }
    }

    /// Link name inside the config directory
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &FunctionKey {
        &self.target
    }

    /// Path of the symlink
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.target == other.target
    }
}

impl Eq for Binding {}

/// A gadget configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    #[serde(flatten)]
    key: ConfigKey,
    name: String,
    path: PathBuf,
    pub(crate) attrs: ConfigAttrs,
    /// `configuration` string per language id
    pub(crate) strings: BTreeMap<u16, String>,
    /// Language directory names as found on disk
    #[serde(skip)]
    pub(crate) lang_dirs: BTreeMap<u16, String>,
    /// Creation order is significant: it drives interface numbering
    pub(crate) bindings: Vec<Binding>,
}

impl Config {
    pub(crate) fn new(key: ConfigKey, configs_path: &Path, max_path_len: usize) -> Result<Self> {
        key.validate()?;
        let name = key.name();
        let path = bounded_join(configs_path, &name, max_path_len)?;
        Ok(Self {
            key,
            name,
            path,
            attrs: ConfigAttrs::default(),
            strings: BTreeMap::new(),
            lang_dirs: BTreeMap::new(),
            bindings: Vec::new(),
        })
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    pub fn id(&self) -> u8 {
        self.key.id
    }

    pub fn label(&self) -> &str {
        &self.key.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attrs(&self) -> &ConfigAttrs {
        &self.attrs
    }

    /// `configuration` string for a language
    pub fn string(&self, lang: u16) -> Option<&str> {
        self.strings.get(&lang).map(String::as_str)
    }

    pub fn langs(&self) -> impl Iterator<Item = u16> + '_ {
        self.strings.keys().copied()
    }

    /// Bindings in creation order
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Whether any binding targets `function`
    pub fn binds(&self, function: &FunctionKey) -> bool {
        self.bindings.iter().any(|b| &b.target == function)
    }

    pub(crate) fn strings_path(&self) -> PathBuf {
        self.path.join("strings")
    }

    /// Directory name of a language, canonical unless scanned otherwise
    pub(crate) fn lang_dir(&self, lang: u16) -> String {
        self.lang_dirs
            .get(&lang)
            .cloned()
            .unwrap_or_else(|| encode_lang(lang))
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Config {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gadget::FunctionType;

    #[test]
    fn test_config_names() {
        let key = ConfigKey::new(1, "c");
        assert_eq!(key.name(), "c.1");
        assert_eq!(ConfigKey::parse("c.1").unwrap(), key);

        // Labels may carry dots, the id follows the last one
        let parsed = ConfigKey::parse("The.Config.2").unwrap();
        assert_eq!(parsed, ConfigKey::new(2, "The.Config"));
    }

    #[test]
    fn test_malformed_config_names() {
        for name in ["c", "c.", ".1", "c.x", "c.01", "c.0", "c.256", "c.+1"] {
            let err = ConfigKey::parse(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParam, "{}", name);
        }
    }

    #[test]
    fn test_bindings_keep_insertion_order() {
        let mut config = Config::new(ConfigKey::new(1, "c"), Path::new("/g/configs"), 256).unwrap();
        for instance in ["usb2", "usb0", "usb1"] {
            let target = FunctionKey::new(FunctionType::Acm, instance);
            let name = target.name();
            let path = config.path().join(&name);
            config.bindings.push(Binding::new(name, target, path));
        }

        let names: Vec<&str> = config.bindings().map(Binding::name).collect();
        assert_eq!(names, ["acm.usb2", "acm.usb0", "acm.usb1"]);
        assert!(config.binds(&FunctionKey::new(FunctionType::Acm, "usb0")));
        assert!(!config.binds(&FunctionKey::new(FunctionType::Ecm, "usb0")));
    }
}
