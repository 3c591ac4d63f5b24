//! Filesystem → tree reconstruction
//!
//! The scanner walks the gadget container top-down: gadgets, then each
//! gadget's attributes, strings, functions and configs, and finally each
//! config's bindings. Any failure aborts the whole scan; the partially built
//! tree is dropped with the error.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use super::attrs::{ConfigAttrs, GadgetAttr, GadgetAttrs, GadgetStrings, StringField};
use super::codec::decode_lang;
use super::config::{Binding, Config, ConfigKey};
use super::configfs::{list_dir, read_dec, read_file, read_hex, read_link, read_string};
use super::function::{Function, FunctionKey};
use super::gadget::Gadget;
use super::{CONFIG_BM_ATTRIBUTES, CONFIG_MAX_POWER, CONFIG_STRING_FILE};
use crate::error::{ErrorKind, Result, UsbgError};
use crate::storage::{EntryKind, Storage};
use crate::utils::path::{bounded_join, normalize, resolve_link};

/// Scanner over one storage backend
pub struct Scanner<'a> {
    fs: &'a dyn Storage,
    max_path_len: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(fs: &'a dyn Storage, max_path_len: usize) -> Self {
        Self { fs, max_path_len }
    }

    /// Enumerate available UDCs
    ///
    /// A directory that cannot be listed means no controller is available.
    pub fn scan_udcs(&self, udc_class_path: &Path) -> Vec<String> {
        match list_dir(self.fs, udc_class_path) {
            Ok(entries) => {
                let mut udcs: Vec<String> = entries.into_iter().map(|e| e.name).collect();
                udcs.sort();
                debug!("Found {} UDC(s): {:?}", udcs.len(), udcs);
                udcs
            }
            Err(e) => {
                warn!("Cannot list UDCs in {}: {}", udc_class_path.display(), e);
                Vec::new()
            }
        }
    }

    /// Scan every gadget in the container
    pub fn scan_gadgets(&self, container: &Path) -> Result<Vec<Gadget>> {
        let entries = list_dir(self.fs, container)?;

        entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Dir)
            .map(|entry| self.scan_gadget(container, &entry.name))
            .collect()
    }

    /// Scan a single gadget directory
    pub fn scan_gadget(&self, container: &Path, name: &str) -> Result<Gadget> {
        let mut gadget = Gadget::new(name, container, self.max_path_len)?;
        debug!("Scanning gadget {}", gadget.path().display());

        gadget.udc = self.read_udc(&gadget.udc_path())?;
        gadget.attrs = self.read_gadget_attrs(gadget.path())?;
        gadget.lang_dirs = self.scan_langs(&gadget.strings_path())?;
        gadget.strings = self.read_gadget_strings(&gadget.strings_path(), &gadget.lang_dirs)?;
        gadget.functions = self.scan_functions(&gadget.functions_path())?;
        gadget.configs = self.scan_configs(&gadget.configs_path(), &gadget.functions)?;

        Ok(gadget)
    }

    /// Read the UDC file; absent or empty means unbound
    fn read_udc(&self, path: &Path) -> Result<Option<String>> {
        match read_file(self.fs, path) {
            Ok(content) => {
                let udc = content.trim();
                Ok((!udc.is_empty()).then(|| udc.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_gadget_attrs(&self, gadget_path: &Path) -> Result<GadgetAttrs> {
        let mut attrs = GadgetAttrs::default();
        for attr in GadgetAttr::ALL {
            let path = bounded_join(gadget_path, attr.file_name(), self.max_path_len)?;
            attrs.set(attr, read_hex(self.fs, &path, attr.max())?);
        }
        Ok(attrs)
    }

    /// Map language ids to their directory names under `strings_path`
    ///
    /// A missing strings directory means no strings are defined. Two
    /// directories naming the same language (`0x409`, `0x0409`) are rejected.
    fn scan_langs(&self, strings_path: &Path) -> Result<BTreeMap<u16, String>> {
        let entries = match list_dir(self.fs, strings_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No strings directory at {}", strings_path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e),
        };

        let mut langs = BTreeMap::new();
        for entry in entries {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            let lang = decode_lang(&entry.name).ok_or_else(|| {
                UsbgError::InvalidParam(format!(
                    "Invalid language directory {} in {}",
                    entry.name,
                    strings_path.display()
                ))
            })?;
            if let Some(other) = langs.insert(lang, entry.name) {
                return Err(UsbgError::InvalidParam(format!(
                    "Language 0x{:x} appears twice in {} (also as {})",
                    lang,
                    strings_path.display(),
                    other
                )));
            }
        }

        Ok(langs)
    }

    fn read_gadget_strings(
        &self,
        strings_path: &Path,
        lang_dirs: &BTreeMap<u16, String>,
    ) -> Result<BTreeMap<u16, GadgetStrings>> {
        let mut strings = BTreeMap::new();

        for (&lang, dir) in lang_dirs {
            let lang_path = bounded_join(strings_path, dir, self.max_path_len)?;
            let mut table = GadgetStrings::default();
            for field in StringField::ALL {
                let path = bounded_join(&lang_path, field.file_name(), self.max_path_len)?;
                table.set(field, read_string(self.fs, &path)?);
            }
            strings.insert(lang, table);
        }

        Ok(strings)
    }

    fn scan_functions(&self, functions_path: &Path) -> Result<BTreeMap<FunctionKey, Function>> {
        let mut functions = BTreeMap::new();

        for entry in list_dir(self.fs, functions_path)? {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            let key = FunctionKey::parse(&entry.name)?;
            let function = Function::new(key.clone(), functions_path, self.max_path_len)?;
            debug!("Found function {}", function.name());
            functions.insert(key, function);
        }

        Ok(functions)
    }

    fn scan_configs(
        &self,
        configs_path: &Path,
        functions: &BTreeMap<FunctionKey, Function>,
    ) -> Result<BTreeMap<ConfigKey, Config>> {
        let mut configs = BTreeMap::new();

        for entry in list_dir(self.fs, configs_path)? {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            let key = ConfigKey::parse(&entry.name)?;
            let mut config = Config::new(key.clone(), configs_path, self.max_path_len)?;
            debug!("Found config {}", config.name());

            config.attrs = self.read_config_attrs(config.path())?;
            config.lang_dirs = self.scan_langs(&config.strings_path())?;
            config.strings = self.read_config_strings(&config.strings_path(), &config.lang_dirs)?;
            config.bindings = self.scan_bindings(config.path(), functions)?;
            configs.insert(key, config);
        }

        Ok(configs)
    }

    fn read_config_attrs(&self, config_path: &Path) -> Result<ConfigAttrs> {
        let bm_path = bounded_join(config_path, CONFIG_BM_ATTRIBUTES, self.max_path_len)?;
        let power_path = bounded_join(config_path, CONFIG_MAX_POWER, self.max_path_len)?;

        Ok(ConfigAttrs {
            bm_attributes: read_hex(self.fs, &bm_path, u8::MAX as u32)? as u8,
            max_power: read_dec(self.fs, &power_path, u16::MAX as u32)? as u16,
        })
    }

    fn read_config_strings(
        &self,
        strings_path: &Path,
        lang_dirs: &BTreeMap<u16, String>,
    ) -> Result<BTreeMap<u16, String>> {
        let mut strings = BTreeMap::new();

        for (&lang, dir) in lang_dirs {
            let lang_path = bounded_join(strings_path, dir, self.max_path_len)?;
            let path = bounded_join(&lang_path, CONFIG_STRING_FILE, self.max_path_len)?;
            strings.insert(lang, read_string(self.fs, &path)?);
        }

        Ok(strings)
    }

    /// Resolve every symlink in a config directory to a function
    ///
    /// Bindings come back in listing order; the creation order of links made
    /// by other tools is not recorded on disk.
    fn scan_bindings(
        &self,
        config_path: &Path,
        functions: &BTreeMap<FunctionKey, Function>,
    ) -> Result<Vec<Binding>> {
        let mut bindings = Vec::new();

        for entry in list_dir(self.fs, config_path)? {
            if entry.kind != EntryKind::Symlink {
                continue;
            }
            let link_path = bounded_join(config_path, &entry.name, self.max_path_len)?;
            let target = resolve_link(config_path, &read_link(self.fs, &link_path)?);

            let function = functions
                .values()
                .find(|f| normalize(f.path()) == target)
                .ok_or_else(|| {
                    UsbgError::NotFound(format!(
                        "Binding {} points to unknown function {}",
                        link_path.display(),
                        target.display()
                    ))
                })?;

            debug!("Found binding {} -> {}", entry.name, function.name());
            bindings.push(Binding::new(entry.name, function.key().clone(), link_path));
        }

        Ok(bindings)
    }
}
