//! Tree → filesystem mutations within one gadget
//!
//! Every operation validates against the in-memory tree, performs the
//! filesystem call, and only updates the tree once that call succeeded.

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::attrs::{ConfigAttrs, GadgetAttr, GadgetAttrs, GadgetStrings, StringField};
use super::config::{Binding, Config, ConfigKey};
use super::configfs::{
    create_dir, create_symlink, ensure_dir, list_dir, remove_dir, remove_file, write_dec,
    write_hex, write_string,
};
use super::function::{validate_component, Function, FunctionKey, FunctionType};
use super::gadget::Gadget;
use super::{CONFIG_BM_ATTRIBUTES, CONFIG_MAX_POWER, CONFIG_STRING_FILE, FUNCTIONS_DIR};
use crate::error::{ErrorKind, Result, UsbgError};
use crate::storage::Storage;
use crate::utils::path::bounded_join;

/// Mutable handle on one gadget of a [`State`](super::State)
pub struct GadgetMut<'a> {
    fs: &'a dyn Storage,
    gadget: &'a mut Gadget,
    max_path_len: usize,
}

impl<'a> GadgetMut<'a> {
    pub(crate) fn new(fs: &'a dyn Storage, gadget: &'a mut Gadget, max_path_len: usize) -> Self {
        Self {
            fs,
            gadget,
            max_path_len,
        }
    }

    /// Write one device attribute
    pub fn set_attr(&mut self, attr: GadgetAttr, value: u32) -> Result<()> {
        if value > attr.max() {
            return Err(UsbgError::InvalidParam(format!(
                "Value 0x{:x} does not fit {} (max 0x{:x})",
                value,
                attr,
                attr.max()
            )));
        }

        let path = bounded_join(self.gadget.path(), attr.file_name(), self.max_path_len)?;
        write_hex(self.fs, &path, value, attr.hex_digits())?;
        self.gadget.attrs.set(attr, value);
        Ok(())
    }

    /// Write all device attributes
    pub fn set_attrs(&mut self, attrs: &GadgetAttrs) -> Result<()> {
        for attr in GadgetAttr::ALL {
            self.set_attr(attr, attrs.get(attr))?;
        }
        Ok(())
    }

    /// Write one string for a language, creating the language directory on demand
    pub fn set_string(&mut self, lang: u16, field: StringField, value: &str) -> Result<()> {
        validate_string(value)?;
        let dir = self.gadget.lang_dir(lang);
        let lang_path = ensure_lang_dir(
            self.fs,
            &self.gadget.strings_path(),
            &dir,
            self.max_path_len,
        )?;
        // A fresh language directory reads back as empty strings
        self.gadget.lang_dirs.entry(lang).or_insert(dir);
        self.gadget.strings.entry(lang).or_default();

        let path = bounded_join(&lang_path, field.file_name(), self.max_path_len)?;
        write_string(self.fs, &path, value)?;
        self.gadget
            .strings
            .entry(lang)
            .or_default()
            .set(field, value.to_string());
        Ok(())
    }

    /// Write serial number, manufacturer and product for a language
    pub fn set_strings(&mut self, lang: u16, strings: &GadgetStrings) -> Result<()> {
        for field in StringField::ALL {
            self.set_string(lang, field, strings.get(field))?;
        }
        Ok(())
    }

    /// Remove the string directory of a language
    pub fn remove_strings(&mut self, lang: u16) -> Result<()> {
        if !self.gadget.strings.contains_key(&lang) {
            return Err(UsbgError::NotFound(format!(
                "Strings 0x{:x} of gadget {}",
                lang,
                self.gadget.name()
            )));
        }

        let path = bounded_join(
            &self.gadget.strings_path(),
            &self.gadget.lang_dir(lang),
            self.max_path_len,
        )?;
        remove_dir(self.fs, &path)?;
        self.gadget.strings.remove(&lang);
        self.gadget.lang_dirs.remove(&lang);
        Ok(())
    }

    /// Create a function directory
    pub fn create_function(&mut self, ftype: FunctionType, instance: &str) -> Result<&Function> {
        let key = FunctionKey::new(ftype, instance);
        if self.gadget.functions.contains_key(&key) {
            return Err(UsbgError::AlreadyExists(format!(
                "Function {} in gadget {}",
                key,
                self.gadget.name()
            )));
        }

        let function = Function::new(key.clone(), &self.gadget.functions_path(), self.max_path_len)?;
        create_dir(self.fs, function.path())?;
        debug!("Created function {} in gadget {}", key, self.gadget.name());

        Ok(self.gadget.functions.entry(key).or_insert(function))
    }

    /// Remove a function that no config binds any more
    pub fn remove_function(&mut self, key: &FunctionKey) -> Result<()> {
        let function = self.gadget.functions.get(key).ok_or_else(|| {
            UsbgError::NotFound(format!("Function {} in gadget {}", key, self.gadget.name()))
        })?;

        if self.gadget.is_function_bound(key) {
            return Err(UsbgError::NotEmpty(format!(
                "Function {} is still bound to a config",
                key
            )));
        }

        remove_dir(self.fs, function.path())?;
        self.gadget.functions.remove(key);
        debug!("Removed function {} from gadget {}", key, self.gadget.name());
        Ok(())
    }

    /// Create a config directory
    pub fn create_config(&mut self, id: u8, label: &str) -> Result<&Config> {
        let key = ConfigKey::new(id, label);
        if self.gadget.configs.contains_key(&key) {
            return Err(UsbgError::AlreadyExists(format!(
                "Config {} in gadget {}",
                key,
                self.gadget.name()
            )));
        }

        let config = Config::new(key.clone(), &self.gadget.configs_path(), self.max_path_len)?;
        create_dir(self.fs, config.path())?;
        debug!("Created config {} in gadget {}", key, self.gadget.name());

        Ok(self.gadget.configs.entry(key).or_insert(config))
    }

    /// Remove a config without bindings, including its string directories
    pub fn remove_config(&mut self, key: &ConfigKey) -> Result<()> {
        let fs = self.fs;
        let max_path_len = self.max_path_len;
        let config = config_mut(self.gadget, key)?;

        if !config.bindings.is_empty() {
            return Err(UsbgError::NotEmpty(format!(
                "Config {} still has {} binding(s)",
                key,
                config.bindings.len()
            )));
        }

        let strings_path = config.strings_path();
        let langs: Vec<u16> = config.langs().collect();
        for lang in langs {
            let path = bounded_join(&strings_path, &config.lang_dir(lang), max_path_len)?;
            remove_dir(fs, &path)?;
            config.strings.remove(&lang);
            config.lang_dirs.remove(&lang);
        }

        remove_dir(fs, config.path())?;
        self.gadget.configs.remove(key);
        debug!("Removed config {} from gadget {}", key, self.gadget.name());
        Ok(())
    }

    /// Write `bmAttributes` and `MaxPower` of a config
    pub fn set_config_attrs(&mut self, key: &ConfigKey, attrs: &ConfigAttrs) -> Result<()> {
        let fs = self.fs;
        let max_path_len = self.max_path_len;
        let config = config_mut(self.gadget, key)?;

        let path = bounded_join(config.path(), CONFIG_BM_ATTRIBUTES, max_path_len)?;
        write_hex(fs, &path, attrs.bm_attributes as u32, 2)?;
        config.attrs.bm_attributes = attrs.bm_attributes;

        let path = bounded_join(config.path(), CONFIG_MAX_POWER, max_path_len)?;
        write_dec(fs, &path, attrs.max_power as u32)?;
        config.attrs.max_power = attrs.max_power;
        Ok(())
    }

    /// Write the `configuration` string of a config for a language
    pub fn set_config_string(&mut self, key: &ConfigKey, lang: u16, value: &str) -> Result<()> {
        validate_string(value)?;
        let fs = self.fs;
        let max_path_len = self.max_path_len;
        let config = config_mut(self.gadget, key)?;

        let dir = config.lang_dir(lang);
        let lang_path = ensure_lang_dir(fs, &config.strings_path(), &dir, max_path_len)?;
        config.lang_dirs.entry(lang).or_insert(dir);
        config.strings.entry(lang).or_default();

        let path = bounded_join(&lang_path, CONFIG_STRING_FILE, max_path_len)?;
        write_string(fs, &path, value)?;
        config.strings.insert(lang, value.to_string());
        Ok(())
    }

    /// Bind a function into a config under the function's own name
    pub fn add_binding(&mut self, config: &ConfigKey, function: &FunctionKey) -> Result<&Binding> {
        self.add_binding_named(config, function, &function.name())
    }

    /// Bind a function into a config under an explicit link name
    ///
    /// Bindings are appended: their order is the interface order the host sees.
    pub fn add_binding_named(
        &mut self,
        config: &ConfigKey,
        function: &FunctionKey,
        name: &str,
    ) -> Result<&Binding> {
        validate_component(name, "binding name")?;

        let function_name = match self.gadget.functions.get(function) {
            Some(f) => f.name().to_string(),
            None => {
                return Err(UsbgError::InvalidParam(format!(
                    "Function {} does not belong to gadget {}",
                    function,
                    self.gadget.name()
                )))
            }
        };

        let fs = self.fs;
        let max_path_len = self.max_path_len;
        let config = config_mut(self.gadget, config)?;

        if config.binds(function) {
            return Err(UsbgError::AlreadyExists(format!(
                "Function {} is already bound to config {}",
                function,
                config.name()
            )));
        }
        if config.binding(name).is_some() {
            return Err(UsbgError::AlreadyExists(format!(
                "Binding {} in config {}",
                name,
                config.name()
            )));
        }

        let link_path = bounded_join(config.path(), name, max_path_len)?;
        let target: PathBuf = ["..", "..", FUNCTIONS_DIR, function_name.as_str()]
            .iter()
            .collect();
        create_symlink(fs, &target, &link_path)?;
        debug!("Bound {} into config {}", function, config.name());

        config
            .bindings
            .push(Binding::new(name.to_string(), function.clone(), link_path));
        let index = config.bindings.len() - 1;
        Ok(&config.bindings[index])
    }

    /// Remove a binding by link name
    pub fn remove_binding(&mut self, config: &ConfigKey, name: &str) -> Result<()> {
        let fs = self.fs;
        let config = config_mut(self.gadget, config)?;

        let index = config
            .bindings
            .iter()
            .position(|b| b.name() == name)
            .ok_or_else(|| {
                UsbgError::NotFound(format!("Binding {} in config {}", name, config.name()))
            })?;

        remove_file(fs, config.bindings[index].path())?;
        config.bindings.remove(index);
        debug!("Removed binding {} from config {}", name, config.name());
        Ok(())
    }
}

impl fmt::Debug for GadgetMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GadgetMut")
            .field("gadget", &*self.gadget)
            .field("max_path_len", &self.max_path_len)
            .finish_non_exhaustive()
    }
}

impl Deref for GadgetMut<'_> {
    type Target = Gadget;

    fn deref(&self) -> &Gadget {
        &*self.gadget
    }
}

fn config_mut<'g>(gadget: &'g mut Gadget, key: &ConfigKey) -> Result<&'g mut Config> {
    let name = gadget.name().to_string();
    gadget
        .configs
        .get_mut(key)
        .ok_or_else(|| UsbgError::NotFound(format!("Config {} in gadget {}", key, name)))
}

/// Make sure the language directory `<strings_path>/<dir>` exists
///
/// Only a "does not exist" listing failure triggers creation; anything else
/// is reported as is.
pub(crate) fn ensure_lang_dir(
    fs: &dyn Storage,
    strings_path: &Path,
    dir: &str,
    max_path_len: usize,
) -> Result<PathBuf> {
    let lang_path = bounded_join(strings_path, dir, max_path_len)?;

    match list_dir(fs, &lang_path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            ensure_dir(fs, strings_path)?;
            create_dir(fs, &lang_path)?;
        }
        Err(e) => return Err(e),
    }

    Ok(lang_path)
}

fn validate_string(value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\0') {
        return Err(UsbgError::InvalidParam(format!(
            "String values cannot contain newlines: {:?}",
            value
        )));
    }
    Ok(())
}
