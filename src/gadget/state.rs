//! Root of one ConfigFS mount: gadgets and available UDCs

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::attrs::GadgetAttrs;
use super::configfs::{remove_dir, write_string};
use super::gadget::Gadget;
use super::mutate::GadgetMut;
use super::scan::Scanner;
use super::serialize_values;
use crate::config::UsbgConfig;
use crate::error::{Result, UsbgError};
use crate::storage::{LocalStorage, Storage};
use crate::utils::path::{check_len, collate};

/// Gadget table key, ordered by name collation
#[derive(Debug, Clone)]
struct GadgetKey(String);

impl PartialEq for GadgetKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GadgetKey {}

impl Ord for GadgetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        collate(&self.0, &other.0)
    }
}

impl PartialOrd for GadgetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory view of one gadget container
///
/// Built by [`State::scan`]; reflects the filesystem as of the scan plus
/// every successful mutation made through it since.
#[derive(Serialize)]
pub struct State {
    configfs_path: PathBuf,
    path: PathBuf,
    udcs: Vec<String>,
    #[serde(serialize_with = "serialize_values")]
    gadgets: BTreeMap<GadgetKey, Gadget>,
    #[serde(skip)]
    udc_class_path: PathBuf,
    #[serde(skip)]
    max_path_len: usize,
    #[serde(skip)]
    fs: Arc<dyn Storage>,
}

impl State {
    /// Scan the gadget container of a ConfigFS mount on the local filesystem
    pub fn init(configfs_path: impl AsRef<Path>) -> Result<Self> {
        Self::scan(
            &UsbgConfig::with_configfs(configfs_path),
            Arc::new(LocalStorage::new()),
        )
    }

    /// Build the object tree from the current filesystem state
    ///
    /// Either every gadget is scanned successfully or an error is returned;
    /// no partial tree escapes.
    pub fn scan(config: &UsbgConfig, fs: Arc<dyn Storage>) -> Result<Self> {
        check_len(&config.configfs_path, config.max_path_len)?;
        let path = config.gadget_container();
        check_len(&path, config.max_path_len)?;

        let scanner = Scanner::new(fs.as_ref(), config.max_path_len);
        let udcs = scanner.scan_udcs(&config.udc_class_path);
        let gadgets = scanner
            .scan_gadgets(&path)?
            .into_iter()
            .map(|g| (GadgetKey(g.name().to_string()), g))
            .collect::<BTreeMap<_, _>>();

        info!(
            "Scanned {} gadget(s) under {}",
            gadgets.len(),
            path.display()
        );

        Ok(Self {
            configfs_path: config.configfs_path.clone(),
            path,
            udcs,
            gadgets,
            udc_class_path: config.udc_class_path.clone(),
            max_path_len: config.max_path_len,
            fs,
        })
    }

    /// Scan the same mount again with the same storage
    pub fn rescan(&self) -> Result<Self> {
        let config = UsbgConfig {
            configfs_path: self.configfs_path.clone(),
            udc_class_path: self.udc_class_path.clone(),
            max_path_len: self.max_path_len,
        };
        Self::scan(&config, Arc::clone(&self.fs))
    }

    pub fn configfs_path(&self) -> &Path {
        &self.configfs_path
    }

    /// Gadget container path (`<configfs>/usb_gadget`)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Available UDCs, sorted
    pub fn udcs(&self) -> &[String] {
        &self.udcs
    }

    /// First available UDC
    pub fn default_udc(&self) -> Option<&str> {
        self.udcs.first().map(String::as_str)
    }

    /// Gadgets sorted by name
    pub fn gadgets(&self) -> impl Iterator<Item = &Gadget> {
        self.gadgets.values()
    }

    pub fn gadget(&self, name: &str) -> Option<&Gadget> {
        self.gadgets.get(&GadgetKey(name.to_string()))
    }

    /// Mutable handle on a gadget
    pub fn gadget_mut(&mut self, name: &str) -> Option<GadgetMut<'_>> {
        let gadget = self.gadgets.get_mut(&GadgetKey(name.to_string()))?;
        Some(GadgetMut::new(self.fs.as_ref(), gadget, self.max_path_len))
    }

    /// Create an empty gadget
    pub fn create_gadget(&mut self, name: &str) -> Result<GadgetMut<'_>> {
        let key = GadgetKey(name.to_string());
        if self.gadgets.contains_key(&key) {
            return Err(UsbgError::AlreadyExists(format!("Gadget {}", name)));
        }

        let gadget = Gadget::new(name, &self.path, self.max_path_len)?;
        super::configfs::create_dir(self.fs.as_ref(), gadget.path())?;
        info!("Created gadget {}", name);

        let gadget = self.gadgets.entry(key).or_insert(gadget);
        Ok(GadgetMut::new(self.fs.as_ref(), gadget, self.max_path_len))
    }

    /// Create a gadget and write all of its device attributes
    pub fn create_gadget_with(&mut self, name: &str, attrs: &GadgetAttrs) -> Result<GadgetMut<'_>> {
        let mut gadget = self.create_gadget(name)?;
        gadget.set_attrs(attrs)?;
        Ok(gadget)
    }

    /// Remove a gadget with everything it owns
    ///
    /// The gadget must be unbound from its UDC and its configs must have no
    /// bindings left. Configs, functions and strings are removed one by one,
    /// each leaving the tree as soon as its directory is gone.
    pub fn remove_gadget(&mut self, name: &str) -> Result<()> {
        let key = GadgetKey(name.to_string());
        let max_path_len = self.max_path_len;
        let fs = self.fs.as_ref();
        let gadget = self
            .gadgets
            .get_mut(&key)
            .ok_or_else(|| UsbgError::NotFound(format!("Gadget {}", name)))?;

        if let Some(udc) = gadget.udc() {
            return Err(UsbgError::NotEmpty(format!(
                "Gadget {} is bound to UDC {}",
                name, udc
            )));
        }
        if let Some(config) = gadget.configs().find(|c| c.bindings().next().is_some()) {
            return Err(UsbgError::NotEmpty(format!(
                "Config {} of gadget {} still has bindings",
                config.name(),
                name
            )));
        }

        let configs: Vec<_> = gadget.configs.keys().cloned().collect();
        let functions: Vec<_> = gadget.functions.keys().cloned().collect();
        let langs: Vec<u16> = gadget.langs().collect();
        {
            let mut handle = GadgetMut::new(fs, gadget, max_path_len);
            for config in &configs {
                handle.remove_config(config)?;
            }
            for function in &functions {
                handle.remove_function(function)?;
            }
            for lang in langs {
                handle.remove_strings(lang)?;
            }
        }

        remove_dir(fs, gadget.path())?;
        self.gadgets.remove(&key);
        info!("Removed gadget {}", name);
        Ok(())
    }

    /// Write the UDC file of a gadget: a controller name binds, `None` unbinds
    pub fn set_udc(&mut self, name: &str, udc: Option<&str>) -> Result<()> {
        let key = GadgetKey(name.to_string());
        let current = self
            .gadgets
            .get(&key)
            .ok_or_else(|| UsbgError::NotFound(format!("Gadget {}", name)))?
            .udc()
            .map(str::to_string);

        if let Some(udc) = udc {
            if !self.udcs.iter().any(|u| u == udc) {
                return Err(UsbgError::NotFound(format!("UDC {}", udc)));
            }
            if current.as_deref() == Some(udc) {
                return Ok(());
            }
            if let Some(other) = self
                .gadgets()
                .find(|g| g.name() != name && g.udc() == Some(udc))
            {
                return Err(UsbgError::AlreadyExists(format!(
                    "UDC {} is already bound to gadget {}",
                    udc,
                    other.name()
                )));
            }
        }

        let fs = self.fs.as_ref();
        let gadget = self
            .gadgets
            .get_mut(&key)
            .ok_or_else(|| UsbgError::NotFound(format!("Gadget {}", name)))?;
        write_string(fs, &gadget.udc_path(), udc.unwrap_or(""))?;
        gadget.udc = udc.map(str::to_string);
        Ok(())
    }

    /// Bind a gadget to a UDC, the first available one when `udc` is `None`
    pub fn enable_gadget(&mut self, name: &str, udc: Option<&str>) -> Result<()> {
        let udc = match udc {
            Some(udc) => udc.to_string(),
            None => self
                .default_udc()
                .ok_or_else(|| {
                    UsbgError::NotFound("No USB Device Controller (UDC) found".to_string())
                })?
                .to_string(),
        };

        info!("Binding gadget {} to UDC: {}", name, udc);
        self.set_udc(name, Some(&udc))
    }

    /// Unbind a gadget from its UDC
    pub fn disable_gadget(&mut self, name: &str) -> Result<()> {
        self.set_udc(name, None)?;
        info!("Unbound gadget {} from UDC", name);
        Ok(())
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("path", &self.path)
            .field("udcs", &self.udcs)
            .field("gadgets", &self.gadgets.values().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gadget::{
        ConfigAttrs, ConfigKey, FunctionKey, FunctionType, GadgetAttr, GadgetStrings,
        StringField, LANG_US_ENG,
    };
    use crate::storage::MemoryStorage;
    use std::fs;
    use tempfile::TempDir;

    const CONFIGFS: &str = "/sys/kernel/config";
    const UDC_DIR: &str = "/sys/class/udc";

    fn memory_configfs(udcs: &[&str]) -> Arc<MemoryStorage> {
        let fs = Arc::new(MemoryStorage::configfs());
        fs.mkdir_all(format!("{}/usb_gadget", CONFIGFS));
        fs.mkdir_all(UDC_DIR);
        for udc in udcs {
            fs.put_file(format!("{}/{}", UDC_DIR, udc), "");
        }
        fs
    }

    fn scan(fs: &Arc<MemoryStorage>) -> State {
        let config = UsbgConfig::with_configfs(CONFIGFS).udc_class_path(UDC_DIR);
        State::scan(&config, fs.clone()).unwrap()
    }

    fn gadget_file(name: &str, file: &str) -> String {
        format!("{}/usb_gadget/{}/{}", CONFIGFS, name, file)
    }

    /// Write a complete gadget directory on a real filesystem
    fn write_gadget(root: &Path, name: &str, vendor: &str, product: &str) -> PathBuf {
        let gadget = root.join("usb_gadget").join(name);
        fs::create_dir_all(gadget.join("functions")).unwrap();
        fs::create_dir_all(gadget.join("configs")).unwrap();
        for (file, content) in [
            ("UDC", "\n"),
            ("bcdUSB", "0x0200\n"),
            ("bDeviceClass", "0x00\n"),
            ("bDeviceSubClass", "0x00\n"),
            ("bDeviceProtocol", "0x00\n"),
            ("bMaxPacketSize0", "0x40\n"),
            ("idVendor", vendor),
            ("idProduct", product),
            ("bcdDevice", "0x0100\n"),
        ] {
            fs::write(gadget.join(file), content).unwrap();
        }
        gadget
    }

    fn write_config(gadget: &Path, name: &str) -> PathBuf {
        let config = gadget.join("configs").join(name);
        fs::create_dir_all(&config).unwrap();
        fs::write(config.join("MaxPower"), "500\n").unwrap();
        fs::write(config.join("bmAttributes"), "0x80\n").unwrap();
        config
    }

    fn local_state(root: &Path, udc_dir: &Path) -> Result<State> {
        let config = UsbgConfig::with_configfs(root).udc_class_path(udc_dir);
        State::scan(&config, Arc::new(LocalStorage::new()))
    }

    fn tree_keys(state: &State) -> Vec<String> {
        let mut out = Vec::new();
        for gadget in state.gadgets() {
            out.push(format!("G {} udc={:?}", gadget.name(), gadget.udc()));
            for function in gadget.functions() {
                out.push(format!("F {}", function.key()));
            }
            for config in gadget.configs() {
                out.push(format!("C {}", config.key()));
                for binding in config.bindings() {
                    out.push(format!("B {} -> {}", binding.name(), binding.target()));
                }
            }
        }
        out
    }

    #[test]
    fn test_scan_example_gadget() {
        let dir = TempDir::new().unwrap();
        write_gadget(dir.path(), "g1", "0x1d6b\n", "0x0104\n");

        let state = local_state(dir.path(), &dir.path().join("no-udc")).unwrap();
        assert!(state.udcs().is_empty());

        let gadget = state.gadget("g1").unwrap();
        assert_eq!(gadget.attr(GadgetAttr::IdVendor), 7531);
        assert_eq!(gadget.attrs().id_product, 0x0104);
        assert_eq!(gadget.attrs().max_packet_size0, 0x40);
        assert!(gadget.udc().is_none());
        assert_eq!(gadget.langs().count(), 0);
        assert_eq!(gadget.path(), dir.path().join("usb_gadget/g1"));
    }

    #[test]
    fn test_rewrite_attribute_is_canonical() {
        let dir = TempDir::new().unwrap();
        let gadget_dir = write_gadget(dir.path(), "g1", "0X1D6B\n", "0x0104\n");

        let mut state = local_state(dir.path(), dir.path()).unwrap();
        let mut gadget = state.gadget_mut("g1").unwrap();
        assert_eq!(gadget.attr(GadgetAttr::IdVendor), 7531);

        gadget.set_attr(GadgetAttr::IdVendor, 7531).unwrap();
        assert_eq!(
            fs::read_to_string(gadget_dir.join("idVendor")).unwrap(),
            "0x1d6b\n"
        );
    }

    #[test]
    fn test_scan_full_tree_from_disk() {
        let dir = TempDir::new().unwrap();
        let udc_dir = dir.path().join("udc");
        fs::create_dir_all(udc_dir.join("musb-hdrc.0")).unwrap();
        fs::create_dir_all(udc_dir.join("dummy_udc.0")).unwrap();

        let gadget = write_gadget(dir.path(), "g1", "0x1d6b\n", "0x0104\n");
        fs::write(gadget.join("UDC"), "musb-hdrc.0\n").unwrap();
        fs::create_dir_all(gadget.join("functions/acm.GS0")).unwrap();
        fs::create_dir_all(gadget.join("functions/ecm.usb0")).unwrap();
        fs::create_dir_all(gadget.join("strings/0x409")).unwrap();
        fs::write(gadget.join("strings/0x409/serialnumber"), "0123456789\n").unwrap();
        fs::write(gadget.join("strings/0x409/manufacturer"), "One-KVM\n").unwrap();
        fs::write(gadget.join("strings/0x409/product"), "One-KVM USB Device\n").unwrap();

        let config = write_config(&gadget, "c.1");
        fs::create_dir_all(config.join("strings/0x409")).unwrap();
        fs::write(config.join("strings/0x409/configuration"), "Config 1: ACM + ECM\n").unwrap();
        std::os::unix::fs::symlink("../../functions/acm.GS0", config.join("acm.GS0")).unwrap();
        // Absolute targets resolve too
        std::os::unix::fs::symlink(gadget.join("functions/ecm.usb0"), config.join("ecm.usb0"))
            .unwrap();

        let state = local_state(dir.path(), &udc_dir).unwrap();
        assert_eq!(state.udcs(), ["dummy_udc.0", "musb-hdrc.0"]);

        let g = state.gadget("g1").unwrap();
        assert_eq!(g.udc(), Some("musb-hdrc.0"));

        let strings = g.strings(LANG_US_ENG).unwrap();
        assert_eq!(strings.manufacturer, "One-KVM");
        assert_eq!(strings.get(StringField::Product), "One-KVM USB Device");

        let c = g.config(1, "c").unwrap();
        assert_eq!(c.attrs().max_power, 500);
        assert_eq!(c.string(LANG_US_ENG), Some("Config 1: ACM + ECM"));

        let targets: Vec<&str> = c
            .bindings()
            .map(|b| g.binding_target(b).unwrap().name())
            .collect();
        assert_eq!(targets, ["acm.GS0", "ecm.usb0"]);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for name in ["g2", "g10", "a"] {
            let gadget = write_gadget(dir.path(), name, "0x1d6b\n", "0x0104\n");
            fs::create_dir_all(gadget.join("functions/rndis.usb0")).unwrap();
            let config = write_config(&gadget, "b.2");
            std::os::unix::fs::symlink("../../functions/rndis.usb0", config.join("rndis.usb0"))
                .unwrap();
        }

        let first = local_state(dir.path(), dir.path()).unwrap();
        let second = first.rescan().unwrap();
        assert_eq!(tree_keys(&first), tree_keys(&second));

        let names: Vec<&str> = first.gadgets().map(Gadget::name).collect();
        assert_eq!(names, ["a", "g10", "g2"]);
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = local_state(dir.path(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dangling_binding_is_scan_error() {
        let dir = TempDir::new().unwrap();
        let gadget = write_gadget(dir.path(), "g1", "0x1d6b\n", "0x0104\n");
        let config = write_config(&gadget, "c.1");
        std::os::unix::fs::symlink("../../functions/acm.GS0", config.join("acm.GS0")).unwrap();

        let err = local_state(dir.path(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_malformed_names_are_scan_errors() {
        let dir = TempDir::new().unwrap();
        let gadget = write_gadget(dir.path(), "g1", "0x1d6b\n", "0x0104\n");
        fs::create_dir_all(gadget.join("functions/noinstance")).unwrap();
        let err = local_state(dir.path(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        fs::remove_dir(gadget.join("functions/noinstance")).unwrap();
        write_config(&gadget, "c.one");
        let err = local_state(dir.path(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn test_bad_attribute_content_is_parse_error() {
        let dir = TempDir::new().unwrap();
        write_gadget(dir.path(), "g1", "vendor\n", "0x0104\n");
        let err = local_state(dir.path(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_empty_config_has_no_bindings() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_config(1, "c").unwrap();

        let state = state.rescan().unwrap();
        let config = state.gadget("g1").unwrap().config(1, "c").unwrap();
        assert_eq!(config.bindings().count(), 0);
        assert_eq!(config.attrs(), &ConfigAttrs::default());
    }

    #[test]
    fn test_create_gadget() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);

        let gadget = state.create_gadget("g1").unwrap();
        assert_eq!(gadget.attrs(), &GadgetAttrs::default());
        assert_eq!(gadget.functions().count(), 0);
        assert!(fs.is_dir(gadget_file("g1", "")));

        let err = state.create_gadget("g1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(state.gadgets().count(), 1);

        // Rescanning sees the same defaults
        let state = state.rescan().unwrap();
        assert_eq!(state.gadget("g1").unwrap().attrs(), &GadgetAttrs::default());
    }

    #[test]
    fn test_create_gadget_with_attrs() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);

        let attrs = GadgetAttrs {
            bcd_usb: 0x0200,
            id_vendor: 0x1d6b,
            id_product: 0x0104,
            bcd_device: 0x0100,
            ..Default::default()
        };
        state.create_gadget_with("g1", &attrs).unwrap();

        assert_eq!(fs.file(gadget_file("g1", "bcdUSB")).as_deref(), Some("0x0200\n"));
        assert_eq!(fs.file(gadget_file("g1", "bDeviceClass")).as_deref(), Some("0x00\n"));

        let state = state.rescan().unwrap();
        assert_eq!(state.gadget("g1").unwrap().attrs(), &attrs);
    }

    #[test]
    fn test_set_attr_range_check() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();

        let err = gadget.set_attr(GadgetAttr::DeviceClass, 0x100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert_eq!(gadget.attr(GadgetAttr::DeviceClass), 0);
        assert_eq!(fs.file(gadget_file("g1", "bDeviceClass")).as_deref(), Some("0x00\n"));

        gadget.set_attr(GadgetAttr::DeviceClass, 0xef).unwrap();
        assert_eq!(fs.file(gadget_file("g1", "bDeviceClass")).as_deref(), Some("0xef\n"));
    }

    #[test]
    fn test_failed_write_leaves_tree_unchanged() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();

        fs.fail_next(gadget_file("g1", "idProduct"), libc::EIO);
        let mut gadget = state.gadget_mut("g1").unwrap();
        let err = gadget.set_attr(GadgetAttr::IdProduct, 0x0104).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(gadget.attrs().id_product, 0);

        fs.fail_next(gadget_file("g1", "functions/acm.usb0"), libc::EACCES);
        let err = gadget.create_function(FunctionType::Acm, "usb0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(gadget.function(FunctionType::Acm, "usb0").is_none());
    }

    #[test]
    fn test_function_lookup_path() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::Ncm, "usb0").unwrap();

        let function = gadget.function(FunctionType::Ncm, "usb0").unwrap();
        assert_eq!(function.path(), gadget.functions_path().join("ncm.usb0"));
        assert!(fs.is_dir(function.path()));

        let err = gadget.create_function(FunctionType::Ncm, "usb0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(gadget.functions().count(), 1);
    }

    #[test]
    fn test_bindings_keep_call_order() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();

        for instance in ["a", "b", "c", "d"] {
            gadget.create_function(FunctionType::Acm, instance).unwrap();
        }
        let config = gadget.create_config(1, "c").unwrap().key().clone();

        let f1 = FunctionKey::new(FunctionType::Acm, "d");
        let f2 = FunctionKey::new(FunctionType::Acm, "b");
        let binding = gadget.add_binding(&config, &f1).unwrap();
        assert_eq!(binding.name(), "acm.d");
        gadget.add_binding(&config, &f2).unwrap();

        let order: Vec<&FunctionKey> = gadget
            .config(1, "c")
            .unwrap()
            .bindings()
            .map(|b| b.target())
            .collect();
        assert_eq!(order, [&f1, &f2]);

        assert_eq!(
            fs.link(gadget_file("g1", "configs/c.1/acm.d")),
            Some(PathBuf::from("../../functions/acm.d"))
        );
    }

    #[test]
    fn test_binding_rules() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::Hid, "usb0").unwrap();
        gadget.create_config(1, "c").unwrap();

        let config = ConfigKey::new(1, "c");
        let hid = FunctionKey::new(FunctionType::Hid, "usb0");

        // Function of no (or another) gadget
        let stranger = FunctionKey::new(FunctionType::Hid, "usb9");
        let err = gadget.add_binding(&config, &stranger).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        gadget.add_binding(&config, &hid).unwrap();
        let err = gadget.add_binding_named(&config, &hid, "other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = gadget
            .add_binding(&ConfigKey::new(2, "c"), &hid)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // A bound function cannot go away
        let err = gadget.remove_function(&hid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        gadget.remove_binding(&config, "hid.usb0").unwrap();
        assert!(!fs.exists(gadget_file("g1", "configs/c.1/hid.usb0")));
        gadget.remove_function(&hid).unwrap();
        assert!(!fs.exists(gadget_file("g1", "functions/hid.usb0")));
    }

    #[test]
    fn test_bindings_survive_rescan() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::MassStorage, "usb0").unwrap();
        gadget.create_function(FunctionType::Hid, "usb0").unwrap();
        let config = gadget.create_config(1, "c").unwrap().key().clone();
        gadget
            .add_binding(&config, &FunctionKey::new(FunctionType::Hid, "usb0"))
            .unwrap();
        gadget
            .add_binding(&config, &FunctionKey::new(FunctionType::MassStorage, "usb0"))
            .unwrap();

        let rescanned = state.rescan().unwrap();
        let g = rescanned.gadget("g1").unwrap();
        let c = g.config(1, "c").unwrap();
        let targets: Vec<&str> = c.bindings().map(|b| g.binding_target(b).unwrap().name()).collect();
        assert_eq!(targets, ["hid.usb0", "mass_storage.usb0"]);
    }

    #[test]
    fn test_string_dir_created_or_reused_identically() {
        let strings = GadgetStrings {
            serial_number: "0123456789".to_string(),
            manufacturer: "One-KVM".to_string(),
            product: "One-KVM USB Device".to_string(),
        };

        let mut outcomes = Vec::new();
        for pre_existing in [false, true] {
            let fs = memory_configfs(&[]);
            let mut state = scan(&fs);
            state.create_gadget("g1").unwrap();
            if pre_existing {
                fs.create_dir(Path::new(&gadget_file("g1", "strings/0x409")))
                    .unwrap();
            }

            let mut gadget = state.gadget_mut("g1").unwrap();
            gadget.set_strings(LANG_US_ENG, &strings).unwrap();
            assert_eq!(gadget.strings(LANG_US_ENG), Some(&strings));

            let disk: Vec<Option<String>> = StringField::ALL
                .iter()
                .map(|f| fs.file(gadget_file("g1", &format!("strings/0x409/{}", f.file_name()))))
                .collect();
            let rescanned = state.rescan().unwrap();
            outcomes.push((disk, rescanned.gadget("g1").unwrap().strings(LANG_US_ENG).cloned()));
        }

        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[0].0[1].as_deref(), Some("One-KVM\n"));
        assert_eq!(outcomes[0].1.as_ref(), Some(&strings));
    }

    #[test]
    fn test_string_dir_other_errors_propagate() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();

        fs.fail_next(gadget_file("g1", "strings/0x409"), libc::EACCES);
        let mut gadget = state.gadget_mut("g1").unwrap();
        let err = gadget
            .set_string(LANG_US_ENG, StringField::Product, "x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!fs.exists(gadget_file("g1", "strings/0x409")));
        assert!(gadget.strings(LANG_US_ENG).is_none());

        let err = gadget
            .set_string(LANG_US_ENG, StringField::Product, "two\nlines")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn test_scan_keeps_on_disk_lang_dir_names() {
        let dir = TempDir::new().unwrap();
        let gadget_dir = write_gadget(dir.path(), "g1", "0x1d6b\n", "0x0104\n");
        let lang_dir = gadget_dir.join("strings/0x0409");
        fs::create_dir_all(&lang_dir).unwrap();
        fs::write(lang_dir.join("serialnumber"), "0123456789\n").unwrap();
        fs::write(lang_dir.join("manufacturer"), "One-KVM\n").unwrap();
        fs::write(lang_dir.join("product"), "One-KVM USB Device\n").unwrap();
        let config_lang = write_config(&gadget_dir, "c.1").join("strings/409");
        fs::create_dir_all(&config_lang).unwrap();
        fs::write(config_lang.join("configuration"), "Config 1\n").unwrap();

        let mut state = local_state(dir.path(), dir.path()).unwrap();
        let g = state.gadget("g1").unwrap();
        assert_eq!(g.strings(LANG_US_ENG).unwrap().manufacturer, "One-KVM");
        assert_eq!(g.config(1, "c").unwrap().string(LANG_US_ENG), Some("Config 1"));

        // Writes land in the existing directories, no canonical twin appears
        let mut gadget = state.gadget_mut("g1").unwrap();
        gadget
            .set_string(LANG_US_ENG, StringField::Product, "Composite")
            .unwrap();
        gadget
            .set_config_string(&ConfigKey::new(1, "c"), LANG_US_ENG, "Config A")
            .unwrap();

        assert_eq!(
            fs::read_to_string(lang_dir.join("product")).unwrap(),
            "Composite\n"
        );
        assert_eq!(
            fs::read_to_string(config_lang.join("configuration")).unwrap(),
            "Config A\n"
        );
        assert!(!gadget_dir.join("strings/0x409").exists());
        assert!(!gadget_dir.join("configs/c.1/strings/0x409").exists());
    }

    #[test]
    fn test_remove_non_canonical_lang_dirs() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_config(1, "c").unwrap();
        for lang_dir in ["strings/0x0409", "configs/c.1/strings/0x0409"] {
            fs.create_dir(Path::new(&gadget_file("g1", lang_dir)))
                .unwrap();
        }

        let mut state = state.rescan().unwrap();
        let mut gadget = state.gadget_mut("g1").unwrap();
        assert!(gadget.strings(LANG_US_ENG).is_some());
        assert_eq!(gadget.config(1, "c").unwrap().string(LANG_US_ENG), Some(""));

        gadget.remove_strings(LANG_US_ENG).unwrap();
        assert!(!fs.exists(gadget_file("g1", "strings/0x0409")));
        gadget.remove_config(&ConfigKey::new(1, "c")).unwrap();
        assert!(!fs.exists(gadget_file("g1", "configs/c.1")));
    }

    #[test]
    fn test_failed_string_write_keeps_new_lang_dir() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        let config = gadget.create_config(1, "c").unwrap().key().clone();

        fs.fail_next(gadget_file("g1", "strings/0x409/product"), libc::EIO);
        assert!(gadget
            .set_string(LANG_US_ENG, StringField::Product, "p")
            .is_err());
        fs.fail_next(
            gadget_file("g1", "configs/c.1/strings/0x409/configuration"),
            libc::EIO,
        );
        assert!(gadget
            .set_config_string(&config, LANG_US_ENG, "cfg")
            .is_err());

        assert!(fs.is_dir(gadget_file("g1", "strings/0x409")));
        assert_eq!(gadget.strings(LANG_US_ENG), Some(&GadgetStrings::default()));
        assert_eq!(gadget.config(1, "c").unwrap().string(LANG_US_ENG), Some(""));

        let rescanned = state.rescan().unwrap();
        let ours = state.gadget("g1").unwrap();
        let disk = rescanned.gadget("g1").unwrap();
        assert_eq!(ours.strings(LANG_US_ENG), disk.strings(LANG_US_ENG));
        assert_eq!(
            ours.config(1, "c").unwrap().string(LANG_US_ENG),
            disk.config(1, "c").unwrap().string(LANG_US_ENG)
        );
    }

    #[test]
    fn test_config_attrs_and_strings() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        let config = gadget.create_config(2, "The.Config").unwrap().key().clone();

        let attrs = ConfigAttrs {
            bm_attributes: 0xc0,
            max_power: 500,
        };
        gadget.set_config_attrs(&config, &attrs).unwrap();
        gadget
            .set_config_string(&config, LANG_US_ENG, "Config 1: HID + MSD")
            .unwrap();

        assert_eq!(
            fs.file(gadget_file("g1", "configs/The.Config.2/MaxPower")).as_deref(),
            Some("500\n")
        );
        assert_eq!(
            fs.file(gadget_file("g1", "configs/The.Config.2/strings/0x409/configuration"))
                .as_deref(),
            Some("Config 1: HID + MSD\n")
        );

        let state = state.rescan().unwrap();
        let c = state.gadget("g1").unwrap().config(2, "The.Config").unwrap();
        assert_eq!(c.attrs(), &attrs);
        assert_eq!(c.string(LANG_US_ENG), Some("Config 1: HID + MSD"));
    }

    #[test]
    fn test_remove_config_rules() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::Acm, "usb0").unwrap();
        let config = gadget.create_config(1, "c").unwrap().key().clone();
        gadget.set_config_string(&config, LANG_US_ENG, "cfg").unwrap();
        let acm = FunctionKey::new(FunctionType::Acm, "usb0");
        gadget.add_binding(&config, &acm).unwrap();

        let err = gadget.remove_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        gadget.remove_binding(&config, "acm.usb0").unwrap();
        gadget.remove_config(&config).unwrap();
        assert!(gadget.config(1, "c").is_none());
        assert!(!fs.exists(gadget_file("g1", "configs/c.1")));

        let err = gadget.remove_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_udc_bind_and_unbind() {
        let fs = memory_configfs(&["musb-hdrc.0", "dummy_udc.0"]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();
        state.create_gadget("g2").unwrap();
        assert_eq!(state.default_udc(), Some("dummy_udc.0"));

        state.enable_gadget("g1", None).unwrap();
        assert_eq!(state.gadget("g1").unwrap().udc(), Some("dummy_udc.0"));
        assert_eq!(fs.file(gadget_file("g1", "UDC")).as_deref(), Some("dummy_udc.0\n"));

        // One controller serves one gadget
        let err = state.enable_gadget("g2", Some("dummy_udc.0")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = state.enable_gadget("g2", Some("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        state.enable_gadget("g2", Some("musb-hdrc.0")).unwrap();

        let rescanned = state.rescan().unwrap();
        assert_eq!(rescanned.gadget("g2").unwrap().udc(), Some("musb-hdrc.0"));

        state.disable_gadget("g1").unwrap();
        assert!(state.gadget("g1").unwrap().udc().is_none());
        assert_eq!(fs.file(gadget_file("g1", "UDC")).as_deref(), Some("\n"));
    }

    #[test]
    fn test_enable_without_udc() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();

        let err = state.enable_gadget("g1", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_failed_udc_write_keeps_value() {
        let fs = memory_configfs(&["dummy_udc.0"]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();

        fs.fail_next(gadget_file("g1", "UDC"), libc::EBUSY);
        assert!(state.enable_gadget("g1", None).is_err());
        assert!(state.gadget("g1").unwrap().udc().is_none());
    }

    #[test]
    fn test_remove_bound_gadget_fails() {
        let fs = memory_configfs(&["dummy_udc.0"]);
        let mut state = scan(&fs);
        state.create_gadget("g1").unwrap();
        state.enable_gadget("g1", None).unwrap();

        let err = state.remove_gadget("g1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);
        assert_eq!(state.gadget("g1").unwrap().udc(), Some("dummy_udc.0"));
        assert_eq!(fs.file(gadget_file("g1", "UDC")).as_deref(), Some("dummy_udc.0\n"));
    }

    #[test]
    fn test_remove_gadget_with_children() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::Acm, "usb0").unwrap();
        gadget.create_function(FunctionType::Ecm, "usb0").unwrap();
        let config = gadget.create_config(1, "c").unwrap().key().clone();
        gadget.set_config_string(&config, LANG_US_ENG, "cfg").unwrap();
        gadget
            .set_string(LANG_US_ENG, StringField::Manufacturer, "One-KVM")
            .unwrap();
        gadget
            .add_binding(&config, &FunctionKey::new(FunctionType::Acm, "usb0"))
            .unwrap();

        let err = state.remove_gadget("g1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        state
            .gadget_mut("g1")
            .unwrap()
            .remove_binding(&config, "acm.usb0")
            .unwrap();
        state.remove_gadget("g1").unwrap();

        assert!(state.gadget("g1").is_none());
        assert!(!fs.exists(gadget_file("g1", "")));
        assert_eq!(state.rescan().unwrap().gadgets().count(), 0);

        let err = state.remove_gadget("g1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_path_limit_checked_before_io() {
        let fs = memory_configfs(&[]);
        let mut state = scan(&fs);
        let long = "g".repeat(300);

        let err = state.create_gadget(&long).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert_eq!(
            fs.read_dir(Path::new("/sys/kernel/config/usb_gadget"))
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_state_serializes() {
        let fs = memory_configfs(&["dummy_udc.0"]);
        let mut state = scan(&fs);
        let mut gadget = state.create_gadget("g1").unwrap();
        gadget.create_function(FunctionType::Acm, "usb0").unwrap();

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["udcs"][0], "dummy_udc.0");
        assert_eq!(json["gadgets"][0]["name"], "g1");
        assert_eq!(json["gadgets"][0]["functions"][0]["name"], "acm.usb0");
        assert_eq!(json["gadgets"][0]["functions"][0]["ftype"], "acm");
    }
}
