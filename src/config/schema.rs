use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default ConfigFS mount point
pub const DEFAULT_CONFIGFS_PATH: &str = "/sys/kernel/config";

/// Default UDC class directory
pub const DEFAULT_UDC_CLASS_PATH: &str = "/sys/class/udc";

/// Maximum length of any path built by this crate
pub const DEFAULT_MAX_PATH_LEN: usize = 256;

/// Gadget container directory name under the ConfigFS mount
pub const GADGET_CONTAINER: &str = "usb_gadget";

/// Library configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbgConfig {
    /// ConfigFS mount point (the gadget container lives below it)
    pub configfs_path: PathBuf,
    /// Directory enumerating available USB device controllers
    pub udc_class_path: PathBuf,
    /// Paths longer than this are rejected before any I/O
    pub max_path_len: usize,
}

impl Default for UsbgConfig {
    fn default() -> Self {
        Self {
            configfs_path: PathBuf::from(DEFAULT_CONFIGFS_PATH),
            udc_class_path: PathBuf::from(DEFAULT_UDC_CLASS_PATH),
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

impl UsbgConfig {
    /// Configuration rooted at a specific ConfigFS mount
    pub fn with_configfs(configfs_path: impl AsRef<Path>) -> Self {
        Self {
            configfs_path: configfs_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Override the UDC class directory
    pub fn udc_class_path(mut self, path: impl AsRef<Path>) -> Self {
        self.udc_class_path = path.as_ref().to_path_buf();
        self
    }

    /// Gadget container path (`<configfs>/usb_gadget`)
    pub fn gadget_container(&self) -> PathBuf {
        self.configfs_path.join(GADGET_CONTAINER)
    }
}
