use std::fs;
use std::path::Path;

use tracing::debug;

use super::UsbgConfig;
use crate::error::{Result, UsbgError};

/// Load configuration from a JSON file
///
/// Missing keys fall back to their defaults.
pub fn load_config(path: &Path) -> Result<UsbgConfig> {
    let content = fs::read_to_string(path).map_err(|e| UsbgError::from_io(path, e))?;
    let config = serde_json::from_str(&content)
        .map_err(|e| UsbgError::parse(path, e.to_string()))?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Save configuration as pretty-printed JSON
pub fn save_config(path: &Path, config: &UsbgConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| UsbgError::InvalidParam(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, content).map_err(|e| UsbgError::from_io(path, e))
}
