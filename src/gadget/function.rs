//! USB gadget functions

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Result, UsbgError};
use crate::utils::path::{bounded_join, collate};

/// Function type, as used in the `<type>.<instance>` directory name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionType {
    /// Generic serial
    Serial,
    /// CDC ACM serial
    Acm,
    /// OBEX
    Obex,
    /// CDC ECM ethernet
    Ecm,
    /// CDC subset ethernet
    Subset,
    /// CDC NCM ethernet
    Ncm,
    /// CDC EEM ethernet
    Eem,
    /// RNDIS ethernet
    Rndis,
    Phonet,
    /// FunctionFS (userspace function)
    Ffs,
    MassStorage,
    Hid,
    Midi,
    Uac1,
    Uac2,
    Uvc,
    Printer,
    Loopback,
    SourceSink,
}

impl FunctionType {
    pub const ALL: [FunctionType; 19] = [
        FunctionType::Serial,
        FunctionType::Acm,
        FunctionType::Obex,
        FunctionType::Ecm,
        FunctionType::Subset,
        FunctionType::Ncm,
        FunctionType::Eem,
        FunctionType::Rndis,
        FunctionType::Phonet,
        FunctionType::Ffs,
        FunctionType::MassStorage,
        FunctionType::Hid,
        FunctionType::Midi,
        FunctionType::Uac1,
        FunctionType::Uac2,
        FunctionType::Uvc,
        FunctionType::Printer,
        FunctionType::Loopback,
        FunctionType::SourceSink,
    ];

    /// Kernel function driver name
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionType::Serial => "gser",
            FunctionType::Acm => "acm",
            FunctionType::Obex => "obex",
            FunctionType::Ecm => "ecm",
            FunctionType::Subset => "geth",
            FunctionType::Ncm => "ncm",
            FunctionType::Eem => "eem",
            FunctionType::Rndis => "rndis",
            FunctionType::Phonet => "phonet",
            FunctionType::Ffs => "ffs",
            FunctionType::MassStorage => "mass_storage",
            FunctionType::Hid => "hid",
            FunctionType::Midi => "midi",
            FunctionType::Uac1 => "uac1",
            FunctionType::Uac2 => "uac2",
            FunctionType::Uvc => "uvc",
            FunctionType::Printer => "printer",
            FunctionType::Loopback => "Loopback",
            FunctionType::SourceSink => "SourceSink",
        }
    }

    /// Whether the function is one of the network variants
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FunctionType::Ecm
                | FunctionType::Subset
                | FunctionType::Ncm
                | FunctionType::Eem
                | FunctionType::Rndis
        )
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FunctionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for FunctionType {
    type Err = UsbgError;

    fn from_str(s: &str) -> Result<Self> {
        FunctionType::ALL
            .into_iter()
            .find(|ftype| ftype.as_str() == s)
            .ok_or_else(|| UsbgError::InvalidParam(format!("Unknown function type: {}", s)))
    }
}

/// Identity of a function within its gadget
///
/// Ordered by the derived `<type>.<instance>` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionKey {
    pub ftype: FunctionType,
    pub instance: String,
}

impl FunctionKey {
    pub fn new(ftype: FunctionType, instance: impl Into<String>) -> Self {
        Self {
            ftype,
            instance: instance.into(),
        }
    }

    /// Directory name (e.g., "hid.usb0", "mass_storage.usb0")
    pub fn name(&self) -> String {
        format!("{}.{}", self.ftype.as_str(), self.instance)
    }

    /// Parse a `<type>.<instance>` directory name
    pub fn parse(name: &str) -> Result<Self> {
        let (ftype, instance) = name.split_once('.').ok_or_else(|| {
            UsbgError::InvalidParam(format!("Function name without instance: {}", name))
        })?;
        let key = Self::new(ftype.parse()?, instance);
        key.validate()?;
        Ok(key)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_component(&self.instance, "function instance")
    }
}

impl Ord for FunctionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        collate(&self.name(), &other.name())
    }
}

impl PartialOrd for FunctionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ftype, self.instance)
    }
}

/// A function instance of a gadget
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    #[serde(flatten)]
    key: FunctionKey,
    name: String,
    path: PathBuf,
}

impl Function {
    /// Build a function living in the gadget's `functions` directory
    pub(crate) fn new(key: FunctionKey, functions_path: &Path, max_path_len: usize) -> Result<Self> {
        key.validate()?;
        let name = key.name();
        let path = bounded_join(functions_path, &name, max_path_len)?;
        Ok(Self { key, name, path })
    }

    pub fn key(&self) -> &FunctionKey {
        &self.key
    }

    pub fn function_type(&self) -> FunctionType {
        self.key.ftype
    }

    pub fn instance(&self) -> &str {
        &self.key.instance
    }

    /// Directory name (e.g., "acm.usb0")
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Function {}

/// Reject names that cannot be a single path component
pub(crate) fn validate_component(value: &str, what: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(UsbgError::InvalidParam(format!("Empty or reserved {}", what)));
    }
    if value.contains('/') || value.contains('\0') {
        return Err(UsbgError::InvalidParam(format!(
            "Invalid character in {}: {:?}",
            what, value
        )));
    }
    Ok(())
}
