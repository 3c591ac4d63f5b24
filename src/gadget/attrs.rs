//! Device attributes and string tables

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::UsbgError;

/// USB language id for US English
pub const LANG_US_ENG: u16 = 0x0409;

/// Numeric device descriptor attribute of a gadget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GadgetAttr {
    BcdUsb,
    DeviceClass,
    DeviceSubClass,
    DeviceProtocol,
    MaxPacketSize0,
    IdVendor,
    IdProduct,
    BcdDevice,
}

impl GadgetAttr {
    pub const ALL: [GadgetAttr; 8] = [
        GadgetAttr::BcdUsb,
        GadgetAttr::DeviceClass,
        GadgetAttr::DeviceSubClass,
        GadgetAttr::DeviceProtocol,
        GadgetAttr::MaxPacketSize0,
        GadgetAttr::IdVendor,
        GadgetAttr::IdProduct,
        GadgetAttr::BcdDevice,
    ];

    /// Attribute file name in the gadget directory
    pub fn file_name(&self) -> &'static str {
        match self {
            GadgetAttr::BcdUsb => "bcdUSB",
            GadgetAttr::DeviceClass => "bDeviceClass",
            GadgetAttr::DeviceSubClass => "bDeviceSubClass",
            GadgetAttr::DeviceProtocol => "bDeviceProtocol",
            GadgetAttr::MaxPacketSize0 => "bMaxPacketSize0",
            GadgetAttr::IdVendor => "idVendor",
            GadgetAttr::IdProduct => "idProduct",
            GadgetAttr::BcdDevice => "bcdDevice",
        }
    }

    /// Largest value the attribute can hold
    pub fn max(&self) -> u32 {
        match self {
            GadgetAttr::BcdUsb
            | GadgetAttr::IdVendor
            | GadgetAttr::IdProduct
            | GadgetAttr::BcdDevice => u16::MAX as u32,
            _ => u8::MAX as u32,
        }
    }

    /// Number of hex digits written for the attribute
    pub fn hex_digits(&self) -> usize {
        if self.max() > u8::MAX as u32 {
            4
        } else {
            2
        }
    }
}

impl fmt::Display for GadgetAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

impl FromStr for GadgetAttr {
    type Err = UsbgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GadgetAttr::ALL
            .into_iter()
            .find(|attr| attr.file_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UsbgError::InvalidParam(format!("Unknown gadget attribute: {}", s)))
    }
}

/// Device descriptor values of a gadget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GadgetAttrs {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
}

impl GadgetAttrs {
    pub fn get(&self, attr: GadgetAttr) -> u32 {
        match attr {
            GadgetAttr::BcdUsb => self.bcd_usb as u32,
            GadgetAttr::DeviceClass => self.device_class as u32,
            GadgetAttr::DeviceSubClass => self.device_sub_class as u32,
            GadgetAttr::DeviceProtocol => self.device_protocol as u32,
            GadgetAttr::MaxPacketSize0 => self.max_packet_size0 as u32,
            GadgetAttr::IdVendor => self.id_vendor as u32,
            GadgetAttr::IdProduct => self.id_product as u32,
            GadgetAttr::BcdDevice => self.bcd_device as u32,
        }
    }

    /// Store a value already checked against [`GadgetAttr::max`]
    pub(crate) fn set(&mut self, attr: GadgetAttr, value: u32) {
        debug_assert!(value <= attr.max());
        match attr {
            GadgetAttr::BcdUsb => self.bcd_usb = value as u16,
            GadgetAttr::DeviceClass => self.device_class = value as u8,
            GadgetAttr::DeviceSubClass => self.device_sub_class = value as u8,
            GadgetAttr::DeviceProtocol => self.device_protocol = value as u8,
            GadgetAttr::MaxPacketSize0 => self.max_packet_size0 = value as u8,
            GadgetAttr::IdVendor => self.id_vendor = value as u16,
            GadgetAttr::IdProduct => self.id_product = value as u16,
            GadgetAttr::BcdDevice => self.bcd_device = value as u16,
        }
    }
}

/// String descriptor field of a gadget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StringField {
    SerialNumber,
    Manufacturer,
    Product,
}

impl StringField {
    pub const ALL: [StringField; 3] = [
        StringField::SerialNumber,
        StringField::Manufacturer,
        StringField::Product,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            StringField::SerialNumber => "serialnumber",
            StringField::Manufacturer => "manufacturer",
            StringField::Product => "product",
        }
    }
}

impl FromStr for StringField {
    type Err = UsbgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StringField::ALL
            .into_iter()
            .find(|field| field.file_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UsbgError::InvalidParam(format!("Unknown string field: {}", s)))
    }
}

/// Serial number, manufacturer and product strings for one language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GadgetStrings {
    pub serial_number: String,
    pub manufacturer: String,
    pub product: String,
}

impl GadgetStrings {
    pub fn get(&self, field: StringField) -> &str {
        match field {
            StringField::SerialNumber => &self.serial_number,
            StringField::Manufacturer => &self.manufacturer,
            StringField::Product => &self.product,
        }
    }

    pub(crate) fn set(&mut self, field: StringField, value: String) {
        match field {
            StringField::SerialNumber => self.serial_number = value,
            StringField::Manufacturer => self.manufacturer = value,
            StringField::Product => self.product = value,
        }
    }
}

/// Configuration descriptor attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigAttrs {
    /// `bmAttributes` (bit 7 must stay set per USB 2.0)
    pub bm_attributes: u8,
    /// `MaxPower` in mA
    pub max_power: u16,
}

impl Default for ConfigAttrs {
    fn default() -> Self {
        Self {
            bm_attributes: 0x80,
            max_power: 0,
        }
    }
}
