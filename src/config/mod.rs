//! Settings for locating the USB gadget ConfigFS tree

mod schema;
mod store;

pub use schema::UsbgConfig;
pub use store::{load_config, save_config};
