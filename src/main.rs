use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usbg::config::{load_config, UsbgConfig};
use usbg::gadget::codec::decode_lang;
use usbg::{
    ConfigKey, FunctionKey, FunctionType, GadgetAttr, GadgetAttrs, LocalStorage, State,
    StringField,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// usbg command line arguments
#[derive(Parser, Debug)]
#[command(name = "usbg")]
#[command(version, about = "Inspect and modify USB gadgets in ConfigFS", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// ConfigFS mount point (overrides config file)
    #[arg(long, value_name = "DIR", env = "USBG_CONFIGFS")]
    configfs: Option<PathBuf>,

    /// UDC class directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    udc_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the gadget tree as JSON
    Show,
    /// List available USB device controllers
    Udcs,
    /// Create a gadget
    CreateGadget {
        name: String,
        /// idVendor (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_number)]
        vendor_id: Option<u32>,
        /// idProduct (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_number)]
        product_id: Option<u32>,
    },
    /// Remove a gadget with its functions and configs
    RemoveGadget { name: String },
    /// Create a function (e.g., `acm usb0`)
    CreateFunction {
        gadget: String,
        ftype: FunctionType,
        instance: String,
    },
    /// Create a config (e.g., `1 c`)
    CreateConfig { gadget: String, id: u8, label: String },
    /// Bind a function into a config
    Bind {
        gadget: String,
        /// Config directory name (e.g., "c.1")
        config: String,
        /// Function directory name (e.g., "acm.usb0")
        function: String,
    },
    /// Remove a binding from a config
    Unbind {
        gadget: String,
        config: String,
        link: String,
    },
    /// Bind a gadget to a UDC (first available when omitted)
    Enable { gadget: String, udc: Option<String> },
    /// Unbind a gadget from its UDC
    Disable { gadget: String },
    /// Set a gadget string (serialnumber, manufacturer, product)
    SetString {
        gadget: String,
        /// Language id (e.g., 0x409)
        #[arg(value_parser = parse_lang)]
        lang: u16,
        field: StringField,
        value: String,
    },
    /// Set a device attribute (e.g., idVendor 0x1d6b)
    SetAttr {
        gadget: String,
        attr: GadgetAttr,
        #[arg(value_parser = parse_number)]
        value: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => UsbgConfig::default(),
    };
    if let Some(path) = args.configfs {
        config.configfs_path = path;
    }
    if let Some(path) = args.udc_dir {
        config.udc_class_path = path;
    }
    tracing::debug!("Using ConfigFS at {}", config.configfs_path.display());

    let mut state = State::scan(&config, Arc::new(LocalStorage::new()))
        .with_context(|| format!("Failed to scan {}", config.gadget_container().display()))?;

    run(&mut state, args.command)
}

fn run(state: &mut State, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Show => {
            println!("{}", serde_json::to_string_pretty(state)?);
        }
        Command::Udcs => {
            for udc in state.udcs() {
                println!("{}", udc);
            }
        }
        Command::CreateGadget {
            name,
            vendor_id,
            product_id,
        } => {
            if vendor_id.is_none() && product_id.is_none() {
                state.create_gadget(&name)?;
            } else {
                let attrs = GadgetAttrs {
                    id_vendor: narrow_u16(vendor_id.unwrap_or(0), "vendor id")?,
                    id_product: narrow_u16(product_id.unwrap_or(0), "product id")?,
                    ..Default::default()
                };
                state.create_gadget_with(&name, &attrs)?;
            }
        }
        Command::RemoveGadget { name } => state.remove_gadget(&name)?,
        Command::CreateFunction {
            gadget,
            ftype,
            instance,
        } => {
            gadget_mut(state, &gadget)?.create_function(ftype, &instance)?;
        }
        Command::CreateConfig { gadget, id, label } => {
            gadget_mut(state, &gadget)?.create_config(id, &label)?;
        }
        Command::Bind {
            gadget,
            config,
            function,
        } => {
            let config = ConfigKey::parse(&config)?;
            let function = FunctionKey::parse(&function)?;
            gadget_mut(state, &gadget)?.add_binding(&config, &function)?;
        }
        Command::Unbind {
            gadget,
            config,
            link,
        } => {
            let config = ConfigKey::parse(&config)?;
            gadget_mut(state, &gadget)?.remove_binding(&config, &link)?;
        }
        Command::Enable { gadget, udc } => state.enable_gadget(&gadget, udc.as_deref())?,
        Command::Disable { gadget } => state.disable_gadget(&gadget)?,
        Command::SetString {
            gadget,
            lang,
            field,
            value,
        } => {
            gadget_mut(state, &gadget)?.set_string(lang, field, &value)?;
        }
        Command::SetAttr {
            gadget,
            attr,
            value,
        } => {
            gadget_mut(state, &gadget)?.set_attr(attr, value)?;
        }
    }
    Ok(())
}

fn gadget_mut<'a>(state: &'a mut State, name: &str) -> anyhow::Result<usbg::GadgetMut<'a>> {
    state
        .gadget_mut(name)
        .with_context(|| format!("Gadget {} not found", name))
}

fn narrow_u16(value: u32, what: &str) -> anyhow::Result<u16> {
    u16::try_from(value).with_context(|| format!("{} 0x{:x} out of range", what, value))
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_lang(s: &str) -> Result<u16, String> {
    decode_lang(s).ok_or_else(|| format!("invalid language id '{}'", s))
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usbg=error",
        LogLevel::Warn => "usbg=warn",
        LogLevel::Info => "usbg=info",
        LogLevel::Verbose => "usbg=debug",
        LogLevel::Debug => "usbg=debug",
        LogLevel::Trace => "usbg=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
