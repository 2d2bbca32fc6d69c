//! usbrc command-line tool
//!
//! Lists attached USB devices and issues single control or bulk transfers,
//! with every native resource released through the usbrc library.

mod commands;
mod config;

use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use commands::{BulkOp, ControlParams};
use common::{DeviceSelector, setup_logging};
use config::CliConfig;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "usbrc")]
#[command(author, version, about = "usbrc - list and talk to USB devices")]
#[command(long_about = "
List attached USB devices, dump their configurations and issue single
control or bulk transfers. Interfaces claimed for a transfer are released
and handles closed before the command exits, even on failure.

EXAMPLES:
    # List devices
    usbrc list

    # List devices as JSON, with configuration trees in text mode
    usbrc list --json
    usbrc list --verbose

    # Show configuration 1 of the device at bus 1, address 4
    usbrc config --device 1:4

    # GET_DESCRIPTOR(DEVICE) on a device picked by VID:PID
    usbrc control --id 1209:0001 --request-type 0x80 --request 0x06 --value 0x0100 --length 18

    # Read 64 bytes from bulk endpoint 0x81 of interface 0
    usbrc bulk --id 1209:0001 --interface 0 --endpoint 0x81 --read 64

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usbrc/cli.toml
    3. /etc/usbrc/cli.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// libusb log verbosity, 0 (none) to 4 (debug)
    #[arg(long, value_name = "LEVEL", global = true)]
    usb_debug: Option<i32>,

    /// Transfer timeout in milliseconds, 0 waits forever
    #[arg(short, long, value_name = "MS", global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also print each device's first configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show a configuration descriptor
    Config {
        #[command(flatten)]
        selector: SelectorArgs,

        /// bConfigurationValue to look up
        #[arg(long, value_parser = parse_u8, default_value = "1")]
        value: u8,
    },

    /// Issue one control transfer
    Control {
        #[command(flatten)]
        selector: SelectorArgs,

        /// bmRequestType; bit 7 set reads from the device
        #[arg(long, value_parser = parse_u8)]
        request_type: u8,

        /// bRequest
        #[arg(long, value_parser = parse_u8)]
        request: u8,

        /// wValue
        #[arg(long, value_parser = parse_u16, default_value = "0")]
        value: u16,

        /// wIndex
        #[arg(long, value_parser = parse_u16, default_value = "0")]
        index: u16,

        /// Bytes to read for IN requests
        #[arg(long, value_parser = parse_u16, default_value = "0")]
        length: u16,

        /// Hex payload for OUT requests
        #[arg(long, value_parser = parse_hex_bytes)]
        data: Option<HexBytes>,

        /// Claim this interface for the duration of the transfer
        #[arg(long, value_parser = parse_u8)]
        interface: Option<u8>,
    },

    /// Issue one bulk transfer
    Bulk {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Interface to claim
        #[arg(long, value_parser = parse_u8)]
        interface: u8,

        /// Endpoint address, 0x80 bit set for IN
        #[arg(long, value_parser = parse_u8)]
        endpoint: u8,

        /// Read up to this many bytes
        #[arg(long, conflicts_with = "write", required_unless_present = "write")]
        read: Option<usize>,

        /// Hex payload to write
        #[arg(long, value_parser = parse_hex_bytes)]
        write: Option<HexBytes>,
    },
}

#[derive(ClapArgs, Debug)]
struct SelectorArgs {
    /// Device location as BUS:ADDR (decimal)
    #[arg(long, value_name = "BUS:ADDR", conflicts_with = "id", required_unless_present = "id")]
    device: Option<String>,

    /// Device ID as VID:PID (hex)
    #[arg(long, value_name = "VID:PID")]
    id: Option<String>,
}

impl SelectorArgs {
    fn selector(&self) -> Result<DeviceSelector> {
        let selector = match (&self.device, &self.id) {
            (Some(location), _) => DeviceSelector::parse_location(location)?,
            (None, Some(id)) => DeviceSelector::parse_id(id)?,
            (None, None) => return Err(anyhow!("Either --device or --id is required")),
        };
        Ok(selector)
    }
}

/// Decimal, or hex with a `0x` prefix
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    let n = parse_number(s)?;
    u8::try_from(n).map_err(|_| format!("{} does not fit in 8 bits", s))
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let n = parse_number(s)?;
    u16::try_from(n).map_err(|_| format!("{} does not fit in 16 bits", s))
}

/// Raw bytes given on the command line as hex
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

/// Hex string, optionally with spaces or colons between bytes
fn parse_hex_bytes(s: &str) -> std::result::Result<HexBytes, String> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);

    if !digits.is_ascii() {
        return Err(format!("'{}' is not valid hex", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("'{}' has an odd number of hex digits", s));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("'{}' is not valid hex", s))
        })
        .collect::<std::result::Result<Vec<u8>, String>>()
        .map(HexBytes)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;
    debug!("usbrc v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        return Err(anyhow!("No command given, see `usbrc --help`"));
    };

    let debug_level = args.usb_debug.unwrap_or(config.usb.debug_level);
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.usb.timeout());

    let context = usbrc::init(debug_level).context("Failed to initialize libusb")?;
    info!("libusb initialized (debug level {})", debug_level);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::List { json, verbose } => commands::list(&context, json, verbose, &mut out)?,
        Command::Config { selector, value } => {
            commands::show_config(&context, &selector.selector()?, value, &mut out)?
        }
        Command::Control {
            selector,
            request_type,
            request,
            value,
            index,
            length,
            data,
            interface,
        } => {
            let params = ControlParams {
                request_type,
                request,
                value,
                index,
                interface,
                data: data.map(|d| d.0).unwrap_or_default(),
                length,
            };
            commands::control(&context, &selector.selector()?, &params, timeout, &mut out)?
        }
        Command::Bulk {
            selector,
            interface,
            endpoint,
            read,
            write,
        } => {
            let op = match (read, write) {
                (Some(length), _) => BulkOp::Read(length),
                (None, Some(data)) => BulkOp::Write(data.0),
                (None, None) => return Err(anyhow!("Either --read or --write is required")),
            };
            commands::bulk(
                &context,
                &selector.selector()?,
                interface,
                endpoint,
                &op,
                timeout,
                &mut out,
            )?
        }
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x2a"), Ok(42));
        assert_eq!(parse_number("0X2A"), Ok(42));
        assert!(parse_number("0xzz").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn test_parse_widths() {
        assert_eq!(parse_u8("0xff"), Ok(0xff));
        assert!(parse_u8("256").is_err());
        assert_eq!(parse_u16("0x0100"), Ok(0x0100));
        assert!(parse_u16("0x10000").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("01ff"), Ok(HexBytes(vec![0x01, 0xff])));
        assert_eq!(
            parse_hex_bytes("de ad:be ef"),
            Ok(HexBytes(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert_eq!(parse_hex_bytes("0x0a"), Ok(HexBytes(vec![0x0a])));
        assert_eq!(parse_hex_bytes(""), Ok(HexBytes(vec![])));
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_cli_parses_bulk_read() {
        let args = Args::try_parse_from([
            "usbrc", "bulk", "--id", "1209:0001", "--interface", "0", "--endpoint", "0x81",
            "--read", "64",
        ])
        .unwrap();
        match args.command {
            Some(Command::Bulk {
                endpoint, read, ..
            }) => {
                assert_eq!(endpoint, 0x81);
                assert_eq!(read, Some(64));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_selector() {
        assert!(Args::try_parse_from(["usbrc", "config"]).is_err());
        assert!(
            Args::try_parse_from(["usbrc", "config", "--device", "1:2", "--id", "1:2"]).is_err()
        );
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
