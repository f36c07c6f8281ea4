//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a byte for the raw SPI command, hex with or without `0x`
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid byte '{}': {}", s, e))
}

#[derive(Parser)]
#[command(name = "sfprog")]
#[command(author, version, about = "SF100 flash programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Which SF100 to use when several are attached (0-indexed)
    #[arg(long, default_value_t = 0, global = true)]
    pub device: usize,

    /// Target voltage: 0, 1.8V, 2.5V, 3.5V or millivolts (e.g. 1800mV)
    #[arg(long, default_value = "3.5V", global = true)]
    pub voltage: String,

    /// Run against an emulated adapter whose flash is loaded from this image
    #[arg(long, value_name = "IMAGE", global = true)]
    pub emulate: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached SF100 adapters
    List,

    /// Initialise the adapter and show its identity and the flash JEDEC ID
    Probe,

    /// Read a flash range to a file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start address (hex with 0x prefix, or decimal)
        #[arg(short, long, default_value = "0", value_parser = parse_hex_u32)]
        start: u32,

        /// Number of bytes to read (hex with 0x prefix, or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,
    },

    /// Program a file into flash (target range must already be erased)
    Write {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex with 0x prefix, or decimal)
        #[arg(short, long, default_value = "0", value_parser = parse_hex_u32)]
        start: u32,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Run one raw SPI transaction and print the response
    Spi {
        /// Bytes to send, in hex (e.g. 9f or 0x03 00 10 00)
        #[arg(required = true, value_parser = parse_hex_u8)]
        bytes: Vec<u8>,

        /// Number of bytes to read back (at most 16)
        #[arg(short, long, default_value_t = 0)]
        read: usize,
    },
}
