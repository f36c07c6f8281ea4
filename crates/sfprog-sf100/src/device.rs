//! Session configuration and opening

use std::time::Duration;

use crate::chunked::ChunkedIo;
use crate::error::{Result, Sf100Error};
use crate::protocol::DEFAULT_TIMEOUT;
use crate::session::Session;
use crate::transport::UsbTransport;
use crate::voltage::{parse_voltage, Voltage, DEFAULT_VOLTAGE_MV};

/// Configuration options for opening an SF100
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sf100Config {
    /// Device index (when multiple adapters are connected)
    pub device_index: usize,
    /// Target voltage in millivolts (0, 1800, 2500, 3500)
    pub voltage_mv: u32,
    /// Deadline for every USB transfer
    pub timeout: Duration,
}

impl Default for Sf100Config {
    fn default() -> Self {
        Self {
            device_index: 0,
            voltage_mv: DEFAULT_VOLTAGE_MV,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Sf100Config {
    /// Default configuration with the voltage taken from `spec`
    ///
    /// `None` keeps the 3.5V default.
    pub fn from_voltage_spec(spec: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(spec) = spec {
            config.voltage_mv = checked_voltage(spec)?;
        }
        Ok(config)
    }
}

/// Parse a voltage string and make sure the adapter can drive it
fn checked_voltage(spec: &str) -> Result<u32> {
    let millivolt = parse_voltage(spec)?;
    Voltage::from_millivolt(millivolt)?;
    Ok(millivolt)
}

/// Parse options from key=value pairs
pub fn parse_options(options: &[(&str, &str)]) -> Result<Sf100Config> {
    let mut config = Sf100Config::default();

    for (key, value) in options {
        match *key {
            "device" | "index" => {
                config.device_index = value
                    .parse()
                    .map_err(|_| Sf100Error::InvalidParameter(format!("device: {}", value)))?;
            }
            "voltage" => {
                config.voltage_mv = checked_voltage(value)?;
            }
            _ => {
                return Err(Sf100Error::InvalidParameter(format!(
                    "unknown option: {}",
                    key
                )));
            }
        }
    }

    Ok(config)
}

/// Bring up a session over `transport`
///
/// If bring-up fails the session is dropped and the caller has to start
/// over with a fresh transport.
pub fn init_session<T: UsbTransport, C: ChunkedIo>(
    transport: T,
    io: C,
    config: &Sf100Config,
) -> Result<Session<T, C>> {
    let mut session = Session::with_timeout(transport, io, config.timeout);
    session.initialize(config.voltage_mv)?;
    Ok(session)
}

/// Locate, claim and initialise the configured SF100
#[cfg(feature = "nusb")]
pub fn open<C: ChunkedIo>(
    config: &Sf100Config,
    io: C,
) -> Result<Session<crate::transport::usb::NusbTransport, C>> {
    let transport = crate::locate::open_transport(config.device_index)?;
    init_session(transport, io, config)
}
