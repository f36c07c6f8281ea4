//! Target supply voltage
//!
//! The SF100 powers the flash chip itself. Four levels exist, each
//! addressed by a selector byte that has nothing to do with the millivolt
//! value.

use std::fmt;

use crate::channel::CommandChannel;
use crate::error::{Result, Sf100Error};
use crate::protocol::Request;
use crate::transport::UsbTransport;

/// Default target voltage (3.5V)
pub const DEFAULT_VOLTAGE_MV: u32 = 3500;

/// Supply levels the adapter can drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Voltage {
    Off,
    V1_8,
    V2_5,
    #[default]
    V3_5,
}

impl Voltage {
    pub const ALL: [Voltage; 4] = [Voltage::Off, Voltage::V1_8, Voltage::V2_5, Voltage::V3_5];

    /// Look up the level for a millivolt value
    pub fn from_millivolt(millivolt: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.millivolt() == millivolt)
            .ok_or(Sf100Error::UnsupportedVoltage(millivolt))
    }

    pub const fn millivolt(self) -> u32 {
        match self {
            Voltage::Off => 0,
            Voltage::V1_8 => 1800,
            Voltage::V2_5 => 2500,
            Voltage::V3_5 => 3500,
        }
    }

    /// Protocol selector byte
    pub const fn selector(self) -> u8 {
        match self {
            Voltage::Off => 0x00,
            Voltage::V1_8 => 0x12,
            Voltage::V2_5 => 0x11,
            Voltage::V3_5 => 0x10,
        }
    }
}

impl fmt::Display for Voltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mv = self.millivolt();
        write!(f, "{}.{:03}V", mv / 1000, mv % 1000)
    }
}

/// Switch the target supply
pub fn set_voltage<T: UsbTransport>(
    channel: &mut CommandChannel<T>,
    voltage: Voltage,
) -> Result<()> {
    let request = Request::SetVoltage(voltage);
    log::debug!(
        "Setting SPI voltage to {} (selector 0x{:02x})",
        voltage,
        voltage.selector()
    );

    let written = channel.control_write(request, &[])?;
    if written != 0 {
        return Err(Sf100Error::CommandRejected {
            request: request.setup().request,
            detail: format!(
                "voltage command reported {} bytes written, expected 0",
                written
            ),
        });
    }
    Ok(())
}

/// Parse a voltage string into millivolts
///
/// Accepted forms are `<integer>[<.|,><digits>][unit]`. With no unit or
/// `V` the value is in volts and up to three fractional digits add
/// millivolts (`"3.5V"`, `"3,5"`). With `mV`, `milliV` or `millivolt` the
/// integer part is taken as millivolts and any fraction is ignored
/// (`"1800mV"`).
pub fn parse_voltage(spec: &str) -> Result<u32> {
    if spec.is_empty() {
        return Err(Sf100Error::EmptyVoltageSpec);
    }
    let invalid = || Sf100Error::InvalidVoltageSpec(spec.to_string());

    let int_end = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    if int_end == 0 {
        return Err(invalid());
    }
    let integer: u32 = spec[..int_end].parse().map_err(|_| invalid())?;

    let mut rest = &spec[int_end..];
    let mut fraction = 0u32;
    if let Some(frac) = rest.strip_prefix(['.', ',']) {
        let digits_end = frac
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frac.len());
        let digits = frac[..digits_end].as_bytes();
        // Three digits of millivolts; anything finer is dropped
        for i in 0..3 {
            fraction *= 10;
            if let Some(d) = digits.get(i) {
                fraction += u32::from(d - b'0');
            }
        }
        rest = &frac[digits_end..];
    }

    match rest.to_ascii_lowercase().as_str() {
        "" | "v" => integer
            .checked_mul(1000)
            .and_then(|mv| mv.checked_add(fraction))
            .ok_or_else(invalid),
        "mv" | "milliv" | "millivolt" => Ok(integer),
        _ => Err(invalid()),
    }
}
