//! SF100 protocol constants and types
//!
//! The SF100 speaks a vendor protocol made of USB control transfers for
//! commands and bulk IN transfers for aligned flash reads. The bring-up
//! exchanges were recovered by observing the vendor tool; several of them
//! (`CommandA`, `CommandC`) have no known meaning and are kept as opaque
//! named requests with the exact setup fields the firmware expects.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, Sf100Error};
use crate::voltage::Voltage;

// USB device identifiers
pub const SF100_USB_VENDOR: u16 = 0x0483;
pub const SF100_USB_PRODUCT: u16 = 0xDADA;

pub const USB_CONFIGURATION: u8 = 1;
pub const USB_INTERFACE: u8 = 0;
/// Bulk endpoint number used for flash reads
pub const BULK_ENDPOINT: u8 = 2;
/// EP2 IN
pub const BULK_IN_EP: u8 = 0x80 | BULK_ENDPOINT;

// USB request types
pub const REQTYPE_EP_OUT: u8 = 0x42; // OUT | VENDOR | RECIPIENT_ENDPOINT
pub const REQTYPE_EP_IN: u8 = 0xC2; // IN | VENDOR | RECIPIENT_ENDPOINT
pub const REQTYPE_OTHER_IN: u8 = 0xC3; // IN | VENDOR | RECIPIENT_OTHER

/// Deadline applied to every control and bulk transfer
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);

// Transfer limits
/// Largest write or read the firmware handles in one SPI transaction
pub const MAX_TRANSFER_LEN: usize = 16;
pub const BULK_CHUNK_SIZE: usize = 512;
/// The chunk count travels as a 16-bit field
pub const MAX_BULK_CHUNKS: usize = u16::MAX as usize;
/// Per-call limit handed to the chunked reader for unaligned residue
pub const SLOW_READ_CHUNK: usize = MAX_TRANSFER_LEN;
/// Per-call data limit for chunked writes: 1 opcode + 3 address bytes share the transaction
pub const SLOW_WRITE_CHUNK: usize = MAX_TRANSFER_LEN - 4;

// Bring-up
pub const DEVICE_STRING_LEN: usize = 16;
pub const MODEL_TAG: &str = "SF100";
/// Reply to each `CommandA` handshake
pub const HANDSHAKE_ACK: u8 = 0x6f;
/// Reply to `PrepareReceiveDeviceString`
pub const DEVICE_STRING_READY: u8 = 0xff;
/// Firmware majors known to work
pub const SUPPORTED_FIRMWARE_MAJOR: std::ops::RangeInclusive<u32> = 2..=5;

/// Raw USB control setup fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

impl fmt::Display for ControlSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type=0x{:02x} req=0x{:02x} value=0x{:04x} index=0x{:04x}",
            self.request_type, self.request, self.value, self.index
        )
    }
}

/// Every control exchange the SF100 understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Switch the target supply
    SetVoltage(Voltage),
    /// Shift bytes out on SPI; `reply` tells the firmware a
    /// `ReceiveSpi` follows
    SendSpi { reply: bool },
    /// Collect the bytes clocked in after `SendSpi`
    ReceiveSpi,
    /// Must answer 0xff before the identity string can be read
    PrepareReceiveDeviceString,
    /// 16-byte identity string
    ReceiveDeviceString,
    /// Handshake, must answer 0x6f
    CommandA,
    /// One-time initialisation, no payload and no reply
    CommandC,
    /// Arm a bulk read starting at `start`
    PrepareBulkRead { start: u32 },
}

impl Request {
    /// Setup packet for this request
    pub const fn setup(self) -> ControlSetup {
        let (request_type, request, value, index) = match self {
            Request::SetVoltage(v) => (REQTYPE_EP_OUT, 0x09, v.selector() as u16, 0xff),
            Request::SendSpi { reply } => (REQTYPE_EP_OUT, 0x01, 0xff, reply as u16),
            // wValue is 3000 in every captured trace
            Request::ReceiveSpi => (REQTYPE_EP_IN, 0x01, 0x0bb8, 0x0000),
            Request::PrepareReceiveDeviceString => (REQTYPE_OTHER_IN, 0x07, 0x00, 0xef03),
            Request::ReceiveDeviceString => (REQTYPE_EP_IN, 0x08, 0xff, 0xff),
            Request::CommandA => (REQTYPE_OTHER_IN, 0x0b, 0x00, 0x00),
            Request::CommandC => (REQTYPE_EP_OUT, 0x04, 0x00, 0x00),
            Request::PrepareBulkRead { start } => (
                REQTYPE_EP_OUT,
                0x20,
                (start & 0xffff) as u16,
                (start >> 16) as u16,
            ),
        };
        ControlSetup {
            request_type,
            request,
            value,
            index,
        }
    }
}

/// Payload of `PrepareBulkRead`: LE16 chunk count, LE16 chunk size
pub fn bulk_read_payload(chunk_count: u16) -> [u8; 4] {
    let count = chunk_count.to_le_bytes();
    let size = (BULK_CHUNK_SIZE as u16).to_le_bytes();
    [count[0], count[1], size[0], size[1]]
}

/// Firmware version reported in the identity string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major version within the tested range?
    pub fn is_supported(&self) -> bool {
        SUPPORTED_FIRMWARE_MAJOR.contains(&self.major)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Printable form of a raw identity string
pub fn device_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Parse a raw identity string of the form `"SF100 V:%d.%d.%d "`
pub fn parse_identity(raw: &[u8]) -> Result<FirmwareVersion> {
    let text = device_string(raw);
    let unsupported = || Sf100Error::UnsupportedDevice(format!("device string {:?}", text));

    let rest = text.strip_prefix(MODEL_TAG).ok_or_else(unsupported)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("V:").ok_or_else(unsupported)?;

    let mut parts = rest.splitn(3, '.');
    let major = parse_number(parts.next(), false).ok_or_else(unsupported)?;
    let minor = parse_number(parts.next(), false).ok_or_else(unsupported)?;
    let patch = parse_number(parts.next(), true).ok_or_else(unsupported)?;

    Ok(FirmwareVersion::new(major, minor, patch))
}

/// Check the firmware gate, failing with `UnsupportedDevice`
pub fn check_firmware(version: FirmwareVersion) -> Result<()> {
    if version.is_supported() {
        Ok(())
    } else {
        Err(Sf100Error::UnsupportedDevice(format!(
            "firmware {} is untested (supported majors: {}..={})",
            version,
            SUPPORTED_FIRMWARE_MAJOR.start(),
            SUPPORTED_FIRMWARE_MAJOR.end()
        )))
    }
}

/// Decimal field; `leading` accepts trailing text after the digits
fn parse_number(field: Option<&str>, leading: bool) -> Option<u32> {
    let field = field?;
    let end = field
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(field.len());
    if end == 0 || (!leading && end != field.len()) {
        return None;
    }
    field[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> [u8; DEVICE_STRING_LEN] {
        let mut raw = [0u8; DEVICE_STRING_LEN];
        raw[..s.len()].copy_from_slice(s.as_bytes());
        raw
    }

    #[test]
    fn test_request_table() {
        let table = [
            (Request::SetVoltage(Voltage::V1_8), (0x42, 0x09, 0x12, 0xff)),
            (Request::SendSpi { reply: true }, (0x42, 0x01, 0xff, 0x01)),
            (Request::SendSpi { reply: false }, (0x42, 0x01, 0xff, 0x00)),
            (Request::ReceiveSpi, (0xc2, 0x01, 0x0bb8, 0)),
            (Request::PrepareReceiveDeviceString, (0xc3, 0x07, 0, 0xef03)),
            (Request::ReceiveDeviceString, (0xc2, 0x08, 0xff, 0xff)),
            (Request::CommandA, (0xc3, 0x0b, 0, 0)),
            (Request::CommandC, (0x42, 0x04, 0, 0)),
        ];
        for (request, expected) in table {
            let s = request.setup();
            assert_eq!((s.request_type, s.request, s.value, s.index), expected);
        }
    }

    #[test]
    fn test_prepare_bulk_read_splits_address() {
        let s = Request::PrepareBulkRead { start: 0x0012_3400 }.setup();
        assert_eq!((s.request_type, s.request), (0x42, 0x20));
        assert_eq!(s.value, 0x3400);
        assert_eq!(s.index, 0x0012);

        assert_eq!(bulk_read_payload(3), [0x03, 0x00, 0x00, 0x02]);
        assert_eq!(bulk_read_payload(0x1234), [0x34, 0x12, 0x00, 0x02]);
    }

    #[test]
    fn test_parse_identity() {
        let v = parse_identity(&identity("SF100 V:5.1.9 ")).unwrap();
        assert_eq!(v, FirmwareVersion::new(5, 1, 9));
        assert_eq!(v.to_string(), "5.1.9");

        // Patch may run into trailing text
        let v = parse_identity(&identity("SF100 V:2.0.12x")).unwrap();
        assert_eq!(v, FirmwareVersion::new(2, 0, 12));
    }

    #[test]
    fn test_parse_identity_rejects_other_models() {
        assert!(matches!(
            parse_identity(&identity("SF600 V:7.2.21")),
            Err(Sf100Error::UnsupportedDevice(_))
        ));
        assert!(matches!(
            parse_identity(&identity("SF100 5.1.9")),
            Err(Sf100Error::UnsupportedDevice(_))
        ));
        assert!(matches!(
            parse_identity(&identity("SF100 V:5.x.9")),
            Err(Sf100Error::UnsupportedDevice(_))
        ));
        assert!(matches!(
            parse_identity(&[0xffu8; DEVICE_STRING_LEN]),
            Err(Sf100Error::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_firmware_gate() {
        for major in [1, 6] {
            let v = parse_identity(&identity(&format!("SF100 V:{}.0.0", major))).unwrap();
            assert!(matches!(
                check_firmware(v),
                Err(Sf100Error::UnsupportedDevice(_))
            ));
        }
        for major in 2..=5 {
            let v = parse_identity(&identity(&format!("SF100 V:{}.0.0", major))).unwrap();
            assert!(check_firmware(v).is_ok());
        }
    }

    #[test]
    fn test_device_string_trims_padding() {
        assert_eq!(device_string(&identity("SF100 V:5.1.9 ")), "SF100 V:5.1.9");
    }
}
