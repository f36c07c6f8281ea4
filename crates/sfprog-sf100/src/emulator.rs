//! In-memory SF100 emulator
//!
//! Answers every request the protocol core issues, backs SPI traffic with
//! a flash image and records each transfer so callers can check exactly
//! what went over the bus. Useful for tests and for dry runs without an
//! adapter attached.
//!
//! The SPI side understands just enough of a 25-series flash to be useful:
//! RDID, READ, WREN/WRDI, PAGE PROGRAM and RDSR.

use std::time::Duration;

use crate::error::{Result, Sf100Error};
use crate::protocol::{
    ControlSetup, Request, BULK_IN_EP, DEVICE_STRING_LEN, DEVICE_STRING_READY, HANDSHAKE_ACK,
    USB_CONFIGURATION, USB_INTERFACE,
};
use crate::transport::UsbTransport;
use crate::voltage::Voltage;

// SPI opcodes the emulated flash answers
const RDID: u8 = 0x9f;
const READ: u8 = 0x03;
const WREN: u8 = 0x06;
const WRDI: u8 = 0x04;
const PP: u8 = 0x02;
const RDSR: u8 = 0x05;

const PAGE_SIZE: usize = 256;
const STATUS_WIP: u8 = 0x01;
const STATUS_WEL: u8 = 0x02;

/// Default identity, a firmware inside the supported range
pub const DEFAULT_IDENTITY: &str = "SF100 V:5.1.9 ";
/// Winbond W25Q128FV
pub const JEDEC_ID: [u8; 3] = [0xef, 0x40, 0x18];

/// What kind of bus operation a [`TransferRecord`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Claim,
    ControlIn,
    ControlOut,
    BulkIn,
    Release,
    Close,
}

/// One recorded bus operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub kind: TransferKind,
    /// Setup packet for control transfers
    pub setup: Option<ControlSetup>,
    /// Payload written (OUT) or returned (IN)
    pub data: Vec<u8>,
    /// Requested length
    pub len: usize,
}

/// Fault injection knobs
///
/// Everything defaults to a well-behaved adapter.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Reply byte for `CommandA` instead of 0x6f
    pub handshake_reply: Option<u8>,
    /// Reply byte for `PrepareReceiveDeviceString` instead of 0xff
    pub device_string_ready: Option<u8>,
    /// Return one byte less of the identity string
    pub short_device_string: bool,
    /// `SendSpi` reports one byte less than it was given
    pub short_spi_write: bool,
    /// `ReceiveSpi` returns one byte less than requested
    pub short_spi_read: bool,
    /// Report one written byte when this level is requested
    pub reject_voltage: Option<Voltage>,
    /// Byte count reported by `CommandC`
    pub command_c_reply_len: usize,
    /// Byte count reported by `PrepareBulkRead` instead of the payload length
    pub prepare_bulk_reply_len: Option<usize>,
    /// Index of the bulk chunk (counted over the emulator lifetime) to cut short
    pub short_bulk_chunk: Option<usize>,
    pub fail_claim: bool,
    pub fail_release: bool,
    /// Index of the transfer (see [`Sf100Emulator::transfer_count`]) that times out
    pub timeout_after: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct BulkArm {
    next_addr: usize,
    remaining: u16,
    chunk_size: usize,
}

/// In-memory SF100 with an attached flash chip
pub struct Sf100Emulator {
    /// Injected faults, change at any time
    pub faults: Faults,
    /// RDSR polls that report WIP after each page program
    pub busy_polls: usize,
    identity: [u8; DEVICE_STRING_LEN],
    flash: Vec<u8>,
    write_enabled: bool,
    busy: usize,
    pending_spi: Option<Vec<u8>>,
    bulk: Option<BulkArm>,
    bulk_chunks_served: usize,
    claimed: bool,
    closed: bool,
    voltage: Voltage,
    voltage_history: Vec<Voltage>,
    command_c_count: usize,
    log: Vec<TransferRecord>,
}

impl Sf100Emulator {
    /// Emulator with a blank flash of `size` bytes
    pub fn new(size: usize) -> Self {
        Self::with_flash(vec![0xff; size])
    }

    /// Emulator backed by an existing flash image
    pub fn with_flash(flash: Vec<u8>) -> Self {
        let mut emulator = Self {
            faults: Faults::default(),
            busy_polls: 0,
            identity: [0; DEVICE_STRING_LEN],
            flash,
            write_enabled: false,
            busy: 0,
            pending_spi: None,
            bulk: None,
            bulk_chunks_served: 0,
            claimed: false,
            closed: false,
            voltage: Voltage::Off,
            voltage_history: Vec::new(),
            command_c_count: 0,
            log: Vec::new(),
        };
        emulator.set_identity(DEFAULT_IDENTITY);
        emulator
    }

    /// Replace the identity string, truncated or NUL-padded to 16 bytes
    pub fn set_identity(&mut self, identity: &str) {
        let bytes = identity.as_bytes();
        let len = bytes.len().min(DEVICE_STRING_LEN);
        self.identity = [0; DEVICE_STRING_LEN];
        self.identity[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Every transfer issued so far, oldest first
    pub fn log(&self) -> &[TransferRecord] {
        &self.log
    }

    pub fn transfer_count(&self) -> usize {
        self.log.len()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Control transfers matching `request`'s setup packet
    pub fn count_requests(&self, request: Request) -> usize {
        let setup = request.setup();
        self.log.iter().filter(|r| r.setup == Some(setup)).count()
    }

    /// Current target supply
    pub fn voltage(&self) -> Voltage {
        self.voltage
    }

    /// Every accepted voltage change, oldest first
    pub fn voltage_history(&self) -> &[Voltage] {
        &self.voltage_history
    }

    pub fn command_c_count(&self) -> usize {
        self.command_c_count
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(
        &mut self,
        kind: TransferKind,
        setup: Option<ControlSetup>,
        data: &[u8],
        len: usize,
    ) -> Result<()> {
        let index = self.log.len();
        self.log.push(TransferRecord {
            kind,
            setup,
            data: data.to_vec(),
            len,
        });

        if self.faults.timeout_after == Some(index) {
            return Err(Sf100Error::Timeout);
        }
        if self.closed && kind != TransferKind::Claim {
            return Err(Sf100Error::Transfer("device closed".to_string()));
        }
        Ok(())
    }

    fn stall(setup: ControlSetup) -> Sf100Error {
        Sf100Error::Transfer(format!("endpoint stalled on {}", setup))
    }

    fn status(&mut self) -> u8 {
        let mut status = 0;
        if self.busy > 0 {
            self.busy -= 1;
            status |= STATUS_WIP;
        }
        if self.write_enabled {
            status |= STATUS_WEL;
        }
        status
    }

    /// Side effects of an SPI command as it is shifted out
    fn execute_spi(&mut self, cmd: &[u8]) {
        match cmd.first().copied() {
            Some(WREN) => self.write_enabled = true,
            Some(WRDI) => self.write_enabled = false,
            Some(PP) if cmd.len() >= 4 && self.write_enabled && self.busy == 0 => {
                let addr = address(&cmd[1..4]);
                let page = addr - addr % PAGE_SIZE;
                for (i, &byte) in cmd[4..].iter().enumerate() {
                    // Page program wraps inside the page like real parts do
                    let at = page + (addr % PAGE_SIZE + i) % PAGE_SIZE;
                    if let Some(cell) = self.flash.get_mut(at) {
                        *cell &= byte;
                    }
                }
                self.write_enabled = false;
                self.busy = self.busy_polls;
            }
            _ => {}
        }
    }

    /// Bytes clocked in after `cmd`
    fn spi_response(&mut self, cmd: &[u8], len: usize) -> Vec<u8> {
        match cmd.first().copied() {
            Some(RDID) => (0..len)
                .map(|i| JEDEC_ID.get(i).copied().unwrap_or(0xff))
                .collect(),
            Some(RDSR) => (0..len).map(|_| self.status()).collect(),
            Some(READ) if cmd.len() >= 4 => {
                let addr = address(&cmd[1..4]);
                (0..len)
                    .map(|i| self.flash.get(addr + i).copied().unwrap_or(0xff))
                    .collect()
            }
            _ => vec![0xff; len],
        }
    }

    fn arm_bulk(&mut self, setup: ControlSetup, data: &[u8]) -> Result<usize> {
        if data.len() != 4 {
            return Err(Self::stall(setup));
        }
        let start = (u32::from(setup.index) << 16) | u32::from(setup.value);
        let remaining = u16::from_le_bytes([data[0], data[1]]);
        let chunk_size = usize::from(u16::from_le_bytes([data[2], data[3]]));
        self.bulk = Some(BulkArm {
            next_addr: start as usize,
            remaining,
            chunk_size,
        });
        Ok(self.faults.prepare_bulk_reply_len.unwrap_or(data.len()))
    }
}

fn address(bytes: &[u8]) -> usize {
    (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
}

impl UsbTransport for Sf100Emulator {
    fn claim(&mut self, configuration: u8, interface: u8) -> Result<()> {
        self.record(TransferKind::Claim, None, &[], 0)?;
        if self.faults.fail_claim {
            return Err(Sf100Error::ClaimFailed("emulated claim failure".to_string()));
        }
        if configuration != USB_CONFIGURATION || interface != USB_INTERFACE {
            return Err(Sf100Error::ClaimFailed(format!(
                "no configuration {} / interface {}",
                configuration, interface
            )));
        }
        self.claimed = true;
        self.closed = false;
        Ok(())
    }

    fn control_in(
        &mut self,
        setup: ControlSetup,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        self.record(TransferKind::ControlIn, Some(setup), &[], buf.len())?;

        let reply: Vec<u8> = if setup == Request::CommandA.setup() {
            vec![self.faults.handshake_reply.unwrap_or(HANDSHAKE_ACK)]
        } else if setup == Request::PrepareReceiveDeviceString.setup() {
            vec![self
                .faults
                .device_string_ready
                .unwrap_or(DEVICE_STRING_READY)]
        } else if setup == Request::ReceiveDeviceString.setup() {
            let len = if self.faults.short_device_string {
                DEVICE_STRING_LEN - 1
            } else {
                DEVICE_STRING_LEN
            };
            self.identity[..len].to_vec()
        } else if setup == Request::ReceiveSpi.setup() {
            let cmd = self.pending_spi.take().ok_or_else(|| Self::stall(setup))?;
            let mut reply = self.spi_response(&cmd, buf.len());
            if self.faults.short_spi_read {
                reply.pop();
            }
            reply
        } else {
            return Err(Self::stall(setup));
        };

        let len = reply.len().min(buf.len());
        buf[..len].copy_from_slice(&reply[..len]);
        if let Some(last) = self.log.last_mut() {
            last.data = buf[..len].to_vec();
        }
        Ok(len)
    }

    fn control_out(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        self.record(TransferKind::ControlOut, Some(setup), data, data.len())?;

        if setup == Request::CommandC.setup() {
            self.command_c_count += 1;
            return Ok(self.faults.command_c_reply_len);
        }
        if setup == (Request::SendSpi { reply: true }).setup()
            || setup == (Request::SendSpi { reply: false }).setup()
        {
            self.execute_spi(data);
            self.pending_spi = (setup.index != 0).then(|| data.to_vec());
            let written = if self.faults.short_spi_write {
                data.len().saturating_sub(1)
            } else {
                data.len()
            };
            return Ok(written);
        }
        if setup.request == (Request::PrepareBulkRead { start: 0 }).setup().request {
            return self.arm_bulk(setup, data);
        }
        if setup.request == Request::SetVoltage(Voltage::Off).setup().request {
            let voltage = Voltage::ALL
                .into_iter()
                .find(|v| Request::SetVoltage(*v).setup() == setup)
                .ok_or_else(|| Self::stall(setup))?;
            if self.faults.reject_voltage == Some(voltage) {
                return Ok(1);
            }
            self.voltage = voltage;
            self.voltage_history.push(voltage);
            return Ok(0);
        }
        Err(Self::stall(setup))
    }

    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        self.record(TransferKind::BulkIn, None, &[], buf.len())?;
        if endpoint != BULK_IN_EP {
            return Err(Sf100Error::Transfer(format!(
                "no bulk IN endpoint 0x{:02x}",
                endpoint
            )));
        }

        // Nothing armed: the device NAKs until the deadline passes
        let Some(mut arm) = self.bulk.filter(|a| a.remaining > 0) else {
            return Err(Sf100Error::Timeout);
        };

        let index = self.bulk_chunks_served;
        self.bulk_chunks_served += 1;
        let mut len = arm.chunk_size.min(buf.len());
        if self.faults.short_bulk_chunk == Some(index) {
            len /= 2;
        }
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = self.flash.get(arm.next_addr + i).copied().unwrap_or(0xff);
        }

        arm.next_addr += arm.chunk_size;
        arm.remaining -= 1;
        self.bulk = Some(arm);
        Ok(len)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        self.record(TransferKind::Release, None, &[], 0)?;
        if self.faults.fail_release {
            return Err(Sf100Error::Transfer("emulated release failure".to_string()));
        }
        if !self.claimed || interface != USB_INTERFACE {
            return Err(Sf100Error::Transfer(format!(
                "interface {} not claimed",
                interface
            )));
        }
        self.claimed = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record(TransferKind::Close, None, &[], 0)?;
        self.claimed = false;
        self.closed = true;
        self.bulk = None;
        Ok(())
    }
}
