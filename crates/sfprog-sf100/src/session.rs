//! SF100 session
//!
//! A [`Session`] owns the transport for its whole life. Bring-up walks a
//! fixed sequence of states and every transfer-issuing operation needs the
//! session to be [`SessionState::Ready`]:
//!
//! ```text
//! Unopened -> Claimed -> IdentityVerified -> Initialized -> Ready -> Closed
//! ```
//!
//! Any failure leaves the session in the last state it reached. Nothing is
//! rolled back and nothing is retried.

use std::time::Duration;

use crate::bulk;
use crate::channel::CommandChannel;
use crate::chunked::{ChunkedIo, SpiTransceiver};
use crate::error::{Result, Sf100Error};
use crate::plan::ChunkPlan;
use crate::protocol::{
    check_firmware, device_string, parse_identity, FirmwareVersion, Request, DEFAULT_TIMEOUT,
    DEVICE_STRING_LEN, DEVICE_STRING_READY, HANDSHAKE_ACK, SLOW_READ_CHUNK, SLOW_WRITE_CHUNK,
    USB_CONFIGURATION, USB_INTERFACE,
};
use crate::transport::UsbTransport;
use crate::voltage::{set_voltage, Voltage};

/// Bring-up state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Claimed,
    IdentityVerified,
    Initialized,
    Ready,
    Closed,
}

/// An SF100 adapter and the flash chip behind it
pub struct Session<T: UsbTransport, C: ChunkedIo> {
    channel: CommandChannel<T>,
    io: C,
    state: SessionState,
    firmware: Option<FirmwareVersion>,
    device_string: Option<String>,
    /// CommandC has been accepted
    init_done: bool,
    /// The target supply may be on
    powered: bool,
    shutdown_attempted: bool,
}

impl<T: UsbTransport, C: ChunkedIo> Session<T, C> {
    /// Wrap a transport; nothing is sent until [`Session::initialize`]
    pub fn new(transport: T, io: C) -> Self {
        Self::with_timeout(transport, io, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(transport: T, io: C, timeout: Duration) -> Self {
        Self {
            channel: CommandChannel::with_timeout(transport, timeout),
            io,
            state: SessionState::Unopened,
            firmware: None,
            device_string: None,
            init_done: false,
            powered: false,
            shutdown_attempted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Firmware version once the identity has been verified
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    /// Identity string as reported by the adapter
    pub fn device_string(&self) -> Option<&str> {
        self.device_string.as_deref()
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    pub fn chunked_io(&self) -> &C {
        &self.io
    }

    /// Bring the adapter up and power the target at `voltage_mv`
    ///
    /// On an already initialised session the handshake, identity check
    /// and voltage step are repeated without claiming again. The one-time
    /// `CommandC` is never sent twice.
    pub fn initialize(&mut self, voltage_mv: u32) -> Result<()> {
        let voltage = Voltage::from_millivolt(voltage_mv)?;

        match self.state {
            SessionState::Closed => {
                return Err(Sf100Error::SessionNotReady { state: self.state });
            }
            SessionState::Unopened => self.claim()?,
            _ => self.transition(SessionState::Claimed),
        }

        self.handshake()?;
        self.verify_identity()?;

        if !self.init_done {
            self.one_time_init()?;
            self.init_done = true;
        }
        self.transition(SessionState::Initialized);

        set_voltage(&mut self.channel, voltage)?;
        self.powered = voltage != Voltage::Off;
        log::info!("SF100 target voltage set to {}", voltage);
        self.transition(SessionState::Ready);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("SF100 session: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn claim(&mut self) -> Result<()> {
        self.channel
            .transport_mut()
            .claim(USB_CONFIGURATION, USB_INTERFACE)?;
        self.transition(SessionState::Claimed);
        Ok(())
    }

    fn handshake(&mut self) -> Result<()> {
        for _ in 0..2 {
            let reply = self.channel.control_read(Request::CommandA, 1)?;
            expect_byte("command A", &reply, HANDSHAKE_ACK)?;
        }
        Ok(())
    }

    fn verify_identity(&mut self) -> Result<()> {
        let reply = self
            .channel
            .control_read(Request::PrepareReceiveDeviceString, 1)?;
        expect_byte("prepare receive device string", &reply, DEVICE_STRING_READY)?;

        let raw = self
            .channel
            .control_read(Request::ReceiveDeviceString, DEVICE_STRING_LEN)?;
        if raw.len() != DEVICE_STRING_LEN {
            return Err(Sf100Error::ShortRead {
                expected: DEVICE_STRING_LEN,
                actual: raw.len(),
            });
        }

        let text = device_string(&raw);
        let version = parse_identity(&raw)?;
        check_firmware(version)?;
        log::info!("Found {} (firmware {})", text, version);

        self.firmware = Some(version);
        self.device_string = Some(text);
        self.transition(SessionState::IdentityVerified);
        Ok(())
    }

    fn one_time_init(&mut self) -> Result<()> {
        let written = self.channel.control_write(Request::CommandC, &[])?;
        if written != 0 {
            return Err(Sf100Error::InitFailed(format!(
                "command C reported {} bytes written, expected 0",
                written
            )));
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(Sf100Error::SessionNotReady { state: self.state })
        }
    }

    /// Read `len` bytes of flash starting at `start`
    pub fn read(&mut self, start: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(start, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` with flash contents starting at `start`
    ///
    /// The 512-byte aligned middle of the range goes over the bulk
    /// endpoint; the unaligned ends are handed to the chunked reader. On
    /// error the contents of `buf` are undefined.
    pub fn read_into(&mut self, start: u32, buf: &mut [u8]) -> Result<()> {
        self.ensure_ready()?;
        let len = buf.len();
        let Some(plan) = ChunkPlan::new(start, len) else {
            return Err(Sf100Error::AddressOverflow { start, len });
        };
        if plan.is_empty() {
            return Ok(());
        }
        log::debug!(
            "Read 0x{:x}+0x{:x}: prefix 0x{:x}, {} bulk chunks, suffix 0x{:x}",
            start,
            len,
            plan.prefix_len(),
            plan.chunk_count(),
            plan.suffix_len()
        );

        if let Some(seg) = plan.prefix() {
            self.io.read_chunked(
                &mut self.channel,
                &mut buf[seg.range()],
                seg.start,
                SLOW_READ_CHUNK,
            )?;
        }
        if let Some(seg) = plan.middle() {
            bulk::read_aligned(&mut self.channel, seg.start, &mut buf[seg.range()])?;
        }
        if let Some(seg) = plan.suffix() {
            self.io.read_chunked(
                &mut self.channel,
                &mut buf[seg.range()],
                seg.start,
                SLOW_READ_CHUNK,
            )?;
        }
        Ok(())
    }

    /// Program `data` at `start` through the chunked writer
    pub fn write(&mut self, start: u32, data: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        if u64::from(start) + data.len() as u64 > 1 << 32 {
            return Err(Sf100Error::AddressOverflow {
                start,
                len: data.len(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        log::debug!("Write 0x{:x}+0x{:x}", start, data.len());
        self.io
            .write_chunked(&mut self.channel, data, start, SLOW_WRITE_CHUNK)
    }

    /// One raw SPI transaction, see [`CommandChannel::send_receive`]
    pub fn send_receive(&mut self, write: &[u8], read_count: usize) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        self.channel.send_receive(write, read_count)
    }

    /// Turn the target supply off, release the interface and close
    ///
    /// Stops at the first step that fails; later steps are not attempted.
    /// A session that was never claimed just becomes `Closed`.
    pub fn shutdown(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Unopened | SessionState::Closed) {
            self.state = SessionState::Closed;
            return Ok(());
        }
        self.shutdown_attempted = true;

        set_voltage(&mut self.channel, Voltage::Off)?;
        self.powered = false;
        let transport = self.channel.transport_mut();
        transport.release_interface(USB_INTERFACE)?;
        transport.close()?;

        self.transition(SessionState::Closed);
        log::info!("SF100 shut down");
        Ok(())
    }
}

impl<T: UsbTransport, C: ChunkedIo> SpiTransceiver for Session<T, C> {
    fn send_receive(&mut self, write: &[u8], read_count: usize) -> Result<Vec<u8>> {
        Session::send_receive(self, write, read_count)
    }
}

impl<T: UsbTransport, C: ChunkedIo> Drop for Session<T, C> {
    fn drop(&mut self) {
        if self.powered && !self.shutdown_attempted {
            if let Err(e) = self.shutdown() {
                log::warn!("SF100 shutdown on drop failed: {}", e);
            }
        }
    }
}

fn expect_byte(step: &'static str, reply: &[u8], expected: u8) -> Result<()> {
    if reply == [expected] {
        return Ok(());
    }
    let got = if reply.is_empty() {
        "no data".to_string()
    } else {
        reply
            .iter()
            .map(|b| format!("0x{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    };
    Err(Sf100Error::UnexpectedHandshakeResponse {
        step,
        expected,
        got,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{Sf100Emulator, TransferKind};
    use crate::protocol::bulk_read_payload;

    /// Plain READ/WREN+PP chunked I/O that remembers what it was asked to do
    #[derive(Default)]
    struct RecordingIo {
        reads: Vec<(u32, usize, usize)>,
        writes: Vec<(u32, usize, usize)>,
    }

    impl ChunkedIo for RecordingIo {
        fn read_chunked(
            &mut self,
            spi: &mut dyn SpiTransceiver,
            buf: &mut [u8],
            start: u32,
            max_chunk: usize,
        ) -> Result<()> {
            self.reads.push((start, buf.len(), max_chunk));
            let mut addr = start;
            for piece in buf.chunks_mut(max_chunk) {
                let [_, a2, a1, a0] = addr.to_be_bytes();
                let data = spi.send_receive(&[0x03, a2, a1, a0], piece.len())?;
                piece.copy_from_slice(&data);
                addr += piece.len() as u32;
            }
            Ok(())
        }

        fn write_chunked(
            &mut self,
            spi: &mut dyn SpiTransceiver,
            data: &[u8],
            start: u32,
            max_chunk: usize,
        ) -> Result<()> {
            self.writes.push((start, data.len(), max_chunk));
            let mut addr = start;
            for piece in data.chunks(max_chunk) {
                let [_, a2, a1, a0] = addr.to_be_bytes();
                spi.send_receive(&[0x06], 0)?;
                let mut cmd = vec![0x02, a2, a1, a0];
                cmd.extend_from_slice(piece);
                spi.send_receive(&cmd, 0)?;
                addr += piece.len() as u32;
            }
            Ok(())
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + (i >> 8)) as u8).collect()
    }

    fn ready(emu: &mut Sf100Emulator) -> Session<&mut Sf100Emulator, RecordingIo> {
        let mut session = Session::new(emu, RecordingIo::default());
        session.initialize(3500).unwrap();
        session
    }

    #[test]
    fn test_bring_up_sequence() {
        let mut emu = Sf100Emulator::new(0x1000);
        let session = ready(&mut emu);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.firmware(), Some(FirmwareVersion::new(5, 1, 9)));
        assert_eq!(session.device_string(), Some("SF100 V:5.1.9"));
        assert_eq!(session.transport().voltage(), Voltage::V3_5);

        let setups: Vec<_> = session
            .transport()
            .log()
            .iter()
            .map(|r| (r.kind, r.setup))
            .collect();
        assert_eq!(
            setups,
            [
                (TransferKind::Claim, None),
                (TransferKind::ControlIn, Some(Request::CommandA.setup())),
                (TransferKind::ControlIn, Some(Request::CommandA.setup())),
                (
                    TransferKind::ControlIn,
                    Some(Request::PrepareReceiveDeviceString.setup())
                ),
                (
                    TransferKind::ControlIn,
                    Some(Request::ReceiveDeviceString.setup())
                ),
                (TransferKind::ControlOut, Some(Request::CommandC.setup())),
                (
                    TransferKind::ControlOut,
                    Some(Request::SetVoltage(Voltage::V3_5).setup())
                ),
            ]
        );
    }

    #[test]
    fn test_command_c_sent_once() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        session.initialize(1800).unwrap();
        session.shutdown().unwrap();
        drop(session);

        assert_eq!(emu.command_c_count(), 1);
        assert_eq!(emu.count_requests(Request::CommandA), 4);
        // Claimed once only
        let claims = emu
            .log()
            .iter()
            .filter(|r| r.kind == TransferKind::Claim)
            .count();
        assert_eq!(claims, 1);
        assert_eq!(
            emu.voltage_history(),
            [Voltage::V3_5, Voltage::V1_8, Voltage::Off]
        );
    }

    #[test]
    fn test_zero_length_read_issues_nothing() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        let before = session.transport().transfer_count();
        assert!(session.read(0x123, 0).unwrap().is_empty());
        assert_eq!(session.transport().transfer_count(), before);
        assert!(session.chunked_io().reads.is_empty());
    }

    #[test]
    fn test_read_splits_prefix_and_bulk() {
        let flash = patterned(0x1000);
        let mut emu = Sf100Emulator::with_flash(flash.clone());
        let mut session = ready(&mut emu);
        session.transport_mut().clear_log();

        let data = session.read(0x100, 0x700).unwrap();
        assert_eq!(data, flash[0x100..0x800]);
        assert_eq!(session.chunked_io().reads, [(0x100, 0x100, 16)]);

        let log = session.transport().log();
        let prepare: Vec<_> = log
            .iter()
            .filter(|r| r.setup == Some(Request::PrepareBulkRead { start: 0x200 }.setup()))
            .collect();
        assert_eq!(prepare.len(), 1);
        assert_eq!(prepare[0].data, bulk_read_payload(3));
        let bulk = log
            .iter()
            .filter(|r| r.kind == TransferKind::BulkIn)
            .count();
        assert_eq!(bulk, 3);
    }

    #[test]
    fn test_read_with_suffix_matches_flash() {
        let flash = patterned(0x2000);
        let mut emu = Sf100Emulator::with_flash(flash.clone());
        let mut session = ready(&mut emu);

        for (start, len) in [(0x1f0, 0x430), (0x0, 0x210), (0x7ff, 0x2), (0x400, 0x400)] {
            let data = session.read(start, len).unwrap();
            assert_eq!(data, flash[start as usize..start as usize + len]);
        }
        assert_eq!(
            session.chunked_io().reads,
            [
                (0x1f0, 0x10, 16),
                (0x600, 0x20, 16),
                (0x200, 0x10, 16),
                (0x7ff, 0x1, 16),
                (0x800, 0x1, 16)
            ]
        );
    }

    #[test]
    fn test_read_range_overflow() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        assert!(matches!(
            session.read(0xffff_ff00, 0x200),
            Err(Sf100Error::AddressOverflow { .. })
        ));
    }

    #[test]
    fn test_short_bulk_chunk_fails_read() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.short_bulk_chunk = Some(0);
        let mut session = ready(&mut emu);
        assert!(matches!(
            session.read(0, 0x400),
            Err(Sf100Error::BulkChunkShort { chunk: 0, .. })
        ));
    }

    #[test]
    fn test_write_goes_through_chunked_io() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        let data: Vec<u8> = (0..40).collect();
        session.write(0x20, &data).unwrap();
        assert_eq!(session.chunked_io().writes, [(0x20, 40, 12)]);
        assert_eq!(&session.transport().flash()[0x20..0x48], data.as_slice());
        // No bulk traffic for writes
        assert!(session
            .transport()
            .log()
            .iter()
            .all(|r| r.kind != TransferKind::BulkIn));
    }

    #[test]
    fn test_operations_need_ready_session() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.read(0, 0x10),
            Err(Sf100Error::SessionNotReady {
                state: SessionState::Unopened,
            })
        ));
        assert!(matches!(
            session.send_receive(&[0x9f], 3),
            Err(Sf100Error::SessionNotReady { .. })
        ));
        assert!(matches!(
            session.write(0, &[0]),
            Err(Sf100Error::SessionNotReady { .. })
        ));
        assert_eq!(session.transport().transfer_count(), 0);
    }

    #[test]
    fn test_claim_failure() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.fail_claim = true;
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::ClaimFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Unopened);
    }

    #[test]
    fn test_handshake_mismatch() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.handshake_reply = Some(0x00);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        match session.initialize(3500) {
            Err(Sf100Error::UnexpectedHandshakeResponse {
                step,
                expected,
                got,
            }) => {
                assert_eq!(step, "command A");
                assert_eq!(expected, 0x6f);
                assert_eq!(got, "0x00");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Claimed);
        assert_eq!(session.transport().count_requests(Request::CommandA), 1);
    }

    #[test]
    fn test_device_string_not_ready() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.device_string_ready = Some(0x00);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::UnexpectedHandshakeResponse {
                step: "prepare receive device string",
                ..
            })
        ));
    }

    #[test]
    fn test_short_identity() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.short_device_string = true;
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::ShortRead {
                expected: 16,
                actual: 15,
            })
        ));
    }

    #[test]
    fn test_untested_firmware_rejected() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.set_identity("SF100 V:6.0.0 ");
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::UnsupportedDevice(_))
        ));
        assert_eq!(session.state(), SessionState::Claimed);
        drop(session);
        assert_eq!(emu.command_c_count(), 0);
        assert!(emu.voltage_history().is_empty());
    }

    #[test]
    fn test_command_c_failure() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.command_c_reply_len = 1;
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::InitFailed(_))
        ));
        assert_eq!(session.state(), SessionState::IdentityVerified);
    }

    #[test]
    fn test_unsupported_voltage_issues_nothing() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(3300),
            Err(Sf100Error::UnsupportedVoltage(3300))
        ));
        assert_eq!(session.transport().transfer_count(), 0);
    }

    #[test]
    fn test_rejected_voltage() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.faults.reject_voltage = Some(Voltage::V2_5);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        assert!(matches!(
            session.initialize(2500),
            Err(Sf100Error::CommandRejected { request: 0x09, .. })
        ));
        assert_eq!(session.state(), SessionState::Initialized);
    }

    #[test]
    fn test_shutdown_order() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        session.transport_mut().clear_log();
        session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let kinds: Vec<_> = session.transport().log().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [
                TransferKind::ControlOut,
                TransferKind::Release,
                TransferKind::Close
            ]
        );
        assert_eq!(
            session.transport().log()[0].setup,
            Some(Request::SetVoltage(Voltage::Off).setup())
        );

        // A closed session stays closed
        assert!(matches!(
            session.initialize(3500),
            Err(Sf100Error::SessionNotReady {
                state: SessionState::Closed,
            })
        ));
    }

    #[test]
    fn test_shutdown_stops_at_first_failure() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        session.transport_mut().faults.reject_voltage = Some(Voltage::Off);
        session.transport_mut().clear_log();

        assert!(matches!(
            session.shutdown(),
            Err(Sf100Error::CommandRejected { .. })
        ));
        drop(session);

        // Neither release nor close was attempted, not even on drop
        assert_eq!(emu.transfer_count(), 1);
        assert!(emu.is_claimed());
    }

    #[test]
    fn test_release_failure_skips_close() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = ready(&mut emu);
        session.transport_mut().faults.fail_release = true;
        assert!(matches!(session.shutdown(), Err(Sf100Error::Transfer(_))));
        drop(session);
        assert!(!emu.is_closed());
        assert_eq!(emu.voltage(), Voltage::Off);
    }

    #[test]
    fn test_drop_powers_down() {
        let mut emu = Sf100Emulator::new(0x1000);
        drop(ready(&mut emu));
        assert_eq!(emu.voltage(), Voltage::Off);
        assert!(emu.is_closed());
    }

    #[test]
    fn test_shutdown_of_unopened_session() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = Session::new(&mut emu, RecordingIo::default());
        session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.transport().transfer_count(), 0);
    }
}
