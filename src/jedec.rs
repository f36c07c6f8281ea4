//! JEDEC SPI25 chunked reader/writer
//!
//! Supplies the small-transaction path the SF100 core hands unaligned
//! reads and all writes to. 3-byte addressing only, which covers parts up
//! to 16 MiB.

use std::thread;
use std::time::{Duration, Instant};

use sfprog_sf100::{ChunkedIo, Result, Sf100Error, SpiTransceiver};

/// SPI25 opcodes
pub mod opcodes {
    pub const RDID: u8 = 0x9f;
    pub const READ: u8 = 0x03;
    pub const WREN: u8 = 0x06;
    pub const PP: u8 = 0x02;
    pub const RDSR: u8 = 0x05;

    /// Write in progress
    pub const SR1_WIP: u8 = 0x01;
}

const PAGE_SIZE: usize = 256;
/// Highest address reachable with 3-byte addressing, plus one
const ADDRESS_SPACE_3B: u64 = 1 << 24;
/// Page program takes a few ms; this is far beyond any datasheet
const WIP_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_DELAY: Duration = Duration::from_micros(10);

/// Read the JEDEC ID, returns (manufacturer_id, device_id)
pub fn read_jedec_id(spi: &mut dyn SpiTransceiver) -> Result<(u8, u16)> {
    let id = spi.send_receive(&[opcodes::RDID], 3)?;
    Ok((id[0], u16::from_be_bytes([id[1], id[2]])))
}

/// Read status register 1
pub fn read_status1(spi: &mut dyn SpiTransceiver) -> Result<u8> {
    let status = spi.send_receive(&[opcodes::RDSR], 1)?;
    Ok(status[0])
}

/// Poll until the WIP bit clears or `timeout` passes
pub fn wait_ready(spi: &mut dyn SpiTransceiver, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = read_status1(spi)?;
        if status & opcodes::SR1_WIP == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Sf100Error::ChunkedIo(format!(
                "flash still busy after {:?} (status 0x{:02x})",
                timeout, status
            )));
        }
        thread::sleep(POLL_DELAY);
    }
}

fn check_range(start: u32, len: usize) -> Result<()> {
    if u64::from(start) + len as u64 > ADDRESS_SPACE_3B {
        return Err(Sf100Error::ChunkedIo(format!(
            "0x{:x}+0x{:x} is beyond 3-byte addressing",
            start, len
        )));
    }
    Ok(())
}

fn address_3b(addr: u32) -> [u8; 3] {
    let [_, a2, a1, a0] = addr.to_be_bytes();
    [a2, a1, a0]
}

/// READ / WREN + PAGE PROGRAM implementation of [`ChunkedIo`]
#[derive(Debug, Clone, Copy)]
pub struct JedecChunkedIo {
    wip_timeout: Duration,
}

impl Default for JedecChunkedIo {
    fn default() -> Self {
        Self {
            wip_timeout: WIP_TIMEOUT,
        }
    }
}

impl ChunkedIo for JedecChunkedIo {
    fn read_chunked(
        &mut self,
        spi: &mut dyn SpiTransceiver,
        buf: &mut [u8],
        start: u32,
        max_chunk: usize,
    ) -> Result<()> {
        check_range(start, buf.len())?;

        let mut addr = start;
        for piece in buf.chunks_mut(max_chunk) {
            let [a2, a1, a0] = address_3b(addr);
            let data = spi.send_receive(&[opcodes::READ, a2, a1, a0], piece.len())?;
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
        check_range(start, data.len())?;

        let mut offset = 0;
        while offset < data.len() {
            let addr = start + offset as u32;
            // Never cross a page boundary within one program command
            let page_room = PAGE_SIZE - addr as usize % PAGE_SIZE;
            let len = max_chunk.min(page_room).min(data.len() - offset);

            spi.send_receive(&[opcodes::WREN], 0)?;
            let [a2, a1, a0] = address_3b(addr);
            let mut cmd = Vec::with_capacity(4 + len);
            cmd.extend_from_slice(&[opcodes::PP, a2, a1, a0]);
            cmd.extend_from_slice(&data[offset..offset + len]);
            spi.send_receive(&cmd, 0)?;
            wait_ready(spi, self.wip_timeout)?;

            offset += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfprog_sf100::emulator::{Sf100Emulator, TransferKind};
    use sfprog_sf100::Session;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 + 5) as u8).collect()
    }

    fn session(emu: &mut Sf100Emulator) -> Session<&mut Sf100Emulator, JedecChunkedIo> {
        let mut session = Session::new(emu, JedecChunkedIo::default());
        session.initialize(3500).unwrap();
        session
    }

    #[test]
    fn test_jedec_id() {
        let mut emu = Sf100Emulator::new(0x1000);
        let mut session = session(&mut emu);
        assert_eq!(read_jedec_id(&mut session).unwrap(), (0xef, 0x4018));
    }

    #[test]
    fn test_unaligned_read() {
        let flash = patterned(0x2000);
        let mut emu = Sf100Emulator::with_flash(flash.clone());
        let mut session = session(&mut emu);
        let data = session.read(0x1f3, 0x61d).unwrap();
        assert_eq!(data, flash[0x1f3..0x810]);
    }

    #[test]
    fn test_write_respects_pages() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.busy_polls = 2;
        let mut session = session(&mut emu);
        let data = patterned(40);
        session.write(0xf0, &data).unwrap();
        assert_eq!(&session.transport().flash()[0xf0..0x118], data.as_slice());
        // Page start untouched by wrap-around
        assert_eq!(session.transport().flash()[0x00], 0xff);

        // Every program command fits one SPI transaction
        let pp_sizes: Vec<_> = session
            .transport()
            .log()
            .iter()
            .filter(|r| r.kind == TransferKind::ControlOut && r.data.first() == Some(&opcodes::PP))
            .map(|r| r.data.len() - 4)
            .collect();
        assert_eq!(pp_sizes, [12, 4, 12, 12]);
    }

    #[test]
    fn test_busy_flash_times_out() {
        let mut emu = Sf100Emulator::new(0x1000);
        emu.busy_polls = usize::MAX;
        let io = JedecChunkedIo {
            wip_timeout: Duration::ZERO,
        };
        let mut session = Session::new(&mut emu, io);
        session.initialize(3500).unwrap();
        assert!(matches!(
            session.write(0, &[0x00]),
            Err(Sf100Error::ChunkedIo(_))
        ));
    }

    #[test]
    fn test_rejects_4_byte_addresses() {
        let mut io = JedecChunkedIo::default();
        let mut emu = Sf100Emulator::new(0x100);
        let mut ch = sfprog_sf100::CommandChannel::new(&mut emu);
        let mut buf = [0u8; 4];
        assert!(matches!(
            io.read_chunked(&mut ch, &mut buf, 0x00ff_fffe, 16),
            Err(Sf100Error::ChunkedIo(_))
        ));
        assert_eq!(emu.transfer_count(), 0);
    }
}
