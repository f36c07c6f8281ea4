//! Write command implementation

use sfprog_sf100::{Session, UsbTransport};
use std::fs;
use std::path::Path;

use super::read::read_with_progress;
use super::{byte_progress, WINDOW_SIZE};
use crate::jedec::JedecChunkedIo;

/// Run the write command
pub fn run_write<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
    input: &Path,
    start: u32,
    do_verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    if data.is_empty() {
        println!("{:?} is empty, nothing to write", input);
        return Ok(());
    }

    let pb = byte_progress(data.len() as u64, "Writing")?;
    let mut addr = start;
    for window in data.chunks(WINDOW_SIZE) {
        session.write(addr, window)?;
        addr = addr.wrapping_add(window.len() as u32);
        pb.inc(window.len() as u64);
    }
    pb.finish_with_message("Write complete");
    println!("Wrote {} bytes at 0x{:08X}", data.len(), start);

    if do_verify {
        let pb = byte_progress(data.len() as u64, "Verifying")?;
        let readback = read_with_progress(session, start, data.len(), &pb)?;
        pb.finish_with_message("Verify complete");

        if let Some(offset) = first_mismatch(&data, &readback) {
            return Err(format!(
                "Verification failed at 0x{:08X}: expected 0x{:02X}, found 0x{:02X}",
                start as usize + offset,
                data[offset],
                readback[offset]
            )
            .into());
        }
        println!("Verification passed");
    }

    Ok(())
}

/// Offset of the first differing byte
fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}
