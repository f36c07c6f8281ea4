//! Read command implementation

use indicatif::ProgressBar;
use sfprog_sf100::{Session, UsbTransport};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{byte_progress, WINDOW_SIZE};
use crate::jedec::JedecChunkedIo;

/// Run the read command
pub fn run_read<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
    output: &Path,
    start: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let pb = byte_progress(u64::from(length), "Reading")?;
    let data = read_with_progress(session, start, length as usize, &pb)?;
    pb.finish_with_message("Read complete");

    let mut file = File::create(output)?;
    file.write_all(&data)?;

    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Read `len` bytes from `start` one window at a time
pub(crate) fn read_with_progress<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
    start: u32,
    len: usize,
    pb: &ProgressBar,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut data = vec![0u8; len];

    let mut addr = start;
    for window in data.chunks_mut(WINDOW_SIZE) {
        session.read_into(addr, window)?;
        addr = addr.wrapping_add(window.len() as u32);
        pb.inc(window.len() as u64);
    }

    Ok(data)
}
