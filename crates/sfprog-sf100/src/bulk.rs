//! Bulk read fast path
//!
//! Aligned flash reads are armed with one `PrepareBulkRead` control write
//! and then streamed as 512-byte bulk IN transfers from EP2.

use crate::channel::CommandChannel;
use crate::error::{Result, Sf100Error};
use crate::protocol::{bulk_read_payload, Request, BULK_CHUNK_SIZE, MAX_BULK_CHUNKS};
use crate::transport::UsbTransport;

/// Read `buf.len()` bytes starting at `start` over the bulk endpoint
///
/// Both `start` and `buf.len()` must be multiples of 512. On failure the
/// chunks already received stay in `buf`; the contents must be treated as
/// invalid.
pub fn read_aligned<T: UsbTransport>(
    channel: &mut CommandChannel<T>,
    start: u32,
    buf: &mut [u8],
) -> Result<()> {
    let len = buf.len();
    if start as usize % BULK_CHUNK_SIZE != 0 || len % BULK_CHUNK_SIZE != 0 {
        return Err(Sf100Error::AlignmentInvariantViolated { start, len });
    }
    if u64::from(start) + len as u64 > 1 << 32 {
        return Err(Sf100Error::AddressOverflow { start, len });
    }
    if len == 0 {
        return Ok(());
    }

    let mut chunk_index = 0;
    for (batch_no, batch) in buf
        .chunks_mut(MAX_BULK_CHUNKS * BULK_CHUNK_SIZE)
        .enumerate()
    {
        let offset = batch_no * MAX_BULK_CHUNKS * BULK_CHUNK_SIZE;
        // In range: the whole read ends at or below 4 GiB
        let batch_start = (u64::from(start) + offset as u64) as u32;
        let chunks = batch.len() / BULK_CHUNK_SIZE;
        prepare(channel, batch_start, chunks as u16)?;

        for chunk in batch.chunks_exact_mut(BULK_CHUNK_SIZE) {
            let read = channel.bulk_read(chunk)?;
            if read != BULK_CHUNK_SIZE {
                log::error!(
                    "Bulk chunk {} at 0x{:x} returned {} bytes",
                    chunk_index,
                    u64::from(start) + (chunk_index * BULK_CHUNK_SIZE) as u64,
                    read
                );
                return Err(Sf100Error::BulkChunkShort {
                    chunk: chunk_index,
                    expected: BULK_CHUNK_SIZE,
                    actual: read,
                });
            }
            chunk_index += 1;
        }
    }

    Ok(())
}

/// Arm the adapter for `chunks` bulk chunks starting at `start`
fn prepare<T: UsbTransport>(
    channel: &mut CommandChannel<T>,
    start: u32,
    chunks: u16,
) -> Result<()> {
    log::trace!("Bulk read of {} chunks at 0x{:08x}", chunks, start);
    let payload = bulk_read_payload(chunks);
    let written = channel.control_write(Request::PrepareBulkRead { start }, &payload)?;
    if written != payload.len() {
        return Err(Sf100Error::BulkPrepareFailed(format!(
            "wrote {} of {} bytes",
            written,
            payload.len()
        )));
    }
    Ok(())
}
