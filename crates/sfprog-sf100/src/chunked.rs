//! Chunked read/write collaborator
//!
//! The SF100 only has a fast path for 512-byte aligned reads. Anything
//! else (unaligned read residue and every write) is handed to a
//! [`ChunkedIo`] implementation supplied by the caller, which turns it
//! into small SPI transactions. The protocol core never decides what those
//! transactions contain.

use crate::error::Result;

/// A single generic SPI transaction
pub trait SpiTransceiver {
    /// Send `write` and return `read_count` bytes clocked in afterwards
    fn send_receive(&mut self, write: &[u8], read_count: usize) -> Result<Vec<u8>>;
}

/// Read or write a byte range in pieces of at most `max_chunk` bytes
pub trait ChunkedIo {
    /// Fill `buf` with flash contents starting at `start`
    fn read_chunked(
        &mut self,
        spi: &mut dyn SpiTransceiver,
        buf: &mut [u8],
        start: u32,
        max_chunk: usize,
    ) -> Result<()>;

    /// Program `data` at `start`
    fn write_chunked(
        &mut self,
        spi: &mut dyn SpiTransceiver,
        data: &[u8],
        start: u32,
        max_chunk: usize,
    ) -> Result<()>;
}

impl<C: ChunkedIo + ?Sized> ChunkedIo for &mut C {
    fn read_chunked(
        &mut self,
        spi: &mut dyn SpiTransceiver,
        buf: &mut [u8],
        start: u32,
        max_chunk: usize,
    ) -> Result<()> {
        (**self).read_chunked(spi, buf, start, max_chunk)
    }

    fn write_chunked(
        &mut self,
        spi: &mut dyn SpiTransceiver,
        data: &[u8],
        start: u32,
        max_chunk: usize,
    ) -> Result<()> {
        (**self).write_chunked(spi, data, start, max_chunk)
    }
}
