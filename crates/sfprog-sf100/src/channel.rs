//! Request/response command channel
//!
//! The only path by which the rest of the crate issues control transfers.
//! Generic SPI transactions are a `SendSpi` control write optionally
//! followed by a `ReceiveSpi` control read; both must move exactly the
//! requested number of bytes.

use std::time::Duration;

use crate::chunked::SpiTransceiver;
use crate::error::{Result, Sf100Error};
use crate::protocol::{Request, BULK_IN_EP, DEFAULT_TIMEOUT, MAX_TRANSFER_LEN};
use crate::transport::UsbTransport;

/// Control-transfer channel to the adapter
pub struct CommandChannel<T> {
    transport: T,
    timeout: Duration,
}

impl<T: UsbTransport> CommandChannel<T> {
    /// Channel with the default 3000 ms transfer deadline
    pub fn new(transport: T) -> Self {
        Self::with_timeout(transport, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Issue a host-to-device request, returning the reported byte count
    pub fn control_write(&mut self, request: Request, data: &[u8]) -> Result<usize> {
        let setup = request.setup();
        log::trace!("control out {} len={}", setup, data.len());
        let written = self.transport.control_out(setup, data, self.timeout)?;
        log::trace!("control out {:?} -> {} bytes", request, written);
        Ok(written)
    }

    /// Issue a device-to-host request for `len` bytes
    ///
    /// The returned buffer holds what the device actually sent, which may
    /// be shorter than `len`. Callers decide whether that is an error.
    pub fn control_read(&mut self, request: Request, len: usize) -> Result<Vec<u8>> {
        let setup = request.setup();
        let mut buf = vec![0u8; len];
        let read = self.transport.control_in(setup, &mut buf, self.timeout)?;
        log::trace!("control in {} -> {} of {} bytes", setup, read, len);
        buf.truncate(read.min(len));
        Ok(buf)
    }

    /// Raw read from the bulk IN endpoint
    pub fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self.transport.bulk_in(BULK_IN_EP, buf, self.timeout)?;
        log::trace!("bulk in -> {} of {} bytes", read, buf.len());
        Ok(read)
    }

    /// Send `write` on SPI and clock in `read_count` bytes
    ///
    /// Both lengths are limited to 16 bytes. Larger requests are refused
    /// before anything is put on the bus.
    pub fn send_receive(&mut self, write: &[u8], read_count: usize) -> Result<Vec<u8>> {
        if write.len() > MAX_TRANSFER_LEN || read_count > MAX_TRANSFER_LEN {
            return Err(Sf100Error::UnsupportedTransferSize {
                write: write.len(),
                read: read_count,
            });
        }

        let reply = read_count > 0;
        let written = self.control_write(Request::SendSpi { reply }, write)?;
        if written != write.len() {
            return Err(Sf100Error::ShortWrite {
                expected: write.len(),
                actual: written,
            });
        }

        if read_count == 0 {
            return Ok(Vec::new());
        }

        let data = self.control_read(Request::ReceiveSpi, read_count)?;
        if data.len() != read_count {
            return Err(Sf100Error::ShortRead {
                expected: read_count,
                actual: data.len(),
            });
        }
        Ok(data)
    }
}

impl<T: UsbTransport> SpiTransceiver for CommandChannel<T> {
    fn send_receive(&mut self, write: &[u8], read_count: usize) -> Result<Vec<u8>> {
        CommandChannel::send_receive(self, write, read_count)
    }
}
