//! sfprog-sf100 - Dediprog SF100 USB SPI programmer protocol core
//!
//! The SF100 bridges a flash chip's SPI bus to USB. Commands are vendor
//! control transfers of at most 16 bytes each way; aligned flash reads use
//! 512-byte bulk transfers from EP2. Before any of that works the adapter
//! wants a fixed bring-up: claim, two handshakes, an identity check, a
//! one-time init command and a target voltage.
//!
//! # Layers
//!
//! - [`transport::UsbTransport`]: the USB operations the protocol needs,
//!   implemented over nusb and by the in-memory [`emulator`]
//! - [`CommandChannel`]: control-transfer requests and SPI transactions
//! - [`Session`]: bring-up state machine, reads, writes and shutdown
//! - [`ChunkedIo`]: caller-supplied small-transaction reader/writer for
//!   everything the bulk path does not cover
//!
//! # Example
//!
//! ```no_run
//! use sfprog_sf100::{open, parse_options, ChunkedIo, Result, SpiTransceiver};
//!
//! struct Jedec;
//!
//! impl ChunkedIo for Jedec {
//!     fn read_chunked(
//!         &mut self,
//!         spi: &mut dyn SpiTransceiver,
//!         buf: &mut [u8],
//!         start: u32,
//!         max_chunk: usize,
//!     ) -> Result<()> {
//!         let mut addr = start;
//!         for piece in buf.chunks_mut(max_chunk) {
//!             let [_, a2, a1, a0] = addr.to_be_bytes();
//!             piece.copy_from_slice(&spi.send_receive(&[0x03, a2, a1, a0], piece.len())?);
//!             addr += piece.len() as u32;
//!         }
//!         Ok(())
//!     }
//!
//!     fn write_chunked(
//!         &mut self,
//!         _spi: &mut dyn SpiTransceiver,
//!         _data: &[u8],
//!         _start: u32,
//!         _max_chunk: usize,
//!     ) -> Result<()> {
//!         unimplemented!()
//!     }
//! }
//!
//! let config = parse_options(&[("voltage", "1.8V")])?;
//! let mut session = open(&config, Jedec)?;
//! println!("Device: {}", session.device_string().unwrap_or("?"));
//!
//! let id = session.send_receive(&[0x9f], 3)?;
//! println!("JEDEC ID: {:02X} {:02X} {:02X}", id[0], id[1], id[2]);
//!
//! let data = session.read(0x100, 0x700)?;
//! session.shutdown()?;
//! # let _ = data;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Configuration Options
//!
//! - `device=N` or `index=N`: Select the Nth adapter (0-indexed)
//! - `voltage=0|1.8|2.5|3.5` or `1800mV`: Target voltage (default 3.5V)

pub mod bulk;
pub mod channel;
pub mod chunked;
pub mod device;
pub mod emulator;
pub mod error;
pub mod locate;
pub mod plan;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod voltage;

// Re-exports
pub use channel::CommandChannel;
pub use chunked::{ChunkedIo, SpiTransceiver};
pub use device::{init_session, parse_options, Sf100Config};
pub use emulator::Sf100Emulator;
pub use error::{Result, Sf100Error};
pub use locate::{find_device, Sf100DeviceInfo, UsbIds};
pub use plan::ChunkPlan;
pub use protocol::FirmwareVersion;
pub use session::{Session, SessionState};
pub use transport::UsbTransport;
pub use voltage::{parse_voltage, Voltage};

#[cfg(feature = "nusb")]
pub use device::open;
#[cfg(feature = "nusb")]
pub use locate::{list_devices, open_transport};
#[cfg(feature = "nusb")]
pub use transport::usb::NusbTransport;
