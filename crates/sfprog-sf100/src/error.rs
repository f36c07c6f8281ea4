//! Error types for the SF100 protocol core

use thiserror::Error;

use crate::session::SessionState;

/// Result type for SF100 operations
pub type Result<T> = std::result::Result<T, Sf100Error>;

/// Errors that can occur while talking to an SF100
///
/// Every error is terminal for the operation that produced it. Nothing in
/// this crate retries.
#[derive(Debug, Error)]
pub enum Sf100Error {
    /// No USB device with the SF100 vendor/product ID
    #[error("SF100 not found (VID:0483 PID:DADA)")]
    DeviceNotFound,

    /// Opening the device, selecting its configuration or claiming the
    /// interface failed
    #[error("failed to claim SF100: {0}")]
    ClaimFailed(String),

    /// A fixed-response bring-up exchange returned something else
    #[error("unexpected response to {step}: expected 0x{expected:02x}, got {got}")]
    UnexpectedHandshakeResponse {
        /// Name of the exchange
        step: &'static str,
        /// The byte the firmware must answer with
        expected: u8,
        /// What actually came back, formatted for display
        got: String,
    },

    /// Identity string is not an SF100 or reports an untested firmware
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The one-time initialisation command was not accepted
    #[error("one-time initialisation failed: {0}")]
    InitFailed(String),

    /// Millivolt value with no protocol selector
    #[error("unsupported voltage: {0} mV (valid: 0, 1800, 2500, 3500)")]
    UnsupportedVoltage(u32),

    /// Voltage string with trailing garbage or an unparsable number
    #[error("invalid voltage specification: {0:?}")]
    InvalidVoltageSpec(String),

    /// Empty voltage string
    #[error("empty voltage specification")]
    EmptyVoltageSpec,

    /// The adapter did not accept a command
    #[error("command 0x{request:02x} rejected: {detail}")]
    CommandRejected {
        /// bRequest of the rejected command
        request: u8,
        /// What went wrong
        detail: String,
    },

    /// SPI transaction larger than the firmware handles
    #[error("unsupported transfer size: write {write} bytes, read {read} bytes (max 16 each)")]
    UnsupportedTransferSize {
        /// Requested write length
        write: usize,
        /// Requested read length
        read: usize,
    },

    /// Control write moved fewer bytes than requested
    #[error("short control write: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        /// Bytes that should have been written
        expected: usize,
        /// Bytes the transfer reported
        actual: usize,
    },

    /// Control read returned a different number of bytes than requested
    #[error("short control read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes that should have been read
        expected: usize,
        /// Bytes the transfer reported
        actual: usize,
    },

    /// Arming a bulk read failed
    #[error("bulk read preparation failed: {0}")]
    BulkPrepareFailed(String),

    /// A bulk chunk came back with the wrong size
    #[error("bulk chunk {chunk} short: expected {expected} bytes, got {actual}")]
    BulkChunkShort {
        /// Index of the failed chunk within the aligned region
        chunk: usize,
        /// Expected chunk size
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// The aligned read path was handed an unaligned range (internal bug)
    #[error("alignment invariant violated: start=0x{start:x} len=0x{len:x}")]
    AlignmentInvariantViolated {
        /// Start address handed to the aligned path
        start: u32,
        /// Length handed to the aligned path
        len: usize,
    },

    /// Range end does not fit the 32-bit address space
    #[error("address range overflows: start=0x{start:x} len=0x{len:x}")]
    AddressOverflow {
        /// Start address
        start: u32,
        /// Requested length
        len: usize,
    },

    /// Operation needs a session in a different state
    #[error("session not ready (state: {state:?})")]
    SessionNotReady {
        /// State the session was in
        state: SessionState,
    },

    /// The chunked read/write collaborator failed
    #[error("chunked I/O failed: {0}")]
    ChunkedIo(String),

    /// USB transfer failed
    #[error("USB transfer failed: {0}")]
    Transfer(String),

    /// USB transfer hit its deadline
    #[error("timeout during USB transfer")]
    Timeout,

    /// Option parsing error
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(feature = "nusb")]
impl From<nusb::Error> for Sf100Error {
    fn from(e: nusb::Error) -> Self {
        Sf100Error::Transfer(e.to_string())
    }
}

#[cfg(feature = "nusb")]
impl From<nusb::transfer::TransferError> for Sf100Error {
    fn from(e: nusb::transfer::TransferError) -> Self {
        match e {
            // nusb cancels a transfer when its timeout expires
            nusb::transfer::TransferError::Cancelled => Sf100Error::Timeout,
            other => Sf100Error::Transfer(other.to_string()),
        }
    }
}
