//! Raw SPI transaction command

use sfprog_sf100::{Session, UsbTransport};

use crate::jedec::JedecChunkedIo;

/// Format bytes as space separated hex
fn hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Send `bytes`, read `read_count` back and print them
pub fn run_spi<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
    bytes: &[u8],
    read_count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("SPI out: {}", hex_line(bytes));
    let response = session.send_receive(bytes, read_count)?;
    if response.is_empty() {
        println!("OK");
    } else {
        println!("{}", hex_line(&response));
    }
    Ok(())
}
