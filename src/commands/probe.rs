//! Probe command implementation

use sfprog_sf100::{Session, UsbTransport};

use crate::jedec::{read_jedec_id, JedecChunkedIo};

/// Show adapter identity and the JEDEC ID of the attached flash
pub fn run_probe<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Found SF100:");
    println!("  Device:   {}", session.device_string().unwrap_or("?"));
    if let Some(firmware) = session.firmware() {
        println!("  Firmware: {}", firmware);
    }

    let (manufacturer, device) = read_jedec_id(session)?;
    if manufacturer == 0x00 || manufacturer == 0xff {
        println!("  No flash chip responded");
    } else {
        println!("  JEDEC ID: {:02X} {:04X}", manufacturer, device);
    }
    Ok(())
}
