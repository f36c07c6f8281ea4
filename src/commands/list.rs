//! List command implementation

/// List attached SF100 adapters
pub fn run_list() -> Result<(), Box<dyn std::error::Error>> {
    let devices = sfprog_sf100::list_devices()?;

    if devices.is_empty() {
        println!("No SF100 adapters found");
        return Ok(());
    }

    println!("Attached SF100 adapters:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {}", index, device);
    }
    Ok(())
}
