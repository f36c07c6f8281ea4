//! CLI command implementations
//!
//! Every command except `list` runs against an initialised session, so the
//! same code drives real hardware and the `--emulate` adapter.

mod list;
mod probe;
mod read;
mod spi;
mod write;

pub use list::run_list;
pub use probe::run_probe;
pub use read::run_read;
pub use spi::run_spi;
pub use write::run_write;

use indicatif::{ProgressBar, ProgressStyle};

/// Window size for reads and writes between progress updates (64 KiB)
const WINDOW_SIZE: usize = 64 * 1024;

/// Byte progress bar in the house style
fn byte_progress(total: u64, phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(phase.to_string());
    Ok(pb)
}
