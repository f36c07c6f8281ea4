//! sfprog - Dediprog SF100 SPI flash programmer
//!
//! Drives the SF100 over USB through `sfprog-sf100`. Aligned reads use the
//! adapter's bulk path; everything else goes through small JEDEC SPI
//! transactions supplied by [`jedec::JedecChunkedIo`].
//!
//! `--emulate IMAGE` swaps the hardware for the in-memory adapter so any
//! command can be tried without a programmer attached.

mod cli;
mod commands;
mod jedec;

use clap::Parser;
use cli::{Cli, Commands};
use jedec::JedecChunkedIo;
use sfprog_sf100::{
    init_session, parse_options, NusbTransport, Session, Sf100Config, Sf100Emulator, UsbTransport,
};
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Commands::List = cli.command {
        return commands::run_list();
    }

    let device = cli.device.to_string();
    let config = parse_options(&[
        ("device", device.as_str()),
        ("voltage", cli.voltage.as_str()),
    ])?;

    match &cli.emulate {
        Some(image) => {
            let flash = fs::read(image)?;
            log::info!("Emulating SF100 with image {:?}", image);
            let mut session = init_session(
                Sf100Emulator::with_flash(flash),
                JedecChunkedIo::default(),
                &config,
            )?;
            run(&mut session, cli.command)
        }
        None => {
            let mut session = open_hardware(&config)?;
            run(&mut session, cli.command)
        }
    }
}

fn open_hardware(
    config: &Sf100Config,
) -> Result<Session<NusbTransport, JedecChunkedIo>, Box<dyn std::error::Error>> {
    Ok(sfprog_sf100::open(config, JedecChunkedIo::default())?)
}

/// Run one command, then power down and release the adapter
fn run<T: UsbTransport>(
    session: &mut Session<T, JedecChunkedIo>,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = match command {
        Commands::List => Ok(()),
        Commands::Probe => commands::run_probe(session),
        Commands::Read {
            output,
            start,
            length,
        } => commands::run_read(session, &output, start, length),
        Commands::Write {
            input,
            start,
            verify,
        } => commands::run_write(session, &input, start, verify),
        Commands::Spi { bytes, read } => commands::run_spi(session, &bytes, read),
    };

    // Shut down even when the command failed; its error wins
    let shutdown = session.shutdown();
    result?;
    shutdown?;
    Ok(())
}
