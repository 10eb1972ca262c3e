// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Serial ROM image uploader for microcontroller monitors
mod loader;
mod protocol;
mod segment;
mod serial;

use clap::Parser;
use loader::{LoaderError, LoaderFsm, LoaderState};
use serial::RealSerialPort;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "romload", version)]
#[command(about = "Upload a ROM image to a microcontroller monitor over a serial link", long_about = None)]
struct Cli {
    /// Serial device the monitor is attached to (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    device: String,

    /// Load address for the image: decimal, or hex with a 0x or $ prefix
    #[arg(
        short = 's',
        long = "startaddress",
        default_value = "0x0000",
        value_parser = parse_address,
        value_name = "ADDR"
    )]
    start_address: u16,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Acknowledgment timeout in milliseconds
    #[arg(long, default_value = "2000", value_name = "MS")]
    timeout: u64,

    /// Suppress informational output
    #[arg(short, long)]
    quiet: bool,

    /// ROM image to upload
    file: PathBuf,
}

fn parse_address(s: &str) -> Result<u16, String> {
    let (digits, radix) = if let Some(hex) = s.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else {
        (s, 10)
    };

    let value = u32::from_str_radix(digits, radix)
        .map_err(|_| format!("Invalid address: {}", s))?;

    u16::try_from(value).map_err(|_| format!("Address out of range (0-0xFFFF): {}", s))
}

fn main() {
    let cli = Cli::parse();

    if cli.file.extension().and_then(|e| e.to_str()) != Some("rom") {
        eprintln!("Error: {} is not a .rom file", cli.file.display());
        std::process::exit(1);
    }

    let image = match std::fs::read(&cli.file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", cli.file.display(), e);
            std::process::exit(1);
        }
    };

    if !cli.quiet {
        println!("Opening serial device: {} at {} baud", cli.device, cli.baud);
        println!("{} bytes to send", image.len());
    }

    let serial_port = match RealSerialPort::open(&cli.device, cli.baud) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial device {}: {}", cli.device, e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_millis(cli.timeout);
    if let Err(e) = upload(serial_port, image, cli.start_address, timeout, cli.quiet) {
        eprintln!("Upload failed: {}", e);
        std::process::exit(1);
    }

    if !cli.quiet {
        println!("Upload complete");
    }
}

fn upload(
    serial_port: RealSerialPort,
    image: Vec<u8>,
    start_address: u16,
    timeout: Duration,
    quiet: bool,
) -> Result<(), LoaderError> {
    let mut state: Box<dyn LoaderState> =
        LoaderFsm::new(Box::new(serial_port), image, start_address, timeout, quiet);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(LoaderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
