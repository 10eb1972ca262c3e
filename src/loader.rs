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

//! Transfer state machine: drives one complete upload, one block in
//! flight at a time, each write gated on a newline-terminated
//! acknowledgment from the monitor.

use crate::protocol::{frame, frame_start, frame_trailer, BlockKind, FrameError};
use crate::segment::Segmenter;
use crate::serial::SerialPort;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default acknowledgment timeout
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("no acknowledgment from the monitor within {} ms", .0.as_millis())]
    NoAcknowledgment(Duration),
    #[error("transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct SendStartBlock;
pub struct AwaitStartAck;
pub struct SendDataBlock;
pub struct AwaitDataAck;
pub struct SendTrailerBlock;
pub struct AwaitTrailerAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct LoaderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    segmenter: Segmenter,
    start_address: u16,
    timeout: Duration,
    quiet: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait LoaderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError>;
}

// ============================================================================
// Helpers: transitions, error context, acknowledgment wait
// ============================================================================

impl<S> LoaderFsm<S> {
    fn transition<T>(self) -> Box<LoaderFsm<T>> {
        Box::new(LoaderFsm {
            state: PhantomData,
            serial: self.serial,
            segmenter: self.segmenter,
            start_address: self.start_address,
            timeout: self.timeout,
            quiet: self.quiet,
        })
    }

    fn io_error(&self, e: std::io::Error) -> LoaderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        LoaderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name),
        ))
    }

    /// Wait for a newline-terminated acknowledgment line, accumulating
    /// whatever arrives until the deadline. The line content is echoed
    /// for diagnostics; only its arrival matters.
    fn await_ack(&mut self) -> Result<(), LoaderError> {
        let deadline = Instant::now() + self.timeout;
        let mut received: Vec<u8> = Vec::new();
        let mut buf = [0u8; 64];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(LoaderError::NoAcknowledgment(self.timeout));
            }

            match self.serial.read_timeout(&mut buf, deadline - now) {
                Ok(n) if n > 0 => {
                    received.extend_from_slice(&buf[..n]);
                    // Byte-level scan: the monitor may interleave
                    // non-text bytes before the line terminator
                    if let Some(pos) = received.iter().position(|&b| b == b'\n') {
                        if !self.quiet {
                            println!("{}", String::from_utf8_lossy(&received[..pos]).trim_end());
                        }
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(LoaderError::NoAcknowledgment(self.timeout));
                }
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl LoaderState for LoaderFsm<SendStartBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;
        let block = frame_start(fsm.start_address);
        fsm.serial.write_all(&block)?;
        if !fsm.quiet {
            println!("Sent: start block (address 0x{:04X})", fsm.start_address);
        }
        let next = fsm.transition::<AwaitStartAck>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<AwaitStartAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;
        fsm.await_ack()?;
        let next = fsm.transition::<SendDataBlock>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<SendDataBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;

        let block = match fsm.segmenter.next_chunk() {
            Some(chunk) => frame(BlockKind::Data, chunk)?,
            None => {
                // Image exhausted, move on to the trailer
                let next = fsm.transition::<SendTrailerBlock>();
                return Ok(next as Box<dyn LoaderState>);
            }
        };

        fsm.serial.write_all(&block)?;
        if !fsm.quiet {
            println!(
                "Sent: data block ({} / {} bytes)",
                fsm.segmenter.cursor(),
                fsm.segmenter.len()
            );
        }
        let next = fsm.transition::<AwaitDataAck>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<AwaitDataAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;
        fsm.await_ack()?;
        let next = fsm.transition::<SendDataBlock>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<SendTrailerBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;
        let block = frame_trailer();
        fsm.serial.write_all(&block)?;
        if !fsm.quiet {
            println!("Sent: trailer block");
        }
        let next = fsm.transition::<AwaitTrailerAck>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<AwaitTrailerAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;
        fsm.await_ack()?;
        Err(LoaderError::TransferComplete)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl LoaderFsm<SendStartBlock> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        image: Vec<u8>,
        start_address: u16,
        timeout: Duration,
        quiet: bool,
    ) -> Box<dyn LoaderState> {
        Box::new(LoaderFsm {
            state: PhantomData::<SendStartBlock>,
            serial,
            segmenter: Segmenter::new(image),
            start_address,
            timeout,
            quiet,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    const ACK: &[u8] = b"OK\n";

    fn run_loader(mut fsm: Box<dyn LoaderState>) -> Result<(), LoaderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(LoaderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn expected_blocks(address: u16, image: &[u8]) -> Vec<u8> {
        let mut writes = frame_start(address);
        for chunk in image.chunks(255) {
            writes.extend(frame(BlockKind::Data, chunk).unwrap());
        }
        writes.extend(frame_trailer());
        writes
    }

    #[test]
    fn test_loader_full_transfer() {
        let image = vec![0x10, 0x20, 0x30];

        let responses = vec![
            Some(ACK.to_vec()),
            Some(ACK.to_vec()),
            Some(ACK.to_vec()),
        ];

        // One start block, one data block, one trailer block
        let expected_writes = vec![
            0x55, 0x3C, 0x00, 0x02, 0x00, 0x00, 0x02, 0x55, // start @ 0x0000
            0x55, 0x3C, 0x01, 0x03, 0x10, 0x20, 0x30, 0x64, 0x55, // data
            0x55, 0x3C, 0xFF, 0x00, 0x00, 0x55, // trailer
        ];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, image, 0x0000, ACK_TIMEOUT, true);

        run_loader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_loader_empty_image() {
        // No data blocks at all: start and trailer only, two ACKs
        let responses = vec![Some(ACK.to_vec()), Some(ACK.to_vec())];
        let expected_writes = expected_blocks(0x4000, &[]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, Vec::new(), 0x4000, ACK_TIMEOUT, true);

        run_loader(fsm).expect("empty transfer should complete");
    }

    #[test]
    fn test_loader_multiple_data_blocks() {
        let image: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        // start + 2 data blocks (255 + 45) + trailer
        let responses = vec![
            Some(ACK.to_vec()),
            Some(ACK.to_vec()),
            Some(ACK.to_vec()),
            Some(ACK.to_vec()),
        ];
        let expected_writes = expected_blocks(0x0200, &image);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, image, 0x0200, ACK_TIMEOUT, true);

        run_loader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_loader_ack_split_across_reads() {
        // The acknowledgment line may dribble in a few bytes at a time
        let responses = vec![
            Some(b"O".to_vec()),
            Some(b"K\n".to_vec()),
            Some(b"done".to_vec()),
            Some(b"\n".to_vec()),
        ];
        let expected_writes = expected_blocks(0x0000, &[]);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, Vec::new(), 0x0000, ACK_TIMEOUT, true);

        run_loader(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_loader_no_ack_aborts_after_start() {
        // Monitor never answers: only the start block goes out
        let responses = vec![None];
        let expected_writes = frame_start(0x0000);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, vec![0xAA; 10], 0x0000, ACK_TIMEOUT, true);

        match run_loader(fsm) {
            Err(LoaderError::NoAcknowledgment(t)) => assert_eq!(t, ACK_TIMEOUT),
            other => panic!("Expected NoAcknowledgment, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_loader_lost_data_ack_stops_transfer() {
        // Start block is acknowledged, the data block's ACK is lost:
        // the trailer must never be written
        let image = vec![0x01, 0x02];
        let responses = vec![Some(ACK.to_vec()), None];

        let mut expected_writes = frame_start(0x0000);
        expected_writes.extend(frame(BlockKind::Data, &image).unwrap());

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = LoaderFsm::new(mock_serial, image, 0x0000, ACK_TIMEOUT, true);

        match run_loader(fsm) {
            Err(LoaderError::NoAcknowledgment(_)) => {}
            other => panic!("Expected NoAcknowledgment, got {:?}", other.err()),
        }
    }

    // A link with nothing to say: reads block briefly and come back
    // empty, as a real driver does while the monitor stays quiet
    struct SilentSerialPort;

    impl SerialPort for SilentSerialPort {
        fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn read_timeout(&mut self, _buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(0)
        }
    }

    #[test]
    fn test_loader_timeout_waits_full_deadline() {
        let timeout = Duration::from_millis(50);
        let fsm = LoaderFsm::new(Box::new(SilentSerialPort), vec![0x01], 0x0000, timeout, true);

        let started = Instant::now();
        match run_loader(fsm) {
            Err(LoaderError::NoAcknowledgment(t)) => assert_eq!(t, timeout),
            other => panic!("Expected NoAcknowledgment, got {:?}", other.err()),
        }
        let elapsed = started.elapsed();

        assert!(
            elapsed >= timeout,
            "gave up after {:?}, before the {:?} deadline",
            elapsed,
            timeout
        );
        // Generous upper bound to keep slow machines from flaking
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[test]
    fn test_loader_write_count_law() {
        // 1 start + ceil(L / 255) data + 1 trailer blocks, verified via
        // the expected write log for a few image sizes
        for len in [0usize, 1, 255, 256, 510, 700] {
            let image: Vec<u8> = (0..len).map(|i| (i * 3 % 256) as u8).collect();
            let n_blocks = 2 + len.div_ceil(255);

            let responses = vec![Some(ACK.to_vec()); n_blocks];
            let expected_writes = expected_blocks(0x1000, &image);

            let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
            let fsm = LoaderFsm::new(mock_serial, image, 0x1000, ACK_TIMEOUT, true);

            run_loader(fsm).expect("transfer should complete");
        }
    }
}
