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

use serialport::SerialPort as SerialPortTrait;
use std::time::Duration;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for the serial link operations needed by the loader
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate.
/// The monitor link is fixed 8N1; only device and baud rate vary.
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(device, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout).map_err(std::io::Error::other)?;
        self.port.read(buf)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Responses returned one per read; each entry is a byte run the
    // monitor sends back (None = timeout)
    responses: Vec<Option<Vec<u8>>>,
    response_pos: usize,
    // Bytes of the current response not yet handed to a read
    pending: Vec<u8>,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            responses,
            response_pos: 0,
            pending: Vec::new(),
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            // Out of responses = timeout
            if self.response_pos >= self.responses.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Mock timeout",
                ));
            }

            let entry = self.responses[self.response_pos].take();
            self.response_pos += 1;

            match entry {
                Some(bytes) => self.pending = bytes,
                // None entry = timeout
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "Mock timeout",
                    ));
                }
            }
        }

        let n = usize::min(buf.len(), self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        assert!(
            self.pending.is_empty(),
            "MockSerialPort dropped with {} unconsumed bytes in the current response",
            self.pending.len()
        );

        assert_eq!(
            self.response_pos,
            self.responses.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {})",
            self.responses.len() - self.response_pos,
            self.response_pos,
            self.responses.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
