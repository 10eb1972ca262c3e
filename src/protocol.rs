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

//! Wire format: framing constants, checksum and block construction

use thiserror::Error;

/// Head - first byte of every block
pub const HEAD: u8 = 0x55;

/// Sync - second byte of every block
pub const SYNC: u8 = 0x3C;

/// Trailer - last byte of every block
pub const TRAILER: u8 = 0x55;

/// Maximum payload bytes in a single data block
pub const MAX_DATA_LEN: usize = 255;

/// Block kind byte, third byte of every block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Start block - 2-byte big-endian load address
    Start,
    /// Data block - 1-255 image bytes
    Data,
    /// Trailer block - empty, ends the transfer
    Trailer,
}

impl BlockKind {
    pub fn as_byte(self) -> u8 {
        match self {
            BlockKind::Start => 0x00,
            BlockKind::Data => 0x01,
            BlockKind::Trailer => 0xFF,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid {kind:?} payload size: {len} bytes")]
    InvalidPayloadSize { kind: BlockKind, len: usize },
}

/// Sum of all input bytes, truncated to the low 8 bits. Empty input sums to 0.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build the wire form of one block:
/// head, sync, kind, length, payload, checksum, trailer.
///
/// The checksum covers kind through the last payload byte; the sentinels
/// are excluded. Trailer blocks carry a fixed checksum of 0.
pub fn frame(kind: BlockKind, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let valid = match kind {
        BlockKind::Start => payload.len() == 2,
        BlockKind::Data => (1..=MAX_DATA_LEN).contains(&payload.len()),
        BlockKind::Trailer => payload.is_empty(),
    };
    if !valid {
        return Err(FrameError::InvalidPayloadSize {
            kind,
            len: payload.len(),
        });
    }

    Ok(frame_unchecked(kind, payload))
}

/// Build a start block carrying the big-endian load address.
pub fn frame_start(address: u16) -> Vec<u8> {
    frame_unchecked(BlockKind::Start, &address.to_be_bytes())
}

/// Build the empty trailer block that ends the transfer.
pub fn frame_trailer() -> Vec<u8> {
    frame_unchecked(BlockKind::Trailer, &[])
}

fn frame_unchecked(kind: BlockKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(HEAD);
    out.push(SYNC);
    out.push(kind.as_byte());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    // The trailer block carries a fixed checksum of 0; its kind byte is
    // not summed
    out.push(match kind {
        BlockKind::Trailer => 0,
        _ => checksum(&out[2..]),
    });
    out.push(TRAILER);
    out
}

// ============================================================================
// Tests
// ============================================================================
