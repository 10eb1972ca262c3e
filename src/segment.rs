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

use crate::protocol::MAX_DATA_LEN;

/// Splits a loaded image into in-order chunks of at most 255 bytes.
///
/// Owns the image bytes and the transfer cursor. Chunks are never empty:
/// an empty image yields no chunks at all, and the last chunk of a
/// non-empty image carries whatever remains after the full 255-byte
/// chunks before it.
pub struct Segmenter {
    image: Vec<u8>,
    cursor: usize,
}

impl Segmenter {
    pub fn new(image: Vec<u8>) -> Self {
        Segmenter { image, cursor: 0 }
    }

    /// Total image length in bytes.
    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Byte offset already handed out; runs from 0 to `len()`.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Next chunk of the image, or None once the whole image has been
    /// handed out.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        if self.cursor >= self.image.len() {
            return None;
        }
        let end = usize::min(self.cursor + MAX_DATA_LEN, self.image.len());
        let chunk = &self.image[self.cursor..end];
        self.cursor = end;
        Some(chunk)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_chunks(image: Vec<u8>) -> Vec<Vec<u8>> {
        let mut seg = Segmenter::new(image);
        let mut chunks = Vec::new();
        while let Some(chunk) = seg.next_chunk() {
            chunks.push(chunk.to_vec());
        }
        chunks
    }

    #[test]
    fn test_empty_image_yields_no_chunks() {
        let mut seg = Segmenter::new(Vec::new());
        assert_eq!(seg.len(), 0);
        assert!(seg.is_empty());
        assert!(seg.next_chunk().is_none());
        assert_eq!(seg.cursor(), 0);
    }

    #[test]
    fn test_small_image_single_chunk() {
        let chunks = collect_chunks(vec![0x10, 0x20, 0x30]);
        assert_eq!(chunks, vec![vec![0x10, 0x20, 0x30]]);
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let chunks = collect_chunks(vec![0xAB; 255]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 255);

        let chunks = collect_chunks(vec![0xAB; 510]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 255);
        assert_eq!(chunks[1].len(), 255);
    }

    #[test]
    fn test_remainder_chunk() {
        let chunks = collect_chunks(vec![0xCD; 256]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 255);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn test_chunk_count_and_round_trip() {
        for len in [0usize, 1, 100, 254, 255, 256, 300, 510, 511, 1000] {
            let image: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let chunks = collect_chunks(image.clone());

            assert_eq!(chunks.len(), len.div_ceil(255));
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 255));

            let rejoined: Vec<u8> = chunks.concat();
            assert_eq!(rejoined, image);
        }
    }

    #[test]
    fn test_cursor_advances_monotonically() {
        let mut seg = Segmenter::new(vec![0u8; 300]);
        assert_eq!(seg.cursor(), 0);
        seg.next_chunk();
        assert_eq!(seg.cursor(), 255);
        seg.next_chunk();
        assert_eq!(seg.cursor(), 300);
        assert!(seg.next_chunk().is_none());
        assert_eq!(seg.cursor(), 300);
    }
}
