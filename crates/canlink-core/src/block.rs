//! Block/chunk codec for file transfer.
//!
//! A file is read in blocks of up to [`BLOCK_SIZE`] bytes. Each block is
//! announced by a checksum frame and then sent as up to [`MAX_CHUNKS`] chunks
//! of [`CHUNK_SIZE`] bytes, the last one possibly short.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::const_assert_eq;

use crate::opcode::MAX_CHUNKS;
use crate::wire::{WireError, MAX_PAYLOAD};

pub const CHUNK_SIZE: usize = 6;
pub const BLOCK_SIZE: usize = CHUNK_SIZE * MAX_CHUNKS as usize;

const_assert_eq!(BLOCK_SIZE, 1320);
const_assert_eq!(CHUNK_SIZE, MAX_PAYLOAD);

/// Bytes in an encoded [`BlockHeader`].
pub const HEADER_LEN: usize = 5;

/// Split a block into chunk payloads. Pure: calling it twice on the same
/// block yields the same sequence, which is what makes resend idempotent.
pub fn split_into_chunks(block: &[u8]) -> Vec<Bytes> {
    block
        .chunks(CHUNK_SIZE)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Number of chunks a block of `len` bytes splits into.
pub fn chunk_count(len: usize) -> u8 {
    // Callers never pass more than BLOCK_SIZE, so this fits.
    len.div_ceil(CHUNK_SIZE).min(MAX_CHUNKS as usize) as u8
}

/// CRC-32/ISO-HDLC of the block, seed 0.
pub fn checksum(block: &[u8]) -> u32 {
    crc32fast::hash(block)
}

pub fn reassemble<I, B>(chunks: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut buf = BytesMut::with_capacity(BLOCK_SIZE);
    for chunk in chunks {
        buf.put_slice(chunk.as_ref());
    }
    buf.freeze()
}

/// Payload of the CHECKSUM frame that opens every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub crc: u32,
    pub chunk_count: u8,
}

impl BlockHeader {
    pub fn for_block(block: &[u8]) -> Self {
        Self {
            crc: checksum(block),
            chunk_count: chunk_count(block.len()),
        }
    }

    /// `crc BE ‖ chunk_count`.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let c = self.crc.to_be_bytes();
        [c[0], c[1], c[2], c[3], self.chunk_count]
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() != HEADER_LEN {
            return Err(WireError::DecodeError(format!(
                "block header is {HEADER_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let chunk_count = payload[4];
        if chunk_count == 0 || chunk_count > MAX_CHUNKS {
            return Err(WireError::DecodeError(format!(
                "block header chunk count {chunk_count} out of range"
            )));
        }
        Ok(Self {
            crc: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            chunk_count,
        })
    }
}
