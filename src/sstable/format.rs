//! Table file plumbing: block handles, the footer, and raw block I/O.
//!
//! A table file ends with a fixed-size footer:
//!
//! ```text
//! | metaindex handle | index handle | padding | magic: fixed64 |
//! ```
//!
//! Every block in the file is followed by a 5-byte trailer (a codec
//! byte and the masked CRC of the block body plus that byte) which
//! [`read_block`] verifies and strips.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::encoding::{decode_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::error::{Error, Result};
use crate::log::{mask_crc, unmask_crc};
use crate::CompressionType;

/// Sentinel closing every table file. Picked once, never changed.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

/// Maximum encoded size of a [`BlockHandle`]: two varint64s.
pub const MAX_ENCODED_HANDLE_LENGTH: usize = 10 + 10;

/// Encoded footer size: two maximally-padded handles plus the magic.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * MAX_ENCODED_HANDLE_LENGTH + 8;

/// codec byte + fixed32 CRC.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Locates a block within a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode from the front of `buf`; returns the handle and bytes
    /// consumed.
    pub fn decode_from(buf: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n) = get_varint64(buf).map_err(|_| Error::corruption("bad block handle"))?;
        let (size, m) =
            get_varint64(&buf[n..]).map_err(|_| Error::corruption("bad block handle"))?;
        Ok((BlockHandle { offset, size }, n + m))
    }
}

/// The fixed-size table footer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_ENCODED_HANDLE_LENGTH, 0);
        crate::encoding::put_fixed64(&mut buf, TABLE_MAGIC_NUMBER);
        debug_assert_eq!(buf.len(), FOOTER_ENCODED_LENGTH);
        buf
    }

    pub fn decode_from(buf: &[u8]) -> Result<Footer> {
        if buf.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::corruption("footer too short"));
        }
        let magic = crate::encoding::decode_fixed64(&buf[FOOTER_ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::corruption("not a table file (bad magic number)"));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(buf)?;
        let (index_handle, _) = BlockHandle::decode_from(&buf[n..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Append `body` to `buf` with its codec/CRC trailer, as the builder
/// writes blocks.
pub fn append_block_trailer(buf: &mut Vec<u8>, body: &[u8], codec: CompressionType) {
    buf.push(codec as u8);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.update(&[codec as u8]);
    put_fixed32(buf, mask_crc(hasher.finalize()));
}

/// Read, verify, and decompress the block at `handle`.
pub fn read_block(
    file: &File,
    handle: &BlockHandle,
    verify_checksums: bool,
) -> Result<Vec<u8>> {
    let mut raw = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];
    file.read_exact_at(&mut raw, handle.offset)
        .map_err(|e| Error::Io(format!("reading block: {e}")))?;

    let body = &raw[..handle.size as usize];
    let codec_byte = raw[handle.size as usize];
    if verify_checksums {
        let stored = unmask_crc(decode_fixed32(&raw[handle.size as usize + 1..]));
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        hasher.update(&[codec_byte]);
        if stored != hasher.finalize() {
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    match CompressionType::from_u8(codec_byte) {
        Some(CompressionType::None) => Ok(body.to_vec()),
        Some(CompressionType::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|e| Error::corruption(format!("corrupted snappy block: {e}"))),
        Some(CompressionType::Zstd) => Err(Error::NotSupported(
            "zstd-compressed block in a build without zstd".to_string(),
        )),
        None => Err(Error::corruption("unknown block compression type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_handle_round_trip() {
        for (offset, size) in [(0u64, 0u64), (1, 2), (1 << 30, 1 << 20), (u64::MAX, 7)] {
            let handle = BlockHandle::new(offset, size);
            let encoded = handle.encoded();
            let (decoded, n) = BlockHandle::decode_from(&encoded).unwrap();
            assert_eq!(decoded, handle);
            assert_eq!(n, encoded.len());
        }
    }

    #[test]
    fn footer_round_trip() {
        let footer = Footer {
            metaindex_handle: BlockHandle::new(1000, 200),
            index_handle: BlockHandle::new(1205, 4096),
        };
        let encoded = footer.encoded();
        assert_eq!(encoded.len(), FOOTER_ENCODED_LENGTH);
        let decoded = Footer::decode_from(&encoded).unwrap();
        assert_eq!(decoded.metaindex_handle, footer.metaindex_handle);
        assert_eq!(decoded.index_handle, footer.index_handle);
    }

    #[test]
    fn footer_rejects_bad_magic() {
        let mut encoded = Footer::default().encoded();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        assert!(Footer::decode_from(&encoded).is_err());
    }
}
