//! Record stream writer.

use std::io::Write;

use crate::encoding::put_fixed32;
use crate::error::Result;
use crate::log::{mask_crc, record_crc, RecordType, BLOCK_SIZE, HEADER_SIZE};

pub struct Writer<W: Write> {
    dest: W,
    /// Write offset inside the current block.
    block_offset: usize,
}

impl<W: Write> Writer<W> {
    pub fn new(dest: W) -> Self {
        Writer {
            dest,
            block_offset: 0,
        }
    }

    /// Resume writing a stream that already holds `dest_length` bytes.
    pub fn with_dest_length(dest: W, dest_length: u64) -> Self {
        Writer {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
        }
    }

    /// Append one logical record, fragmenting across blocks as needed.
    /// Each fragment reaches the OS before this returns; durability is
    /// the caller's [`sync`](Writer::sync) decision.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record.len();
        let mut offset = 0;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Too small for a header: pad out and open a new block.
                if leftover > 0 {
                    self.dest.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = std::cmp::min(left, avail);
            let end = left == fragment_length;
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &record[offset..offset + fragment_length])?;
            offset += fragment_length;
            left -= fragment_length;
            begin = false;
            if left == 0 {
                return Ok(());
            }
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.dest
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.dest
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        put_fixed32(&mut header, mask_crc(record_crc(record_type as u8, payload)));
        header.push((payload.len() & 0xff) as u8);
        header.push((payload.len() >> 8) as u8);
        header.push(record_type as u8);

        self.dest.write_all(&header)?;
        self.dest.write_all(payload)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }
}

impl Writer<std::fs::File> {
    /// Force the stream to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync_data()?;
        Ok(())
    }
}
