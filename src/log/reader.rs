//! Record stream reader.
//!
//! Reads blocks lazily, reassembles fragmented records, validates CRCs,
//! and distinguishes a torn tail (clean end-of-stream after a crash)
//! from genuine corruption, which is surfaced through a [`Reporter`]
//! while the reader skips to the next clean boundary.

use std::io::Read;

use crate::encoding::decode_fixed32;
use crate::log::{record_crc, unmask_crc, RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};

/// Receives corruption notifications: how many bytes were dropped and
/// why.
pub trait Reporter {
    fn corruption(&mut self, bytes: usize, reason: &str);
}

enum Physical {
    /// Raw type byte and payload; the caller decides what an unknown
    /// type means.
    Record(u8, Vec<u8>),
    Eof,
    Bad,
}

pub struct Reader<R: Read> {
    src: R,
    reporter: Option<Box<dyn Reporter>>,
    checksum: bool,
    /// Current block contents.
    buf: Vec<u8>,
    /// Read cursor inside `buf`.
    pos: usize,
    /// The source returned a short block; no more refills.
    eof: bool,
    /// When true, initial Middle/Last fragments are silently skipped:
    /// the stream is being entered at a position that may be mid-record.
    resyncing: bool,
}

impl<R: Read> Reader<R> {
    pub fn new(src: R, reporter: Option<Box<dyn Reporter>>, checksum: bool) -> Self {
        Self::with_resync(src, reporter, checksum, false)
    }

    /// `resyncing` suppresses corruption reports for fragments that
    /// cannot begin a record until the first clean record boundary.
    pub fn with_resync(
        src: R,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
        resyncing: bool,
    ) -> Self {
        Reader {
            src,
            reporter,
            checksum,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            resyncing,
        }
    }

    /// Read the next logical record into `record`. Returns false at the
    /// end of the stream.
    pub fn read_record(&mut self, record: &mut Vec<u8>) -> bool {
        record.clear();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record() {
                Physical::Record(type_byte, payload) => {
                    if type_byte > MAX_RECORD_TYPE || type_byte == RecordType::Zero as u8 {
                        self.report_corruption(
                            payload.len() + record.len(),
                            "unknown record type",
                        );
                        in_fragmented_record = false;
                        record.clear();
                        continue;
                    }
                    let fragment_type = match type_byte {
                        1 => RecordType::Full,
                        2 => RecordType::First,
                        3 => RecordType::Middle,
                        _ => RecordType::Last,
                    };

                    if self.resyncing {
                        match fragment_type {
                            RecordType::Middle => continue,
                            RecordType::Last => {
                                self.resyncing = false;
                                continue;
                            }
                            _ => self.resyncing = false,
                        }
                    }

                    match fragment_type {
                        RecordType::Full => {
                            if in_fragmented_record {
                                self.report_corruption(
                                    record.len(),
                                    "partial record without end(1)",
                                );
                                record.clear();
                            }
                            *record = payload;
                            return true;
                        }
                        RecordType::First => {
                            if in_fragmented_record {
                                self.report_corruption(
                                    record.len(),
                                    "partial record without end(2)",
                                );
                                record.clear();
                            }
                            *record = payload;
                            in_fragmented_record = true;
                        }
                        RecordType::Middle => {
                            if !in_fragmented_record {
                                self.report_corruption(
                                    payload.len(),
                                    "missing start of fragmented record(1)",
                                );
                            } else {
                                record.extend_from_slice(&payload);
                            }
                        }
                        RecordType::Last => {
                            if !in_fragmented_record {
                                self.report_corruption(
                                    payload.len(),
                                    "missing start of fragmented record(2)",
                                );
                            } else {
                                record.extend_from_slice(&payload);
                                return true;
                            }
                        }
                        RecordType::Zero => unreachable!("filtered above"),
                    }
                }
                Physical::Eof => {
                    if in_fragmented_record {
                        // The writer died mid-record; the partial tail is
                        // not corruption, just absent.
                        record.clear();
                    }
                    return false;
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(record.len(), "error in middle of record");
                        in_fragmented_record = false;
                        record.clear();
                    }
                }
            }
        }
    }

    fn report_corruption(&mut self, bytes: usize, reason: &str) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.buf.len() - self.pos < HEADER_SIZE {
                if !self.eof {
                    // Block ended; anything left is tail padding. Refill.
                    self.pos = 0;
                    self.buf.clear();
                    match read_full(&mut self.src, &mut self.buf, BLOCK_SIZE) {
                        Ok(n) => {
                            if n < BLOCK_SIZE {
                                self.eof = true;
                            }
                            if n == 0 {
                                return Physical::Eof;
                            }
                        }
                        Err(_) => {
                            // Treat an unreadable tail like a truncated one.
                            self.eof = true;
                            self.buf.clear();
                            return Physical::Eof;
                        }
                    }
                    continue;
                } else {
                    // A truncated header at eof is a crash artifact, not
                    // corruption.
                    self.buf.clear();
                    self.pos = 0;
                    return Physical::Eof;
                }
            }

            let header = &self.buf[self.pos..self.pos + HEADER_SIZE];
            let expected_crc = unmask_crc(decode_fixed32(header));
            let length = header[4] as usize | ((header[5] as usize) << 8);
            let type_byte = header[6];

            if HEADER_SIZE + length > self.buf.len() - self.pos {
                let drop_size = self.buf.len() - self.pos;
                self.buf.clear();
                self.pos = 0;
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return Physical::Bad;
                }
                // Crash in the middle of writing this fragment.
                return Physical::Eof;
            }

            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Zero-filled preallocated region; nothing was written.
                self.buf.clear();
                self.pos = 0;
                return Physical::Bad;
            }

            let payload = &self.buf[self.pos + HEADER_SIZE..self.pos + HEADER_SIZE + length];
            if self.checksum && expected_crc != record_crc(type_byte, payload) {
                // The length field itself may be garbage, in which case
                // the rest of the block cannot be trusted either.
                let drop_size = self.buf.len() - self.pos;
                self.buf.clear();
                self.pos = 0;
                self.report_corruption(drop_size, "checksum mismatch");
                return Physical::Bad;
            }

            let payload = payload.to_vec();
            self.pos += HEADER_SIZE + length;
            return Physical::Record(type_byte, payload);
        }
    }
}

/// Read up to `want` bytes, tolerating short reads. Returns bytes read.
fn read_full<R: Read>(src: &mut R, buf: &mut Vec<u8>, want: usize) -> std::io::Result<usize> {
    buf.resize(want, 0);
    let mut filled = 0;
    while filled < want {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                buf.truncate(filled);
                return Err(e);
            }
        }
    }
    buf.truncate(filled);
    Ok(filled)
}
