//! Manifest records.
//!
//! A `VersionEdit` is one delta against the current file set: files
//! added and removed per level, compaction-pointer moves, and the
//! bookkeeping numbers (log, next-file, last-sequence). The manifest is
//! a log stream of these records; replaying them from an empty state
//! reconstructs the live version.
//!
//! Encoding is tag-per-field varints. An unrecognized tag is corruption:
//! edits are never written by newer code than reads them.

use crate::encoding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::error::{Error, Result};
use crate::key::InternalKey;
use crate::version::FileMetaData;
use crate::NUM_LEVELS;

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
// Tag 8 was used by an abandoned large-value scheme; never reused.
const TAG_PREV_LOG_NUMBER: u32 = 9;

#[derive(Debug, Default, Clone)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> VersionEdit {
        VersionEdit::default()
    }

    pub fn clear(&mut self) {
        *self = VersionEdit::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Record the table `number` as added to `level`.
    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            FileMetaData::new(number, file_size, smallest, largest),
        ));
    }

    /// Record the table `number` as removed from `level`.
    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(name) = &self.comparator {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, number);
        }
        if let Some(number) = self.prev_log_number {
            put_varint32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut buf, number);
        }
        if let Some(number) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, number);
        }
        if let Some(sequence) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, sequence);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, file.smallest.encoded());
            put_length_prefixed_slice(&mut buf, file.largest.encoded());
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<VersionEdit> {
        let mut edit = VersionEdit::new();
        while !buf.is_empty() {
            let (tag, n) = get_varint32(buf).map_err(|_| corrupt("bad tag"))?;
            buf = &buf[n..];
            match tag {
                TAG_COMPARATOR => {
                    let (name, n) = get_length_prefixed_slice(buf)
                        .map_err(|_| corrupt("comparator name"))?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| corrupt("comparator name"))?,
                    );
                    buf = &buf[n..];
                }
                TAG_LOG_NUMBER => {
                    let (number, n) = get_varint64(buf).map_err(|_| corrupt("log number"))?;
                    edit.log_number = Some(number);
                    buf = &buf[n..];
                }
                TAG_PREV_LOG_NUMBER => {
                    let (number, n) =
                        get_varint64(buf).map_err(|_| corrupt("previous log number"))?;
                    edit.prev_log_number = Some(number);
                    buf = &buf[n..];
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (number, n) =
                        get_varint64(buf).map_err(|_| corrupt("next file number"))?;
                    edit.next_file_number = Some(number);
                    buf = &buf[n..];
                }
                TAG_LAST_SEQUENCE => {
                    let (sequence, n) =
                        get_varint64(buf).map_err(|_| corrupt("last sequence number"))?;
                    edit.last_sequence = Some(sequence);
                    buf = &buf[n..];
                }
                TAG_COMPACT_POINTER => {
                    let (level, n) = get_level(buf)?;
                    buf = &buf[n..];
                    let (key, n) =
                        get_length_prefixed_slice(buf).map_err(|_| corrupt("compaction pointer"))?;
                    edit.compact_pointers
                        .push((level, InternalKey::decode_from(key)));
                    buf = &buf[n..];
                }
                TAG_DELETED_FILE => {
                    let (level, n) = get_level(buf)?;
                    buf = &buf[n..];
                    let (number, n) = get_varint64(buf).map_err(|_| corrupt("deleted file"))?;
                    edit.deleted_files.push((level, number));
                    buf = &buf[n..];
                }
                TAG_NEW_FILE => {
                    let (level, n) = get_level(buf)?;
                    buf = &buf[n..];
                    let (number, n) = get_varint64(buf).map_err(|_| corrupt("new-file entry"))?;
                    buf = &buf[n..];
                    let (file_size, n) =
                        get_varint64(buf).map_err(|_| corrupt("new-file entry"))?;
                    buf = &buf[n..];
                    let (smallest, n) =
                        get_length_prefixed_slice(buf).map_err(|_| corrupt("new-file entry"))?;
                    let smallest = InternalKey::decode_from(smallest);
                    buf = &buf[n..];
                    let (largest, n) =
                        get_length_prefixed_slice(buf).map_err(|_| corrupt("new-file entry"))?;
                    let largest = InternalKey::decode_from(largest);
                    buf = &buf[n..];
                    edit.new_files.push((
                        level,
                        FileMetaData::new(number, file_size, smallest, largest),
                    ));
                }
                _ => return Err(corrupt("unknown tag")),
            }
        }
        Ok(edit)
    }
}

fn corrupt(what: &str) -> Error {
    Error::corruption(format!("VersionEdit: {what}"))
}

fn get_level(buf: &[u8]) -> Result<(usize, usize)> {
    let (level, n) = get_varint32(buf).map_err(|_| corrupt("level"))?;
    if level as usize >= NUM_LEVELS {
        return Err(corrupt("over-large level"));
    }
    Ok((level as usize, n))
}
