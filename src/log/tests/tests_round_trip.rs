//! Writer/reader round trips, including block-boundary shapes.

use crate::log::{Reader, Writer, BLOCK_SIZE, HEADER_SIZE};

fn write_records(records: &[&[u8]]) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.get_ref().clone()
}

fn read_all(data: &[u8]) -> Vec<Vec<u8>> {
    let mut reader = Reader::new(data, None, true);
    let mut out = Vec::new();
    let mut record = Vec::new();
    while reader.read_record(&mut record) {
        out.push(record.clone());
    }
    out
}

fn big_string(partial: &str, n: usize) -> Vec<u8> {
    partial.as_bytes().iter().copied().cycle().take(n).collect()
}

#[test]
fn empty_stream() {
    assert!(read_all(&[]).is_empty());
}

#[test]
fn small_records() {
    let data = write_records(&[b"foo", b"bar", b"", b"xxxx"]);
    assert_eq!(
        read_all(&data),
        vec![
            b"foo".to_vec(),
            b"bar".to_vec(),
            b"".to_vec(),
            b"xxxx".to_vec()
        ]
    );
}

#[test]
fn records_spanning_blocks() {
    let a = big_string("a", 100_000);
    let b = big_string("b", 97_270);
    let c = big_string("c", 8000);
    let data = write_records(&[&a, &b, &c]);
    assert!(data.len() > 6 * BLOCK_SIZE);
    assert_eq!(read_all(&data), vec![a, b, c]);
}

#[test]
fn fragment_exactly_fills_block() {
    // Payload sized so First consumes the whole first block.
    let payload = big_string("x", 2 * (BLOCK_SIZE - HEADER_SIZE));
    let data = write_records(&[&payload, b"tail"]);
    assert_eq!(read_all(&data), vec![payload, b"tail".to_vec()]);
}

#[test]
fn block_tail_too_small_for_header_is_padded() {
    // Leave exactly 6 bytes in the first block, less than a header.
    let n = BLOCK_SIZE - 2 * HEADER_SIZE - 6;
    let first = big_string("p", n);
    let data = write_records(&[&first, b"", b"next-block"]);
    // The padding pushed the third record into the second block.
    assert!(data.len() > BLOCK_SIZE);
    assert_eq!(
        read_all(&data),
        vec![first, b"".to_vec(), b"next-block".to_vec()]
    );
}

#[test]
fn many_records_with_mixed_sizes() {
    let records: Vec<Vec<u8>> = (0..500usize)
        .map(|i| big_string("payload", (i * 131) % 12_000))
        .collect();
    let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
    let data = write_records(&refs);
    assert_eq!(read_all(&data), records);
}

#[test]
fn reopen_appends_at_block_offset() {
    let mut writer = Writer::new(Vec::new());
    writer.add_record(b"before").unwrap();
    let first_part = writer.get_ref().clone();

    // Continue the same stream through a fresh writer, as the engine
    // does when reusing a log after reopen.
    let mut writer = Writer::with_dest_length(first_part.clone(), first_part.len() as u64);
    writer.add_record(b"after").unwrap();
    let data = writer.get_ref().clone();

    assert_eq!(read_all(&data), vec![b"before".to_vec(), b"after".to_vec()]);
}
