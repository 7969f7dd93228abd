//! VersionEdit codec round trips and corruption handling.

use crate::key::{InternalKey, ValueType};
use crate::version::edit::VersionEdit;

fn ikey(user_key: &str, seq: u64) -> InternalKey {
    InternalKey::new(user_key.as_bytes(), seq, ValueType::Value)
}

fn assert_round_trip(edit: &VersionEdit) {
    let encoded = edit.encode();
    let decoded = VersionEdit::decode(&encoded).unwrap();
    // Encoding again must be byte-identical.
    assert_eq!(decoded.encode(), encoded);
}

#[test]
fn empty_edit_round_trips() {
    assert_round_trip(&VersionEdit::new());
}

#[test]
fn full_edit_round_trips() {
    let big: u64 = 1u64 << 50;
    let mut edit = VersionEdit::new();
    for i in 0..4 {
        edit.add_file(
            3,
            big + 300 + i,
            big + 400 + i,
            ikey("foo", big + 500 + i),
            ikey("zoo", big + 600 + i),
        );
        edit.remove_file(4, big + 700 + i);
        edit.set_compact_pointer(i as usize, ikey("x", big + 900 + i));
    }
    edit.set_comparator_name("foo");
    edit.set_log_number(big + 100);
    edit.set_prev_log_number(big + 99);
    edit.set_next_file_number(big + 200);
    edit.set_last_sequence(big + 1000);
    assert_round_trip(&edit);

    let decoded = VersionEdit::decode(&edit.encode()).unwrap();
    assert_eq!(decoded.comparator.as_deref(), Some("foo"));
    assert_eq!(decoded.log_number, Some(big + 100));
    assert_eq!(decoded.new_files.len(), 4);
    assert_eq!(decoded.deleted_files.len(), 4);
    assert_eq!(decoded.compact_pointers.len(), 4);
    assert_eq!(decoded.new_files[0].1.number, big + 300);
    assert_eq!(decoded.new_files[0].1.smallest.user_key(), b"foo");
}

#[test]
fn unknown_tag_is_corruption() {
    let mut encoded = Vec::new();
    crate::encoding::put_varint32(&mut encoded, 99); // no such tag
    crate::encoding::put_varint64(&mut encoded, 5);
    let err = VersionEdit::decode(&encoded).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn truncated_edit_is_corruption() {
    // Single-field edit: every strict prefix cuts the field mid-way.
    let mut edit = VersionEdit::new();
    edit.set_comparator_name("bytewise");
    let encoded = edit.encode();
    for cut in 1..encoded.len() {
        assert!(
            VersionEdit::decode(&encoded[..cut]).is_err(),
            "cut at {cut} decoded"
        );
    }
}

#[test]
fn oversized_level_is_corruption() {
    let mut encoded = Vec::new();
    crate::encoding::put_varint32(&mut encoded, 6); // deleted-file tag
    crate::encoding::put_varint32(&mut encoded, 99); // level out of range
    crate::encoding::put_varint64(&mut encoded, 1);
    assert!(VersionEdit::decode(&encoded).is_err());
}
