//! File search and overlap queries over level file lists.

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, InternalKeyComparator};
use crate::key::{InternalKey, ValueType};
use crate::version::{find_file, some_file_overlaps_range, FileMetaData};

struct Harness {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    next_number: u64,
}

impl Harness {
    fn new() -> Self {
        Harness {
            icmp: InternalKeyComparator::new(Arc::new(BytewiseComparator)),
            files: Vec::new(),
            next_number: 1,
        }
    }

    fn add(&mut self, smallest: &str, largest: &str) {
        let file = FileMetaData::new(
            self.next_number,
            1000,
            InternalKey::new(smallest.as_bytes(), 100, ValueType::Value),
            InternalKey::new(largest.as_bytes(), 100, ValueType::Value),
        );
        self.next_number += 1;
        self.files.push(Arc::new(file));
    }

    fn find(&self, key: &str) -> usize {
        let target = InternalKey::new(key.as_bytes(), 100, ValueType::Value);
        find_file(&self.icmp, &self.files, target.encoded())
    }

    fn overlaps(&self, disjoint: bool, smallest: Option<&str>, largest: Option<&str>) -> bool {
        some_file_overlaps_range(
            &self.icmp,
            disjoint,
            &self.files,
            smallest.map(|s| s.as_bytes()),
            largest.map(|s| s.as_bytes()),
        )
    }
}

#[test]
fn empty_file_list() {
    let h = Harness::new();
    assert_eq!(h.find("foo"), 0);
    assert!(!h.overlaps(true, Some("a"), Some("z")));
    assert!(!h.overlaps(true, None, None));
}

#[test]
fn single_file() {
    let mut h = Harness::new();
    h.add("p", "q");
    assert_eq!(h.find("a"), 0);
    assert_eq!(h.find("p"), 0);
    assert_eq!(h.find("q"), 0);
    assert_eq!(h.find("q1"), 1);
    assert_eq!(h.find("z"), 1);

    assert!(!h.overlaps(true, Some("a"), Some("b")));
    assert!(!h.overlaps(true, Some("z1"), Some("z2")));
    assert!(h.overlaps(true, Some("a"), Some("p")));
    assert!(h.overlaps(true, Some("a"), Some("q")));
    assert!(h.overlaps(true, Some("p"), Some("p1")));
    assert!(h.overlaps(true, Some("p1"), Some("p2")));
    assert!(h.overlaps(true, Some("q"), Some("z")));
    // Open-ended bounds.
    assert!(h.overlaps(true, None, Some("p")));
    assert!(h.overlaps(true, Some("q"), None));
    assert!(h.overlaps(true, None, None));
    assert!(!h.overlaps(true, None, Some("j")));
    assert!(!h.overlaps(true, Some("r"), None));
}

#[test]
fn multiple_disjoint_files() {
    let mut h = Harness::new();
    h.add("150", "200");
    h.add("200", "250");
    h.add("300", "350");
    h.add("400", "450");

    assert_eq!(h.find("100"), 0);
    assert_eq!(h.find("200"), 0);
    assert_eq!(h.find("201"), 1);
    assert_eq!(h.find("249"), 1);
    assert_eq!(h.find("251"), 2);
    assert_eq!(h.find("350"), 2);
    assert_eq!(h.find("351"), 3);
    assert_eq!(h.find("450"), 3);
    assert_eq!(h.find("451"), 4);

    assert!(!h.overlaps(true, Some("100"), Some("149")));
    assert!(!h.overlaps(true, Some("251"), Some("299")));
    assert!(!h.overlaps(true, Some("451"), Some("500")));
    assert!(h.overlaps(true, Some("100"), Some("150")));
    assert!(h.overlaps(true, Some("350"), Some("450")));
    assert!(h.overlaps(true, Some("450"), Some("500")));
}

#[test]
fn overlapping_files_use_linear_scan() {
    let mut h = Harness::new();
    // Level-0 shape: ranges overlap; the disjoint fast path would lie.
    h.add("150", "600");
    h.add("400", "500");

    assert!(!h.overlaps(false, Some("100"), Some("149")));
    assert!(!h.overlaps(false, Some("601"), Some("700")));
    assert!(h.overlaps(false, Some("100"), Some("150")));
    assert!(h.overlaps(false, Some("450"), Some("700")));
    assert!(h.overlaps(false, Some("450"), Some("470")));
}
