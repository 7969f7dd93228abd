//! Point-in-time read views.
//!
//! A snapshot pins a sequence number: reads against it see exactly the
//! writes sequenced at or before it. The engine tracks live snapshots
//! in acquisition order (which is sequence order); the oldest one
//! bounds what compaction may garbage-collect.

use crate::key::SequenceNumber;

/// Handle to a fixed read view. Obtain via `DB::snapshot`, read through
/// `ReadOptions::snapshot`, release via `DB::release_snapshot`.
#[derive(Debug)]
pub struct Snapshot {
    sequence: SequenceNumber,
}

impl Snapshot {
    pub(crate) fn new(sequence: SequenceNumber) -> Snapshot {
        Snapshot { sequence }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}
