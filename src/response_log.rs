use chrono::{DateTime, Utc};
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseRecord {
    pub received_at: DateTime<Utc>,
    pub raw: String,
}

/// Bounded, append-only record of raw inbound payloads.
///
/// Records are addressed by a sequence number that keeps counting across
/// evictions, so a cursor taken earlier stays valid: it just skips whatever
/// has since fallen off the front.
#[derive(Debug)]
pub struct ResponseLog {
    records: VecDeque<ResponseRecord>,
    capacity: usize,
    // sequence number of records[0]
    first_seq: u64,
}

impl Default for ResponseLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResponseLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            first_seq: 0,
        }
    }

    pub fn push(&mut self, received_at: DateTime<Utc>, raw: String) -> u64 {
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.first_seq += 1;
        }

        self.records.push_back(ResponseRecord { received_at, raw });
        self.end_seq() - 1
    }

    /// Sequence number the next pushed record will get.
    pub fn end_seq(&self) -> u64 {
        self.first_seq + self.records.len() as u64
    }

    /// Records with sequence number >= `cursor`, oldest first.
    pub fn since(&self, cursor: u64) -> impl Iterator<Item = (u64, &ResponseRecord)> + '_ {
        let skip = cursor.saturating_sub(self.first_seq) as usize;
        self.records
            .iter()
            .enumerate()
            .skip(skip)
            .map(move |(i, r)| (self.first_seq + i as u64, r))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseRecord> + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
