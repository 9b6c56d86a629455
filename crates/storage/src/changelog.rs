//! Bounded, gap-free change log
//!
//! Records are numbered consecutively from the last number the log was reset
//! to. Only the newest `capacity` records are retained; requests reaching
//! below the retained window fail with a replication gap instead of silently
//! skipping changes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use strand_core::{ChangeRecord, Error, Mutation, Result};

pub struct ChangeLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

struct LogInner {
    records: VecDeque<ChangeRecord>,
    /// Number of the newest committed record
    last: u64,
    bytes: u64,
}

impl LogInner {
    fn push(&mut self, record: ChangeRecord, capacity: usize) {
        self.bytes += record.size() as u64;
        self.last = record.change_number;
        self.records.push_back(record);
        while self.records.len() > capacity {
            if let Some(evicted) = self.records.pop_front() {
                self.bytes = self.bytes.saturating_sub(evicted.size() as u64);
            }
        }
    }

    /// First number still served, or `last + 1` when nothing is retained
    fn first_retained(&self) -> u64 {
        self.records
            .front()
            .map_or(self.last.saturating_add(1), |r| r.change_number)
    }

    fn next_number(&self) -> Result<u64> {
        self.last.checked_add(1).ok_or_else(|| {
            Error::storage("commit change", "change number space is exhausted")
        })
    }
}

impl ChangeLog {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 0)
    }

    /// A log whose next record will be numbered `last + 1`
    pub fn starting_at(capacity: usize, last: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LogInner {
                records: VecDeque::new(),
                last,
                bytes: 0,
            }),
        }
    }

    /// Commit a batch under the next change number
    pub fn append(&self, mutations: Vec<Mutation>) -> Result<u64> {
        let mut inner = self.inner.lock();
        let number = inner.next_number()?;
        inner.push(ChangeRecord::new(number, mutations), self.capacity);
        Ok(number)
    }

    /// Commit a record carrying a number assigned elsewhere (a primary)
    pub fn append_numbered(&self, record: ChangeRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        let expected = inner.next_number()?;
        if record.change_number != expected {
            return Err(Error::replication_gap(expected, record.change_number));
        }
        inner.push(record, self.capacity);
        Ok(())
    }

    pub fn last(&self) -> u64 {
        self.inner.lock().last
    }

    /// Up to `max` records numbered above `from`
    pub fn load(&self, from: u64, max: usize) -> Result<Vec<ChangeRecord>> {
        let inner = self.inner.lock();
        if max == 0 || from >= inner.last {
            return Ok(Vec::new());
        }

        let first = inner.first_retained();
        let wanted = from + 1;
        if wanted < first || inner.records.is_empty() {
            return Err(Error::replication_gap(wanted, first));
        }

        let skip = (wanted - first) as usize;
        Ok(inner.records.iter().skip(skip).take(max).cloned().collect())
    }

    /// Drop every record and continue numbering after `last`
    pub fn reset(&self, last: u64) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.bytes = 0;
        inner.last = last;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes held by retained records
    pub fn bytes(&self) -> u64 {
        self.inner.lock().bytes
    }
}
