//! Data model shared by every storage engine and the replication plumbing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A key/value association with an optional expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Epoch seconds at or after which the key behaves as absent
    pub expire_ts: Option<u64>,
}

impl KvPair {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expire_ts: None,
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expire_ts: u64) -> Self {
        self.expire_ts = Some(expire_ts);
        self
    }

    /// Whether this pair is expired at the given epoch second
    #[inline]
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        is_expired(self.expire_ts, now_secs)
    }
}

/// Shared expiry rule: a key with `expire_ts <= now` is gone
#[inline]
pub fn is_expired(expire_ts: Option<u64>, now_secs: u64) -> bool {
    matches!(expire_ts, Some(ts) if ts <= now_secs)
}

/// Controls where an iteration begins and which keys it yields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationOptions {
    pub start_key: Option<Vec<u8>>,
    pub key_prefix: Option<Vec<u8>>,
}

impl IterationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Whether `key` falls inside the range described by these options
    pub fn admits(&self, key: &[u8]) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !key.starts_with(prefix) {
                return false;
            }
        }
        match &self.start_key {
            Some(start) => key >= start.as_slice(),
            None => true,
        }
    }
}

/// A single operation inside a change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        expire_ts: Option<u64>,
    },
    Delete {
        key: Vec<u8>,
    },
}

impl Mutation {
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }

    /// Approximate number of bytes this mutation carries
    pub fn size(&self) -> usize {
        match self {
            Mutation::Put { key, value, .. } => key.len() + value.len(),
            Mutation::Delete { key } => key.len(),
        }
    }
}

impl From<KvPair> for Mutation {
    fn from(pair: KvPair) -> Self {
        Mutation::Put {
            key: pair.key,
            value: pair.value,
            expire_ts: pair.expire_ts,
        }
    }
}

/// The atomic unit of replication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_number: u64,
    pub mutations: Vec<Mutation>,
}

impl ChangeRecord {
    pub fn new(change_number: u64, mutations: Vec<Mutation>) -> Self {
        Self {
            change_number,
            mutations,
        }
    }

    pub fn size(&self) -> usize {
        self.mutations.iter().map(Mutation::size).sum()
    }
}

/// Engine-defined resource usage, keyed by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub engine: String,
    pub categories: BTreeMap<String, u64>,
}

impl MemoryUsage {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            categories: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, category: impl Into<String>, amount: u64) -> Self {
        self.categories.insert(category.into(), amount);
        self
    }

    pub fn get(&self, category: &str) -> Option<u64> {
        self.categories.get(category).copied()
    }
}
