use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ipnet::Ipv4Net;

/// Composite key of an allocation: the caller-supplied reason plus the
/// epoch-seconds creation time, rendered as `"<reason>-<timestamp>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    reason: String,
    timestamp: u64,
}

impl LeaseKey {
    pub fn new(reason: &str, timestamp: u64) -> Self {
        Self {
            reason: reason.to_string(),
            timestamp,
        }
    }

    /// Key stamped with the current wall clock.
    pub fn now(reason: &str) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::new(reason, ts)
    }

    /// Parse `"<reason>-<timestamp>"`. The reason itself may contain `-`,
    /// so the split is taken from the right.
    pub fn parse(s: &str) -> Option<Self> {
        let (reason, ts) = s.rsplit_once('-')?;
        if reason.is_empty() {
            return None;
        }
        let timestamp = ts.parse::<u64>().ok()?;
        Some(Self::new(reason, timestamp))
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.reason, self.timestamp)
    }
}

/// One occupied CIDR block and the key it was granted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    pub key: LeaseKey,
    pub cidr: Ipv4Net,
}

impl AllocationRecord {
    pub fn new(key: LeaseKey, cidr: Ipv4Net) -> Self {
        Self { key, cidr }
    }
}
