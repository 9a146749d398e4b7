use std::collections::BTreeMap;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::record::AllocationRecord;

/// Address span of a block as (first address, last address). The end is u64
/// because a /0 block runs past u32::MAX.
pub fn span(net: &Ipv4Net) -> (u32, u64) {
    let base = u32::from(net.network());
    let size = 1u64 << (32 - net.prefix_len());
    (base, base as u64 + size - 1)
}

/// In-memory set of all occupied CIDR blocks, ordered by network base
/// address. Stored blocks never overlap, so any candidate span can collide
/// with at most the highest stored block starting at or below its end.
#[derive(Debug, Default)]
pub struct IntervalStore {
    blocks: BTreeMap<u32, AllocationRecord>,
}

impl IntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The stored block overlapping [start, end], if any.
    pub fn first_overlap(&self, start: u32, end: u64) -> Option<&AllocationRecord> {
        let key_end = end.min(u32::MAX as u64) as u32;
        let (_, rec) = self.blocks.range(..=key_end).next_back()?;
        let (_, rec_end) = span(&rec.cidr);
        if rec_end >= start as u64 {
            Some(rec)
        } else {
            None
        }
    }

    pub fn overlaps(&self, candidate: &Ipv4Net) -> bool {
        let (start, end) = span(candidate);
        self.first_overlap(start, end).is_some()
    }

    /// The stored record a candidate block would collide with, if any.
    pub fn conflict_with(&self, net: &Ipv4Net) -> Option<&AllocationRecord> {
        let (start, end) = span(net);
        self.first_overlap(start, end)
    }

    /// Insert atomically; refuses any record whose range intersects a stored
    /// one.
    pub fn insert(&mut self, record: AllocationRecord) -> Result<()> {
        if let Some(existing) = self.conflict_with(&record.cidr) {
            return Err(Error::Overlap(
                record.cidr.to_string(),
                existing.cidr.to_string(),
            ));
        }
        let (base, _) = span(&record.cidr);
        self.blocks.insert(base, record);
        Ok(())
    }

    /// Remove the record whose CIDR matches exactly (same base address and
    /// prefix length). An input with host bits set matches nothing.
    pub fn remove(&mut self, cidr: &Ipv4Net) -> Result<AllocationRecord> {
        let base = u32::from(cidr.addr());
        match self.blocks.remove(&base) {
            Some(rec) if rec.cidr.prefix_len() == cidr.prefix_len() => Ok(rec),
            Some(rec) => {
                // same base, different prefix: not a match
                self.blocks.insert(base, rec);
                Err(Error::NotFound(cidr.to_string()))
            }
            None => Err(Error::NotFound(cidr.to_string())),
        }
    }

    /// Snapshot of all records in ascending address order.
    pub fn all(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.blocks.values()
    }
}
