//! Validation and normalization of extracted records.
//!
//! Extraction is permissive: one bad sibling never fails a listing. This
//! module is the last pass before records reach the caller. It
//!
//! * removes duplicates, keeping the first occurrence
//! * enforces the invariants of each record type, downgrading or dropping
//!   records that violate them
//!
//! Both steps are pure and never fail. What they remove is counted in the
//! [`Listing`] so that data loss stays observable.

use std::{collections::HashSet, hash::Hash};

use serde::Serialize;

use crate::protocol::{device::DeviceRecord, navigation::MediaEntry};

/// Records of a single response together with what was lost on the way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Listing<T> {
    /// Surviving records, in response order.
    pub items: Vec<T>,

    /// Records skipped during extraction or removed by validation because a
    /// required field was missing or invalid.
    pub dropped: usize,

    /// Records removed because an earlier record had the same key.
    pub duplicates: usize,

    /// Records that failed validation and were replaced by a fallback.
    pub downgraded: usize,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            dropped: 0,
            duplicates: 0,
            downgraded: 0,
        }
    }
}

impl<T> Listing<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any record was dropped, deduplicated or downgraded.
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        self.dropped > 0 || self.duplicates > 0 || self.downgraded > 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> IntoIterator for Listing<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Listing<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Outcome of validating a single record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict<T> {
    /// The record holds all invariants.
    Keep(T),
    /// The record was replaced by a fallback that holds the invariants.
    Downgrade(T),
    /// The record cannot be represented and is removed.
    Drop,
}

/// A record that can be deduplicated and validated.
pub trait Record: Sized {
    /// Identity used for deduplication.
    type Key: Eq + Hash;

    fn key(&self) -> Self::Key;

    /// Checks the invariants of the record.
    fn verify(self) -> Verdict<Self>;
}

/// Deduplicates and validates a listing.
///
/// Counters already present in `listing` are carried over.
#[must_use]
pub fn finalize<T: Record>(listing: Listing<T>) -> Listing<T> {
    let Listing {
        items,
        mut dropped,
        mut duplicates,
        mut downgraded,
    } = listing;

    let mut seen = HashSet::with_capacity(items.len());
    let mut survivors = Vec::with_capacity(items.len());

    for item in items {
        if !seen.insert(item.key()) {
            duplicates += 1;
            continue;
        }

        match item.verify() {
            Verdict::Keep(item) => survivors.push(item),
            Verdict::Downgrade(item) => {
                downgraded += 1;
                survivors.push(item);
            }
            Verdict::Drop => dropped += 1,
        }
    }

    Listing {
        items: survivors,
        dropped,
        duplicates,
        downgraded,
    }
}

/// Deduplicates entries by identifier and downgrades those with URLs that
/// are not absolute.
#[must_use]
pub fn finalize_entries(listing: Listing<MediaEntry>) -> Listing<MediaEntry> {
    finalize(listing)
}

/// Deduplicates devices by host and port and drops those without either.
#[must_use]
pub fn finalize_devices(listing: Listing<DeviceRecord>) -> Listing<DeviceRecord> {
    finalize(listing)
}
