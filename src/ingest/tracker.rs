//! Per-contract block cursors.
//!
//! A contract's cursor is the last block whose logs were handed to the event
//! queue. The next scan covers `[cursor + 1, to]` where
//! `to = min(head - confirmations, cursor + max_batch)`, so consecutive scans
//! neither overlap nor skip a block, and a cursor never moves backwards.
//!
//! Scans run without the registry lock, so a contract can be replaced while
//! its range is being fetched. Each insert gets a fresh registration number
//! and a scan only moves the cursor of the registration it started from.

use alloy::primitives::Address;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::events::EventKind;

/// Computes the next safe, bounded range for a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRangeTracker {
    confirmations: u64,
    max_batch: u64,
}

impl BlockRangeTracker {
    /// `max_batch` below 1 is treated as 1.
    #[must_use]
    pub fn new(confirmations: u64, max_batch: u64) -> Self {
        Self {
            confirmations,
            max_batch: max_batch.max(1),
        }
    }

    /// Highest block considered final at `head`.
    #[must_use]
    pub const fn safe_head(&self, head: u64) -> u64 {
        head.saturating_sub(self.confirmations)
    }

    /// Next inclusive range to scan, or `None` when nothing confirmed is new.
    #[must_use]
    pub fn next_range(&self, head: u64, cursor: u64) -> Option<RangeInclusive<u64>> {
        let to = self
            .safe_head(head)
            .min(cursor.saturating_add(self.max_batch));
        (to > cursor).then(|| (cursor + 1)..=to)
    }

    /// Confirmation depth.
    #[must_use]
    pub const fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Maximum blocks per scan.
    #[must_use]
    pub const fn max_batch(&self) -> u64 {
        self.max_batch
    }
}

/// A contract under watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredContract {
    /// Contract address
    pub address: Address,
    /// Display name
    pub name: String,
    /// Kinds to fetch; empty means every event
    pub event_kinds: BTreeSet<EventKind>,
    last_block_processed: u64,
    registration: u64,
}

impl MonitoredContract {
    /// Watch `address` starting after `last_block_processed`.
    #[must_use]
    pub fn new(
        address: Address,
        name: impl Into<String>,
        event_kinds: BTreeSet<EventKind>,
        last_block_processed: u64,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            event_kinds,
            last_block_processed,
            registration: 0,
        }
    }

    /// Last block already scanned.
    #[must_use]
    pub const fn last_block_processed(&self) -> u64 {
        self.last_block_processed
    }

    /// Move the cursor to `to`. Returns `false` (and leaves it) if `to` is behind.
    pub fn advance(&mut self, to: u64) -> bool {
        if to < self.last_block_processed {
            return false;
        }
        self.last_block_processed = to;
        true
    }

    /// Read-only view for status APIs.
    #[must_use]
    pub fn status(&self) -> ContractStatus {
        ContractStatus {
            address: self.address,
            name: self.name.clone(),
            last_block_processed: self.last_block_processed,
            event_kinds: self.event_kinds.iter().copied().collect(),
        }
    }
}

/// Serializable view of a [`MonitoredContract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractStatus {
    /// Contract address
    pub address: Address,
    /// Display name
    pub name: String,
    /// Last block already scanned
    pub last_block_processed: u64,
    /// Kinds fetched; empty means every event
    pub event_kinds: Vec<EventKind>,
}

/// Mutex-guarded set of monitored contracts.
///
/// Callers take copies with [`ContractRegistry::snapshot`] and never hold the
/// lock across I/O.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    contracts: Mutex<HashMap<Address, MonitoredContract>>,
    registrations: AtomicU64,
}

impl ContractRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Address, MonitoredContract>> {
        self.contracts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a contract. Returns `true` if it replaced one.
    pub fn insert(&self, mut contract: MonitoredContract) -> bool {
        contract.registration = self.registrations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            contract = %contract.address,
            name = %contract.name,
            from_block = contract.last_block_processed.saturating_add(1),
            "Monitoring contract"
        );
        self.lock().insert(contract.address, contract).is_some()
    }

    /// Stop watching `address`.
    pub fn remove(&self, address: &Address) -> Option<MonitoredContract> {
        let removed = self.lock().remove(address);
        if removed.is_some() {
            info!(contract = %address, "Stopped monitoring contract");
        }
        removed
    }

    /// Copy of every contract, sorted by address.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MonitoredContract> {
        let mut contracts: Vec<_> = self.lock().values().cloned().collect();
        contracts.sort_by_key(|c| c.address);
        contracts
    }

    /// Advance a contract's cursor after a successful scan of `scanned`, the
    /// snapshot copy the scan started from.
    ///
    /// Returns `false` and leaves the registry untouched if the contract was
    /// removed or replaced meanwhile, its cursor moved, or `to` is behind it.
    pub fn advance(&self, scanned: &MonitoredContract, to: u64) -> bool {
        let mut contracts = self.lock();
        let Some(contract) = contracts.get_mut(&scanned.address) else {
            debug!(contract = %scanned.address, "Contract removed during scan, cursor dropped");
            return false;
        };
        if contract.registration != scanned.registration
            || contract.last_block_processed != scanned.last_block_processed
        {
            debug!(
                contract = %scanned.address,
                cursor = contract.last_block_processed,
                "Contract re-registered during scan, cursor dropped"
            );
            return false;
        }
        contract.advance(to)
    }

    /// Cursor of one contract.
    #[must_use]
    pub fn cursor(&self, address: &Address) -> Option<u64> {
        self.lock().get(address).map(MonitoredContract::last_block_processed)
    }

    /// Status of every contract, sorted by address.
    #[must_use]
    pub fn statuses(&self) -> Vec<ContractStatus> {
        self.snapshot().iter().map(MonitoredContract::status).collect()
    }

    /// Number of contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is monitored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_range_bounded_by_batch() {
        let tracker = BlockRangeTracker::new(3, 50);
        assert_eq!(tracker.next_range(1000, 900), Some(901..=950));
    }

    #[test]
    fn test_next_range_bounded_by_confirmations() {
        let tracker = BlockRangeTracker::new(3, 1000);
        assert_eq!(tracker.next_range(100, 0), Some(1..=97));
    }

    #[test]
    fn test_next_range_skips_when_caught_up() {
        let tracker = BlockRangeTracker::new(3, 50);
        assert_eq!(tracker.next_range(1000, 997), None);
        assert_eq!(tracker.next_range(1000, 999), None);
        // Head below the confirmation depth.
        assert_eq!(tracker.next_range(2, 0), None);
    }

    #[test]
    fn test_cursor_is_monotonic_across_ticks() {
        let tracker = BlockRangeTracker::new(3, 50);
        let mut contract = MonitoredContract::new(Address::ZERO, "token", BTreeSet::new(), 900);
        let mut scanned = Vec::new();

        // Head moves forward, stalls, and is even reported lower by a lagging node.
        for head in [1000, 1000, 1010, 990, 1100, 1100] {
            let before = contract.last_block_processed();
            if let Some(range) = tracker.next_range(head, before) {
                assert_eq!(*range.start(), before + 1);
                scanned.push(range.clone());
                assert!(contract.advance(*range.end()));
            }
            assert!(contract.last_block_processed() >= before);
        }

        assert_eq!(scanned[0], 901..=950);
        assert_eq!(contract.last_block_processed(), 1097);
        for pair in scanned.windows(2) {
            assert_eq!(*pair[1].start(), pair[0].end() + 1);
        }
    }

    #[test]
    fn test_advance_never_rewinds() {
        let mut contract = MonitoredContract::new(Address::ZERO, "token", BTreeSet::new(), 500);
        assert!(!contract.advance(400));
        assert_eq!(contract.last_block_processed(), 500);
    }

    #[test]
    fn test_registry_advance_after_remove_is_ignored() {
        let registry = ContractRegistry::new();
        let address = Address::repeat_byte(1);
        registry.insert(MonitoredContract::new(address, "a", BTreeSet::new(), 10));

        let scanned = registry.snapshot().remove(0);
        assert!(registry.advance(&scanned, 20));
        assert_eq!(registry.cursor(&address), Some(20));

        let scanned = registry.snapshot().remove(0);
        assert!(registry.remove(&address).is_some());
        assert!(!registry.advance(&scanned, 30));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_insert_replaces() {
        let registry = ContractRegistry::new();
        let address = Address::repeat_byte(2);
        assert!(!registry.insert(MonitoredContract::new(address, "a", BTreeSet::new(), 1)));
        assert!(registry.insert(MonitoredContract::new(address, "b", BTreeSet::new(), 5)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.statuses()[0].name, "b");
    }

    #[test]
    fn test_advance_ignores_replaced_registration() {
        let registry = ContractRegistry::new();
        let address = Address::repeat_byte(3);
        registry.insert(MonitoredContract::new(address, "old", BTreeSet::new(), 0));
        let scanned = registry.snapshot().remove(0);

        // Re-added with an earlier start while the old scan was in flight.
        registry.insert(MonitoredContract::new(address, "new", BTreeSet::new(), 49));
        assert!(!registry.advance(&scanned, 97));
        assert_eq!(registry.cursor(&address), Some(49));

        // Re-added at the same cursor is still a different registration.
        let scanned = registry.snapshot().remove(0);
        registry.insert(MonitoredContract::new(address, "again", BTreeSet::new(), 49));
        assert!(!registry.advance(&scanned, 97));
        assert_eq!(registry.cursor(&address), Some(49));
    }

    #[test]
    fn test_advance_ignores_moved_cursor() {
        let registry = ContractRegistry::new();
        let address = Address::repeat_byte(4);
        registry.insert(MonitoredContract::new(address, "a", BTreeSet::new(), 10));
        let stale = registry.snapshot().remove(0);

        let fresh = registry.snapshot().remove(0);
        assert!(registry.advance(&fresh, 20));
        assert!(!registry.advance(&stale, 15));
        assert_eq!(registry.cursor(&address), Some(20));
    }
}
