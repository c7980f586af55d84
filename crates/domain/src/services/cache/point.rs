use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use alloy_primitives::Address;
use moka::sync::Cache;
use parking_lot::RwLock;

use crate::model::BlockNumber;

/// Exact `(account, block) -> value` memo.
pub trait PointStore<V>: Send + Sync {
    fn get(&self, account: &Address, block: BlockNumber) -> Option<V>;

    fn insert(&self, account: Address, block: BlockNumber, value: V);

    /// Drops every entry except the lowest and the highest block per account.
    fn retain_extremes(&self);

    fn entry_count(&self) -> u64;
}

/// Unbounded store for finalized history; values at a fixed block never
/// change, so entries never expire.
#[derive(Debug)]
pub struct MapPointStore<V> {
    points: RwLock<HashMap<Address, BTreeMap<BlockNumber, V>>>,
}

impl<V> Default for MapPointStore<V> {
    fn default() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> PointStore<V> for MapPointStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, account: &Address, block: BlockNumber) -> Option<V> {
        self.points.read().get(account)?.get(&block).cloned()
    }

    fn insert(&self, account: Address, block: BlockNumber, value: V) {
        self.points
            .write()
            .entry(account)
            .or_default()
            .insert(block, value);
    }

    fn retain_extremes(&self) {
        let mut points = self.points.write();
        for blocks in points.values_mut() {
            let (Some(&low), Some(&high)) = (blocks.keys().next(), blocks.keys().next_back())
            else {
                continue;
            };
            blocks.retain(|block, _| *block == low || *block == high);
        }
    }

    fn entry_count(&self) -> u64 {
        self.points
            .read()
            .values()
            .map(|blocks| blocks.len() as u64)
            .sum()
    }
}

/// Store whose entries expire after a wall-clock TTL, for blocks near the
/// head that may still reorganize.
pub struct TtlPointStore<V> {
    points: Cache<(Address, BlockNumber), V>,
}

impl<V> TtlPointStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            points: Cache::builder().time_to_live(ttl).build(),
        }
    }
}

impl<V> PointStore<V> for TtlPointStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, account: &Address, block: BlockNumber) -> Option<V> {
        self.points.get(&(*account, block))
    }

    fn insert(&self, account: Address, block: BlockNumber, value: V) {
        self.points.insert((account, block), value);
    }

    fn retain_extremes(&self) {
        let mut extremes: HashMap<Address, (BlockNumber, BlockNumber)> = HashMap::new();
        for (key, _) in self.points.iter() {
            let (account, block) = *key;
            extremes
                .entry(account)
                .and_modify(|(low, high)| {
                    *low = (*low).min(block);
                    *high = (*high).max(block);
                })
                .or_insert((block, block));
        }

        let stale: Vec<(Address, BlockNumber)> = self
            .points
            .iter()
            .map(|(key, _)| *key)
            .filter(|(account, block)| {
                extremes
                    .get(account)
                    .is_some_and(|(low, high)| block != low && block != high)
            })
            .collect();
        for key in stale {
            self.points.invalidate(&key);
        }
    }

    fn entry_count(&self) -> u64 {
        self.points.run_pending_tasks();
        self.points.entry_count()
    }
}
