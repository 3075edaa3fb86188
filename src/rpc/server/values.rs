//! Holders announced for each value key.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::common::{Id, Node};

#[derive(Debug)]
/// An LRU cache of holder nodes per value key.
///
/// A key maps to the nodes that announced holding it through `store`,
/// each identified by its own Id.
pub struct ValueStore {
    keys: LruCache<Id, LruCache<Id, Node>>,
    max_holders: NonZeroUsize,
}

impl ValueStore {
    pub fn new(max_values: NonZeroUsize, max_holders: NonZeroUsize) -> Self {
        Self {
            keys: LruCache::new(max_values),
            max_holders,
        }
    }

    /// Insert a holder, or replace the one with the same Id.
    pub fn upsert(&mut self, key: Id, holder: Node) {
        if let Some(holders) = self.keys.get_mut(&key) {
            holders.put(holder.id, holder);
        } else {
            let mut holders = LruCache::new(self.max_holders);
            holders.put(holder.id, holder);
            self.keys.put(key, holders);
        };
    }

    /// Holders of a key, least recently announced first.
    pub fn get(&mut self, key: &Id) -> Vec<Node> {
        self.keys
            .get(key)
            .map(|holders| holders.iter().rev().map(|(_, node)| node.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of keys with at least one holder.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
