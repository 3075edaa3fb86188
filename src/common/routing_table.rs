//! Routing table of known nodes, bucketed by XOR distance class.

use std::collections::BTreeMap;
use std::slice::Iter;

use crate::common::{Id, Node, NUM_BUCKETS};

/// Capacity of every bucket, the Kademlia `K`.
pub const MAX_BUCKET_SIZE_K: usize = 8;

#[derive(Debug, Clone)]
/// Known nodes, grouped in up to [NUM_BUCKETS] buckets of [MAX_BUCKET_SIZE_K] nodes.
pub struct RoutingTable {
    id: Id,
    /// Buckets keyed by the prefix length of the XOR distance to `id`.
    buckets: BTreeMap<usize, KBucket>,
}

impl RoutingTable {
    /// Create an empty table centered on `id`.
    pub fn new(id: Id) -> Self {
        let buckets = BTreeMap::new();

        RoutingTable { id, buckets }
    }

    /// Returns the local [Id] every distance is measured against.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Insert a new node or refresh a known one, and return `true` if the table holds it afterwards.
    ///
    /// A refreshed node moves to the freshest position of its bucket with its new address.
    /// A new node is rejected if its bucket is full, unless the least recently seen
    /// node in that bucket went stale.
    pub fn update(&mut self, node: Node) -> bool {
        let index = self.id.distance_class(node.id());

        if index == NUM_BUCKETS {
            // Local id
            return false;
        }

        let bucket = self.buckets.entry(index).or_default();

        bucket.update(node)
    }

    /// Forget a node, dropping its bucket once empty.
    pub fn remove(&mut self, node_id: &Id) {
        let index = self.id.distance_class(node_id);

        if let Some(bucket) = self.buckets.get_mut(&index) {
            bucket.remove(node_id);

            if bucket.is_empty() {
                self.buckets.remove(&index);
            }
        }
    }

    /// Return up to `limit` nodes closest to the target, sorted by XOR distance.
    pub fn closest(&self, target: &Id, limit: usize) -> Vec<Node> {
        let mut candidates: Vec<Node> = Vec::new();

        if limit == 0 {
            return candidates;
        }

        // Buckets are visited in increasing distance class to the target:
        // the target's own bucket holds the nodes sharing the longest prefix with it,
        // every bucket closer to us sits at exactly the target's class,
        // and buckets further from us get further from the target one by one.
        let class = self.id.distance_class(target);

        if let Some(bucket) = self.buckets.get(&class) {
            candidates.extend(bucket.iter().cloned());
        }

        if candidates.len() < limit {
            for (_, bucket) in self.buckets.range(class + 1..) {
                candidates.extend(bucket.iter().cloned());
            }
        }

        for (_, bucket) in self.buckets.range(..class).rev() {
            if candidates.len() >= limit {
                break;
            }
            candidates.extend(bucket.iter().cloned());
        }

        candidates.sort_by(|a, b| {
            a.id.xor(target)
                .cmp(&b.id.xor(target))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);

        candidates
    }

    /// Returns `true` if no node is known.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Number of known nodes across all buckets.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .map(KBucket::len)
            .sum()
    }

    /// Iterate known nodes, bucket by bucket.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// Snapshot of every known node.
    pub fn to_owned_nodes(&self) -> Vec<Node> {
        self.nodes().cloned().collect()
    }

    /// Returns `true` if a node with this id is in the table.
    pub fn contains(&self, node_id: &Id) -> bool {
        let index = self.id.distance_class(node_id);

        self.buckets
            .get(&index)
            .map(|bucket| bucket.contains(node_id))
            .unwrap_or(false)
    }

    /// Returns the node with this id, if known.
    pub fn get(&self, node_id: &Id) -> Option<&Node> {
        let index = self.id.distance_class(node_id);

        self.buckets
            .get(&index)?
            .iter()
            .find(|node| node.id() == node_id)
    }
}

/// Kbuckets are similar to LRU caches, a full bucket keeps its responsive nodes
/// and only lets a newcomer replace a stale one.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Least recently seen first.
    nodes: Vec<Node>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    // === Public Methods ===

    pub fn update(&mut self, incoming: Node) -> bool {
        if let Some(index) = self.nodes.iter().position(|known| known.id() == incoming.id()) {
            self.nodes.remove(index);
            self.nodes.push(incoming);

            true
        } else if self.nodes.len() < MAX_BUCKET_SIZE_K {
            self.nodes.push(incoming);

            true
        } else if self.nodes[0].is_stale() {
            // Stale head makes room
            self.nodes.remove(0);
            self.nodes.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, node_id: &Id) {
        self.nodes.retain(|known| known.id() != node_id);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> Iter<'_, Node> {
        self.nodes.iter()
    }

    fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|known| known.id() == id)
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}
