//! Immutable index generations and the reader-facing handle.
//!
//! Every entry in a generation references an atom with a committed embedding
//! and a projection computed under the generation's anchor-set version; the
//! builder is where that invariant is enforced structurally (stale or
//! low-confidence projections are never handed to it).

use crate::bvh::{Bvh, SpatialEntry};
use crate::curve::{locality_key, CurveKind};
use parking_lot::RwLock;
use sema_vector::AtomId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable, queryable generation of the spatial index.
///
/// Sealed by [`GenerationBuilder::seal`] and installed through
/// [`GenerationHandle::swap`]; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexGeneration {
    /// Monotonically increasing generation number.
    pub generation_id: u64,

    /// Anchor-set version every entry was projected under.
    pub anchor_set_version: u32,

    /// Curve used for locality keys.
    pub curve: CurveKind,

    /// Bounding-region half-extent.
    pub region: f64,

    bvh: Bvh,

    /// atom -> position in the entry array.
    by_atom: HashMap<AtomId, usize>,
}

impl IndexGeneration {
    /// The empty generation queries run against before anything is built.
    pub fn empty() -> Self {
        Self {
            generation_id: 0,
            anchor_set_version: 0,
            curve: CurveKind::default(),
            region: 1024.0,
            bvh: Bvh::build(Vec::new()),
            by_atom: HashMap::new(),
        }
    }

    /// Number of indexed atoms.
    pub fn len(&self) -> usize {
        self.bvh.len()
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.bvh.is_empty()
    }

    /// True if the atom is indexed in this generation.
    pub fn contains(&self, atom: AtomId) -> bool {
        self.by_atom.contains_key(&atom)
    }

    /// The entry for an atom, if indexed.
    pub fn entry(&self, atom: AtomId) -> Option<&SpatialEntry> {
        self.by_atom.get(&atom).map(|&i| &self.bvh.entries()[i])
    }

    /// All entries in locality-key order.
    pub fn entries(&self) -> &[SpatialEntry] {
        self.bvh.entries()
    }

    /// All atoms within `radius` of `center`, ordered by coarse distance.
    pub fn range_query(&self, center: [f64; 3], radius: f64) -> Vec<AtomId> {
        self.bvh.range_query(center, radius)
    }

    /// The `n` atoms nearest `coord` by coarse distance.
    pub fn coarse_knn(&self, coord: [f64; 3], n: usize) -> Vec<AtomId> {
        self.bvh.coarse_knn(coord, n)
    }
}

/// Accumulates entries for the next generation.
///
/// Single-writer: one builder exists per generation build. Sealing sorts by
/// locality key, packs the tree, and produces the immutable generation.
pub struct GenerationBuilder {
    generation_id: u64,
    anchor_set_version: u32,
    curve: CurveKind,
    region: f64,
    entries: HashMap<AtomId, [f64; 3]>,
}

impl GenerationBuilder {
    /// Start a builder for the given generation and anchor-set version.
    pub fn new(generation_id: u64, anchor_set_version: u32, curve: CurveKind, region: f64) -> Self {
        Self {
            generation_id,
            anchor_set_version,
            curve,
            region,
            entries: HashMap::new(),
        }
    }

    /// Seed a builder from an existing generation (incremental rebuild).
    pub fn from_generation(generation: &IndexGeneration, next_id: u64) -> Self {
        let mut builder = Self::new(
            next_id,
            generation.anchor_set_version,
            generation.curve,
            generation.region,
        );
        for entry in generation.entries() {
            builder.insert(entry.atom, entry.coord);
        }
        builder
    }

    /// Insert or replace an atom's coordinate.
    pub fn insert(&mut self, atom: AtomId, coord: [f64; 3]) {
        self.entries.insert(atom, coord);
    }

    /// Remove an atom. Returns `true` if it was staged.
    pub fn remove(&mut self, atom: AtomId) -> bool {
        self.entries.remove(&atom).is_some()
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort, pack, and freeze into an immutable generation.
    pub fn seal(self) -> IndexGeneration {
        let mut entries: Vec<SpatialEntry> = self
            .entries
            .into_iter()
            .map(|(atom, coord)| SpatialEntry {
                atom,
                coord,
                locality_key: locality_key(coord, self.region, self.curve),
            })
            .collect();
        entries.sort_by_key(|e| (e.locality_key, e.atom));

        let by_atom = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.atom, i))
            .collect();

        let len = entries.len();
        let generation = IndexGeneration {
            generation_id: self.generation_id,
            anchor_set_version: self.anchor_set_version,
            curve: self.curve,
            region: self.region,
            bvh: Bvh::build(entries),
            by_atom,
        };
        tracing::debug!(
            generation_id = generation.generation_id,
            anchor_set_version = generation.anchor_set_version,
            entries = len,
            "sealed index generation"
        );
        generation
    }
}

/// Reader-facing handle to the current generation.
///
/// The swap is the only globally exclusive operation in the index and it is
/// a single pointer write; readers clone the Arc and run their whole query
/// against that snapshot without ever taking a lock on the structure.
pub struct GenerationHandle {
    current: RwLock<Arc<IndexGeneration>>,
}

impl GenerationHandle {
    /// Handle starting at the empty generation.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexGeneration::empty())),
        }
    }

    /// Install a sealed generation, returning the one it replaced.
    pub fn swap(&self, next: Arc<IndexGeneration>) -> Arc<IndexGeneration> {
        let mut guard = self.current.write();
        let old = Arc::clone(&guard);
        tracing::info!(
            from = old.generation_id,
            to = next.generation_id,
            entries = next.len(),
            "swapped index generation"
        );
        *guard = next;
        old
    }

    /// Snapshot the current generation for a query.
    pub fn snapshot(&self) -> Arc<IndexGeneration> {
        Arc::clone(&self.current.read())
    }
}

impl Default for GenerationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_seal_and_query() {
        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Morton, 100.0);
        builder.insert(AtomId(1), [0.0, 0.0, 0.0]);
        builder.insert(AtomId(2), [1.0, 0.0, 0.0]);
        builder.insert(AtomId(3), [50.0, 50.0, 50.0]);

        let generation = builder.seal();
        assert_eq!(generation.len(), 3);
        assert!(generation.contains(AtomId(1)));
        assert!(!generation.contains(AtomId(9)));

        let near = generation.coarse_knn([0.1, 0.0, 0.0], 2);
        assert_eq!(near, vec![AtomId(1), AtomId(2)]);

        let in_range = generation.range_query([0.0, 0.0, 0.0], 2.0);
        assert_eq!(in_range, vec![AtomId(1), AtomId(2)]);
    }

    #[test]
    fn test_builder_replace_and_remove() {
        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Morton, 100.0);
        builder.insert(AtomId(1), [0.0, 0.0, 0.0]);
        builder.insert(AtomId(1), [10.0, 0.0, 0.0]);
        builder.insert(AtomId(2), [20.0, 0.0, 0.0]);
        assert!(builder.remove(AtomId(2)));
        assert!(!builder.remove(AtomId(2)));

        let generation = builder.seal();
        assert_eq!(generation.len(), 1);
        assert_eq!(generation.entry(AtomId(1)).unwrap().coord, [10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_generation_carries_entries() {
        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Morton, 100.0);
        builder.insert(AtomId(1), [1.0, 2.0, 3.0]);
        let g1 = builder.seal();

        let mut next = GenerationBuilder::from_generation(&g1, 2);
        next.insert(AtomId(2), [4.0, 5.0, 6.0]);
        let g2 = next.seal();

        assert_eq!(g2.generation_id, 2);
        assert_eq!(g2.len(), 2);
        assert!(g2.contains(AtomId(1)));
    }

    #[test]
    fn test_handle_swap_is_atomic_for_readers() {
        let handle = GenerationHandle::new();
        assert_eq!(handle.snapshot().generation_id, 0);

        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Morton, 100.0);
        builder.insert(AtomId(1), [0.0, 0.0, 0.0]);
        let g1 = Arc::new(builder.seal());

        // A reader holding a snapshot keeps its view across a swap
        let before = handle.snapshot();
        let old = handle.swap(g1);
        assert_eq!(old.generation_id, 0);
        assert_eq!(before.generation_id, 0);
        assert_eq!(handle.snapshot().generation_id, 1);
    }

    #[test]
    fn test_entries_sorted_by_locality_key() {
        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Hilbert, 100.0);
        for i in 0..100u64 {
            let t = i as f64;
            builder.insert(AtomId(i), [t - 50.0, (t * 7.0) % 90.0 - 45.0, 30.0 - t]);
        }
        let generation = builder.seal();
        let entries = generation.entries();
        assert!(entries.windows(2).all(|w| w[0].locality_key <= w[1].locality_key));
    }
}
