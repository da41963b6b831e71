//! Exact scan vector index.
//!
//! Linear scan search - O(n) but exact. Serves two roles: the primary index
//! for small corpora (below the routing threshold) and the Phase-2 rerank
//! that finalizes coarse candidates at full dimensionality.

use crate::distance::Metric;
use crate::traits::{Neighbor, VectorIndex};
use crate::{AtomId, Result, VectorError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Exact scan vector index.
///
/// Stores vectors in a HashMap and performs a linear scan for search.
/// Thread-safe via RwLock.
///
/// # Performance
///
/// - Insert: O(1)
/// - Remove: O(1)
/// - Search: O(n * d) where n = vectors, d = dimensions
///
/// Above ~10K vectors the routing layer switches to the coarse spatial
/// filter; this index remains the recall baseline it is measured against.
pub struct ExactScanIndex {
    /// Vector storage: atom -> vector
    vectors: RwLock<HashMap<AtomId, Vec<f32>>>,
    /// All vectors must have this dimension
    dimensions: usize,
    /// Metric used for search
    metric: Metric,
}

impl ExactScanIndex {
    /// Create a new exact scan index.
    ///
    /// # Example
    ///
    /// ```
    /// use sema_vector::{ExactScanIndex, Metric};
    ///
    /// let index = ExactScanIndex::new(128, Metric::Cosine);
    /// ```
    pub fn new(dimensions: usize, metric: Metric) -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            dimensions,
            metric,
        }
    }

    /// The metric this index searches with.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Snapshot of all atom ids currently held.
    pub fn atom_ids(&self) -> Vec<AtomId> {
        let vectors = self.vectors.read();
        vectors.keys().copied().collect()
    }

    /// Validate a vector's dimensions and values.
    fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        for (i, &v) in vector.iter().enumerate() {
            if v.is_nan() {
                return Err(VectorError::InvalidVector(format!("NaN value at index {}", i)));
            }
            if v.is_infinite() {
                return Err(VectorError::InvalidVector(format!(
                    "Infinite value at index {}",
                    i
                )));
            }
        }

        Ok(())
    }
}

impl VectorIndex for ExactScanIndex {
    fn insert(&self, atom: AtomId, vector: &[f32]) -> Result<()> {
        self.validate_vector(vector)?;

        let mut vectors = self.vectors.write();
        vectors.insert(atom, vector.to_vec());
        Ok(())
    }

    fn remove(&self, atom: AtomId) -> Result<bool> {
        let mut vectors = self.vectors.write();
        Ok(vectors.remove(&atom).is_some())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.validate_vector(query)?;

        if k == 0 {
            return Ok(vec![]);
        }

        let vectors = self.vectors.read();

        let mut results: Vec<Neighbor> = vectors
            .iter()
            .map(|(atom, vec)| Neighbor::new(*atom, self.metric.distance(query, vec)))
            .collect();

        results.sort();
        results.truncate(k);

        Ok(results)
    }

    fn get(&self, atom: AtomId) -> Result<Option<Vec<f32>>> {
        let vectors = self.vectors.read();
        Ok(vectors.get(&atom).cloned())
    }

    fn contains(&self, atom: AtomId) -> bool {
        let vectors = self.vectors.read();
        vectors.contains_key(&atom)
    }

    fn len(&self) -> usize {
        let vectors = self.vectors.read();
        vectors.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Rank a candidate set by exact full-dimension distance and keep the top k.
///
/// This is the Phase-2 rerank of hybrid search: `lookup` resolves each
/// candidate atom to its full embedding (candidates without one are skipped),
/// distances are computed under `metric`, and results come back sorted
/// ascending with ties broken by `AtomId`.
pub fn exact_top_k<F>(
    candidates: &[AtomId],
    query: &[f32],
    metric: Metric,
    k: usize,
    mut lookup: F,
) -> Vec<Neighbor>
where
    F: FnMut(AtomId) -> Option<Vec<f32>>,
{
    if k == 0 {
        return vec![];
    }

    let mut results: Vec<Neighbor> = candidates
        .iter()
        .filter_map(|&atom| {
            let vector = lookup(atom)?;
            Some(Neighbor::new(atom, metric.distance(query, &vector)))
        })
        .collect();

    results.sort();
    results.truncate(k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_index() -> ExactScanIndex {
        ExactScanIndex::new(3, Metric::Euclidean)
    }

    #[test]
    fn test_insert_and_get() {
        let index = create_test_index();

        index.insert(AtomId(1), &[1.0, 2.0, 3.0]).unwrap();
        index.insert(AtomId(2), &[4.0, 5.0, 6.0]).unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.contains(AtomId(1)));
        assert!(!index.contains(AtomId(3)));

        let v = index.get(AtomId(1)).unwrap().unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_insert_replaces_existing() {
        let index = create_test_index();

        index.insert(AtomId(1), &[1.0, 2.0, 3.0]).unwrap();
        index.insert(AtomId(1), &[7.0, 8.0, 9.0]).unwrap();

        assert_eq!(index.len(), 1);
        let v = index.get(AtomId(1)).unwrap().unwrap();
        assert_eq!(v, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_remove() {
        let index = create_test_index();

        index.insert(AtomId(1), &[1.0, 2.0, 3.0]).unwrap();
        assert!(index.remove(AtomId(1)).unwrap());
        assert_eq!(index.len(), 0);
        assert!(!index.remove(AtomId(1)).unwrap());
    }

    #[test]
    fn test_search_euclidean() {
        let index = create_test_index();

        index.insert(AtomId(1), &[0.0, 0.0, 0.0]).unwrap();
        index.insert(AtomId(2), &[1.0, 1.0, 1.0]).unwrap();
        index.insert(AtomId(3), &[10.0, 10.0, 10.0]).unwrap();

        let results = index.search(&[0.0, 0.0, 0.0], 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].atom, AtomId(1));
        assert!(results[0].distance < 0.001);
        assert_eq!(results[1].atom, AtomId(2));
        assert_eq!(results[2].atom, AtomId(3));
    }

    #[test]
    fn test_search_top_k() {
        let index = create_test_index();

        for i in 0..10 {
            index.insert(AtomId(i), &[i as f32, 0.0, 0.0]).unwrap();
        }

        let results = index.search(&[0.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].atom, AtomId(0));
        assert_eq!(results[1].atom, AtomId(1));
        assert_eq!(results[2].atom, AtomId(2));
    }

    #[test]
    fn test_search_empty_index() {
        let index = create_test_index();
        let results = index.search(&[1.0, 2.0, 3.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_k_zero() {
        let index = create_test_index();
        index.insert(AtomId(1), &[1.0, 2.0, 3.0]).unwrap();

        let results = index.search(&[1.0, 2.0, 3.0], 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = create_test_index();

        let result = index.insert(AtomId(1), &[1.0, 2.0]);
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));

        index.insert(AtomId(1), &[1.0, 2.0, 3.0]).unwrap();
        let result = index.search(&[1.0, 2.0], 1);
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_invalid_values() {
        let index = create_test_index();

        let result = index.insert(AtomId(1), &[1.0, f32::NAN, 3.0]);
        assert!(matches!(result, Err(VectorError::InvalidVector(_))));

        let result = index.insert(AtomId(1), &[1.0, f32::INFINITY, 3.0]);
        assert!(matches!(result, Err(VectorError::InvalidVector(_))));
    }

    #[test]
    fn test_exact_top_k_skips_missing() {
        let store: HashMap<AtomId, Vec<f32>> = [
            (AtomId(1), vec![0.0, 0.0, 0.0]),
            (AtomId(2), vec![1.0, 0.0, 0.0]),
        ]
        .into_iter()
        .collect();

        let candidates = vec![AtomId(1), AtomId(2), AtomId(99)];
        let hits = exact_top_k(&candidates, &[0.0, 0.0, 0.0], Metric::Euclidean, 10, |a| {
            store.get(&a).cloned()
        });

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].atom, AtomId(1));
    }

    #[test]
    fn test_exact_top_k_tie_break() {
        let store: HashMap<AtomId, Vec<f32>> = [
            (AtomId(9), vec![1.0, 0.0]),
            (AtomId(2), vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect();

        // Both candidates are distance 1 from origin; AtomId(2) must win.
        let candidates = vec![AtomId(9), AtomId(2)];
        let hits = exact_top_k(&candidates, &[0.0, 0.0], Metric::Euclidean, 1, |a| {
            store.get(&a).cloned()
        });

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].atom, AtomId(2));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(ExactScanIndex::new(3, Metric::Euclidean));

        let mut handles = vec![];

        for i in 0..10 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                index.insert(AtomId(i), &[i as f32, 0.0, 0.0]).unwrap();
            }));
        }

        for _ in 0..10 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                let _ = index.search(&[0.0, 0.0, 0.0], 5);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 10);
    }
}
