use std::collections::HashSet;
use tracing::{debug, info};

use crate::clustering::types::DuplicatePair;
use crate::vector::similarity::similarity_matrix;
use crate::TARGET_CLUSTER;

/// Near-duplicate detection over unit-normalized embeddings.
///
/// Removal follows a first-seen policy in matrix scan order: for each pair `(i, j)`
/// with `i < j` above the threshold, `j` is dropped unless `i` was already dropped.
/// This is not a transitive closure; in a chain A~B, B~C with A and C dissimilar,
/// only B is removed and both A and C survive.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f32,
}

/// Embeddings and ids that survived deduplication, plus the ids that did not
#[derive(Debug, Clone, PartialEq)]
pub struct Deduplicated<V> {
    pub embeddings: Vec<V>,
    pub ids: Vec<i64>,
    pub removed: Vec<i64>,
}

impl Deduplicator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Every unordered pair whose similarity is at least the threshold, in matrix order
    pub fn find_duplicates<V: AsRef<[f32]>>(&self, embeddings: &[V], ids: &[i64]) -> Vec<DuplicatePair> {
        if embeddings.len() < 2 || embeddings.len() != ids.len() {
            return Vec::new();
        }

        let matrix = similarity_matrix(embeddings);
        let mut pairs = Vec::new();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let similarity = matrix[i][j];
                if similarity >= self.threshold {
                    debug!(target: TARGET_CLUSTER,
                        "Articles {} and {} are near-duplicates ({:.4})", ids[i], ids[j], similarity);
                    pairs.push(DuplicatePair {
                        id1: ids[i],
                        id2: ids[j],
                        similarity,
                    });
                }
            }
        }
        pairs
    }

    /// Drops near-duplicates, keeping input order among survivors
    ///
    /// # Arguments
    /// * `embeddings` - one vector per id
    /// * `ids` - article ids in batch order
    ///
    /// # Returns
    /// * Surviving embeddings and ids, and the removed ids in removal order
    pub fn deduplicate<V: AsRef<[f32]> + Clone>(&self, embeddings: &[V], ids: &[i64]) -> Deduplicated<V> {
        if embeddings.len() < 2 || embeddings.len() != ids.len() {
            return Deduplicated {
                embeddings: embeddings.to_vec(),
                ids: ids.to_vec(),
                removed: Vec::new(),
            };
        }

        let mut removed_set = HashSet::new();
        let mut removed = Vec::new();
        for pair in self.find_duplicates(embeddings, ids) {
            if !removed_set.contains(&pair.id1) && removed_set.insert(pair.id2) {
                removed.push(pair.id2);
            }
        }

        let mut kept_embeddings = Vec::with_capacity(ids.len() - removed.len());
        let mut kept_ids = Vec::with_capacity(ids.len() - removed.len());
        for (embedding, id) in embeddings.iter().zip(ids) {
            if !removed_set.contains(id) {
                kept_embeddings.push(embedding.clone());
                kept_ids.push(*id);
            }
        }

        if !removed.is_empty() {
            info!(target: TARGET_CLUSTER,
                "Removed {} near-duplicates out of {} articles", removed.len(), ids.len());
        }

        Deduplicated {
            embeddings: kept_embeddings,
            ids: kept_ids,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::similarity::normalize;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_find_duplicates_reports_pairs_in_matrix_order() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
        ];
        let pairs = Deduplicator::new(0.92).find_duplicates(&embeddings, &[10, 20, 30, 40]);
        let ids: Vec<(i64, i64)> = pairs.iter().map(|p| (p.id1, p.id2)).collect();
        assert_eq!(ids, vec![(10, 30), (20, 40)]);
        assert!((pairs[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_chain_keeps_both_ends() {
        // A~B and B~C above 0.7, A and C orthogonal
        let a = vec![1.0, 0.0];
        let b = normalize(&[1.0, 1.0]);
        let c = vec![0.0, 1.0];
        let result = Deduplicator::new(0.7).deduplicate(&[a, b, c], &[1, 2, 3]);

        assert_eq!(result.removed, vec![2]);
        assert_eq!(result.ids, vec![1, 3]);
        assert_eq!(result.embeddings.len(), 2);
    }

    #[test]
    fn test_first_seen_survives_fully_connected_group() {
        let v = normalize(&[1.0, 0.1, 0.0]);
        let result = Deduplicator::new(0.9).deduplicate(&[v.clone(), v.clone(), v], &[5, 6, 7]);
        assert_eq!(result.ids, vec![5]);
        assert_eq!(result.removed, vec![6, 7]);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        let centers: Vec<Vec<f32>> = (0..4)
            .map(|_| normalize(&(0..24).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f32>>()))
            .collect();
        let embeddings: Vec<Vec<f32>> = (0..40)
            .map(|i| {
                let center = &centers[i % centers.len()];
                normalize(&center.iter().map(|c| c + rng.random_range(-0.1..0.1)).collect::<Vec<f32>>())
            })
            .collect();
        let ids: Vec<i64> = (0..40).collect();

        let dedup = Deduplicator::new(0.95);
        let first = dedup.deduplicate(&embeddings, &ids);
        let second = dedup.deduplicate(&first.embeddings, &first.ids);

        assert!(second.removed.is_empty());
        assert_eq!(second.ids, first.ids);
        assert!(dedup.find_duplicates(&first.embeddings, &first.ids).is_empty());
    }

    #[test]
    fn test_small_inputs_pass_through() {
        let dedup = Deduplicator::new(0.5);
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(dedup.deduplicate(&empty, &[]).ids, Vec::<i64>::new());

        let single = dedup.deduplicate(&[vec![1.0, 0.0]], &[9]);
        assert_eq!(single.ids, vec![9]);
        assert!(single.removed.is_empty());
        assert!(dedup.find_duplicates(&[vec![1.0, 0.0]], &[9]).is_empty());
    }
}
