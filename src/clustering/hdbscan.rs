//! Hierarchical density-based clustering (HDBSCAN) with excess-of-mass selection.
//!
//! Points are unit vectors, so euclidean distance ranks pairs the same way cosine
//! similarity does. The hierarchy is built from mutual reachability distances via a
//! minimum spanning tree, condensed with `min_cluster_size`, and flat clusters are
//! picked by comparing each cluster's stability against the summed stability of its
//! descendants.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::clustering::types::{ClusterAssignments, NOISE_LABEL};
use crate::TARGET_CLUSTER;

/// Tuning knobs for [`DensityClusterer`]
#[derive(Debug, Clone, PartialEq)]
pub struct DensityParams {
    /// Smallest group that counts as a cluster
    pub min_cluster_size: usize,
    /// Neighbourhood size used for core distances; 1 makes every point a core point
    pub min_samples: usize,
    /// Clusters split below this distance are merged back into their parent
    pub cluster_selection_epsilon: f64,
    /// Lets the root of the hierarchy compete in selection, which can merge nearby groups.
    /// Without it the root is still selected when the hierarchy has no other cluster.
    pub allow_single_cluster: bool,
}

impl Default for DensityParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: 1,
            cluster_selection_epsilon: 0.0,
            allow_single_cluster: false,
        }
    }
}

impl DensityParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(anyhow!(
                "MIN_CLUSTER_SIZE must be at least 2, got {}",
                self.min_cluster_size
            ));
        }
        if self.min_samples < 1 {
            return Err(anyhow!("MIN_SAMPLES must be at least 1"));
        }
        if !self.cluster_selection_epsilon.is_finite() || self.cluster_selection_epsilon < 0.0 {
            return Err(anyhow!(
                "CLUSTER_SELECTION_EPSILON must be a non-negative number, got {}",
                self.cluster_selection_epsilon
            ));
        }
        Ok(())
    }
}

/// Row of the single-linkage dendrogram: two merged nodes, merge distance, merged size
#[derive(Debug, Clone, Copy)]
struct LinkageRow {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Row of the condensed tree. `child` is a point when `< n`, a cluster otherwise.
#[derive(Debug, Clone, Copy)]
struct CondensedRow {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    next_label: usize,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..2 * n - 1).collect(),
            size: (0..2 * n - 1).map(|i| if i < n { 1 } else { 0 }).collect(),
            next_label: n,
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let label = self.next_label;
        self.size[label] = self.size[a] + self.size[b];
        self.parent[a] = label;
        self.parent[b] = label;
        self.next_label += 1;
        label
    }
}

fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(1e-12)
}

/// Stateless density clusterer over unit-normalized embeddings
#[derive(Debug, Clone, Default)]
pub struct DensityClusterer {
    params: DensityParams,
}

impl DensityClusterer {
    pub fn new(params: DensityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DensityParams {
        &self.params
    }

    /// Groups `ids` by cluster label. Label [`NOISE_LABEL`] holds outliers.
    ///
    /// # Arguments
    /// * `embeddings` - one vector per id, all of the same dimension
    /// * `ids` - article ids in batch order
    ///
    /// # Returns
    /// * Label to ids mapping, ids kept in input order within each label
    pub fn cluster_embeddings<V: AsRef<[f32]>>(
        &self,
        embeddings: &[V],
        ids: &[i64],
    ) -> Result<ClusterAssignments> {
        Ok(self.cluster_with_probabilities(embeddings, ids)?.0)
    }

    /// Same as [`Self::cluster_embeddings`], plus each id's membership strength in [0, 1].
    /// Outliers have strength 0.
    pub fn cluster_with_probabilities<V: AsRef<[f32]>>(
        &self,
        embeddings: &[V],
        ids: &[i64],
    ) -> Result<(ClusterAssignments, HashMap<i64, f32>)> {
        if embeddings.len() != ids.len() {
            return Err(anyhow!(
                "Got {} embeddings for {} ids",
                embeddings.len(),
                ids.len()
            ));
        }

        let n = ids.len();
        if n < self.params.min_cluster_size || n < 2 {
            debug!(target: TARGET_CLUSTER, "Only {} points, skipping density clustering", n);
            let mut assignments = ClusterAssignments::new();
            assignments.insert(NOISE_LABEL, ids.to_vec());
            let strengths = ids.iter().map(|id| (*id, 0.0)).collect();
            return Ok((assignments, strengths));
        }

        let dim = embeddings[0].as_ref().len();
        if let Some(pos) = embeddings.iter().position(|e| e.as_ref().len() != dim) {
            return Err(anyhow!(
                "Embedding for id {} has dimension {}, expected {}",
                ids[pos],
                embeddings[pos].as_ref().len(),
                dim
            ));
        }

        let distances = pairwise_distances(embeddings);
        let core = core_distances(&distances, self.params.min_samples);
        let mst = mutual_reachability_mst(&distances, &core);
        let linkage = single_linkage(n, mst);
        let condensed = condense_tree(&linkage, n, self.params.min_cluster_size);
        let selected = self.select_clusters(&condensed, n);
        let (labels, strengths) = self.label_points(&condensed, &selected, n);

        let mut assignments = ClusterAssignments::new();
        let mut by_id = HashMap::with_capacity(n);
        for (point, label) in labels.iter().enumerate() {
            assignments.entry(*label).or_default().push(ids[point]);
            by_id.insert(ids[point], strengths[point] as f32);
        }

        debug!(target: TARGET_CLUSTER,
            "Density clustering of {} points produced {} clusters and {} outliers",
            n,
            assignments.keys().filter(|l| **l != NOISE_LABEL).count(),
            assignments.get(&NOISE_LABEL).map_or(0, |v| v.len())
        );

        Ok((assignments, by_id))
    }

    /// Excess-of-mass selection, optionally refined by epsilon.
    ///
    /// The root is only a candidate when `allow_single_cluster` is set, or when no other
    /// cluster exists in the hierarchy at all.
    fn select_clusters(&self, condensed: &[CondensedRow], root: usize) -> HashSet<usize> {
        let stability = compute_stability(condensed, root);

        // Cluster-to-cluster edges only
        let cluster_tree: Vec<CondensedRow> =
            condensed.iter().copied().filter(|r| r.child_size > 1).collect();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for row in &cluster_tree {
            children.entry(row.parent).or_default().push(row.child);
        }

        let mut allow_root = self.params.allow_single_cluster;
        let mut eom = excess_of_mass(stability.clone(), &children, root, allow_root);
        if eom.is_empty() && !allow_root {
            debug!(target: TARGET_CLUSTER, "No cluster below the root, selecting the root");
            allow_root = true;
            eom = excess_of_mass(stability, &children, root, allow_root);
        }

        let epsilon = self.params.cluster_selection_epsilon;
        if epsilon == 0.0 || cluster_tree.is_empty() {
            return eom;
        }
        if eom.len() == 1 && eom.contains(&root) {
            return eom;
        }
        self.epsilon_search(&eom, &cluster_tree, &children, root, allow_root)
    }

    /// Replaces clusters born below epsilon with the closest ancestor born above it
    fn epsilon_search(
        &self,
        leaves: &HashSet<usize>,
        cluster_tree: &[CondensedRow],
        children: &HashMap<usize, Vec<usize>>,
        root: usize,
        allow_root: bool,
    ) -> HashSet<usize> {
        let epsilon = self.params.cluster_selection_epsilon;
        let birth: HashMap<usize, (usize, f64)> = cluster_tree
            .iter()
            .map(|r| (r.child, (r.parent, r.lambda)))
            .collect();

        let mut ordered: Vec<usize> = leaves.iter().copied().collect();
        ordered.sort_unstable();

        let mut selected = HashSet::new();
        let mut processed = HashSet::new();
        for leaf in ordered {
            let leaf_eps = birth.get(&leaf).map_or(f64::INFINITY, |(_, l)| 1.0 / l);
            if leaf_eps >= epsilon {
                selected.insert(leaf);
                continue;
            }
            if processed.contains(&leaf) {
                continue;
            }

            let mut current = leaf;
            let chosen = loop {
                let Some((parent, _)) = birth.get(&current).copied() else {
                    break current;
                };
                if parent == root {
                    break if allow_root { parent } else { current };
                }
                let parent_eps = birth.get(&parent).map_or(f64::INFINITY, |(_, l)| 1.0 / l);
                if parent_eps > epsilon {
                    break parent;
                }
                current = parent;
            };

            selected.insert(chosen);
            processed.extend(descendants(children, chosen));
        }
        selected
    }

    /// Assigns every point to its nearest selected ancestor and computes membership strength
    fn label_points(
        &self,
        condensed: &[CondensedRow],
        selected: &HashSet<usize>,
        root: usize,
    ) -> (Vec<i32>, Vec<f64>) {
        let n = root;
        let mut parent_of = HashMap::new();
        let mut point_parent = vec![root; n];
        let mut point_lambda = vec![0.0; n];
        let mut max_lambda: HashMap<usize, f64> = HashMap::new();

        for row in condensed {
            if row.child < n {
                point_parent[row.child] = row.parent;
                point_lambda[row.child] = row.lambda;
            } else {
                parent_of.insert(row.child, row.parent);
            }
            let entry = max_lambda.entry(row.parent).or_insert(0.0);
            if row.lambda > *entry {
                *entry = row.lambda;
            }
        }

        let mut ordered: Vec<usize> = selected.iter().copied().collect();
        ordered.sort_unstable();
        let label_map: HashMap<usize, i32> = ordered
            .iter()
            .enumerate()
            .map(|(label, node)| (*node, label as i32))
            .collect();

        let root_threshold = if self.params.cluster_selection_epsilon > 0.0 {
            1.0 / self.params.cluster_selection_epsilon
        } else {
            max_lambda.get(&root).copied().unwrap_or(0.0)
        };

        let mut labels = vec![NOISE_LABEL; n];
        let mut strengths = vec![0.0; n];
        for point in 0..n {
            let mut cluster = point_parent[point];
            while !selected.contains(&cluster) && cluster != root {
                match parent_of.get(&cluster) {
                    Some(parent) => cluster = *parent,
                    None => break,
                }
            }
            if !selected.contains(&cluster) {
                continue;
            }
            if cluster == root
                && !(ordered.len() == 1 && point_lambda[point] >= root_threshold)
            {
                continue;
            }

            labels[point] = label_map[&cluster];
            let death = max_lambda.get(&cluster).copied().unwrap_or(0.0);
            strengths[point] = if death <= 0.0 || !death.is_finite() {
                1.0
            } else {
                point_lambda[point].min(death) / death
            };
        }

        (labels, strengths)
    }
}

fn pairwise_distances<V: AsRef<[f32]>>(embeddings: &[V]) -> Vec<Vec<f64>> {
    let n = embeddings.len();
    let mut distances = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = embeddings[i]
                .as_ref()
                .iter()
                .zip(embeddings[j].as_ref())
                .map(|(a, b)| {
                    let diff = f64::from(*a) - f64::from(*b);
                    diff * diff
                })
                .sum::<f64>()
                .sqrt();
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }
    distances
}

/// Distance to the `min_samples`-th nearest neighbour, counting the point itself
fn core_distances(distances: &[Vec<f64>], min_samples: usize) -> Vec<f64> {
    let k = min_samples.clamp(1, distances.len());
    distances
        .iter()
        .map(|row| {
            let mut sorted = row.clone();
            sorted.sort_unstable_by(f64::total_cmp);
            sorted[k - 1]
        })
        .collect()
}

/// Prim's algorithm over the dense mutual reachability graph
fn mutual_reachability_mst(distances: &[Vec<f64>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = usize::MAX;
        let mut next_dist = f64::INFINITY;
        for other in 0..n {
            if in_tree[other] {
                continue;
            }
            let reach = distances[current][other].max(core[current]).max(core[other]);
            if reach < best[other] {
                best[other] = reach;
                best_from[other] = current;
            }
            if best[other] < next_dist || next == usize::MAX {
                next_dist = best[other];
                next = other;
            }
        }
        in_tree[next] = true;
        edges.push((best_from[next], next, next_dist));
        current = next;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

fn single_linkage(n: usize, mst: Vec<(usize, usize, f64)>) -> Vec<LinkageRow> {
    let mut uf = UnionFind::new(n);
    let mut rows = Vec::with_capacity(n - 1);
    for (a, b, distance) in mst {
        let left = uf.find(a);
        let right = uf.find(b);
        let label = uf.union(left, right);
        rows.push(LinkageRow {
            left,
            right,
            distance,
            size: uf.size[label],
        });
    }
    rows
}

/// Nodes of the dendrogram below `node`, breadth first, `node` included
fn linkage_subtree(linkage: &[LinkageRow], n: usize, node: usize) -> Vec<usize> {
    let mut result = Vec::new();
    let mut queue = VecDeque::from([node]);
    while let Some(current) = queue.pop_front() {
        result.push(current);
        if current >= n {
            let row = linkage[current - n];
            queue.push_back(row.left);
            queue.push_back(row.right);
        }
    }
    result
}

/// Collapses the dendrogram so that splits shedding fewer than `min_cluster_size`
/// points read as points falling out of a persisting cluster
fn condense_tree(linkage: &[LinkageRow], n: usize, min_cluster_size: usize) -> Vec<CondensedRow> {
    let root = 2 * n - 2;
    let mut relabel = vec![0usize; 2 * n - 1];
    let mut ignore = vec![false; 2 * n - 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut result = Vec::new();

    let size_of = |node: usize| if node >= n { linkage[node - n].size } else { 1 };

    for node in linkage_subtree(linkage, n, root) {
        if ignore[node] || node < n {
            continue;
        }
        let row = linkage[node - n];
        let lambda = lambda_of(row.distance);
        let left_count = size_of(row.left);
        let right_count = size_of(row.right);
        let parent = relabel[node];

        let fall_out = |subtree_root: usize, result: &mut Vec<CondensedRow>, ignore: &mut Vec<bool>| {
            for sub_node in linkage_subtree(linkage, n, subtree_root) {
                if sub_node < n {
                    result.push(CondensedRow {
                        parent,
                        child: sub_node,
                        lambda,
                        child_size: 1,
                    });
                }
                ignore[sub_node] = true;
            }
        };

        match (left_count >= min_cluster_size, right_count >= min_cluster_size) {
            (true, true) => {
                for (child, count) in [(row.left, left_count), (row.right, right_count)] {
                    relabel[child] = next_label;
                    next_label += 1;
                    result.push(CondensedRow {
                        parent,
                        child: relabel[child],
                        lambda,
                        child_size: count,
                    });
                }
            }
            (false, false) => {
                fall_out(row.left, &mut result, &mut ignore);
                fall_out(row.right, &mut result, &mut ignore);
            }
            (true, false) => {
                relabel[row.left] = parent;
                fall_out(row.right, &mut result, &mut ignore);
            }
            (false, true) => {
                relabel[row.right] = parent;
                fall_out(row.left, &mut result, &mut ignore);
            }
        }
    }

    result
}

/// Stability of every cluster: sum over its rows of `(lambda - lambda_birth) * size`
fn compute_stability(condensed: &[CondensedRow], root: usize) -> HashMap<usize, f64> {
    let mut births: HashMap<usize, f64> = HashMap::new();
    births.insert(root, 0.0);
    for row in condensed.iter().filter(|r| r.child >= root) {
        births.insert(row.child, row.lambda);
    }

    let mut stability: HashMap<usize, f64> = HashMap::new();
    stability.insert(root, 0.0);
    for row in condensed {
        let birth = births.get(&row.parent).copied().unwrap_or(0.0);
        *stability.entry(row.parent).or_insert(0.0) += (row.lambda - birth) * row.child_size as f64;
    }
    stability
}

/// Strict descendants of `node` in the cluster tree
/// Picks each node whose own stability beats the summed stability of its descendants
fn excess_of_mass(
    mut stability: HashMap<usize, f64>,
    children: &HashMap<usize, Vec<usize>>,
    root: usize,
    allow_root: bool,
) -> HashSet<usize> {
    let mut nodes: Vec<usize> = stability.keys().copied().collect();
    nodes.sort_unstable_by(|a, b| b.cmp(a));
    if !allow_root {
        nodes.retain(|node| *node != root);
    }

    let mut is_cluster: BTreeMap<usize, bool> = nodes.iter().map(|n| (*n, true)).collect();
    for node in &nodes {
        let subtree_stability: f64 = children
            .get(node)
            .map(|kids| kids.iter().map(|k| stability.get(k).copied().unwrap_or(0.0)).sum())
            .unwrap_or(0.0);
        let own = stability.get(node).copied().unwrap_or(0.0);

        if subtree_stability > own {
            is_cluster.insert(*node, false);
            stability.insert(*node, subtree_stability);
        } else {
            for sub_node in descendants(children, *node) {
                is_cluster.insert(sub_node, false);
            }
        }
    }

    is_cluster
        .into_iter()
        .filter(|(_, selected)| *selected)
        .map(|(node, _)| node)
        .collect()
}

fn descendants(children: &HashMap<usize, Vec<usize>>, node: usize) -> Vec<usize> {
    let mut result = Vec::new();
    let mut queue: VecDeque<usize> = children.get(&node).cloned().unwrap_or_default().into();
    while let Some(current) = queue.pop_front() {
        result.push(current);
        if let Some(kids) = children.get(&current) {
            queue.extend(kids.iter().copied());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::similarity::normalize;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn basis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    /// `count` unit vectors each nudged off `axis` along its own orthogonal direction
    fn tight_group(dim: usize, axis: usize, first_offset_axis: usize, count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|k| {
                let mut v = basis(dim, axis);
                v[first_offset_axis + k] = 0.05;
                normalize(&v)
            })
            .collect()
    }

    #[test]
    fn test_fewer_points_than_min_cluster_size_are_all_noise() {
        let clusterer = DensityClusterer::new(DensityParams {
            min_cluster_size: 3,
            ..Default::default()
        });
        let embeddings = vec![basis(4, 0), basis(4, 0)];
        let result = clusterer.cluster_embeddings(&embeddings, &[10, 11]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[&NOISE_LABEL], vec![10, 11]);

        let empty: Vec<Vec<f32>> = Vec::new();
        let result = DensityClusterer::default().cluster_embeddings(&empty, &[]).unwrap();
        assert_eq!(result[&NOISE_LABEL], Vec::<i64>::new());
    }

    #[test]
    fn test_two_separated_groups() {
        let mut embeddings = tight_group(16, 0, 2, 5);
        embeddings.extend(tight_group(16, 1, 8, 5));
        let ids: Vec<i64> = (1..=10).collect();

        let result = DensityClusterer::default()
            .cluster_embeddings(&embeddings, &ids)
            .unwrap();

        let clusters: Vec<&Vec<i64>> = result
            .iter()
            .filter(|(label, _)| **label != NOISE_LABEL)
            .map(|(_, members)| members)
            .collect();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.contains(&&vec![1, 2, 3, 4, 5]));
        assert!(clusters.contains(&&vec![6, 7, 8, 9, 10]));
        assert!(!result.contains_key(&NOISE_LABEL));
    }

    #[test]
    fn test_groups_around_random_directions() {
        let mut rng = StdRng::seed_from_u64(42);
        let dim = 32;
        let mut embeddings = Vec::new();
        for _ in 0..2 {
            let center: Vec<f32> = normalize(
                &(0..dim).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f32>>(),
            );
            for _ in 0..5 {
                let noisy: Vec<f32> = center
                    .iter()
                    .map(|c| c + rng.random_range(-0.01..0.01))
                    .collect();
                embeddings.push(normalize(&noisy));
            }
        }
        let ids: Vec<i64> = (0..10).collect();

        let result = DensityClusterer::default()
            .cluster_embeddings(&embeddings, &ids)
            .unwrap();

        // No group may be split across labels
        for group in [&ids[..5], &ids[5..]] {
            let labels: HashSet<i32> = group
                .iter()
                .map(|id| {
                    *result
                        .iter()
                        .find(|(_, members)| members.contains(id))
                        .unwrap()
                        .0
                })
                .collect();
            assert_eq!(labels.len(), 1);
        }
    }

    #[test]
    fn test_single_dense_pair_with_outlier() {
        let embeddings = vec![
            basis(8, 0),
            normalize(&[0.0, 1.0, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]),
            normalize(&[0.0, 1.0, 0.0, 0.3, 0.0, 0.0, 0.0, 0.0]),
        ];
        // Nothing splits off below the root, so the root is selected either way
        for allow_single_cluster in [false, true] {
            let clusterer = DensityClusterer::new(DensityParams {
                allow_single_cluster,
                ..Default::default()
            });
            let result = clusterer.cluster_embeddings(&embeddings, &[1, 3, 4]).unwrap();
            assert_eq!(result[&0], vec![3, 4]);
            assert_eq!(result[&NOISE_LABEL], vec![1]);
        }
    }

    /// Three articles around `center`, pairwise cosine `within`, each off along its own axis
    fn event(center: &[f32], first_axis: usize, within: f32) -> Vec<Vec<f32>> {
        let (a, b) = (within.sqrt(), (1.0 - within).sqrt());
        (0..3)
            .map(|k| {
                let mut v: Vec<f32> = center.iter().map(|x| a * x).collect();
                v[first_axis + k] += b;
                v
            })
            .collect()
    }

    #[test]
    fn test_nearby_events_stay_separate_by_default() {
        let dim = 16;
        let first = basis(dim, 0);
        let mut second: Vec<f32> = vec![0.0; dim];
        second[0] = 0.54 / 0.67;
        second[1] = (1.0 - second[0] * second[0]).sqrt();

        let mut embeddings = event(&first, 2, 0.67);
        embeddings.extend(event(&second, 8, 0.67));
        let ids: Vec<i64> = (1..=6).collect();

        let result = DensityClusterer::default()
            .cluster_embeddings(&embeddings, &ids)
            .unwrap();
        let clusters: Vec<&Vec<i64>> = result
            .iter()
            .filter(|(label, _)| **label != NOISE_LABEL)
            .map(|(_, members)| members)
            .collect();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.contains(&&vec![1, 2, 3]));
        assert!(clusters.contains(&&vec![4, 5, 6]));

        // Letting the root compete folds both events into one cluster
        let merged = DensityClusterer::new(DensityParams {
            allow_single_cluster: true,
            ..Default::default()
        })
        .cluster_embeddings(&embeddings, &ids)
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[&0], ids);
    }

    #[test]
    fn test_outliers_get_zero_strength() {
        let mut embeddings = tight_group(16, 0, 2, 4);
        embeddings.extend(tight_group(16, 1, 8, 4));
        // Opposite both groups, strictly farther from each than they are from each other
        let mut opposite = vec![0.0; 16];
        opposite[0] = -1.0;
        opposite[1] = -1.0;
        embeddings.push(normalize(&opposite));
        let ids: Vec<i64> = (1..=9).collect();

        let (assignments, strengths) = DensityClusterer::default()
            .cluster_with_probabilities(&embeddings, &ids)
            .unwrap();
        assert_eq!(assignments[&NOISE_LABEL], vec![9]);
        assert_eq!(strengths[&9], 0.0);
        for id in 1..=8 {
            let s = strengths[&id];
            assert!(s > 0.0 && s <= 1.0, "strength {} for {}", s, id);
        }
    }

    #[test]
    fn test_epsilon_merges_close_subclusters() {
        // Two sub-groups that sit close together, plus a far group
        let a = tight_group(16, 0, 2, 3);
        let b: Vec<Vec<f32>> = tight_group(16, 0, 5, 3)
            .into_iter()
            .map(|mut v| {
                v[14] = 0.3;
                normalize(&v)
            })
            .collect();
        let c = tight_group(16, 1, 8, 3);
        let embeddings: Vec<Vec<f32>> = a.into_iter().chain(b).chain(c).collect();
        let ids: Vec<i64> = (1..=9).collect();

        let plain = DensityClusterer::default()
            .cluster_embeddings(&embeddings, &ids)
            .unwrap();
        assert_eq!(plain.keys().filter(|l| **l != NOISE_LABEL).count(), 3);

        let merged = DensityClusterer::new(DensityParams {
            cluster_selection_epsilon: 0.5,
            ..Default::default()
        })
        .cluster_embeddings(&embeddings, &ids)
        .unwrap();
        let clusters: Vec<&Vec<i64>> = merged
            .iter()
            .filter(|(l, _)| **l != NOISE_LABEL)
            .map(|(_, m)| m)
            .collect();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.contains(&&vec![1, 2, 3, 4, 5, 6]));
        assert!(clusters.contains(&&vec![7, 8, 9]));
    }

    #[test]
    fn test_rejects_invalid_params_and_inputs() {
        assert!(DensityParams {
            min_cluster_size: 1,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(DensityParams {
            cluster_selection_epsilon: -0.1,
            ..Default::default()
        }
        .validate()
        .is_err());

        let clusterer = DensityClusterer::default();
        assert!(clusterer
            .cluster_embeddings(&[basis(4, 0), basis(4, 1)], &[1])
            .is_err());
        assert!(clusterer
            .cluster_embeddings(&[basis(4, 0), basis(3, 1)], &[1, 2])
            .is_err());
    }
}
