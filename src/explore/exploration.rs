//! Priority-driven generation of new cross features.

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::data::CsrMatrix;
use crate::explore::scoring::{score_features, scored_js, FeatureScoringConfig};
use crate::features::{JProduct, J};
use crate::logging::ExplorationRecord;
use crate::world::World;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureExplorationConfig {
    #[serde(default)]
    pub feature_scoring: FeatureScoringConfig,
    /// Hard cap on features added this round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_features_added: Option<u32>,
    /// Budget on estimated materialized entries added this round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_xjbools_added: Option<u64>,
    /// Crosses with more factors than this are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_product_size: Option<u32>,
}

/// Exploration state carried between rounds: a running estimate of how many
/// materialized entries one candidate feature costs.
#[derive(Debug, Clone, Default)]
pub struct FeatureExploration {
    pub xjbools_per_candidate_estimate: f64,
}

// =============================================================================
// PrioritySumIterator
// =============================================================================

#[derive(Debug)]
struct PairEntry {
    sum: f64,
    i: u32,
    k: u32,
}

impl PartialEq for PairEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for PairEntry {}

impl PartialOrd for PairEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PairEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: larger sum wins; at equal sums the lexicographically
        // smaller position pair comes out first.
        self.sum
            .partial_cmp(&other.sum)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (other.i, other.k).cmp(&(self.i, self.k)))
    }
}

/// Emits index pairs `(i, k)`, `i < k`, of a score-descending array in
/// non-increasing order of `score[i] + score[k]`, without materializing the
/// quadratic pair space: the heap holds at most one candidate per row `i`,
/// advanced to `(i, k + 1)` when `(i, k)` is popped.
pub struct PrioritySumIterator<'a> {
    v: &'a [(f64, J)],
    heap: BinaryHeap<PairEntry>,
}

impl<'a> PrioritySumIterator<'a> {
    /// `v` must be sorted by descending score.
    pub fn new(v: &'a [(f64, J)]) -> Self {
        let mut it = Self {
            v,
            heap: BinaryHeap::new(),
        };
        for i in 0..v.len() as u32 {
            it.insert_next(i, i);
        }
        it
    }

    fn insert_next(&mut self, i: u32, k: u32) {
        debug_assert!(i <= k);
        let k = k + 1;
        if (k as usize) < self.v.len() {
            self.heap.push(PairEntry {
                sum: self.v[i as usize].0 + self.v[k as usize].0,
                i,
                k,
            });
        }
    }

    /// Next pair of distinct `J`s with the highest remaining score sum.
    pub fn next_pair(&mut self) -> Option<(J, J)> {
        let entry = self.heap.pop()?;
        self.insert_next(entry.i, entry.k);
        Some((self.v[entry.i as usize].1, self.v[entry.k as usize].1))
    }
}

// =============================================================================
// Exploration
// =============================================================================

/// Adds new cross features by pairing high-scoring existing features, then
/// routes the structural change through [`World::add_features`].
pub fn add_new_product_features(
    world: &mut World,
    config: &FeatureExplorationConfig,
) -> ExplorationRecord {
    assert_eq!(world.model.size(), world.product_map.len());
    let first_new_j = world.product_map.len();

    let scores = score_features(
        &world.model,
        &config.feature_scoring,
        &world.data,
        &world.feature_map,
        &world.product_map,
    );
    let mut best_js = scored_js(&scores);
    best_js.sort_unstable_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.cmp(&a.1))
    });

    if world.exploration.xjbools_per_candidate_estimate == 0.0 {
        world.exploration.xjbools_per_candidate_estimate =
            (world.data.training().stats().row_count()
                + world.data.holdout().stats().row_count()) as f64;
    }
    let estimate = world.exploration.xjbools_per_candidate_estimate;

    let previous_xjbool_count = world.data.materialized_xjbool_count();
    let mut coo_dependees = world.data.dependees().to_coo();
    let mut new_feature_count: u32 = 0;
    let mut present_features_skipped: u64 = 0;

    {
        let mut pairs = PrioritySumIterator::new(&best_js);
        let mut score_sum_threshold = f64::INFINITY;
        loop {
            if let Some(expected) = config.expected_xjbools_added {
                if new_feature_count as f64 * estimate >= expected as f64 {
                    break;
                }
            }
            if let Some(maximum) = config.maximum_features_added {
                if new_feature_count >= maximum {
                    break;
                }
            }
            let Some((j1, j2)) = pairs.next_pair() else {
                break;
            };
            debug_assert_ne!(j1, j2);
            let (j1, j2) = (j1.min(j2), j1.max(j2));
            // The synced view stays readable while interning new products.
            let f1 = world.product_map.j_to_key_stale(j1).clone();
            let f2 = world.product_map.j_to_key_stale(j2).clone();
            let new_f = JProduct::and(&f1, &f2);
            if world.product_map.contains(&new_f) {
                present_features_skipped += 1;
                continue;
            }
            if let Some(max_size) = config.max_product_size {
                if new_f.arity() as u32 > max_size {
                    continue;
                }
            }

            let new_j = world.product_map.intern(new_f);
            coo_dependees.set_true(j1, new_j);
            coo_dependees.set_true(j2, new_j);

            let score_sum = scores[j1 as usize] + scores[j2 as usize];
            debug_assert!(score_sum <= score_sum_threshold);
            score_sum_threshold = score_sum;
            new_feature_count += 1;
        }
    }

    coo_dependees.sort();
    world.data.set_dependees(CsrMatrix::from_coo(&coo_dependees));
    let new_size = world.product_map.len();
    world.add_features(first_new_j, new_size);

    let xjbools_count = world.data.materialized_xjbool_count();
    let xjbools_added = xjbools_count - previous_xjbool_count;
    if xjbools_added == 0 || new_feature_count == 0 {
        world.exploration.xjbools_per_candidate_estimate /= 2.0;
    } else {
        world.exploration.xjbools_per_candidate_estimate =
            xjbools_added as f64 / f64::from(new_feature_count);
    }

    let record = ExplorationRecord {
        xjbools_per_candidate_feature_estimate: estimate,
        features_added: new_feature_count,
        present_features_skipped,
        empty_features_skipped: 0,
        xjbools_added,
        xjbools_count,
    };
    tracing::info!(
        added = record.features_added,
        skipped = record.present_features_skipped,
        xjbools = record.xjbools_added,
        "feature exploration"
    );
    record
}
