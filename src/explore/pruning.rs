//! Priority-driven feature removal respecting dependency order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::explore::scoring::{score_features, FeatureScoringConfig};
use crate::features::{Renumbering, J};
use crate::logging::PruningRecord;
use crate::world::World;

/// At least one of the three selection bounds must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturePruningConfig {
    #[serde(default)]
    pub feature_scoring: FeatureScoringConfig,
    /// Stop once the lowest remaining score reaches this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
    /// Keep at most this many features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_count: Option<u64>,
    /// Keep at most this fraction of the current features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_fraction: Option<f64>,
}

#[derive(Debug)]
struct ScoredJ {
    score: f64,
    j: J,
}

impl PartialEq for ScoredJ {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for ScoredJ {}

impl PartialOrd for ScoredJ {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredJ {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.j.cmp(&other.j))
    }
}

/// Removes low-scoring features and compacts the `J` space through
/// [`World::remove_and_renumber`].
///
/// Features are scored afresh here: the ordering used by exploration may
/// have changed since, and re-scoring is only O(model size).
pub fn prune_features(world: &mut World, config: &FeaturePruningConfig) -> PruningRecord {
    let scores = score_features(
        &world.model,
        &config.feature_scoring,
        &world.data,
        &world.feature_map,
        &world.product_map,
    );
    let (removed_js, record) = compute_pruning(world, config, &scores);
    world.remove_and_renumber(&Renumbering::remove_js(&removed_js));
    tracing::info!(
        removed = record.features_removed,
        blocked = record.blocked_features,
        "feature pruning"
    );
    record
}

/// Walks a min-heap of `(score, J)`. A popped `J` with a live child in the
/// dependees graph is deferred instead of removed: it is parked under its
/// first live child and re-enqueued when that child goes. A parent feature
/// can never be removed while a cross built from it is alive.
fn compute_pruning(
    world: &World,
    config: &FeaturePruningConfig,
    scores: &[f64],
) -> (Vec<bool>, PruningRecord) {
    assert!(
        config.score_threshold.is_some()
            || config.top_count.is_some()
            || config.top_fraction.is_some(),
        "feature pruning requires a selection bound"
    );

    let mut queue: BinaryHeap<Reverse<ScoredJ>> = (0..world.model.size())
        .map(|j| {
            Reverse(ScoredJ {
                score: scores[j as usize],
                j,
            })
        })
        .collect();
    let feature_count = queue.len() as u64;

    // Blocked parents, keyed by the child whose removal would unblock them.
    let mut triggered_by: HashMap<J, Vec<J>> = HashMap::new();
    // Invariant: the first `num_removed_children[j]` children of `j` are
    // known removed.
    let mut num_removed_children: HashMap<J, usize> = HashMap::new();
    let mut removed_js = vec![false; world.model.size() as usize];

    let mut record = PruningRecord {
        xjbools_count: world.data.materialized_xjbool_count(),
        ..Default::default()
    };

    loop {
        let Some(Reverse(top)) = queue.peek() else {
            break;
        };
        let score = top.score;
        if score == f64::INFINITY {
            break;
        }
        if let Some(threshold) = config.score_threshold {
            if score >= threshold {
                break;
            }
        }
        if let Some(top_count) = config.top_count {
            if queue.len() as u64 <= top_count {
                break;
            }
        }
        if let Some(top_fraction) = config.top_fraction {
            if queue.len() as f64 <= (feature_count as f64 * top_fraction).round() {
                break;
            }
        }

        let j = queue.pop().unwrap().0.j;
        let children = world.data.dependees().row(j);
        let cursor = num_removed_children.entry(j).or_insert(0);
        while *cursor < children.len() && removed_js[children[*cursor] as usize] {
            *cursor += 1;
        }

        if *cursor < children.len() {
            // Defer until the first live child is gone.
            triggered_by.entry(children[*cursor]).or_default().push(j);
        } else {
            record.features_removed += 1;
            removed_js[j as usize] = true;
            record.xjbools_removed += world.data.xjbool_count_of_j(j);
            if let Some(blocked) = triggered_by.remove(&j) {
                for blocked_j in blocked {
                    queue.push(Reverse(ScoredJ {
                        score: scores[blocked_j as usize],
                        j: blocked_j,
                    }));
                }
            }
        }
    }

    for blocked in triggered_by.values() {
        record.blocked_features += blocked.len() as u64;
        for &j in blocked {
            record.blocked_xjbools += world.data.xjbool_count_of_j(j);
        }
    }
    record.xjbools_count -= record.xjbools_removed;

    (removed_js, record)
}
