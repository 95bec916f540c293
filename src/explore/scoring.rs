//! Per-feature scores driving exploration and pruning.

use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::features::{FeatureMap, ProductMap, J};
use crate::model::Model;

/// Scoring strategy. Scores need to be additive: exploration ranks feature
/// pairs by score sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOrdering {
    #[default]
    WeightAbsoluteValue,
    WeightAbsoluteValueTimesRowCount,
    MutualInformation,
    PhiCoefficient,
}

/// Multiplicative score bonus for features touching a configured set of
/// atomic names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBonus {
    pub feature_set: Vec<String>,
    pub factor: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureScoringConfig {
    #[serde(default)]
    pub feature_ordering: FeatureOrdering,
    #[serde(default)]
    pub take_logarithm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<ScoreBonus>,
}

/// Scores every current `J`. Both maps must be synced.
pub fn score_features(
    model: &Model,
    config: &FeatureScoringConfig,
    data: &Data,
    feature_map: &FeatureMap,
    product_map: &ProductMap,
) -> Vec<f64> {
    let size = model.size();
    let mut scores = vec![0.0; size as usize];

    match config.feature_ordering {
        FeatureOrdering::WeightAbsoluteValue => {
            for j in 0..size {
                scores[j as usize] = model.w[j as usize].abs();
            }
        }
        FeatureOrdering::WeightAbsoluteValueTimesRowCount => {
            for j in 0..size {
                scores[j as usize] =
                    model.w[j as usize].abs() * data.training().xjbool_count_of_j(j) as f64;
            }
        }
        FeatureOrdering::MutualInformation => {
            for j in 0..size {
                scores[j as usize] = data
                    .training()
                    .stats()
                    .correlation_table(j)
                    .mutual_information();
            }
        }
        FeatureOrdering::PhiCoefficient => {
            for j in 0..size {
                scores[j as usize] = data
                    .training()
                    .stats()
                    .correlation_table(j)
                    .phi_coefficient()
                    .abs();
            }
        }
    }

    if let Some(bonus) = &config.bonus {
        let feature_js = feature_map.feature_set_to_js(&bonus.feature_set);
        let bonused = product_map.have_at_least_one_feature_j(&feature_js);
        assert_eq!(size as usize, bonused.len());
        for (score, &hit) in scores.iter_mut().zip(&bonused) {
            if hit {
                *score *= bonus.factor;
            }
        }
    }
    if config.take_logarithm {
        for score in &mut scores {
            *score = (*score + 1e-10).ln();
        }
    }
    scores
}

/// Scores indexed by `J`, paired for sorting.
pub(crate) fn scored_js(scores: &[f64]) -> Vec<(f64, J)> {
    scores
        .iter()
        .enumerate()
        .map(|(j, &score)| (score, j as J))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{finish_world, push_training_rows, world_with_products};

    fn scored(
        world: &crate::world::World,
        config: &FeatureScoringConfig,
    ) -> Vec<f64> {
        score_features(
            &world.model,
            config,
            &world.data,
            &world.feature_map,
            &world.product_map,
        )
    }

    #[test]
    fn weight_absolute_value_ordering() {
        let mut world = world_with_products(&["a", "b"], &[&[], &[0], &[1]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1]), (-1.0, &[0, 2])]);
        finish_world(&mut world);
        world.model.w[1] = -3.0;
        world.model.w[2] = 2.0;
        let scores = scored(&world, &FeatureScoringConfig::default());
        assert_eq!(scores, vec![0.0, 3.0, 2.0]);
    }

    #[test]
    fn row_count_weighting() {
        let mut world = world_with_products(&["a"], &[&[], &[0]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1]), (-1.0, &[0]), (1.0, &[0])]);
        finish_world(&mut world);
        world.model.w[0] = 1.0;
        world.model.w[1] = 1.0;
        let config = FeatureScoringConfig {
            feature_ordering: FeatureOrdering::WeightAbsoluteValueTimesRowCount,
            ..Default::default()
        };
        let scores = scored(&world, &config);
        assert_eq!(scores, vec![3.0, 1.0]);
    }

    #[test]
    fn phi_ranks_the_perfect_predictor_highest() {
        let mut world = world_with_products(&["a", "b"], &[&[], &[0], &[1]]);
        // Feature 1 predicts the label exactly; feature 2 is constant.
        push_training_rows(
            &mut world,
            &[(1.0, &[0, 1, 2]), (1.0, &[0, 1, 2]), (-1.0, &[0, 2]), (-1.0, &[0, 2])],
        );
        finish_world(&mut world);
        let config = FeatureScoringConfig {
            feature_ordering: FeatureOrdering::PhiCoefficient,
            ..Default::default()
        };
        let scores = scored(&world, &config);
        assert!(scores[1] > scores[2]);
        assert!(scores[1] > scores[0]);
    }

    #[test]
    fn bonus_multiplies_matching_products() {
        let mut world = world_with_products(&["a", "b"], &[&[], &[0], &[1]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1, 2])]);
        finish_world(&mut world);
        world.model.w[1] = 1.0;
        world.model.w[2] = 1.0;
        let config = FeatureScoringConfig {
            bonus: Some(ScoreBonus {
                feature_set: vec!["b".to_owned()],
                factor: 10.0,
            }),
            ..Default::default()
        };
        let scores = scored(&world, &config);
        assert_eq!(scores[1], 1.0);
        assert_eq!(scores[2], 10.0);
    }

    #[test]
    fn logarithm_is_monotone() {
        let mut world = world_with_products(&["a"], &[&[], &[0]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1])]);
        finish_world(&mut world);
        world.model.w[0] = 1.0;
        world.model.w[1] = 5.0;
        let config = FeatureScoringConfig {
            take_logarithm: true,
            ..Default::default()
        };
        let scores = scored(&world, &config);
        assert!(scores[1] > scores[0]);
        assert!(scores[0] < 0.5); // ln(1 + eps) ~ 0
    }
}
