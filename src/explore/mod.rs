//! Growing and shrinking the feature universe between fitting rounds.
//!
//! [`scoring`] ranks the current features, [`exploration`] pairs top
//! scorers into new cross features, and [`pruning`] removes low scorers
//! while respecting the dependees order (a feature cannot go while a cross
//! built from it is alive).

pub mod exploration;
pub mod pruning;
pub mod scoring;

pub use exploration::{
    add_new_product_features, FeatureExploration, FeatureExplorationConfig,
};
pub use pruning::{prune_features, FeaturePruningConfig};
pub use scoring::{score_features, FeatureOrdering, FeatureScoringConfig, ScoreBonus};
