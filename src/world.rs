//! The aggregate owning every engine component.
//!
//! All structural mutations of the feature universe route through
//! [`World::add_features`] and [`World::remove_and_renumber`], which resize
//! and renumber every dependent component in a fixed order (product map
//! sync, dependees row count, stats, model, optimizer state). Spreading
//! that responsibility around is how components desynchronize; don't.

use crate::data::Data;
use crate::explore::FeatureExploration;
use crate::features::{FeatureMap, ProductMap, Renumbering, J};
use crate::logging::Logger;
use crate::model::Model;
use crate::training::{GradBoost, LearningRateCommand, Regularizations, Sgd, SgdTrainingMode};
use crate::utils::Parallelism;

pub struct World {
    pub feature_map: FeatureMap,
    pub product_map: ProductMap,
    pub data: Data,
    pub model: Model,
    pub regularizations: Regularizations,
    pub gradboost: GradBoost,
    pub sgd: Sgd,
    pub exploration: FeatureExploration,
    pub logger: Logger,
    pub deterministic: bool,
    j_size: u32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            feature_map: FeatureMap::new(),
            product_map: ProductMap::new(),
            data: Data::new(),
            model: Model::new(),
            regularizations: Regularizations::default(),
            gradboost: GradBoost::new(),
            sgd: Sgd::new(),
            exploration: FeatureExploration::default(),
            logger: Logger::new(),
            deterministic: false,
            j_size: 0,
        }
    }

    #[inline]
    pub fn parallelism(&self) -> Parallelism {
        Parallelism::from_deterministic(self.deterministic)
    }

    #[inline]
    pub fn j_size(&self) -> u32 {
        self.j_size
    }

    pub fn set_j_size(&mut self, size: u32) {
        self.j_size = size;
        self.model.set_size(size);
        self.gradboost.set_size(size);
        self.sgd.set_size(size);
    }

    /// Registers that `[first_new_j, to_j)` was just added to the product
    /// map and resizes everything that depends on the J-space size.
    pub fn add_features(&mut self, first_new_j: J, to_j: u32) {
        debug_assert!(first_new_j <= to_j);
        assert_eq!(self.product_map.len(), to_j);
        self.product_map.sync_j_to_key();
        self.data.set_dependees_row_count(to_j);
        let parallelism = self.parallelism();
        self.data.recalc_stats(to_j, parallelism);
        self.set_j_size(to_j);
        debug_assert!(self.data.dependees_in_topological_order());
    }

    /// Removes and renumbers features in every component.
    pub fn remove_and_renumber(&mut self, renumbering: &Renumbering) {
        if renumbering.is_noop() {
            return;
        }
        let parallelism = self.parallelism();
        self.j_size = renumbering.next_j();
        self.data.remove_and_renumber_js(renumbering, parallelism);
        self.gradboost.remove_and_renumber_js(renumbering);
        self.model.remove_and_renumber_js(renumbering);
        self.sgd.set_size(self.j_size);
        self.product_map.renumber(renumbering);
        // Cached w·x values still include the removed weights.
        self.model.synced_with_weights = false;
        debug_assert!(self.data.dependees_in_topological_order());
    }

    /// Refreshes `w·x` caches, losses and the iteration log if the model is
    /// out of sync.
    pub fn sync_model(&mut self) {
        let parallelism = self.parallelism();
        let World {
            gradboost,
            data,
            model,
            regularizations,
            logger,
            ..
        } = self;
        gradboost.sync_model_with_weights(data, model, regularizations, logger, parallelism);
    }

    /// Runs `iterations` batch passes.
    pub fn fit_model_weights(&mut self, iterations: u32) {
        let parallelism = self.parallelism();
        let World {
            gradboost,
            data,
            model,
            regularizations,
            logger,
            ..
        } = self;
        for _ in 0..iterations {
            gradboost.make_one_pass(data, model, regularizations, logger, parallelism);
        }
    }

    /// Runs `iterations` SGD passes; a no-op if SGD is not configured.
    pub fn run_sgd(&mut self, iterations: u32, only_new_features: bool) {
        if !self.sgd.is_training_valid(&self.data) {
            return;
        }
        self.sgd.set_training_mode(if only_new_features {
            SgdTrainingMode::NewFeatures
        } else {
            SgdTrainingMode::AllFeatures
        });
        let parallelism = self.parallelism();
        let World {
            sgd,
            data,
            model,
            regularizations,
            ..
        } = self;
        for _ in 0..iterations {
            sgd.make_one_pass(data, model, regularizations, parallelism);
        }
    }

    /// Learning-rate subcommands need a current total loss, so the model is
    /// synced first.
    pub fn sgd_learning_rate_command(&mut self, command: &LearningRateCommand) {
        self.sync_model();
        let World {
            sgd, model, logger, ..
        } = self;
        sgd.run_command(command, model, logger);
    }

    /// Atomic feature names making up product `j`. Maps must be synced.
    pub fn j_to_product_names(&self, j: J) -> Vec<String> {
        self.product_map.j_to_key(j).factor_names(&self.feature_map)
    }
}
