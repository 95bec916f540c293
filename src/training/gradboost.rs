//! The batch majorizer optimizer.

use ndarray::Array1;

use crate::data::{CsrMatrix, Data, RowExtender, Shard, ShardSet};
use crate::features::Renumbering;
use crate::logging::{DataSetStats, IterationRecord, LogLine, Logger, VectorStats};
use crate::model::{finite_or_none, Model};
use crate::training::majorizer::row_majorizer_terms;
use crate::training::{Dim1Majorizer, Majorizer, Regularizations};
use crate::utils::{
    l1_norm, l2_norm_squared, nonzero_count, split_evenly, Parallelism, DEFAULT_WORKERS,
};

/// Batch logistic-regression optimizer.
///
/// One pass: refresh the cached `w·x` per row and the per-J majorizers
/// (parallel over row shards, folded over J ranges), evaluate the total
/// loss, apply the coordinate update, then refresh again so the model ends
/// the pass synced.
pub struct GradBoost {
    inertia_factor: f64,
    step_multiplier: f64,
    allow_undo: bool,
    // Each majorizer is tangent at w to the log loss of its shard set; row
    // majorizers are built at the same w, so their sum is tangent to the
    // summed loss.
    training_majorizer: Majorizer,
    holdout_majorizer: Majorizer,
    last_iteration: IterationRecord,
}

impl Default for GradBoost {
    fn default() -> Self {
        Self::new()
    }
}

impl GradBoost {
    pub fn new() -> Self {
        Self {
            inertia_factor: -1.0,
            step_multiplier: -1.0,
            allow_undo: false,
            training_majorizer: Majorizer::new(),
            holdout_majorizer: Majorizer::new(),
            last_iteration: IterationRecord::default(),
        }
    }

    pub fn set_inertia_factor(&mut self, inertia_factor: f64) {
        self.inertia_factor = inertia_factor;
    }

    pub fn set_step_multiplier(&mut self, step_multiplier: f64) {
        self.step_multiplier = step_multiplier;
    }

    pub fn set_allow_undo(&mut self, allow_undo: bool) {
        self.allow_undo = allow_undo;
    }

    pub fn set_size(&mut self, feature_count: u32) {
        self.training_majorizer.set_size(feature_count);
        self.holdout_majorizer.set_size(feature_count);
    }

    pub fn last_iteration(&self) -> &IterationRecord {
        &self.last_iteration
    }

    /// Recomputes `w·x` per row and both majorizers, then the total loss
    /// and the iteration log. No-op if the model is already synced.
    pub fn sync_model_with_weights(
        &mut self,
        data: &Data,
        model: &mut Model,
        regularizations: &Regularizations,
        logger: &Logger,
        parallelism: Parallelism,
    ) {
        if model.synced_with_weights {
            return;
        }

        process_shard_set(
            data.training(),
            data.dependees(),
            &model.w,
            &mut model.training.wxs,
            &mut self.training_majorizer,
            parallelism,
        );
        process_shard_set(
            data.holdout(),
            data.dependees(),
            &model.w,
            &mut model.holdout.wxs,
            &mut self.holdout_majorizer,
            parallelism,
        );

        let total_loss = self.training_majorizer.log_loss()
            + self.training_majorizer.regularization_loss(
                regularizations,
                model,
                data.training().stats(),
            );
        model.set_total_loss(total_loss);
        model.synced_with_weights = true;

        self.add_iteration_log(data, model, regularizations, logger);
    }

    /// One training pass: sync, coordinate update, sync.
    pub fn make_one_pass(
        &mut self,
        data: &Data,
        model: &mut Model,
        regularizations: &Regularizations,
        logger: &Logger,
        parallelism: Parallelism,
    ) {
        assert!(self.inertia_factor >= 0.0, "inertia_factor not set");
        assert!(self.step_multiplier >= 0.0, "step_multiplier not set");

        self.sync_model_with_weights(data, model, regularizations, logger, parallelism);
        self.training_majorizer.update_minimum(
            regularizations,
            self.inertia_factor,
            self.step_multiplier,
            data.training().stats(),
            self.allow_undo,
            model,
            logger,
        );
        self.sync_model_with_weights(data, model, regularizations, logger, parallelism);
    }

    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        if renumbering.j_to_new_j().is_empty() {
            return;
        }
        self.training_majorizer.remove_and_renumber_js(renumbering);
        self.holdout_majorizer.remove_and_renumber_js(renumbering);
    }

    fn add_iteration_log(
        &mut self,
        data: &Data,
        model: &mut Model,
        regularizations: &Regularizations,
        logger: &Logger,
    ) {
        assert!(model.synced_with_weights);
        let mut record = IterationRecord {
            index: model.iteration_no,
            flat_materialization_ops: self.training_majorizer.edge_visits()
                + self.holdout_majorizer.edge_visits(),
            weight_stats: vector_stats(&model.w),
            delta_weight_stats: vector_stats(&model.delta_w),
            ..Default::default()
        };

        let (training_stats, dloss) = data_set_stats(
            data.training(),
            &self.training_majorizer,
            model,
            regularizations,
        );
        record.training_data_stats = training_stats;
        model.loss_derivative = Array1::from(dloss);

        if data.holdout().stats().row_count() > 0 {
            let (holdout_stats, _) = data_set_stats(
                data.holdout(),
                &self.holdout_majorizer,
                model,
                regularizations,
            );
            record.holdout_data_stats = Some(holdout_stats);
        }

        record.regularization_loss = self.training_majorizer.regularization_loss(
            regularizations,
            model,
            data.training().stats(),
        );
        record.prev_total_loss = finite_or_none(model.prev_total_loss);
        record.total_loss = finite_or_none(model.total_loss);

        self.last_iteration = record.clone();
        logger.add_to_logs(LogLine::Iteration(record));
    }
}

/// Processes every row of a shard set: writes `w·x` into `wxs` and
/// accumulates the set's majorizer. Shards are chunked across workers;
/// each worker owns a disjoint slice of `wxs` and a partial majorizer, so
/// the canonical majorizer is only written after the fold.
fn process_shard_set(
    shard_set: &ShardSet,
    dependees: &CsrMatrix,
    w: &Array1<f64>,
    wxs: &mut [f64],
    majorizer: &mut Majorizer,
    parallelism: Parallelism,
) {
    let j_size = w.len() as u32;
    let shards = shard_set.shards();
    let chunks = split_evenly(shards.len(), DEFAULT_WORKERS);

    let mut jobs: Vec<(&[Shard], &mut [f64])> = Vec::with_capacity(chunks.len());
    let mut rest = wxs;
    for range in chunks {
        let rows: usize = shards[range.clone()]
            .iter()
            .map(|s| s.row_count() as usize)
            .sum();
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(rows);
        jobs.push((&shards[range], head));
        rest = tail;
    }
    debug_assert!(rest.is_empty());

    let partials: Vec<Majorizer> = parallelism.maybe_par_map(jobs, |(shards, wxs)| {
        let mut partial = Majorizer::with_size(j_size);
        let mut extender = RowExtender::new(dependees);
        let mut offset = 0;
        for shard in shards {
            for i in 0..shard.row_count() {
                shard.reset_extender(i, &mut extender);
                partial.add_edge_visits(extender.edge_visits());
                wxs[offset] = process_one_row(&extender, w, &mut partial);
                offset += 1;
            }
        }
        partial
    });

    majorizer.set_size(j_size);
    majorizer.assign_sum(&partials, parallelism);
}

fn process_one_row(
    extender: &RowExtender<'_>,
    w: &Array1<f64>,
    majorizer: &mut Majorizer,
) -> f64 {
    let wx = extender.dot(w);
    let (a, b, log_loss) =
        row_majorizer_terms(wx, extender.y(), extender.l2_squared_norm());
    majorizer.add_log_loss(log_loss);
    for &j in extender.js() {
        majorizer.add(j, Dim1Majorizer::new(a, b));
    }
    wx
}

fn vector_stats(v: &Array1<f64>) -> VectorStats {
    VectorStats {
        size: v.len() as u64,
        l1: l1_norm(v),
        l2: l2_norm_squared(v),
        nonzero_count: nonzero_count(v),
    }
}

fn data_set_stats(
    shard_set: &ShardSet,
    majorizer: &Majorizer,
    model: &Model,
    regularizations: &Regularizations,
) -> (DataSetStats, Vec<f64>) {
    let dloss = majorizer.log_loss_derivative(model, regularizations, shard_set.stats());
    let dloss_dense = Array1::from(dloss);
    let stats = DataSetStats {
        size: shard_set.stats().row_count(),
        loss: finite_or_none(majorizer.log_loss()),
        dloss: Some(vector_stats(&dloss_dense)),
        auc: None,
        lift: Vec::new(),
    };
    (stats, dloss_dense.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{finish_world, push_training_rows, world_with_products};
    use approx::assert_relative_eq;

    /// One +1 row with only the bias feature.
    fn bias_only_world() -> crate::world::World {
        let mut world = world_with_products(&[], &[&[]]);
        push_training_rows(&mut world, &[(1.0, &[0])]);
        finish_world(&mut world);
        world
    }

    #[test]
    fn sync_computes_loss_at_zero_weights() {
        let mut world = bias_only_world();
        world.sync_model();
        assert!(world.model.synced_with_weights);
        // log(2) for a single row at w = 0.
        assert_relative_eq!(world.model.total_loss, 2f64.ln());
        assert_eq!(world.model.training.wxs, vec![0.0]);
    }

    #[test]
    fn one_pass_moves_bias_towards_positive_label() {
        let mut world = bias_only_world();
        world.fit_model_weights(1);
        // Majorizer minimum from w = 0 is exactly 2.
        assert_relative_eq!(world.model.w[0], 2.0);
        assert!(world.model.synced_with_weights);
        assert!(world.model.total_loss < 2f64.ln());
    }

    #[test]
    fn hundred_passes_converge_hard() {
        let mut world = bias_only_world();
        world.fit_model_weights(100);
        assert!(world.model.w[0] > 4.0, "w = {}", world.model.w[0]);
    }

    #[test]
    fn total_loss_is_log_loss_plus_regularization() {
        let mut world = bias_only_world();
        world
            .regularizations
            .set_base(crate::training::RegularizationTerm {
                l1: 0.0,
                l2: 0.5,
                l1_at_weight_zero: 0.0,
            });
        world.fit_model_weights(2);
        let record = world.gradboost.last_iteration().clone();
        let log_loss = record.training_data_stats.loss.unwrap();
        assert_relative_eq!(
            record.total_loss.unwrap(),
            log_loss + record.regularization_loss,
            epsilon = 1e-12
        );
    }

    #[test]
    fn deterministic_and_parallel_agree() {
        let rows: Vec<(f64, Vec<u32>)> = (0..64)
            .map(|i| {
                let y = if i % 3 == 0 { 1.0 } else { -1.0 };
                let js = if i % 2 == 0 { vec![0, 1] } else { vec![0] };
                (y, js)
            })
            .collect();
        let borrowed: Vec<(f64, &[u32])> =
            rows.iter().map(|(y, js)| (*y, js.as_slice())).collect();

        let mut run = |deterministic: bool| {
            let mut world = world_with_products(&["a"], &[&[], &[0]]);
            push_training_rows(&mut world, &borrowed);
            finish_world(&mut world);
            world.deterministic = deterministic;
            world.fit_model_weights(5);
            world.model.w.to_vec()
        };
        let sequential = run(true);
        let parallel = run(false);
        // Chunked folding fixes the summation order either way.
        assert_eq!(sequential, parallel);
    }
}
