//! Asynchronous stochastic gradient descent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::data::{Data, RowExtender, Shard};
use crate::features::J;
use crate::logging::{LogLine, Logger, MaybeReduceRecord, SgdRecord};
use crate::model::Model;
use crate::training::Regularizations;
use crate::utils::{sign, Parallelism};

/// Which weights a pass updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SgdTrainingMode {
    /// Every `J` present in a row.
    #[default]
    AllFeatures,
    /// Only `J`s stamped with the current creation time; used to tune
    /// freshly explored features without disturbing the rest.
    NewFeatures,
}

/// Learning-rate subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningRateCommand {
    /// Latch the current total loss for a later `maybe_reduce`.
    StoreTotalLoss,
    /// Multiply the start learning rate by `factor` if the loss got worse
    /// since `store_total_loss`.
    MaybeReduce { factor: f64 },
}

/// Hogwild-style logistic SGD over training shards.
///
/// Weights live in a shared vector of atomic f64 bits; per-J updates are
/// individually atomic compare-exchange loops but globally unordered, the
/// standard Hogwild trade. Sequential mode serializes shards, which makes
/// two runs bit-identical.
pub struct Sgd {
    weights: Vec<AtomicU64>,
    start_learning_rate: Option<f64>,
    decay_speed: f64,
    /// Rows processed since the schedule was (re)set; drives the decay.
    counter: AtomicU64,
    prev_total_loss: f64,
    training_mode: SgdTrainingMode,
}

impl Default for Sgd {
    fn default() -> Self {
        Self::new()
    }
}

impl Sgd {
    pub fn new() -> Self {
        Self {
            weights: Vec::new(),
            start_learning_rate: None,
            decay_speed: 0.0,
            counter: AtomicU64::new(0),
            prev_total_loss: f64::INFINITY,
            training_mode: SgdTrainingMode::AllFeatures,
        }
    }

    pub fn set_size(&mut self, size: u32) {
        self.weights = (0..size).map(|_| AtomicU64::new(0)).collect();
    }

    pub fn set_training_mode(&mut self, mode: SgdTrainingMode) {
        self.training_mode = mode;
    }

    /// Updates the schedule. Setting a new start rate resets the decay
    /// counter.
    pub fn set_learning_rate_schedule(
        &mut self,
        start_learning_rate: Option<f64>,
        decay_speed: Option<f64>,
    ) {
        if let Some(start) = start_learning_rate {
            self.start_learning_rate = Some(start);
            self.counter.store(0, Ordering::Relaxed);
        }
        if let Some(decay) = decay_speed {
            self.decay_speed = decay;
        }
    }

    pub fn start_learning_rate(&self) -> Option<f64> {
        self.start_learning_rate
    }

    pub fn is_training_valid(&self, data: &Data) -> bool {
        if self.start_learning_rate.is_none() {
            tracing::error!("start_learning_rate has not been set");
            return false;
        }
        if data.training().stats().row_count() == 0 {
            tracing::error!("missing training data");
            return false;
        }
        true
    }

    /// One pass over all training shards.
    pub fn make_one_pass(
        &mut self,
        data: &Data,
        model: &mut Model,
        regularizations: &Regularizations,
        parallelism: Parallelism,
    ) {
        assert!(
            !regularizations.is_non_standard(),
            "SGD supports standard regularization only"
        );
        assert_eq!(model.size() as usize, self.weights.len());

        for (slot, &w) in self.weights.iter().zip(model.w.iter()) {
            slot.store(w.to_bits(), Ordering::Relaxed);
        }

        let start = self.start_learning_rate.expect("learning rate not set");
        let decay = self.decay_speed;
        let total_rows = data.training().stats().row_count();
        let shard_count = data.training().shards().len() as f64;
        let l1 = regularizations.base().l1;
        let l2 = regularizations.base().l2;
        let weights = &self.weights;
        let counter = &self.counter;
        let mode = self.training_mode;
        let model_ref: &Model = model;

        parallelism.maybe_par_for_each_init(
            data.training().shards(),
            || RowExtender::new(data.dependees()),
            |extender, shard: &Shard| {
                process_shard(
                    shard, extender, weights, counter, start, decay, total_rows, mode,
                    model_ref,
                );
                // Regularization is applied once per shard, scaled down by
                // the shard count so a full pass applies it once in total.
                let learning_rate =
                    learning_rate_at(start, decay, counter, total_rows) / shard_count;
                for j in 0..weights.len() {
                    if mode == SgdTrainingMode::NewFeatures
                        && !model_ref.is_feature_new(j as J)
                    {
                        continue;
                    }
                    shrink_weight(&weights[j], l1, l2, learning_rate);
                }
            },
        );

        let processed = self.counter.load(Ordering::Relaxed);
        assert_eq!(processed % total_rows.max(1), 0);

        for (w, slot) in model.w.iter_mut().zip(&self.weights) {
            *w = f64::from_bits(slot.load(Ordering::Relaxed));
        }
        model.synced_with_weights = false;
        model.iteration_no += 1;
    }

    /// Executes a learning-rate subcommand. The caller must have synced the
    /// model so `total_loss` is current.
    pub fn run_command(
        &mut self,
        command: &LearningRateCommand,
        model: &Model,
        logger: &Logger,
    ) {
        match command {
            LearningRateCommand::StoreTotalLoss => {
                assert!(model.synced_with_weights);
                self.prev_total_loss = model.total_loss;
            }
            LearningRateCommand::MaybeReduce { factor } => {
                assert!(
                    self.prev_total_loss.is_finite(),
                    "maybe_reduce without a prior store_total_loss"
                );
                let mut record = MaybeReduceRecord {
                    previous_total_loss: self.prev_total_loss,
                    current_total_loss: model.total_loss,
                    previous_learning_rate: None,
                    current_learning_rate: None,
                };
                if self.prev_total_loss < model.total_loss {
                    let previous = self.start_learning_rate.expect("learning rate not set");
                    let current = previous * factor;
                    self.start_learning_rate = Some(current);
                    record.previous_learning_rate = Some(previous);
                    record.current_learning_rate = Some(current);
                }
                logger.add_to_logs(LogLine::Sgd(SgdRecord {
                    maybe_reduce: Some(record),
                }));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_shard(
    shard: &Shard,
    extender: &mut RowExtender<'_>,
    weights: &[AtomicU64],
    counter: &AtomicU64,
    start: f64,
    decay: f64,
    total_rows: u64,
    mode: SgdTrainingMode,
    model: &Model,
) {
    for i in 0..shard.row_count() {
        shard.reset_extender(i, extender);
        let learning_rate = learning_rate_at(start, decay, counter, total_rows);
        let y = extender.y();
        let wx = atomic_dot(extender.js(), weights);
        let sigmoid = 1.0 / (1.0 + (wx * y).exp());
        let delta = learning_rate * y * sigmoid;
        for &j in extender.js() {
            if mode == SgdTrainingMode::NewFeatures && !model.is_feature_new(j) {
                continue;
            }
            add_to_atomic(&weights[j as usize], delta);
        }
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// `eta(t) = start / (1 + decay * progress)` where progress is full passes
/// over the training rows.
fn learning_rate_at(start: f64, decay: f64, counter: &AtomicU64, total_rows: u64) -> f64 {
    let progress = counter.load(Ordering::Relaxed) as f64 / total_rows.max(1) as f64;
    start / (1.0 + decay * progress)
}

fn atomic_dot(js: &[J], weights: &[AtomicU64]) -> f64 {
    let mut dot = 0.0;
    for &j in js {
        dot += f64::from_bits(weights[j as usize].load(Ordering::Relaxed));
    }
    dot
}

fn add_to_atomic(slot: &AtomicU64, delta: f64) {
    let mut old = slot.load(Ordering::Relaxed);
    loop {
        let new = f64::from_bits(old) + delta;
        match slot.compare_exchange_weak(old, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(observed) => old = observed,
        }
    }
}

/// Proximal L1/L2 step: `w -= eta (L1 sign(w) + 2 L2 w)`, clipped to zero
/// when the L1 pull crosses the origin.
fn shrink_weight(slot: &AtomicU64, l1: f64, l2: f64, learning_rate: f64) {
    let mut old = slot.load(Ordering::Relaxed);
    loop {
        let old_value = f64::from_bits(old);
        let delta = (l1 * sign(old_value) + 2.0 * l2 * old_value) * learning_rate;
        let mut new_value = old_value - delta;
        if sign(old_value) != sign(new_value) {
            new_value = 0.0;
        }
        match slot.compare_exchange_weak(
            old,
            new_value.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(observed) => old = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{finish_world, push_training_rows, world_with_products};
    use approx::assert_relative_eq;

    #[test]
    fn single_row_single_step() {
        // One +1 row with bias only; eta = 1 at w = 0 moves w by sigma(0).
        let mut world = world_with_products(&[], &[&[]]);
        push_training_rows(&mut world, &[(1.0, &[0])]);
        finish_world(&mut world);
        world.deterministic = true;
        world.sgd.set_learning_rate_schedule(Some(1.0), Some(0.0));
        world.run_sgd(1, false);
        assert_relative_eq!(world.model.w[0], 0.5);
        assert!(!world.model.synced_with_weights);
    }

    #[test]
    fn decay_reduces_later_steps() {
        let mut world = world_with_products(&[], &[&[]]);
        push_training_rows(&mut world, &[(1.0, &[0])]);
        finish_world(&mut world);
        world.deterministic = true;
        world.sgd.set_learning_rate_schedule(Some(1.0), Some(1.0));
        // Pass 1: progress 0, eta = 1, w = 0.5.
        // Pass 2: progress 1, eta = 0.5, w = 0.5 + 0.5 * sigma(-0.5).
        world.run_sgd(2, false);
        let sigma = 1.0 / (1.0 + 0.5f64.exp());
        assert_relative_eq!(world.model.w[0], 0.5 + 0.5 * sigma, epsilon = 1e-12);
    }

    #[test]
    fn l1_shrinkage_clips_at_zero() {
        let slot = AtomicU64::new(0.05f64.to_bits());
        shrink_weight(&slot, 1.0, 0.0, 0.1);
        assert_eq!(f64::from_bits(slot.load(Ordering::Relaxed)), 0.0);
    }

    #[test]
    fn l2_shrinkage_scales_weight() {
        let slot = AtomicU64::new(1.0f64.to_bits());
        shrink_weight(&slot, 0.0, 0.5, 0.1);
        assert_relative_eq!(f64::from_bits(slot.load(Ordering::Relaxed)), 0.9);
    }

    #[test]
    fn new_features_mode_freezes_old_weights() {
        let mut world = world_with_products(&["a"], &[&[], &[0]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1])]);
        finish_world(&mut world);
        // A second structural change bumps the creation time; now nothing
        // is "new", so a NEW_FEATURES pass must not move any weight.
        world.model.set_size(2);
        world.model.current_creation_time += 1;
        world.deterministic = true;
        world.sgd.set_learning_rate_schedule(Some(1.0), Some(0.0));
        world.run_sgd(1, true);
        assert_eq!(world.model.w[0], 0.0);
        assert_eq!(world.model.w[1], 0.0);
    }

    #[test]
    fn maybe_reduce_halves_once_on_regression() {
        let mut world = world_with_products(&["a"], &[&[], &[0]]);
        push_training_rows(&mut world, &[(1.0, &[0, 1]), (-1.0, &[0, 1])]);
        finish_world(&mut world);
        world.deterministic = true;
        world.sgd.set_learning_rate_schedule(Some(10.0), Some(0.0));

        // Contradictory rows: w = 0 is optimal, so a huge step only hurts.
        world.sync_model();
        world
            .sgd_learning_rate_command(&LearningRateCommand::StoreTotalLoss);
        world.run_sgd(1, false);
        world.sync_model();
        world.sgd_learning_rate_command(&LearningRateCommand::MaybeReduce {
            factor: 0.5,
        });
        assert_eq!(world.sgd.start_learning_rate(), Some(5.0));
    }

    #[test]
    fn maybe_reduce_keeps_rate_when_loss_improved() {
        let mut world = world_with_products(&[], &[&[]]);
        push_training_rows(&mut world, &[(1.0, &[0])]);
        finish_world(&mut world);
        world.deterministic = true;
        world.sgd.set_learning_rate_schedule(Some(0.5), Some(0.0));

        world.sync_model();
        world.sgd_learning_rate_command(&LearningRateCommand::StoreTotalLoss);
        // A separable single row: every SGD step improves the loss.
        world.run_sgd(2, false);
        world.sgd_learning_rate_command(&LearningRateCommand::MaybeReduce {
            factor: 0.5,
        });
        assert_eq!(world.sgd.start_learning_rate(), Some(0.5));
    }

    #[test]
    fn sequential_runs_are_bit_identical() {
        let rows: Vec<(f64, Vec<u32>)> = (0..32)
            .map(|i| {
                let y = if i % 5 < 2 { 1.0 } else { -1.0 };
                (y, if i % 2 == 0 { vec![0, 1] } else { vec![0] })
            })
            .collect();
        let borrowed: Vec<(f64, &[u32])> =
            rows.iter().map(|(y, js)| (*y, js.as_slice())).collect();
        let mut run = || {
            let mut world = world_with_products(&["a"], &[&[], &[0]]);
            push_training_rows(&mut world, &borrowed);
            finish_world(&mut world);
            world.deterministic = true;
            world.sgd.set_learning_rate_schedule(Some(0.3), Some(2.0));
            world.run_sgd(7, false);
            world.model.w.to_vec()
        };
        let first = run();
        let second = run();
        assert_eq!(
            first.iter().map(|w| w.to_bits()).collect::<Vec<_>>(),
            second.iter().map(|w| w.to_bits()).collect::<Vec<_>>()
        );
    }
}
