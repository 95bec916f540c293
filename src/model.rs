//! The model: per-J weights and optimizer bookkeeping.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::features::{Renumbering, J};
use crate::utils::resize_dense;

/// Per-J weights plus the state both optimizers share: the previous step,
/// per-coordinate precision, the loss gradient at the current point and a
/// creation stamp distinguishing features added by the latest exploration
/// round.
///
/// `w.len()` always equals the current J-space size. `synced_with_weights`
/// flips to `false` after any write to `w` and back to `true` once the
/// cached per-row `w·x` values and losses have been recomputed.
#[derive(Debug, Clone)]
pub struct Model {
    pub precision: Array1<f64>,
    pub w: Array1<f64>,
    pub delta_w: Array1<f64>,
    pub loss_derivative: Array1<f64>,
    pub creation_time: Vec<u32>,
    pub current_creation_time: u32,
    /// Total loss achieved on the previous weights, i.e. `w - delta_w`.
    pub prev_total_loss: f64,
    pub total_loss: f64,
    pub synced_with_weights: bool,
    /// Passes over the data by any algorithm, undone or restarted ones
    /// included.
    pub iteration_no: u32,

    pub training: PerShard,
    pub holdout: PerShard,
}

/// Cached `w·x` per data row of one shard set.
#[derive(Debug, Clone, Default)]
pub struct PerShard {
    pub wxs: Vec<f64>,
}

impl PerShard {
    pub fn init(&mut self, row_count: usize) {
        self.wxs.resize(row_count, 0.0);
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self {
            precision: Array1::zeros(0),
            w: Array1::zeros(0),
            delta_w: Array1::zeros(0),
            loss_derivative: Array1::zeros(0),
            creation_time: Vec::new(),
            current_creation_time: 0,
            prev_total_loss: f64::INFINITY,
            total_loss: f64::INFINITY,
            synced_with_weights: false,
            iteration_no: 0,
            training: PerShard::default(),
            holdout: PerShard::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.w.len() as u32
    }

    /// Resizes all per-J vectors; newly added `J`s are stamped with a fresh
    /// creation time.
    pub fn set_size(&mut self, size: u32) {
        let old_size = self.w.len();
        self.current_creation_time += 1;
        resize_dense(&mut self.precision, size as usize);
        resize_dense(&mut self.w, size as usize);
        resize_dense(&mut self.delta_w, size as usize);
        resize_dense(&mut self.loss_derivative, size as usize);
        self.creation_time.resize(size as usize, 0);
        for stamp in self.creation_time.iter_mut().skip(old_size) {
            *stamp = self.current_creation_time;
        }
    }

    pub fn set_total_loss(&mut self, new_total_loss: f64) {
        self.prev_total_loss = self.total_loss;
        self.total_loss = new_total_loss;
    }

    pub fn init_per_shards(&mut self, training_rows: usize, holdout_rows: usize) {
        self.training.init(training_rows);
        self.holdout.init(holdout_rows);
    }

    /// Whether `j` was added by the most recent structural change.
    #[inline]
    pub fn is_feature_new(&self, j: J) -> bool {
        self.creation_time[j as usize] == self.current_creation_time
    }

    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        renumbering.renumber_dense(&mut self.precision);
        renumbering.renumber_dense(&mut self.w);
        renumbering.renumber_dense(&mut self.delta_w);
        renumbering.renumber_dense(&mut self.loss_derivative);
        renumbering.renumber_indices(&mut self.creation_time);
    }

    /// Full dump of the model's internal state for debug logging.
    pub fn internals(&self) -> ModelInternals {
        ModelInternals {
            precision: self.precision.to_vec(),
            w: self.w.to_vec(),
            delta_w: self.delta_w.to_vec(),
            loss_derivative: self.loss_derivative.to_vec(),
            creation_time: self.creation_time.clone(),
            current_creation_time: self.current_creation_time,
            prev_total_loss: finite_or_none(self.prev_total_loss),
            total_loss: finite_or_none(self.total_loss),
            synced_with_weights: self.synced_with_weights,
            iteration_no: self.iteration_no,
        }
    }
}

/// Serializable snapshot of [`Model`]'s per-J state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInternals {
    pub precision: Vec<f64>,
    pub w: Vec<f64>,
    pub delta_w: Vec<f64>,
    pub loss_derivative: Vec<f64>,
    pub creation_time: Vec<u32>,
    pub current_creation_time: u32,
    pub prev_total_loss: Option<f64>,
    pub total_loss: Option<f64>,
    pub synced_with_weights: bool,
    pub iteration_no: u32,
}

/// JSON has no encoding for non-finite doubles; drop them to `None`.
pub fn finite_or_none(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_size_stamps_new_features() {
        let mut model = Model::new();
        model.set_size(2);
        model.set_size(4);
        assert_eq!(model.size(), 4);
        assert!(!model.is_feature_new(0));
        assert!(model.is_feature_new(2));
        assert!(model.is_feature_new(3));
    }

    #[test]
    fn set_total_loss_latches_previous() {
        let mut model = Model::new();
        model.set_total_loss(5.0);
        assert!(model.prev_total_loss.is_infinite());
        model.set_total_loss(3.0);
        assert_eq!(model.prev_total_loss, 5.0);
        assert_eq!(model.total_loss, 3.0);
    }

    #[test]
    fn renumbering_moves_weights() {
        let mut model = Model::new();
        model.set_size(3);
        model.w[0] = 1.0;
        model.w[1] = 2.0;
        model.w[2] = 3.0;
        let r = Renumbering::remove_js(&[false, true, false]);
        model.remove_and_renumber_js(&r);
        assert_eq!(model.size(), 2);
        assert_eq!(model.w[0], 1.0);
        assert_eq!(model.w[1], 3.0);
        assert_eq!(model.creation_time.len(), 2);
    }
}
