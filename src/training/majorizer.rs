//! Quadratic majorants of the logistic loss.
//!
//! For each coordinate, the logistic loss summed over rows is bounded above
//! by a quadratic tangent at the current weight (the Jaakkola-Jordan
//! bound). Row contributions are additive, so per-thread partial majorizers
//! can be folded into one per-J majorizer and minimized coordinate-wise.

use crate::data::Stats;
use crate::features::{Renumbering, J};
use crate::logging::{GradBoostUpdateRecord, LogLine, Logger};
use crate::model::Model;
use crate::training::Regularizations;
use crate::utils::{sign, split_evenly, Parallelism, DEFAULT_WORKERS};

// =============================================================================
// Dim1Majorizer
// =============================================================================

/// One-dimensional quadratic majorizer
/// `f(w) = (a/4 + L2) w^2 + (b - a*w0)/2 w + L1 |w| + c`.
///
/// `L1`, `L2` and `w0` are stored externally and passed to the relevant
/// methods; the constant `c` is irrelevant to minimization and omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Dim1Majorizer {
    a: f64,
    b: f64,
}

impl Dim1Majorizer {
    #[inline]
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    #[inline]
    pub fn set_zero(&mut self) {
        self.a = 0.0;
        self.b = 0.0;
    }

    #[inline]
    pub fn add(&mut self, that: Dim1Majorizer) {
        self.a += that.a;
        self.b += that.b;
    }

    /// Arg-min of the majorant around `w0`.
    ///
    /// `inertia` is the momentum term `inertia_factor * delta_w_prev`; it is
    /// added before L1 soft-thresholding, under the simplifying assumption
    /// that its curvature equals this coordinate's.
    pub fn minimum(
        &self,
        regularizations: &Regularizations,
        w0: f64,
        inertia: f64,
        step_multiplier: f64,
        rows_with_j: u64,
    ) -> f64 {
        let aj = self.a + regularizations.l2(rows_with_j, self.a) * 4.0;
        let mut bj = self.a * w0 - step_multiplier * self.b + inertia * aj;
        let l1 = regularizations.l1(rows_with_j, w0, self.a);
        if bj > 0.0 {
            bj = (bj - l1 * 2.0).max(0.0);
        } else {
            bj = (bj + l1 * 2.0).min(0.0);
        }
        if aj == 0.0 {
            debug_assert_eq!(bj, 0.0);
            return 0.0;
        }
        bj / aj
    }

    /// Curvature-based precision estimate: `a/2 + 2 L2`.
    pub fn precision(&self, regularizations: &Regularizations, rows_with_j: u64) -> f64 {
        self.a / 2.0 + regularizations.l2(rows_with_j, self.a) * 2.0
    }

    /// `f'(w0)` of the unregularized majorant.
    #[inline]
    pub fn derivative_at_w0(&self) -> f64 {
        self.b / 2.0
    }

    #[inline]
    pub fn a(&self) -> f64 {
        self.a
    }
}

// =============================================================================
// Majorizer
// =============================================================================

/// Sum of [`Dim1Majorizer`]s per coordinate over a set of rows, plus the
/// exact log loss of those rows at the expansion point.
#[derive(Debug, Clone, Default)]
pub struct Majorizer {
    of_j: Vec<Dim1Majorizer>,
    log_loss: f64,
    edge_visits: u64,
}

impl Majorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(feature_count: u32) -> Self {
        Self {
            of_j: vec![Dim1Majorizer::default(); feature_count as usize],
            log_loss: 0.0,
            edge_visits: 0,
        }
    }

    pub fn set_size(&mut self, size: u32) {
        self.of_j.resize(size as usize, Dim1Majorizer::default());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.of_j.len()
    }

    pub fn is_empty(&self) -> bool {
        self.of_j.is_empty()
    }

    pub fn set_zero(&mut self) {
        for d1m in &mut self.of_j {
            d1m.set_zero();
        }
        self.log_loss = 0.0;
        self.edge_visits = 0;
    }

    #[inline]
    pub fn add(&mut self, j: J, dim_1_majorizer: Dim1Majorizer) {
        self.of_j[j as usize].add(dim_1_majorizer);
    }

    #[inline]
    pub fn add_log_loss(&mut self, delta: f64) {
        self.log_loss += delta;
    }

    #[inline]
    pub fn add_edge_visits(&mut self, delta: u64) {
        self.edge_visits += delta;
    }

    #[inline]
    pub fn log_loss(&self) -> f64 {
        self.log_loss
    }

    #[inline]
    pub fn edge_visits(&self) -> u64 {
        self.edge_visits
    }

    #[inline]
    pub fn dim1(&self, j: J) -> &Dim1Majorizer {
        &self.of_j[j as usize]
    }

    /// Regularization part of the total loss at the model's current
    /// weights.
    pub fn regularization_loss(
        &self,
        regularizations: &Regularizations,
        model: &Model,
        stats: &Stats,
    ) -> f64 {
        let mut loss = 0.0;
        for j in 0..model.w.len() {
            let w = model.w[j];
            let rows_with_j = stats.row_count_with_j(j as J);
            let a = self.of_j[j].a();
            loss += regularizations.l1(rows_with_j, w, a) * w.abs();
            loss += regularizations.l2(rows_with_j, a) * w * w;
        }
        loss
    }

    /// One coordinate-wise update of every weight, with undo and inertia
    /// restart.
    ///
    /// Requires the model to be synced; leaves it unsynced (the caller
    /// re-syncs to refresh `w·x` and losses).
    pub fn update_minimum(
        &self,
        regularizations: &Regularizations,
        inertia_factor: f64,
        step_multiplier: f64,
        stats: &Stats,
        allow_undo: bool,
        model: &mut Model,
        logger: &Logger,
    ) {
        assert_eq!(self.of_j.len(), model.size() as usize);
        assert!(model.synced_with_weights);
        model.synced_with_weights = false;
        model.iteration_no += 1;

        let mut record = GradBoostUpdateRecord::default();

        let total_loss =
            self.log_loss + self.regularization_loss(regularizations, model, stats);
        if allow_undo && total_loss > model.prev_total_loss {
            tracing::info!(
                "undo: total loss increased {} -> {}",
                model.prev_total_loss,
                total_loss
            );
            record.undo_iteration = true;
            // Next step is unconditionally accepted.
            model.prev_total_loss = f64::INFINITY;
            for j in 0..self.of_j.len() {
                model.w[j] -= model.delta_w[j];
                model.delta_w[j] = 0.0;
            }
            logger.add_to_logs(LogLine::GradBoostUpdate(record));
            return;
        }

        // Scalar product of the loss gradient at w0 with the step taken.
        let mut dot_dloss_delta_w = 0.0;
        let mut dloss_squared = 0.0;
        let mut delta_w_squared = 0.0;
        for j in 0..self.of_j.len() {
            // The majorizer was built at model.w[j], unchanged since.
            let rows_with_j = stats.row_count_with_j(j as J);
            let w0 = model.w[j];
            let new_w = self.of_j[j].minimum(
                regularizations,
                w0,
                inertia_factor * model.delta_w[j],
                step_multiplier,
                rows_with_j,
            );
            model.precision[j] = self.of_j[j].precision(regularizations, rows_with_j);
            model.delta_w[j] = new_w - w0;
            model.w[j] = new_w;
            dot_dloss_delta_w += model.loss_derivative[j] * model.delta_w[j];
            dloss_squared += model.loss_derivative[j] * model.loss_derivative[j];
            delta_w_squared += model.delta_w[j] * model.delta_w[j];
        }
        record.dot_loss_derivative_vs_delta_weight = Some(dot_dloss_delta_w);
        let denominator = (dloss_squared * delta_w_squared).sqrt();
        if denominator != 0.0 {
            record.cos_angle_loss_derivative_vs_delta_weight =
                Some(dot_dloss_delta_w / denominator);
        }

        // Without inertia the gradient at w0 always opposes the step. A
        // positive product means the inertia push overrode the gradient
        // direction; drop the step and the accumulated momentum.
        if dot_dloss_delta_w > 0.0 {
            record.restart_iteration = true;
            tracing::info!("restart: gradient-step product {}", dot_dloss_delta_w);
            for j in 0..self.of_j.len() {
                model.w[j] -= model.delta_w[j];
                model.delta_w[j] = 0.0;
            }
        }
        logger.add_to_logs(LogLine::GradBoostUpdate(record));
    }

    /// All partial derivatives of the total loss (logistic plus
    /// regularization) at the current weights. At a zero weight inside the
    /// L1 dead-zone the subgradient is zero.
    pub fn log_loss_derivative(
        &self,
        model: &Model,
        regularizations: &Regularizations,
        stats: &Stats,
    ) -> Vec<f64> {
        assert_eq!(self.of_j.len(), model.w.len());
        let mut derivative = vec![0.0; self.of_j.len()];
        for j in 0..self.of_j.len() {
            let rows_with_j = stats.row_count_with_j(j as J);
            let a = self.of_j[j].a();
            let w = model.w[j];
            let mut lld = self.of_j[j].derivative_at_w0();
            lld += 2.0 * regularizations.l2(rows_with_j, a) * w;
            let l1 = regularizations.l1(rows_with_j, w, a);
            if w == 0.0 && lld - l1 <= 0.0 && lld + l1 >= 0.0 {
                lld = 0.0;
            } else {
                lld += l1 * sign(w);
            }
            derivative[j] = lld;
        }
        derivative
    }

    /// Overwrites this majorizer with the element-wise sum of the partials,
    /// splitting the J range across workers.
    pub fn assign_sum(&mut self, partials: &[Majorizer], parallelism: Parallelism) {
        let n = self.of_j.len();
        debug_assert!(partials.iter().all(|p| p.of_j.len() == n));
        let ranges = split_evenly(n, DEFAULT_WORKERS);
        if parallelism.is_parallel() && n > 0 {
            use rayon::prelude::*;
            // Chunk boundaries match `ranges`, so indices line up.
            let mut slices: Vec<(usize, &mut [Dim1Majorizer])> = Vec::new();
            let mut rest: &mut [Dim1Majorizer] = &mut self.of_j;
            for range in &ranges {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
                slices.push((range.start, head));
                rest = tail;
            }
            slices.into_par_iter().for_each(|(base, slots)| {
                for (k, slot) in slots.iter_mut().enumerate() {
                    let mut acc = Dim1Majorizer::default();
                    for partial in partials {
                        acc.add(partial.of_j[base + k]);
                    }
                    *slot = acc;
                }
            });
        } else {
            for (j, slot) in self.of_j.iter_mut().enumerate() {
                let mut acc = Dim1Majorizer::default();
                for partial in partials {
                    acc.add(partial.of_j[j]);
                }
                *slot = acc;
            }
        }
        self.log_loss = partials.iter().map(|p| p.log_loss).sum();
        self.edge_visits = partials.iter().map(|p| p.edge_visits).sum();
    }

    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        renumbering.renumber_indices(&mut self.of_j);
    }
}

/// Per-row majorizer terms of the logistic loss at the current weights.
///
/// Returns `(a, b, log_loss)` where `a = A * ||x||^2`,
/// `b = (A * wxy - 1) * y` and `A = (e^wxy - 1) / ((e^wxy + 1) wxy)`, with
/// `A = 1/2` as the stable limit at small `|wxy|`.
pub(crate) fn row_majorizer_terms(wx: f64, y: f64, row_l2_squared: f64) -> (f64, f64, f64) {
    let wxy = wx * y;
    let exp_wxy = wxy.exp();
    let a_coefficient = if wxy.abs() < 1e-10 {
        0.5
    } else {
        (exp_wxy - 1.0) / ((exp_wxy + 1.0) * wxy)
    };
    let a = a_coefficient * row_l2_squared;
    let b = (a_coefficient * wxy - 1.0) * y;
    let log_loss = (1.0 + exp_wxy).ln() - wxy;
    (a, b, log_loss)
}
