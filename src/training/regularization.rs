//! Composite elastic-net regularization.

use serde::{Deserialize, Serialize};

/// One additive regularization contribution.
///
/// `l1_at_weight_zero` is extra L1 applied only while the weight is exactly
/// zero; it widens the soft-threshold dead-zone so zero weights stay stuck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegularizationTerm {
    #[serde(default)]
    pub l1: f64,
    #[serde(default)]
    pub l2: f64,
    #[serde(default)]
    pub l1_at_weight_zero: f64,
}

impl RegularizationTerm {
    pub fn is_zero(&self) -> bool {
        self.l1 == 0.0 && self.l2 == 0.0 && self.l1_at_weight_zero == 0.0
    }
}

/// Effective per-J L1/L2 coefficients as the sum of four contributions:
///
/// - `base`: applied unconditionally,
/// - `div_sqrt_n`: divided by `sqrt(rows_with_j + 1)`,
/// - `mul_sqrt_n`: multiplied by `sqrt(rows_with_j + 1)`,
/// - `confidence`: divided by `sqrt(majorizer_a) + epsilon`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Regularizations {
    base: RegularizationTerm,
    div_sqrt_n: RegularizationTerm,
    mul_sqrt_n: RegularizationTerm,
    confidence: RegularizationTerm,
}

impl Regularizations {
    pub fn l1(&self, rows_with_j: u64, weight: f64, majorizer_a: f64) -> f64 {
        let sqrt_n = ((rows_with_j + 1) as f64).sqrt();
        let sqrt_a = majorizer_a.sqrt() + f64::EPSILON;
        let mut ret = self.base.l1;
        ret += self.div_sqrt_n.l1 / sqrt_n;
        ret += self.mul_sqrt_n.l1 * sqrt_n;
        ret += self.confidence.l1 / sqrt_a;
        if weight == 0.0 {
            ret += self.base.l1_at_weight_zero;
            ret += self.div_sqrt_n.l1_at_weight_zero / sqrt_n;
            ret += self.mul_sqrt_n.l1_at_weight_zero * sqrt_n;
            ret += self.confidence.l1_at_weight_zero / sqrt_a;
        }
        ret
    }

    pub fn l2(&self, rows_with_j: u64, majorizer_a: f64) -> f64 {
        let sqrt_n = ((rows_with_j + 1) as f64).sqrt();
        let mut ret = self.base.l2;
        ret += self.div_sqrt_n.l2 / sqrt_n;
        ret += self.mul_sqrt_n.l2 * sqrt_n;
        ret += self.confidence.l2 / (majorizer_a.sqrt() + f64::EPSILON);
        ret
    }

    pub fn base(&self) -> &RegularizationTerm {
        &self.base
    }

    pub fn div_sqrt_n(&self) -> &RegularizationTerm {
        &self.div_sqrt_n
    }

    pub fn mul_sqrt_n(&self) -> &RegularizationTerm {
        &self.mul_sqrt_n
    }

    pub fn confidence(&self) -> &RegularizationTerm {
        &self.confidence
    }

    pub fn set_base(&mut self, term: RegularizationTerm) {
        self.base = term;
    }

    pub fn set_div_sqrt_n(&mut self, term: RegularizationTerm) {
        self.div_sqrt_n = term;
    }

    pub fn set_mul_sqrt_n(&mut self, term: RegularizationTerm) {
        self.mul_sqrt_n = term;
    }

    pub fn set_confidence(&mut self, term: RegularizationTerm) {
        self.confidence = term;
    }

    /// Anything beyond plain base L1/L2 is non-standard; SGD supports only
    /// standard regularization.
    pub fn is_non_standard(&self) -> bool {
        self.base.l1_at_weight_zero != 0.0
            || !self.div_sqrt_n.is_zero()
            || !self.mul_sqrt_n.is_zero()
            || !self.confidence.is_zero()
    }
}
