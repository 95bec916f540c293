//! Per-J presence statistics split by label.

use crate::data::RowExtender;
use crate::features::{Renumbering, J};
use crate::utils::hash64;

/// Per-J counts of rows containing the feature, split by label, plus an
/// XOR hash of the contributing row ids used for determinism checks.
#[derive(Debug, Clone)]
pub struct Stats {
    positive_row_count: u64,
    negative_row_count: u64,
    positive: Vec<u64>,
    negative: Vec<u64>,
    hash: Vec<u64>,
}

/// 2x2 contingency table of one feature against the label.
///
/// Index convention: `n_xy[x][y]` where `x` is feature presence and `y` is
/// label positivity.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationTable {
    pub n: u64,
    pub n_x: [u64; 2],
    pub n_y: [u64; 2],
    pub n_xy: [[u64; 2]; 2],
}

impl CorrelationTable {
    pub fn mutual_information(&self) -> f64 {
        debug_assert!(self.n > 0);
        let n = self.n as f64;
        let mut ret = 0.0;
        for x in 0..2 {
            for y in 0..2 {
                let p_xy = self.n_xy[x][y] as f64 / n;
                let p_x = self.n_x[x] as f64 / n;
                let p_y = self.n_y[y] as f64 / n;
                if p_xy != 0.0 {
                    ret += p_xy * (p_xy / (p_x * p_y)).ln();
                }
            }
        }
        ret
    }

    pub fn phi_coefficient(&self) -> f64 {
        let den =
            (self.n_x[0] * self.n_x[1]) as f64 * (self.n_y[0] * self.n_y[1]) as f64;
        if den == 0.0 {
            return 0.0;
        }
        let nom = (self.n_xy[1][1] * self.n_xy[0][0]) as f64
            - (self.n_xy[1][0] * self.n_xy[0][1]) as f64;
        nom / den.sqrt()
    }
}

impl Stats {
    pub fn new(size: u32) -> Self {
        Self {
            positive_row_count: 0,
            negative_row_count: 0,
            positive: vec![0; size as usize],
            negative: vec![0; size as usize],
            hash: vec![0; size as usize],
        }
    }

    pub fn size(&self) -> u32 {
        debug_assert_eq!(self.positive.len(), self.hash.len());
        debug_assert_eq!(self.negative.len(), self.hash.len());
        self.hash.len() as u32
    }

    pub fn reset(&mut self, new_size: u32) {
        *self = Stats::new(new_size);
    }

    /// Accumulates another partial stats object of the same size.
    pub fn add(&mut self, src: &Stats) {
        assert_eq!(src.size(), self.size());
        self.positive_row_count += src.positive_row_count;
        self.negative_row_count += src.negative_row_count;
        for j in 0..self.positive.len() {
            self.positive[j] += src.positive[j];
            self.negative[j] += src.negative[j];
            self.hash[j] ^= src.hash[j];
        }
    }

    /// Accounts an extended row.
    pub fn add_row(&mut self, row: &RowExtender<'_>) {
        let counts = if row.y() == 1.0 {
            self.positive_row_count += 1;
            &mut self.positive
        } else {
            self.negative_row_count += 1;
            &mut self.negative
        };
        let id_hash = hash64(u64::from(row.id()));
        for &j in row.js() {
            counts[j as usize] += 1;
            self.hash[j as usize] ^= id_hash;
        }
    }

    #[inline]
    pub fn positive(&self, j: J) -> u64 {
        self.positive[j as usize]
    }

    #[inline]
    pub fn negative(&self, j: J) -> u64 {
        self.negative[j as usize]
    }

    #[inline]
    pub fn hash(&self, j: J) -> u64 {
        self.hash[j as usize]
    }

    /// Rows (of either label) whose extended set contains `j`.
    #[inline]
    pub fn row_count_with_j(&self, j: J) -> u64 {
        self.positive(j) + self.negative(j)
    }

    #[inline]
    pub fn row_count(&self) -> u64 {
        self.positive_row_count + self.negative_row_count
    }

    #[inline]
    pub fn positive_row_count(&self) -> u64 {
        self.positive_row_count
    }

    #[inline]
    pub fn negative_row_count(&self) -> u64 {
        self.negative_row_count
    }

    /// Total materialized feature occurrences across all rows.
    pub fn materialized_xjbool_count(&self) -> u64 {
        self.positive.iter().sum::<u64>() + self.negative.iter().sum::<u64>()
    }

    pub fn correlation_table(&self, j: J) -> CorrelationTable {
        let pos = self.positive(j);
        let neg = self.negative(j);
        let n_xy = [
            [self.negative_row_count - neg, self.positive_row_count - pos],
            [neg, pos],
        ];
        let n_x = [n_xy[0][0] + n_xy[0][1], n_xy[1][0] + n_xy[1][1]];
        let n_y = [n_xy[0][0] + n_xy[1][0], n_xy[0][1] + n_xy[1][1]];
        CorrelationTable {
            n: n_x[0] + n_x[1],
            n_x,
            n_y,
            n_xy,
        }
    }

    /// Log of the positive/negative presence ratio, with zero counts clamped
    /// to one.
    pub fn log_odds(&self, j: J) -> f64 {
        let pos = (self.positive(j) as f64).max(1.0);
        let neg = (self.negative(j) as f64).max(1.0);
        (pos / neg).ln()
    }

    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        renumbering.renumber_indices(&mut self.positive);
        renumbering.renumber_indices(&mut self.negative);
        renumbering.renumber_indices(&mut self.hash);
    }
}
