//! Sparse data storage: CSR matrices, shards, stats and the dependees graph.
//!
//! Rows are stored as sorted `J` lists inside bounded [`Shard`]s; the
//! [`CsrMatrix`] `dependees` maps each `J` to the cross features it
//! contributes to, letting [`RowExtender`] materialize crosses lazily per
//! row instead of storing them.

mod csr;
mod extender;
mod shard;
mod stats;

pub use csr::{CooMatrix, CsrMatrix};
pub use extender::RowExtender;
pub use shard::{Shard, ShardBuilder, ShardSet, DEFAULT_MAX_SHARD_SIZE};
pub use stats::{CorrelationTable, Stats};

use crate::features::{Renumbering, J};
use crate::utils::Parallelism;

/// The engine's data: training and holdout shard sets plus the shared
/// dependees graph.
#[derive(Debug, Default)]
pub struct Data {
    training: ShardSet,
    holdout: ShardSet,
    dependees: CsrMatrix,
}

impl Data {
    pub fn new() -> Self {
        Self {
            training: ShardSet::new(),
            holdout: ShardSet::new(),
            dependees: CsrMatrix::new(),
        }
    }

    pub fn set_max_shard_size(&mut self, max_shard_size: u32) {
        self.training.set_max_shard_size(max_shard_size);
        self.holdout.set_max_shard_size(max_shard_size);
    }

    #[inline]
    pub fn training(&self) -> &ShardSet {
        &self.training
    }

    #[inline]
    pub fn holdout(&self) -> &ShardSet {
        &self.holdout
    }

    #[inline]
    pub fn training_mut(&mut self) -> &mut ShardSet {
        &mut self.training
    }

    #[inline]
    pub fn holdout_mut(&mut self) -> &mut ShardSet {
        &mut self.holdout
    }

    #[inline]
    pub fn dependees(&self) -> &CsrMatrix {
        &self.dependees
    }

    pub fn set_dependees(&mut self, dependees: CsrMatrix) {
        self.dependees = dependees;
    }

    pub fn set_dependees_row_count(&mut self, size: u32) {
        self.dependees.set_row_count(size);
    }

    pub fn recalc_stats(&mut self, j_size: u32, parallelism: Parallelism) {
        self.training
            .recalc_stats(j_size, &self.dependees, parallelism);
        self.holdout
            .recalc_stats(j_size, &self.dependees, parallelism);
    }

    pub fn xjbool_count_of_j(&self, j: J) -> u64 {
        self.training.xjbool_count_of_j(j) + self.holdout.xjbool_count_of_j(j)
    }

    /// Total materialized feature occurrences over both sets.
    pub fn materialized_xjbool_count(&self) -> u64 {
        self.training.stats().materialized_xjbool_count()
            + self.holdout.stats().materialized_xjbool_count()
    }

    pub fn remove_and_renumber_js(
        &mut self,
        renumbering: &Renumbering,
        parallelism: Parallelism,
    ) {
        self.training.remove_and_renumber_js(renumbering, parallelism);
        self.holdout.remove_and_renumber_js(renumbering, parallelism);
        if renumbering.j_to_new_j().is_empty() {
            return;
        }
        // Dependees are renumbered both in content and by row index.
        self.dependees.remove_and_renumber_js(renumbering);
        self.dependees.remove_and_renumber_rows(renumbering);
    }

    /// Every dependee edge must point from a lower to a strictly higher `J`;
    /// this is what makes the graph a DAG and the row extension terminate.
    pub fn dependees_in_topological_order(&self) -> bool {
        (0..self.dependees.row_count())
            .all(|j| self.dependees.row(j).iter().all(|&child| child > j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renumber_rewrites_dependees_rows_and_contents() {
        let mut data = Data::new();
        // J space {0,1,2}; 2 = cross of 0 and 1.
        let mut dep = CsrMatrix::new();
        dep.add_row(&[2]);
        dep.add_row(&[2]);
        dep.add_row(&[]);
        data.set_dependees(dep);
        assert!(data.dependees_in_topological_order());

        // Remove J 1 (and the cross would normally go first; here we only
        // exercise the matrix mechanics).
        let r = Renumbering::remove_js(&[false, true, true]);
        data.remove_and_renumber_js(&r, Parallelism::Sequential);
        assert_eq!(data.dependees().row_count(), 1);
        assert_eq!(data.dependees().row(0), &[] as &[J]);
        assert!(data.dependees_in_topological_order());
    }

    #[test]
    fn topological_order_violation_is_detected() {
        let mut data = Data::new();
        let mut dep = CsrMatrix::new();
        dep.add_row(&[]);
        dep.add_row(&[0]);
        data.set_dependees(dep);
        assert!(!data.dependees_in_topological_order());
    }
}
