//! Bounded row shards and shard sets.

use crate::data::{CsrMatrix, RowExtender, Stats};
use crate::features::{Renumbering, INVALID_ROW_ID, J};
use crate::utils::{split_evenly, Parallelism, DEFAULT_WORKERS};

/// Default cap on non-zero entries per shard.
pub const DEFAULT_MAX_SHARD_SIZE: u32 = 1 << 20;

// =============================================================================
// Shard
// =============================================================================

/// A bounded slice of the data set: rows as a CSR plus parallel label,
/// row-id and optional user-id columns. Immutable after build.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    rows: CsrMatrix,
    ys: Vec<f64>,
    ids: Vec<u32>,
    user_ids: Vec<u64>,
}

impl Shard {
    pub fn new() -> Self {
        Self {
            rows: CsrMatrix::new(),
            ..Default::default()
        }
    }

    pub fn add_row(&mut self, js: &[J], y: f64, id: u32) {
        assert_ne!(id, INVALID_ROW_ID, "row id space exhausted (2^32-1 rows)");
        self.rows.add_row(js);
        self.ys.push(y);
        self.ids.push(id);
    }

    /// Attaches a user id to the most recently added row.
    pub fn add_user_id(&mut self, user_id: u64) {
        assert_eq!(self.user_ids.len(), self.row_count() as usize - 1);
        self.user_ids.push(user_id);
    }

    #[inline]
    pub fn row_count(&self) -> u32 {
        debug_assert_eq!(self.ys.len(), self.rows.row_count() as usize);
        self.ys.len() as u32
    }

    /// Total non-zero entries.
    #[inline]
    pub fn xjbool_count(&self) -> u64 {
        self.rows.nonzeros_count()
    }

    #[inline]
    pub fn row(&self, i: u32) -> &[J] {
        self.rows.row(i)
    }

    #[inline]
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// User ids; panics unless every row carried one.
    pub fn user_ids(&self) -> &[u64] {
        assert_eq!(self.user_ids.len(), self.row_count() as usize);
        &self.user_ids
    }

    pub fn has_user_ids(&self) -> bool {
        self.user_ids.len() == self.row_count() as usize && !self.ys.is_empty()
    }

    /// Loads row `i` into the extender.
    #[inline]
    pub fn reset_extender(&self, i: u32, extender: &mut RowExtender<'_>) {
        extender.reset_row(self.rows.row(i), self.ys[i as usize], self.ids[i as usize]);
    }

    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        self.rows.remove_and_renumber_js(renumbering);
    }
}

// =============================================================================
// ShardBuilder
// =============================================================================

/// Accumulates rows into shards, rolling over when a shard's non-zero count
/// would exceed the cap. The first row of a fresh shard is accepted even if
/// it alone exceeds the cap.
#[derive(Debug)]
pub struct ShardBuilder {
    max_size: u32,
    shards: Vec<Shard>,
}

impl ShardBuilder {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size,
            shards: Vec::new(),
        }
    }

    pub fn add_row(&mut self, js: &[J], y: f64, id: u32) {
        let needs_new = match self.shards.last() {
            None => true,
            Some(shard) => {
                shard.xjbool_count() > 0
                    && shard.xjbool_count() + js.len() as u64 > u64::from(self.max_size)
            }
        };
        if needs_new {
            self.shards.push(Shard::new());
        }
        self.shards.last_mut().unwrap().add_row(js, y, id);
    }

    pub fn add_user_id(&mut self, user_id: u64) {
        self.shards.last_mut().unwrap().add_user_id(user_id);
    }

    pub fn into_shards(self) -> Vec<Shard> {
        self.shards
    }
}

// =============================================================================
// ShardSet
// =============================================================================

/// A training or holdout set: disjoint shards plus aggregate [`Stats`].
#[derive(Debug)]
pub struct ShardSet {
    shards: Vec<Shard>,
    data_files_bool_feature_count: u64,
    max_shard_size: u32,
    stats: Stats,
}

impl Default for ShardSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardSet {
    pub fn new() -> Self {
        Self {
            shards: Vec::new(),
            data_files_bool_feature_count: 0,
            max_shard_size: DEFAULT_MAX_SHARD_SIZE,
            stats: Stats::new(0),
        }
    }

    #[inline]
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn set_max_shard_size(&mut self, max_shard_size: u32) {
        self.max_shard_size = max_shard_size;
    }

    pub fn max_shard_size(&self) -> u32 {
        self.max_shard_size
    }

    /// Absorbs shards produced by a builder, e.g. one input file's worth.
    pub fn absorb(&mut self, bool_feature_count: u64, shards: Vec<Shard>) {
        self.shards.extend(shards);
        self.data_files_bool_feature_count += bool_feature_count;
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn xjbool_count(&self) -> u64 {
        self.shards.iter().map(Shard::xjbool_count).sum()
    }

    pub fn xjbool_count_of_j(&self, j: J) -> u64 {
        self.stats.row_count_with_j(j)
    }

    /// Rebuilds stats with a parallel pass over shards, extending every row
    /// under `dependees`. Worker partials are summed into the canonical
    /// stats in shard-chunk order, so the result is deterministic.
    pub fn recalc_stats(
        &mut self,
        new_size: u32,
        dependees: &CsrMatrix,
        parallelism: Parallelism,
    ) {
        let chunks = split_evenly(self.shards.len(), DEFAULT_WORKERS);
        let shards = &self.shards;
        let partials: Vec<Stats> = parallelism.maybe_par_map(chunks, |range| {
            let mut stats = Stats::new(new_size);
            let mut extender = RowExtender::new(dependees);
            for shard in &shards[range] {
                for i in 0..shard.row_count() {
                    shard.reset_extender(i, &mut extender);
                    stats.add_row(&extender);
                }
            }
            stats
        });
        self.stats.reset(new_size);
        for partial in &partials {
            self.stats.add(partial);
        }
    }

    pub fn remove_and_renumber_js(
        &mut self,
        renumbering: &Renumbering,
        parallelism: Parallelism,
    ) {
        parallelism.maybe_par_for_each(&mut self.shards, |shard: &mut Shard| {
            shard.remove_and_renumber_js(renumbering);
        });
        self.stats.remove_and_renumber_js(renumbering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rolls_over_at_cap() {
        let mut builder = ShardBuilder::new(4);
        builder.add_row(&[0, 1], 1.0, 0);
        builder.add_row(&[2, 3], -1.0, 1); // fills the shard exactly
        builder.add_row(&[4], 1.0, 2); // would exceed: new shard
        let shards = builder.into_shards();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].row_count(), 2);
        assert_eq!(shards[1].row_count(), 1);
    }

    #[test]
    fn oversized_first_row_is_accepted() {
        let mut builder = ShardBuilder::new(2);
        builder.add_row(&[0, 1, 2, 3, 4], 1.0, 0);
        builder.add_row(&[5], -1.0, 1);
        let shards = builder.into_shards();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].xjbool_count(), 5);
    }

    #[test]
    fn empty_rows_do_not_roll_over() {
        let mut builder = ShardBuilder::new(2);
        builder.add_row(&[], 1.0, 0);
        builder.add_row(&[], -1.0, 1);
        builder.add_row(&[0, 1], 1.0, 2);
        assert_eq!(builder.into_shards().len(), 1);
    }

    #[test]
    fn recalc_stats_counts_extended_rows() {
        let mut set = ShardSet::new();
        let mut builder = ShardBuilder::new(1 << 20);
        builder.add_row(&[0, 1], 1.0, 0);
        builder.add_row(&[0], -1.0, 1);
        set.absorb(3, builder.into_shards());

        // 2 = cross of 0 and 1.
        let mut dependees = CsrMatrix::new();
        dependees.add_row(&[2]);
        dependees.add_row(&[2]);
        dependees.add_row(&[]);

        set.recalc_stats(3, &dependees, Parallelism::Sequential);
        assert_eq!(set.stats().positive(2), 1);
        assert_eq!(set.stats().negative(2), 0);
        assert_eq!(set.stats().row_count(), 2);
        assert_eq!(set.xjbool_count_of_j(0), 2);
    }

    #[test]
    fn user_ids_track_rows() {
        let mut shard = Shard::new();
        shard.add_row(&[0], 1.0, 0);
        shard.add_user_id(42);
        shard.add_row(&[1], -1.0, 1);
        shard.add_user_id(43);
        assert_eq!(shard.user_ids(), &[42, 43]);
        assert!(shard.has_user_ids());
    }
}
