//! Lazy materialization of cross features in a sparse row.

use std::collections::HashMap;

use crate::data::CsrMatrix;
use crate::features::J;

/// Expands a sparse row to its closure under the dependees graph.
///
/// The dependees CSR has one row per `J` listing the cross features that
/// `J` contributes to. Every cross feature recorded there carries exactly
/// two incoming edges (the pair of features it was built from), so a cross
/// feature is added to the row once both of its sources have been seen;
/// newly added features are themselves scanned, which materializes nested
/// crosses transitively. Because every edge satisfies `parent < child`, the
/// graph is a DAG and the expansion terminates.
///
/// One extender is kept per worker thread; the scratch map is cleared after
/// each row.
pub struct RowExtender<'a> {
    dependees: &'a CsrMatrix,
    y: f64,
    id: u32,
    row: Vec<J>,
    seen_sources: HashMap<J, u32>,
    edge_visits: u64,
}

impl<'a> RowExtender<'a> {
    pub fn new(dependees: &'a CsrMatrix) -> Self {
        Self {
            dependees,
            y: 0.0,
            id: 0,
            row: Vec::new(),
            seen_sources: HashMap::new(),
            edge_visits: 0,
        }
    }

    /// Loads a row and extends it. The extended row supersedes the original
    /// for all downstream loss and gradient computation.
    pub fn reset_row(&mut self, sparse_bool: &[J], y: f64, id: u32) {
        self.edge_visits = 0;
        self.y = y;
        self.id = id;
        self.row.clear();
        self.row.extend_from_slice(sparse_bool);
        if self.dependees.nonzeros_count() != 0 {
            self.extend();
        }
    }

    fn extend(&mut self) {
        // The row grows while we scan it; newly appended features are
        // visited in turn, so indexed iteration is required.
        let mut i = 0;
        while i < self.row.len() {
            let j = self.row[i];
            debug_assert!(j < self.dependees.row_count());
            for &child_j in self.dependees.row(j) {
                self.edge_visits += 1;
                let seen = self.seen_sources.entry(child_j).or_insert(0);
                debug_assert!(*seen < 2);
                *seen += 1;
                if *seen == 2 {
                    self.row.push(child_j);
                }
            }
            i += 1;
        }
        self.seen_sources.clear();
    }

    /// The extended sparse row.
    #[inline]
    pub fn js(&self) -> &[J] {
        &self.row
    }

    /// Dot product with a dense weight vector.
    #[inline]
    pub fn dot(&self, w: &ndarray::Array1<f64>) -> f64 {
        crate::utils::sparse_dot(&self.row, w)
    }

    /// Squared L2 norm of the extended row; all entries are boolean.
    #[inline]
    pub fn l2_squared_norm(&self) -> f64 {
        self.row.len() as f64
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.y
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Dependee edges visited while extending the current row.
    #[inline]
    pub fn edge_visits(&self) -> u64 {
        self.edge_visits
    }
}
