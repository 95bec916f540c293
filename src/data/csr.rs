//! Row-major sparse boolean matrices.
//!
//! [`CsrMatrix`] stores one `J` list per row behind a boundaries vector;
//! [`CooMatrix`] is the coordinate-list builder used when the dependees
//! graph is rebuilt during exploration.

use crate::features::{Renumbering, INVALID_J, J};

// =============================================================================
// CooMatrix
// =============================================================================

/// Coordinate-list sparse matrix: a plain `(row, col)` pair list.
///
/// Must be sorted before conversion to CSR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooMatrix {
    entries: Vec<(u32, u32)>,
    row_count: u32,
}

impl CooMatrix {
    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
    }

    #[inline]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn set_row_count(&mut self, row_count: u32) {
        self.row_count = row_count;
    }

    pub fn set_true(&mut self, row: u32, col: u32) {
        self.entries.push((row, col));
    }

    pub fn sort(&mut self) {
        self.entries.sort_unstable();
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] <= w[1])
    }

    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }
}

// =============================================================================
// CsrMatrix
// =============================================================================

/// Compressed sparse row matrix of `J`s.
///
/// `boundaries` has length `rows + 1`; row `i` occupies
/// `contents[boundaries[i]..boundaries[i + 1]]`. Total content length is
/// limited to `u32::MAX` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrMatrix {
    boundaries: Vec<u32>,
    contents: Vec<J>,
}

impl Default for CsrMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrMatrix {
    pub fn new() -> Self {
        Self {
            boundaries: vec![0],
            contents: Vec::new(),
        }
    }

    pub fn add_row(&mut self, js: &[J]) {
        self.contents.extend_from_slice(js);
        assert!(
            self.contents.len() <= u32::MAX as usize,
            "sparse matrix exceeds 2^32-1 entries"
        );
        self.boundaries.push(self.contents.len() as u32);
    }

    /// Zero-copy view of row `i`.
    #[inline]
    pub fn row(&self, i: u32) -> &[J] {
        let i = i as usize;
        &self.contents[self.boundaries[i] as usize..self.boundaries[i + 1] as usize]
    }

    #[inline]
    pub fn row_count(&self) -> u32 {
        (self.boundaries.len() - 1) as u32
    }

    #[inline]
    pub fn nonzeros_count(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Extends the matrix with trailing empty rows. `size` must not shrink
    /// the matrix.
    pub fn set_row_count(&mut self, size: u32) {
        assert!(size >= self.row_count());
        self.boundaries
            .resize(size as usize + 1, self.contents.len() as u32);
    }

    pub fn from_coo(coo: &CooMatrix) -> Self {
        debug_assert!(coo.is_sorted());
        let mut ret = Self {
            boundaries: Vec::new(),
            contents: Vec::new(),
        };
        for &(i, j) in coo.entries() {
            while i as usize >= ret.boundaries.len() {
                ret.boundaries.push(ret.contents.len() as u32);
            }
            ret.contents.push(j);
        }
        while coo.row_count() as usize >= ret.boundaries.len() {
            ret.boundaries.push(ret.contents.len() as u32);
        }
        ret
    }

    pub fn to_coo(&self) -> CooMatrix {
        let mut coo = CooMatrix::default();
        coo.reserve(self.contents.len());
        coo.set_row_count(self.row_count());
        for i in 0..self.row_count() {
            for &j in self.row(i) {
                coo.set_true(i, j);
            }
        }
        coo
    }

    /// Rewrites every row's contents through the renumbering, dropping
    /// removed `J`s and compacting in place.
    pub fn remove_and_renumber_js(&mut self, renumbering: &Renumbering) {
        let j_to_new_j = renumbering.j_to_new_j();
        if j_to_new_j.is_empty() {
            return;
        }
        let mut write = 0usize;
        let mut read = 0usize;
        for i in 0..self.row_count() as usize {
            let read_end = self.boundaries[i + 1] as usize;
            while read < read_end {
                let new_j = j_to_new_j[self.contents[read] as usize];
                if new_j != INVALID_J {
                    self.contents[write] = new_j;
                    write += 1;
                }
                read += 1;
            }
            self.boundaries[i + 1] = write as u32;
        }
        self.contents.truncate(write);
    }

    /// Treats the row index itself as a `J`: removed rows are dropped and
    /// the survivors permuted to their new indices.
    pub fn remove_and_renumber_rows(&mut self, renumbering: &Renumbering) {
        if renumbering.j_to_new_j().is_empty() {
            return;
        }
        let mut temp = CsrMatrix::new();
        for &old_j in &renumbering.new_j_to_old_j() {
            assert_ne!(old_j, INVALID_J);
            temp.add_row(self.row(old_j));
        }
        *self = temp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrMatrix {
        let mut m = CsrMatrix::new();
        m.add_row(&[0, 2]);
        m.add_row(&[]);
        m.add_row(&[1, 2, 3]);
        m
    }

    #[test]
    fn rows_round_trip() {
        let m = sample();
        assert_eq!(m.row_count(), 3);
        assert_eq!(m.nonzeros_count(), 5);
        assert_eq!(m.row(0), &[0, 2]);
        assert_eq!(m.row(1), &[] as &[J]);
        assert_eq!(m.row(2), &[1, 2, 3]);
    }

    #[test]
    fn coo_round_trip_law() {
        let m = sample();
        let mut coo = m.to_coo();
        coo.sort();
        let m2 = CsrMatrix::from_coo(&coo);
        assert_eq!(m, m2);
        let mut coo2 = m2.to_coo();
        coo2.sort();
        assert_eq!(coo, coo2);
    }

    #[test]
    fn from_coo_handles_trailing_empty_rows() {
        let mut coo = CooMatrix::default();
        coo.set_row_count(4);
        coo.set_true(1, 5);
        coo.sort();
        let m = CsrMatrix::from_coo(&coo);
        assert_eq!(m.row_count(), 4);
        assert_eq!(m.row(0), &[] as &[J]);
        assert_eq!(m.row(1), &[5]);
        assert_eq!(m.row(3), &[] as &[J]);
    }

    #[test]
    fn renumber_js_compacts_rows() {
        let mut m = sample();
        // Remove J 2.
        let r = Renumbering::remove_js(&[false, false, true, false]);
        m.remove_and_renumber_js(&r);
        assert_eq!(m.row(0), &[0]);
        assert_eq!(m.row(1), &[] as &[J]);
        assert_eq!(m.row(2), &[1, 2]);
        assert_eq!(m.nonzeros_count(), 3);
    }

    #[test]
    fn renumber_rows_permutes() {
        let mut m = sample();
        let r = Renumbering::remove_js(&[true, false, false]);
        m.remove_and_renumber_rows(&r);
        assert_eq!(m.row_count(), 2);
        assert_eq!(m.row(0), &[] as &[J]);
        assert_eq!(m.row(1), &[1, 2, 3]);
    }

    #[test]
    fn set_row_count_appends_empty_rows() {
        let mut m = sample();
        m.set_row_count(5);
        assert_eq!(m.row_count(), 5);
        assert_eq!(m.row(4), &[] as &[J]);
    }
}
