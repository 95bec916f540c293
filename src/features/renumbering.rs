//! Compaction of the J space after pruning.

use ndarray::Array1;

use super::{INVALID_J, J};

/// An injection from old `J` to new `J`, with [`INVALID_J`] marking removed
/// entries. Survivors are compacted into `[0, next_j)` preserving their
/// relative order.
#[derive(Debug, Clone)]
pub struct Renumbering {
    j_to_new_j: Vec<J>,
    next_j: J,
}

impl Renumbering {
    /// Builds a renumbering that removes the flagged `J`s and compacts the
    /// rest.
    pub fn remove_js(js_to_remove: &[bool]) -> Self {
        let mut j_to_new_j = vec![0; js_to_remove.len()];
        let mut next_j: J = 0;
        for (j, &remove) in js_to_remove.iter().enumerate() {
            if remove {
                j_to_new_j[j] = INVALID_J;
            } else {
                j_to_new_j[j] = next_j;
                next_j += 1;
            }
        }
        Self { j_to_new_j, next_j }
    }

    #[inline]
    pub fn j_to_new_j(&self) -> &[J] {
        &self.j_to_new_j
    }

    #[inline]
    pub fn next_j(&self) -> J {
        self.next_j
    }

    pub fn is_noop(&self) -> bool {
        self.j_to_new_j
            .iter()
            .enumerate()
            .all(|(j, &new_j)| new_j == j as J)
    }

    /// Rewrites a sparse row in place: removed `J`s are dropped, survivors
    /// renumbered. Relative order is preserved.
    pub fn renumber_js(&self, js: &mut Vec<J>) {
        debug_assert!(!self.j_to_new_j.is_empty());
        js.retain_mut(|j| {
            debug_assert!((*j as usize) < self.j_to_new_j.len());
            let new_j = self.j_to_new_j[*j as usize];
            *j = new_j;
            new_j != INVALID_J
        });
    }

    /// Moves `v[j]` to `v[new_j]` for every surviving `J`; removed entries
    /// are dropped and the vector shrinks to `next_j`.
    pub fn renumber_indices<T: Default>(&self, v: &mut Vec<T>) {
        if self.j_to_new_j.is_empty() {
            return;
        }
        debug_assert!(v.len() <= self.j_to_new_j.len());
        let mut new_v: Vec<T> = Vec::with_capacity(self.next_j as usize);
        new_v.resize_with(self.next_j as usize, T::default);
        for (j, value) in v.drain(..).enumerate() {
            let new_j = self.j_to_new_j[j];
            if new_j != INVALID_J {
                new_v[new_j as usize] = value;
            }
        }
        *v = new_v;
    }

    /// [`Self::renumber_indices`] for dense f64 vectors.
    pub fn renumber_dense(&self, v: &mut Array1<f64>) {
        if self.j_to_new_j.is_empty() {
            return;
        }
        let mut new_v = Array1::<f64>::zeros(self.next_j as usize);
        for (j, &value) in v.iter().enumerate() {
            let new_j = self.j_to_new_j[j];
            if new_j != INVALID_J {
                new_v[new_j as usize] = value;
            }
        }
        *v = new_v;
    }

    /// Inverse map; every new `J` has exactly one old `J`.
    pub fn new_j_to_old_j(&self) -> Vec<J> {
        let mut ret = vec![INVALID_J; self.next_j as usize];
        for (old_j, &new_j) in self.j_to_new_j.iter().enumerate() {
            if new_j != INVALID_J {
                ret[new_j as usize] = old_j as J;
            }
        }
        ret
    }
}
