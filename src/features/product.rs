//! Cross features: conjunctions of atomic features.

use super::{FeatureMap, J};

/// A conjunction of atomic features, stored as a strictly sorted,
/// duplicate-free vector of atomic `J`s.
///
/// The empty product is the bias (always-on intercept) feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JProduct {
    and_js: Vec<J>,
}

impl JProduct {
    /// Builds a product from factors in any order; sorts and deduplicates.
    pub fn new(mut and_js: Vec<J>) -> Self {
        and_js.sort_unstable();
        and_js.dedup();
        Self { and_js }
    }

    /// The bias feature.
    pub fn bias() -> Self {
        Self { and_js: Vec::new() }
    }

    /// Combines two products into their conjunction.
    pub fn and(f1: &JProduct, f2: &JProduct) -> Self {
        let mut merged = Vec::with_capacity(f1.and_js.len() + f2.and_js.len());
        merged.extend_from_slice(&f1.and_js);
        merged.extend_from_slice(&f2.and_js);
        JProduct::new(merged)
    }

    #[inline]
    pub fn factors(&self) -> &[J] {
        &self.and_js
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.and_js.len()
    }

    #[inline]
    pub fn is_bias(&self) -> bool {
        self.and_js.is_empty()
    }

    /// Resolves factor `J`s to their atomic feature names.
    ///
    /// Requires the feature map to be synced.
    pub fn factor_names(&self, feature_map: &FeatureMap) -> Vec<String> {
        self.and_js
            .iter()
            .map(|&j| feature_map.j_to_key(j).as_str().to_owned())
            .collect()
    }

    /// LIBSVM-style display name, factors joined with `separator`.
    pub fn display_name(&self, feature_map: &FeatureMap, separator: &str) -> String {
        self.factor_names(feature_map).join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sorts_and_dedups() {
        let p = JProduct::new(vec![3, 1, 2, 1]);
        assert_eq!(p.factors(), &[1, 2, 3]);
        assert_eq!(p.arity(), 3);
    }

    #[test]
    fn bias_is_empty_product() {
        assert!(JProduct::bias().is_bias());
        assert_eq!(JProduct::new(vec![]), JProduct::bias());
    }

    #[test]
    fn and_merges_factor_sets() {
        let a = JProduct::new(vec![0, 2]);
        let b = JProduct::new(vec![1, 2]);
        assert_eq!(JProduct::and(&a, &b).factors(), &[0, 1, 2]);
    }

    #[test]
    fn and_with_bias_is_identity() {
        let a = JProduct::new(vec![4, 7]);
        assert_eq!(JProduct::and(&a, &JProduct::bias()), a);
    }
}
