//! LIBSVM-style data reading.
//!
//! One row per line: the first token is the ±1 label, the remaining tokens
//! are `feature_name:1`. Continuous values are unsupported. A configured
//! feature name may instead carry a 64-bit row id. Files are read in
//! parallel, bounded by a weighted semaphore; each file's rows land in
//! their own shards, so shard contents are deterministic even though file
//! completion order is not.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::data::{Shard, ShardBuilder, ShardSet};
use crate::features::{FeatureMap, FeatureName, JProduct, ProductMap, J};
use crate::io::{model::read_model_weights, DataError, OutputFormat};
use crate::utils::WeightedSemaphore;
use crate::world::World;

// =============================================================================
// Configuration
// =============================================================================

/// One product feature template: every combination of one matching feature
/// per prefix becomes a product feature of the row. No prefixes = the bias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpecConfig {
    #[serde(default)]
    pub product: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSetFiles {
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// A row is kept only if it contains every listed feature.
    #[serde(default)]
    pub filter_features: Vec<String>,
}

/// Initialize features and weights from a previously written model instead
/// of feature specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModelConfig {
    pub path: PathBuf,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReaderConfig {
    #[serde(default)]
    pub feature_specs: Vec<FeatureSpecConfig>,
    #[serde(default)]
    pub training_set: DataSetFiles,
    #[serde(default)]
    pub holdout_set: DataSetFiles,
    /// Feature whose value is a 64-bit row id rather than a boolean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id_feature_name: Option<String>,
    #[serde(default)]
    pub remove_duplicate_features_in_each_row: bool,
    /// Bound on concurrently open files.
    #[serde(default = "default_thread_count")]
    pub thread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_model: Option<ReadModelConfig>,
}

impl Default for DataReaderConfig {
    fn default() -> Self {
        Self {
            feature_specs: Vec::new(),
            training_set: DataSetFiles::default(),
            holdout_set: DataSetFiles::default(),
            user_id_feature_name: None,
            remove_duplicate_features_in_each_row: false,
            thread_count: default_thread_count(),
            read_model: None,
        }
    }
}

fn default_thread_count() -> u32 {
    crate::utils::DEFAULT_WORKERS as u32
}

/// Sticky `read_data set` options merged across commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadDataSetConfig {
    /// When set, the label is +1 iff the named feature is present in the
    /// row, overriding the label column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_feature: Option<String>,
}

// =============================================================================
// Line Parsing
// =============================================================================

struct ParsedRow {
    y: f64,
    bool_features: Vec<String>,
    user_id: Option<u64>,
}

fn parse_line(line: &str, user_id_feature_name: Option<&str>) -> Result<ParsedRow, DataError> {
    let mut tokens = line.split_whitespace();
    let label = tokens.next().ok_or(DataError::EmptyRow)?;
    let y: f64 = label
        .parse()
        .map_err(|_| DataError::BadLabel(label.to_owned()))?;
    if y != 1.0 && y != -1.0 {
        return Err(DataError::BadLabel(label.to_owned()));
    }

    let mut bool_features = Vec::new();
    let mut user_id = None;
    for token in tokens {
        let (name, value) = token
            .split_once(':')
            .ok_or_else(|| DataError::MalformedToken(token.to_owned()))?;
        if Some(name) == user_id_feature_name {
            if user_id.is_some() {
                return Err(DataError::DuplicateUserId);
            }
            user_id = Some(
                value
                    .parse::<u64>()
                    .map_err(|_| DataError::BadUserId(token.to_owned()))?,
            );
        } else {
            let x: f64 = value
                .parse()
                .map_err(|_| DataError::MalformedToken(token.to_owned()))?;
            if x != 1.0 {
                return Err(DataError::ContinuousValue(token.to_owned()));
            }
            bool_features.push(name.to_owned());
        }
    }
    Ok(ParsedRow {
        y,
        bool_features,
        user_id,
    })
}

// =============================================================================
// Feature Materialization
// =============================================================================

/// Odometer over one pick per factor list. Zero lists yield exactly the
/// empty combination.
struct ProductIterator<'a> {
    factors: &'a [Vec<J>],
    cursor: Vec<usize>,
    product: Vec<J>,
    empty: bool,
}

impl<'a> ProductIterator<'a> {
    fn new(factors: &'a [Vec<J>]) -> Self {
        let mut it = Self {
            factors,
            cursor: vec![0; factors.len()],
            product: Vec::with_capacity(factors.len()),
            empty: false,
        };
        for list in factors {
            match list.first() {
                Some(&j) => it.product.push(j),
                None => {
                    it.empty = true;
                    return it;
                }
            }
        }
        it
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    fn get(&self) -> &[J] {
        &self.product
    }

    fn next(&mut self) {
        for i in 0..self.factors.len() {
            if self.cursor[i] + 1 < self.factors[i].len() {
                self.cursor[i] += 1;
                self.product[i] = self.factors[i][self.cursor[i]];
                return;
            }
            self.cursor[i] = 0;
            self.product[i] = self.factors[i][0];
        }
        self.empty = true; // full cycle
    }
}

/// Range of `sorted` strings starting with `prefix`.
fn prefix_range(sorted: &[String], prefix: &str) -> std::ops::Range<usize> {
    if prefix.is_empty() {
        return 0..sorted.len();
    }
    let mut prefix_end = prefix.as_bytes().to_vec();
    let last = prefix_end.last_mut().unwrap();
    assert!(*last < u8::MAX, "prefix byte 0xFF is unsupported");
    *last += 1;
    let start = sorted.partition_point(|s| s.as_str() < prefix);
    let end = start
        + sorted[start..].partition_point(|s| s.as_bytes() < prefix_end.as_slice());
    start..end
}

/// Materializes the products of every feature spec present in the row.
fn spec_row_js(
    specs: &[FeatureSpecConfig],
    feature_map: &FeatureMap,
    product_map: &ProductMap,
    bool_features: &[String],
    row: &mut Vec<J>,
) {
    for spec in specs {
        let factor_lists: Vec<Vec<J>> = spec
            .product
            .iter()
            .map(|prefix| {
                prefix_range(bool_features, prefix)
                    .map(|i| feature_map.intern(FeatureName::new(bool_features[i].clone())))
                    .collect()
            })
            .collect();
        let mut products = ProductIterator::new(&factor_lists);
        while !products.is_empty() {
            row.push(product_map.intern(JProduct::new(products.get().to_vec())));
            products.next();
        }
    }
}

/// A prior model loaded before the data: its features define the J space
/// and its weights seed the model.
struct PriorModel {
    /// `(factor names, J)`; a row gets `J` iff it contains every factor.
    entries: Vec<(Vec<String>, J)>,
}

impl PriorModel {
    fn load(config: &ReadModelConfig, world: &mut World) -> Result<Self, DataError> {
        let weights = read_model_weights(&config.path, config.format)?;
        let mut entries = Vec::with_capacity(weights.len());
        let mut max_j = 0;
        let mut seeds = Vec::with_capacity(weights.len());
        for weight in weights {
            let factor_js: Vec<J> = weight
                .features
                .iter()
                .map(|name| world.feature_map.intern(FeatureName::new(name.clone())))
                .collect();
            let j = world.product_map.intern(JProduct::new(factor_js));
            max_j = max_j.max(j);
            seeds.push((j, weight.weight));
            entries.push((weight.features, j));
        }
        world.model.set_size(max_j + 1);
        for (j, weight) in seeds {
            world.model.w[j as usize] = weight;
        }
        Ok(Self { entries })
    }

    fn row_js(&self, sorted_features: &[String], row: &mut Vec<J>) {
        for (factors, j) in &self.entries {
            let present = factors
                .iter()
                .all(|f| sorted_features.binary_search(f).is_ok());
            if present {
                row.push(*j);
            }
        }
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Reads training and holdout files, interning features as configured, and
/// routes the resulting feature universe through the world choke point.
pub fn read_data_files(
    world: &mut World,
    config: &DataReaderConfig,
    set_config: &ReadDataSetConfig,
) -> Result<(), DataError> {
    assert!(
        world.feature_map.is_empty() && world.product_map.is_empty(),
        "data can be read only into an empty feature universe"
    );
    let prior_model = match &config.read_model {
        Some(read_model) => Some(PriorModel::load(read_model, world)?),
        None => None,
    };

    let row_id_sequence = AtomicU32::new(0);
    let semaphore = WeightedSemaphore::new(config.thread_count.max(1));

    let parallelism = world.parallelism();
    for (files, target) in [
        (&config.training_set, TargetSet::Training),
        (&config.holdout_set, TargetSet::Holdout),
    ] {
        let context = ReadContext {
            config,
            set_config,
            prior_model: prior_model.as_ref(),
            feature_map: &world.feature_map,
            product_map: &world.product_map,
            row_id_sequence: &row_id_sequence,
            semaphore: &semaphore,
            max_shard_size: world.data.training().max_shard_size(),
        };
        let results: Vec<Result<(u64, Vec<Shard>), DataError>> = parallelism
            .maybe_par_map(files.files.as_slice(), |path: &PathBuf| {
                context.read_file(path, files)
            });
        let shard_set: &mut ShardSet = match target {
            TargetSet::Training => world.data.training_mut(),
            TargetSet::Holdout => world.data.holdout_mut(),
        };
        for result in results {
            let (bool_feature_count, shards) = result?;
            shard_set.absorb(bool_feature_count, shards);
        }
    }

    world.feature_map.sync_j_to_key();
    let size = world.product_map.len();
    world.add_features(0, size);
    world.model.init_per_shards(
        world.data.training().stats().row_count() as usize,
        world.data.holdout().stats().row_count() as usize,
    );
    tracing::info!(
        features = world.feature_map.len(),
        products = world.product_map.len(),
        training_rows = world.data.training().stats().row_count(),
        holdout_rows = world.data.holdout().stats().row_count(),
        "data loaded"
    );
    Ok(())
}

enum TargetSet {
    Training,
    Holdout,
}

struct ReadContext<'a> {
    config: &'a DataReaderConfig,
    set_config: &'a ReadDataSetConfig,
    prior_model: Option<&'a PriorModel>,
    feature_map: &'a FeatureMap,
    product_map: &'a ProductMap,
    row_id_sequence: &'a AtomicU32,
    semaphore: &'a WeightedSemaphore,
    max_shard_size: u32,
}

impl ReadContext<'_> {
    fn read_file(
        &self,
        path: &Path,
        files: &DataSetFiles,
    ) -> Result<(u64, Vec<Shard>), DataError> {
        let _guard = self.semaphore.acquire(1);
        tracing::info!("reading {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_owned(),
            source,
        })?;

        let mut builder = ShardBuilder::new(self.max_shard_size);
        let mut bool_feature_count = 0u64;
        let mut row_buffer: Vec<J> = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let parsed = parse_line(line, self.config.user_id_feature_name.as_deref())?;
            self.add_row(parsed, files, &mut row_buffer, &mut builder, &mut bool_feature_count);
        }
        Ok((bool_feature_count, builder.into_shards()))
    }

    fn add_row(
        &self,
        parsed: ParsedRow,
        files: &DataSetFiles,
        row_buffer: &mut Vec<J>,
        builder: &mut ShardBuilder,
        bool_feature_count: &mut u64,
    ) {
        let ParsedRow {
            mut y,
            mut bool_features,
            user_id,
        } = parsed;

        if !files.filter_features.is_empty() {
            let keep = files
                .filter_features
                .iter()
                .all(|f| bool_features.iter().any(|b| b == f));
            if !keep {
                return;
            }
        }

        bool_features.sort_unstable();

        if let Some(output_feature) = &self.set_config.output_feature {
            y = if bool_features.binary_search(output_feature).is_ok() {
                1.0
            } else {
                -1.0
            };
        }
        if self.config.remove_duplicate_features_in_each_row {
            bool_features.dedup();
        }

        debug_assert!(row_buffer.is_empty());
        match self.prior_model {
            Some(prior) => prior.row_js(&bool_features, row_buffer),
            None => spec_row_js(
                &self.config.feature_specs,
                self.feature_map,
                self.product_map,
                &bool_features,
                row_buffer,
            ),
        }
        row_buffer.sort_unstable();
        row_buffer.dedup();

        builder.add_row(
            row_buffer,
            y,
            self.row_id_sequence.fetch_add(1, Ordering::Relaxed),
        );
        if let Some(user_id) = user_id {
            builder.add_user_id(user_id);
        }
        *bool_feature_count += bool_features.len() as u64;
        row_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_and_features() {
        let row = parse_line("+1 a:1 b:1", None).unwrap();
        assert_eq!(row.y, 1.0);
        assert_eq!(row.bool_features, vec!["a", "b"]);
        assert!(row.user_id.is_none());

        let row = parse_line("-1", None).unwrap();
        assert_eq!(row.y, -1.0);
        assert!(row.bool_features.is_empty());
    }

    #[test]
    fn rejects_bad_labels_and_values() {
        assert!(matches!(parse_line("", None), Err(DataError::EmptyRow)));
        assert!(matches!(
            parse_line("2 a:1", None),
            Err(DataError::BadLabel(_))
        ));
        assert!(matches!(
            parse_line("+1 a:0.5", None),
            Err(DataError::ContinuousValue(_))
        ));
        assert!(matches!(
            parse_line("+1 a", None),
            Err(DataError::MalformedToken(_))
        ));
    }

    #[test]
    fn extracts_user_id() {
        let row = parse_line("+1 a:1 uid:77", Some("uid")).unwrap();
        assert_eq!(row.user_id, Some(77));
        assert_eq!(row.bool_features, vec!["a"]);
        assert!(matches!(
            parse_line("+1 uid:1 uid:2", Some("uid")),
            Err(DataError::DuplicateUserId)
        ));
    }

    #[test]
    fn prefix_range_selects_matching_block() {
        let sorted: Vec<String> = ["alpha", "beta", "beta2", "gamma"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(prefix_range(&sorted, "beta"), 1..3);
        assert_eq!(prefix_range(&sorted, ""), 0..4);
        assert_eq!(prefix_range(&sorted, "delta"), 3..3);
    }

    #[test]
    fn product_iterator_is_cartesian() {
        let factors = vec![vec![1, 2], vec![10]];
        let mut it = ProductIterator::new(&factors);
        let mut seen = Vec::new();
        while !it.is_empty() {
            seen.push(it.get().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![vec![1, 10], vec![2, 10]]);
    }

    #[test]
    fn product_iterator_without_factors_yields_bias_once() {
        let factors: Vec<Vec<J>> = Vec::new();
        let mut it = ProductIterator::new(&factors);
        assert!(!it.is_empty());
        assert!(it.get().is_empty());
        it.next();
        assert!(it.is_empty());
    }

    #[test]
    fn product_iterator_with_empty_factor_is_empty() {
        let factors = vec![vec![1, 2], vec![]];
        assert!(ProductIterator::new(&factors).is_empty());
    }
}
