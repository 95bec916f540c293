//! The command language driving the engine.
//!
//! A training run is a script of [`Command`]s, usually parsed from JSON.
//! Exactly one variant per command, mirroring the log record convention.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::explore::{FeatureExplorationConfig, FeaturePruningConfig};
use crate::io::{DataReaderConfig, OutputFormat, ReadDataSetConfig};
use crate::training::LearningRateCommand;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Set(SetConfig),
    ReadData(ReadDataCommand),
    /// Sets the bias weight to the label log-odds; a cheap warm start.
    InitializeBias,
    AddNewProductFeatures(AddNewProductFeatures),
    PruneFeatures(PruneFeatures),
    FitModelWeights(FitModelWeights),
    RunSgd(RunSgd),
    Sgd(SgdCommand),
    EvaluateStats(EvaluateStats),
    /// Snapshot the current model for later best-of selection.
    StoreModel,
    WriteModel(WriteModelCommand),
    /// Log the current model.
    GetModel,
    Repeat(Repeat),
    Internal(InternalCommand),
    FromFile(FromFile),
    CommandList(CommandList),
    ScoreRows(ScoreRowsCommand),
}

// =============================================================================
// Set
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_timestamp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_log_path: Option<PathBuf>,
    #[serde(default)]
    pub clear_log_files: bool,
}

/// Partial regularization update; only present fields are overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegularizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_at_weight_zero: Option<f64>,
}

impl RegularizationConfig {
    pub fn apply_to(&self, term: &mut crate::training::RegularizationTerm) {
        if let Some(l1) = self.l1 {
            term.l1 = l1;
        }
        if let Some(l2) = self.l2 {
            term.l2 = l2;
        }
        if let Some(l1z) = self.l1_at_weight_zero {
            term.l1_at_weight_zero = l1z;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SgdLearningRateSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_learning_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_speed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularization: Option<RegularizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularization_div_sqrt_n: Option<RegularizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularization_mul_sqrt_n: Option<RegularizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularization_confidence: Option<RegularizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inertia_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_undo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deterministic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shard_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logged_lift_fraction: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgd_learning_rate_schedule: Option<SgdLearningRateSchedule>,
}

// =============================================================================
// Command payloads
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadDataCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<ReadDataSetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_reader: Option<DataReaderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddNewProductFeatures {
    #[serde(default)]
    pub feature_exploration: FeatureExplorationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneFeatures {
    #[serde(default)]
    pub feature_pruning: FeaturePruningConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitModelWeights {
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSgd {
    pub iterations: u32,
    #[serde(default)]
    pub only_new_features: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdCommand {
    pub learning_rate: LearningRateCommand,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluateStats {
    #[serde(default)]
    pub auc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteModelSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_model_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_best_stored: Option<bool>,
    /// Per-nonzero-weight penalty used when ranking stored models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularization_l0: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteModelCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<WriteModelSet>,
    #[serde(default)]
    pub write: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRowsSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRowsCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<ScoreRowsSet>,
    #[serde(default)]
    pub write_scores: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    pub repetitions: u32,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandList {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromFile {
    pub path: PathBuf,
}

/// Debug dumps of internal state into the log streams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalCommand {
    GetModel,
    GetScores,
}
