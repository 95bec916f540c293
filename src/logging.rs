//! Structured run logging.
//!
//! Every observable event is a [`LogLine`] record tagged with exactly one
//! variant. Records are stamped with the run id and (unless suppressed) a
//! timestamp, then fanned out to up to two append-only sinks: a JSON-lines
//! record stream and a pretty-printed text stream. Each sink is drained by
//! its own writer thread so training never blocks on file I/O. Iteration
//! records additionally produce a one-line human summary via `tracing`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::model::ModelInternals;

// =============================================================================
// Record Types
// =============================================================================

/// L1/L2/nonzero summary of a dense per-J vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VectorStats {
    pub size: u64,
    pub l1: f64,
    pub l2: f64,
    pub nonzero_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiftRecord {
    pub lift_fraction: f64,
    pub lift_value: f64,
}

/// Loss and gradient summary of one shard set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSetStats {
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dloss: Option<VectorStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auc: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lift: Vec<LiftRecord>,
}

/// One full pass over the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    pub index: u32,
    pub weight_stats: VectorStats,
    pub delta_weight_stats: VectorStats,
    pub training_data_stats: DataSetStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holdout_data_stats: Option<DataSetStats>,
    pub regularization_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_total_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_loss: Option<f64>,
    /// Dependee edges visited while extending rows this pass.
    pub flat_materialization_ops: u64,
}

/// Outcome flags of one coordinate update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GradBoostUpdateRecord {
    pub undo_iteration: bool,
    pub restart_iteration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dot_loss_derivative_vs_delta_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_angle_loss_derivative_vs_delta_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExplorationRecord {
    pub xjbools_per_candidate_feature_estimate: f64,
    pub features_added: u32,
    pub present_features_skipped: u64,
    pub empty_features_skipped: u64,
    pub xjbools_added: u64,
    pub xjbools_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PruningRecord {
    pub blocked_features: u64,
    pub blocked_xjbools: u64,
    pub features_removed: u64,
    pub xjbools_count: u64,
    pub xjbools_removed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MaybeReduceRecord {
    pub previous_total_loss: f64,
    pub current_total_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_learning_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SgdRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maybe_reduce: Option<MaybeReduceRecord>,
}

/// One `(features, weight)` entry of a written model. Zero weights are
/// omitted from model files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelWeight {
    pub features: Vec<String>,
    pub weight: f64,
}

/// A complete model: the last iteration's summary plus all non-zero
/// weights, ordered by ascending weight.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_iteration: Option<IterationRecord>,
    #[serde(default)]
    pub weights: Vec<ModelWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internals: Option<ModelInternals>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RowScore {
    pub row_id: u64,
    pub wx: f64,
}

/// `(row_id, w·x)` for every data row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataScoreRecord {
    pub row_scores: Vec<RowScore>,
}

/// One log record; exactly one tag per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogLine {
    Iteration(IterationRecord),
    Exploration(ExplorationRecord),
    Pruning(PruningRecord),
    Model(ModelRecord),
    GradBoostUpdate(GradBoostUpdateRecord),
    Sgd(SgdRecord),
    Command(serde_json::Value),
    DataScore(DataScoreRecord),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StampedLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<u64>,
    #[serde(flatten)]
    line: LogLine,
}

// =============================================================================
// Logger
// =============================================================================

struct Sink {
    tx: Option<Sender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl Sink {
    fn spawn(path: PathBuf) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = channel::<String>();
        let handle = std::thread::spawn(move || {
            for message in rx {
                if writeln!(file, "{message}").and_then(|_| file.flush()).is_err() {
                    tracing::error!("log sink write failed: {}", path.display());
                    break;
                }
            }
        });
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn push(&self, message: String) {
        if let Some(tx) = &self.tx {
            // A dead writer thread only loses log lines, never training.
            let _ = tx.send(message);
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Fan-out log writer with per-sink writer threads.
pub struct Logger {
    run_id: u64,
    log_timestamp: bool,
    text: Option<Sink>,
    records: Option<Sink>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            run_id: 0,
            log_timestamp: true,
            text: None,
            records: None,
        }
    }

    pub fn set_run_id(&mut self, run_id: u64) {
        self.run_id = run_id;
    }

    pub fn set_log_timestamp(&mut self, log_timestamp: bool) {
        self.log_timestamp = log_timestamp;
    }

    /// Opens the text sink. `clear` truncates any existing file first.
    pub fn set_text_log_path(&mut self, path: &Path, clear: bool) -> std::io::Result<()> {
        assert!(self.text.is_none(), "text log path already set");
        prepare_log_file(path, clear)?;
        self.text = Some(Sink::spawn(path.to_owned())?);
        Ok(())
    }

    /// Opens the serialized-record sink. `clear` truncates first.
    pub fn set_record_log_path(&mut self, path: &Path, clear: bool) -> std::io::Result<()> {
        assert!(self.records.is_none(), "record log path already set");
        prepare_log_file(path, clear)?;
        self.records = Some(Sink::spawn(path.to_owned())?);
        Ok(())
    }

    /// Stamps and enqueues one record on every configured sink.
    pub fn add_to_logs(&self, line: LogLine) {
        if let LogLine::Iteration(iteration) = &line {
            tracing::info!("{}", iteration_summary(iteration));
        }
        if self.text.is_none() && self.records.is_none() {
            return;
        }
        let stamped = StampedLine {
            timestamp_nanos: self.log_timestamp.then(now_nanos),
            run_id: (self.run_id > 0).then_some(self.run_id),
            line,
        };
        if let Some(records) = &self.records {
            if let Ok(message) = serde_json::to_string(&stamped) {
                records.push(message);
            }
        }
        if let Some(text) = &self.text {
            if let Ok(message) = serde_json::to_string_pretty(&stamped) {
                text.push(message);
            }
        }
    }
}

fn prepare_log_file(path: &Path, clear: bool) -> std::io::Result<()> {
    // Open before training starts so a bad path fails the `set` command,
    // not the first iteration.
    if clear {
        std::fs::File::create(path)?;
    } else {
        OpenOptions::new().create(true).append(true).open(path)?;
    }
    Ok(())
}

fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// One-line fixed-layout iteration summary; repeated printing yields an
/// easily readable column format.
pub fn iteration_summary(log: &IterationRecord) -> String {
    let mut ret = format!("I {:5}: ", log.index);
    let t = &log.training_data_stats;
    if let Some(loss) = t.loss {
        if t.size > 0 {
            ret += &format!("L(t)/#t = {:.17} ", loss / t.size as f64);
        }
    }
    if let Some(auc) = t.auc {
        ret += &format!("Auc(t) = {auc:.17} ");
    }
    if let Some(h) = &log.holdout_data_stats {
        if let Some(loss) = h.loss {
            if h.size > 0 {
                ret += &format!("L(h)/#h = {:.17} ", loss / h.size as f64);
            }
        }
        if let Some(auc) = h.auc {
            ret += &format!("Auc(h) = {auc:.17} ");
        }
    }
    if let Some(dloss) = &t.dloss {
        ret += &format!("L1(dL(t)+dL(r)) = {:.17} ", dloss.l1);
    }
    ret += &format!("sum(w != 0) = {:7} ", log.weight_stats.nonzero_count);
    ret += &format!("L1(w) = {:.17}", log.weight_stats.l1);
    ret
}
