//! Shared helpers for engine-level integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use crossfeat::engine::command::{
    Command, FitModelWeights, ReadDataCommand, SetConfig, SgdLearningRateSchedule,
};
use crossfeat::io::{DataReaderConfig, DataSetFiles, FeatureSpecConfig};

static FILE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique temp path; tests clean up after themselves.
pub fn temp_path(name: &str) -> PathBuf {
    let n = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "crossfeat_it_{}_{}_{}",
        std::process::id(),
        n,
        name
    ))
}

pub fn write_data_file(name: &str, contents: &str) -> PathBuf {
    let path = temp_path(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// The bias feature spec: an empty product.
pub fn bias_spec() -> FeatureSpecConfig {
    FeatureSpecConfig { product: vec![] }
}

/// One singleton product per feature matching `prefix`.
pub fn atom_spec(prefix: &str) -> FeatureSpecConfig {
    FeatureSpecConfig {
        product: vec![prefix.to_owned()],
    }
}

pub fn read_data_command(training_file: &PathBuf, specs: Vec<FeatureSpecConfig>) -> Command {
    Command::ReadData(ReadDataCommand {
        set: None,
        data_reader: Some(DataReaderConfig {
            feature_specs: specs,
            training_set: DataSetFiles {
                files: vec![training_file.clone()],
                filter_features: vec![],
            },
            ..Default::default()
        }),
    })
}

pub fn deterministic() -> Command {
    Command::Set(SetConfig {
        deterministic: Some(true),
        ..Default::default()
    })
}

pub fn fit(iterations: u32) -> Command {
    Command::FitModelWeights(FitModelWeights { iterations })
}

pub fn sgd_schedule(start: f64, decay: f64) -> Command {
    Command::Set(SetConfig {
        sgd_learning_rate_schedule: Some(SgdLearningRateSchedule {
            start_learning_rate: Some(start),
            decay_speed: Some(decay),
        }),
        ..Default::default()
    })
}
