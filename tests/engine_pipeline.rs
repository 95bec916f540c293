//! The full pipeline: read, fit, explore, fit, prune, fit, write, score.

mod common;

use common::*;
use crossfeat::engine::command::{
    AddNewProductFeatures, Command, EvaluateStats, LoggingConfig, PruneFeatures,
    ScoreRowsCommand, ScoreRowsSet, SetConfig, WriteModelCommand, WriteModelSet,
};
use crossfeat::explore::{FeatureExplorationConfig, FeaturePruningConfig};
use crossfeat::features::JProduct;
use crossfeat::io::{
    read_model_weights, DataReaderConfig, DataSetFiles, OutputFormat, ReadModelConfig,
};
use crossfeat::engine::command::ReadDataCommand;
use crossfeat::Engine;

const XOR_ISH_DATA: &str = "+1 a:1 b:1\n-1 a:1\n-1 b:1\n+1 a:1 b:1\n-1\n";

fn explore_one() -> Command {
    Command::AddNewProductFeatures(AddNewProductFeatures {
        feature_exploration: FeatureExplorationConfig {
            maximum_features_added: Some(1),
            max_product_size: Some(2),
            ..Default::default()
        },
    })
}

#[test]
fn explore_then_prune_full_cycle() {
    let data = write_data_file("cycle.txt", XOR_ISH_DATA);
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("")]),
            Command::InitializeBias,
            fit(20),
        ])
        .unwrap();
    assert_eq!(engine.world().j_size(), 3);

    // Exploration pairs the two strongest features into one cross.
    engine.run_command(&explore_one()).unwrap();
    assert_eq!(engine.world().j_size(), 4);
    let world = engine.world();
    let atom_a = world.feature_map.lookup(&"a".into()).unwrap();
    let atom_b = world.feature_map.lookup(&"b".into()).unwrap();
    let cross = JProduct::new(vec![atom_a, atom_b]);
    assert!(world.product_map.lookup(&cross).is_some());

    // The cross is the only feature separating the +1 rows; after a refit
    // it carries positive weight.
    engine.run_script(&[fit(30)]).unwrap();
    let cross_j = engine.world().product_map.lookup(&cross).unwrap();
    assert!(engine.world().model.w[cross_j as usize] > 0.0);

    // Pin the scores so the prune outcome is deterministic: the bias is
    // the clear loser and the cross the clear keeper.
    {
        let world = engine.world_mut();
        world.model.w[0] = 0.05;
        world.model.w[1] = 2.0;
        world.model.w[2] = 2.0;
        world.model.w[cross_j as usize] = 5.0;
        world.model.synced_with_weights = false;
    }
    engine
        .run_script(&[
            Command::PruneFeatures(PruneFeatures {
                feature_pruning: FeaturePruningConfig {
                    top_count: Some(3),
                    ..Default::default()
                },
            }),
            fit(5),
        ])
        .unwrap();
    assert_eq!(engine.world().j_size(), 3);
    // The cross survived the prune and still scores the +1 rows up.
    let cross_j = engine.world().product_map.lookup(&cross).unwrap();
    assert!(engine.world().model.w[cross_j as usize] > 0.0);

    std::fs::remove_file(&data).ok();
}

#[test]
fn written_model_reloads_as_prior() {
    let data = write_data_file("prior_data.txt", XOR_ISH_DATA);
    let model_path = temp_path("prior_model.json");

    let mut trainer = Engine::new();
    trainer
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("")]),
            fit(25),
            Command::WriteModel(WriteModelCommand {
                set: Some(WriteModelSet {
                    output_model_path: Some(model_path.clone()),
                    format: Some(OutputFormat::Text),
                    ..Default::default()
                }),
                write: false,
            }),
            Command::WriteModel(WriteModelCommand {
                set: None,
                write: true,
            }),
        ])
        .unwrap();

    // A fresh engine reads the model as its feature universe and scores
    // the same data identically.
    let mut scorer = Engine::new();
    scorer
        .run_script(&[
            deterministic(),
            Command::ReadData(ReadDataCommand {
                set: None,
                data_reader: Some(DataReaderConfig {
                    read_model: Some(ReadModelConfig {
                        path: model_path.clone(),
                        format: OutputFormat::Text,
                    }),
                    training_set: DataSetFiles {
                        files: vec![data.clone()],
                        filter_features: vec![],
                    },
                    ..Default::default()
                }),
            }),
        ])
        .unwrap();
    scorer.world_mut().sync_model();

    trainer.world_mut().sync_model();
    let expected = &trainer.world().model.training.wxs;
    let actual = &scorer.world().model.training.wxs;
    assert_eq!(expected.len(), actual.len());
    for (e, a) in expected.iter().zip(actual) {
        assert!((e - a).abs() < 1e-12, "wx mismatch: {e} vs {a}");
    }

    std::fs::remove_file(&data).ok();
    std::fs::remove_file(&model_path).ok();
}

#[test]
fn model_file_round_trips_weights() {
    let data = write_data_file("roundtrip_data.txt", XOR_ISH_DATA);
    let model_path = temp_path("roundtrip_model.jsonl");

    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("")]),
            fit(10),
            Command::WriteModel(WriteModelCommand {
                set: Some(WriteModelSet {
                    output_model_path: Some(model_path.clone()),
                    format: Some(OutputFormat::Serialized),
                    ..Default::default()
                }),
                write: true,
            }),
        ])
        .unwrap();

    let weights = read_model_weights(&model_path, OutputFormat::Serialized).unwrap();
    // Zero weights are omitted, the rest come back sorted by weight.
    assert!(!weights.is_empty());
    assert!(weights.iter().all(|w| w.weight != 0.0));
    assert!(weights.windows(2).all(|w| w[0].weight <= w[1].weight));

    std::fs::remove_file(&data).ok();
    std::fs::remove_file(&model_path).ok();
}

#[test]
fn stored_models_select_best_by_loss() {
    let data = write_data_file("select_best.txt", XOR_ISH_DATA);
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("")]),
            fit(1),
            Command::StoreModel,
            fit(30),
            Command::StoreModel,
            Command::WriteModel(WriteModelCommand {
                set: Some(WriteModelSet {
                    select_best_stored: Some(true),
                    ..Default::default()
                }),
                write: true,
            }),
        ])
        .unwrap();

    // The longer-trained snapshot has the lower loss and wins.
    let output = engine.output_model().unwrap();
    let chosen_loss = output
        .last_iteration
        .as_ref()
        .unwrap()
        .total_loss
        .unwrap();
    let final_loss = engine.world().model.total_loss;
    assert!((chosen_loss - final_loss).abs() < 1e-9);

    std::fs::remove_file(&data).ok();
}

#[test]
fn scores_are_written_per_row() {
    let data = write_data_file("scores.txt", "+1 a:1 uid:5\n-1 uid:6\n");
    let scores_path = temp_path("scores.jsonl");

    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            Command::ReadData(ReadDataCommand {
                set: None,
                data_reader: Some(DataReaderConfig {
                    feature_specs: vec![bias_spec(), atom_spec("a")],
                    user_id_feature_name: Some("uid".to_owned()),
                    training_set: DataSetFiles {
                        files: vec![data.clone()],
                        filter_features: vec![],
                    },
                    ..Default::default()
                }),
            }),
            fit(10),
            Command::ScoreRows(ScoreRowsCommand {
                set: Some(ScoreRowsSet {
                    output_path: Some(scores_path.clone()),
                    format: Some(OutputFormat::Serialized),
                }),
                write_scores: true,
            }),
        ])
        .unwrap();

    let contents = std::fs::read_to_string(&scores_path).unwrap();
    let rows: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["row_id"], 5);
    assert_eq!(rows[1]["row_id"], 6);
    // The positive row carries feature a and must outscore the empty row.
    assert!(rows[0]["wx"].as_f64().unwrap() > rows[1]["wx"].as_f64().unwrap());

    std::fs::remove_file(&data).ok();
    std::fs::remove_file(&scores_path).ok();
}

#[test]
fn evaluate_stats_logs_auc() {
    let data = write_data_file("auc_data.txt", "+1 a:1\n-1\n+1 a:1\n-1\n");
    let log_path = temp_path("records.jsonl");

    {
        let mut engine = Engine::new();
        engine
            .run_script(&[
                deterministic(),
                Command::Set(SetConfig {
                    logging: Some(LoggingConfig {
                        record_log_path: Some(log_path.clone()),
                        clear_log_files: true,
                        ..Default::default()
                    }),
                    logged_lift_fraction: vec![0.5],
                    ..Default::default()
                }),
                read_data_command(&data, vec![bias_spec(), atom_spec("a")]),
                fit(20),
                Command::EvaluateStats(EvaluateStats { auc: true }),
            ])
            .unwrap();
    } // dropping the engine joins the log writer threads

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let auc_line = contents
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v["iteration"]["training_data_stats"]["auc"].is_number())
        .expect("an iteration record with AUC");
    let auc = auc_line["iteration"]["training_data_stats"]["auc"]
        .as_f64()
        .unwrap();
    // Feature a separates the classes perfectly.
    assert!((auc - 1.0).abs() < 1e-9, "auc = {auc}");
    let lift = &auc_line["iteration"]["training_data_stats"]["lift"][0];
    assert_eq!(lift["lift_fraction"], 0.5);

    std::fs::remove_file(&data).ok();
    std::fs::remove_file(&log_path).ok();
}

#[test]
fn command_scripts_run_from_files() {
    let data = write_data_file("from_file_data.txt", "+1 a:1\n-1\n");
    let command_path = temp_path("command.json");
    std::fs::write(
        &command_path,
        serde_json::to_string(&fit(3)).unwrap(),
    )
    .unwrap();

    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("a")]),
            Command::FromFile(crossfeat::engine::command::FromFile {
                path: command_path.clone(),
            }),
        ])
        .unwrap();
    assert_eq!(engine.world().model.iteration_no, 3);

    std::fs::remove_file(&data).ok();
    std::fs::remove_file(&command_path).ok();
}

#[test]
fn holdout_set_is_tracked_separately() {
    let train = write_data_file("holdout_train.txt", "+1 a:1\n-1\n");
    let holdout = write_data_file("holdout_eval.txt", "+1 a:1\n-1\n-1\n");

    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            Command::ReadData(ReadDataCommand {
                set: None,
                data_reader: Some(DataReaderConfig {
                    feature_specs: vec![bias_spec(), atom_spec("a")],
                    training_set: DataSetFiles {
                        files: vec![train.clone()],
                        filter_features: vec![],
                    },
                    holdout_set: DataSetFiles {
                        files: vec![holdout.clone()],
                        filter_features: vec![],
                    },
                    ..Default::default()
                }),
            }),
            fit(5),
        ])
        .unwrap();

    let world = engine.world();
    assert_eq!(world.data.training().stats().row_count(), 2);
    assert_eq!(world.data.holdout().stats().row_count(), 3);
    let record = world.gradboost.last_iteration();
    let holdout_stats = record.holdout_data_stats.as_ref().unwrap();
    assert_eq!(holdout_stats.size, 3);
    assert!(holdout_stats.loss.is_some());

    std::fs::remove_file(&train).ok();
    std::fs::remove_file(&holdout).ok();
}
