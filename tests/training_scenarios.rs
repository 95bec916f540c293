//! End-to-end training scenarios driven through the command engine.

mod common;

use common::*;
use crossfeat::engine::command::{Command, RegularizationConfig, RunSgd, SetConfig, SgdCommand};
use crossfeat::features::JProduct;
use crossfeat::training::LearningRateCommand;
use crossfeat::Engine;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One `+1` row with no features and only the bias product. A single
/// unregularized iteration pushes the predicted probability close to one;
/// a hundred iterations push the bias weight past 4.
#[test]
fn bias_only_single_row() {
    let data = write_data_file("bias_only.txt", "+1\n");
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec()]),
            fit(1),
        ])
        .unwrap();

    let bias_j = engine
        .world()
        .product_map
        .lookup(&JProduct::bias())
        .unwrap();
    let w_bias = engine.world().model.w[bias_j as usize];
    assert!(
        sigmoid(w_bias) > 0.85,
        "after one iteration sigma(w0) = {}",
        sigmoid(w_bias)
    );

    engine.run_script(&[fit(99)]).unwrap();
    let w_bias = engine.world().model.w[bias_j as usize];
    assert!(w_bias > 4.0, "after 100 iterations w0 = {w_bias}");

    std::fs::remove_file(&data).ok();
}

/// Rows `+1 a` and `-1` (empty). The feature `a` perfectly identifies the
/// positive row, so w_a ends positive and the bias negative.
#[test]
fn two_perfectly_correlated_features() {
    let data = write_data_file("correlated.txt", "+1 a:1\n-1\n");
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![bias_spec(), atom_spec("a")]),
            fit(50),
        ])
        .unwrap();

    let world = engine.world();
    let bias_j = world.product_map.lookup(&JProduct::bias()).unwrap();
    let atom_a = world.feature_map.lookup(&"a".into()).unwrap();
    let a_j = world.product_map.lookup(&JProduct::new(vec![atom_a])).unwrap();

    let w_bias = world.model.w[bias_j as usize];
    let w_a = world.model.w[a_j as usize];
    assert!(w_a > 0.0, "w_a = {w_a}");
    assert!(w_bias < 0.0, "w_bias = {w_bias}");
    // The +1 row's margin is the sum of both weights and must point the
    // right way.
    assert!(w_a + w_bias > 0.0);

    std::fs::remove_file(&data).ok();
}

/// Same data, but L1 large enough to dominate every gradient: all weights
/// stay exactly zero.
#[test]
fn huge_l1_zeroes_every_weight() {
    let data = write_data_file("l1_zero.txt", "+1 a:1\n-1\n");
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            Command::Set(SetConfig {
                regularization: Some(RegularizationConfig {
                    l1: Some(1000.0),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            read_data_command(&data, vec![bias_spec(), atom_spec("a")]),
            fit(1),
        ])
        .unwrap();

    for &w in engine.world().model.w.iter() {
        assert_eq!(w, 0.0);
    }
    std::fs::remove_file(&data).ok();
}

/// Contradictory rows make any large SGD step hurt: after storing the
/// optimal loss and taking one oversized pass, `maybe_reduce` halves the
/// start learning rate exactly once.
#[test]
fn sgd_reduces_learning_rate_once() {
    let data = write_data_file("sgd_reduce.txt", "+1 a:1\n-1 a:1\n");
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            read_data_command(&data, vec![atom_spec("a")]),
            sgd_schedule(10.0, 0.0),
            // w = 0 is optimal here; fitting once keeps it there and syncs.
            fit(1),
            Command::Sgd(SgdCommand {
                learning_rate: LearningRateCommand::StoreTotalLoss,
            }),
            Command::RunSgd(RunSgd {
                iterations: 1,
                only_new_features: false,
            }),
            Command::Sgd(SgdCommand {
                learning_rate: LearningRateCommand::MaybeReduce { factor: 0.5 },
            }),
        ])
        .unwrap();
    assert_eq!(engine.world().sgd.start_learning_rate(), Some(5.0));

    std::fs::remove_file(&data).ok();
}

/// Two deterministic runs of the same script produce bit-identical
/// weights.
#[test]
fn deterministic_runs_are_bit_identical() {
    let contents = "+1 a:1 b:1\n-1 a:1\n-1 b:1\n+1 a:1 b:1\n-1\n+1 a:1\n";
    let run = || {
        let data = write_data_file("det.txt", contents);
        let mut engine = Engine::new();
        engine
            .run_script(&[
                deterministic(),
                read_data_command(&data, vec![bias_spec(), atom_spec("")]),
                fit(5),
                sgd_schedule(0.1, 1.0),
                Command::RunSgd(RunSgd {
                    iterations: 3,
                    only_new_features: false,
                }),
                fit(2),
            ])
            .unwrap();
        let bits: Vec<u64> = engine.world().model.w.iter().map(|w| w.to_bits()).collect();
        std::fs::remove_file(&data).ok();
        bits
    };
    assert_eq!(run(), run());
}

/// Fitting with no data at all must not panic; the loss is zero.
#[test]
fn empty_training_set_is_harmless() {
    let mut engine = Engine::new();
    engine.run_script(&[deterministic(), fit(2)]).unwrap();
    assert_eq!(engine.world().model.size(), 0);
    assert_eq!(engine.world().model.total_loss, 0.0);
}

/// Undo: when a loss regression is provoked, the iteration is reverted and
/// the weights restored.
#[test]
fn undo_reverts_a_regressing_step() {
    let data = write_data_file("undo.txt", "+1 a:1\n-1 a:1\n+1\n");
    let mut engine = Engine::new();
    engine
        .run_script(&[
            deterministic(),
            Command::Set(SetConfig {
                allow_undo: Some(true),
                // An aggressive step multiplier overshoots on purpose.
                step_multiplier: Some(8.0),
                inertia_factor: Some(0.0),
                ..Default::default()
            }),
            read_data_command(&data, vec![bias_spec(), atom_spec("a")]),
            fit(6),
        ])
        .unwrap();
    // Training survived the overshoot: the loss is finite and the model
    // synced.
    assert!(engine.world().model.synced_with_weights);
    assert!(engine.world().model.total_loss.is_finite());
    std::fs::remove_file(&data).ok();
}
