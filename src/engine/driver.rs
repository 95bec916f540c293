//! The command driver.

use rand::Rng;

use crate::engine::command::{
    Command, ReadDataCommand, ScoreRowsSet, SetConfig, WriteModelSet,
};
use crate::engine::{EngineError, Validator};
use crate::eval::auc_and_lift;
use crate::explore;
use crate::features::JProduct;
use crate::io::{
    build_data_score, build_model_weights, write_model_file, write_scores_file,
    ReadDataSetConfig,
};
use crate::logging::{DataSetStats, IterationRecord, LiftRecord, LogLine, ModelRecord};
use crate::world::World;

/// Owns the [`World`] and executes command scripts against it.
pub struct Engine {
    world: World,
    run_id: u64,
    lift_fractions: Vec<f64>,
    read_data_set: ReadDataSetConfig,
    write_model_set: WriteModelSet,
    score_rows_set: ScoreRowsSet,
    stored_models: Vec<ModelRecord>,
    output_model: Option<ModelRecord>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut world = World::new();
        world.gradboost.set_inertia_factor(1.0);
        world.gradboost.set_step_multiplier(1.0);
        let run_id: u64 = rand::thread_rng().gen();
        world.logger.set_run_id(run_id);
        Self {
            world,
            run_id,
            lift_fractions: Vec::new(),
            read_data_set: ReadDataSetConfig::default(),
            write_model_set: WriteModelSet::default(),
            score_rows_set: ScoreRowsSet::default(),
            stored_models: Vec::new(),
            output_model: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The model produced by a `write_model` without an output path.
    pub fn output_model(&self) -> Option<&ModelRecord> {
        self.output_model.as_ref()
    }

    pub fn run_script(&mut self, commands: &[Command]) -> Result<(), EngineError> {
        for command in commands {
            self.run_command(command)?;
        }
        Ok(())
    }

    pub fn run_command(&mut self, command: &Command) -> Result<(), EngineError> {
        self.world
            .logger
            .add_to_logs(LogLine::Command(serde_json::to_value(command)?));
        tracing::debug!(command = ?command, "run_command");
        Validator::validate(command).map_err(EngineError::Config)?;

        match command {
            Command::Set(set) => self.set(set)?,
            Command::ReadData(read_data) => self.read_data(read_data)?,
            Command::InitializeBias => self.initialize_bias()?,
            Command::AddNewProductFeatures(cmd) => {
                let record = explore::add_new_product_features(
                    &mut self.world,
                    &cmd.feature_exploration,
                );
                self.world.logger.add_to_logs(LogLine::Exploration(record));
            }
            Command::PruneFeatures(cmd) => {
                let record =
                    explore::prune_features(&mut self.world, &cmd.feature_pruning);
                self.world.logger.add_to_logs(LogLine::Pruning(record));
            }
            Command::FitModelWeights(cmd) => self.world.fit_model_weights(cmd.iterations),
            Command::RunSgd(cmd) => self.world.run_sgd(cmd.iterations, cmd.only_new_features),
            Command::Sgd(cmd) => self.world.sgd_learning_rate_command(&cmd.learning_rate),
            Command::EvaluateStats(cmd) => {
                if cmd.auc {
                    self.evaluate_auc();
                }
            }
            Command::StoreModel => {
                let model = self.build_model()?;
                self.stored_models.push(model);
            }
            Command::WriteModel(cmd) => {
                if let Some(set) = &cmd.set {
                    merge_write_model_set(&mut self.write_model_set, set);
                }
                if cmd.write {
                    self.write_model()?;
                }
            }
            Command::GetModel => {
                let model = self.build_model()?;
                self.world.logger.add_to_logs(LogLine::Model(model));
            }
            Command::Repeat(repeat) => {
                for _ in 0..repeat.repetitions {
                    self.run_script(&repeat.commands)?;
                }
            }
            Command::Internal(internal) => self.internal(*internal)?,
            Command::FromFile(from_file) => {
                let contents = std::fs::read_to_string(&from_file.path)?;
                let command: Command = serde_json::from_str(&contents)?;
                self.run_command(&command)?;
            }
            Command::CommandList(list) => self.run_script(&list.commands)?,
            Command::ScoreRows(cmd) => {
                if let Some(set) = &cmd.set {
                    if set.output_path.is_some() {
                        self.score_rows_set.output_path = set.output_path.clone();
                    }
                    if set.format.is_some() {
                        self.score_rows_set.format = set.format;
                    }
                }
                if cmd.write_scores {
                    self.write_scores()?;
                }
            }
        }
        Ok(())
    }

    fn set(&mut self, set: &SetConfig) -> Result<(), EngineError> {
        if let Some(logging) = &set.logging {
            if let Some(log_timestamp) = logging.log_timestamp {
                self.world.logger.set_log_timestamp(log_timestamp);
            }
            if let Some(path) = &logging.text_log_path {
                self.world
                    .logger
                    .set_text_log_path(path, logging.clear_log_files)?;
            }
            if let Some(path) = &logging.record_log_path {
                self.world
                    .logger
                    .set_record_log_path(path, logging.clear_log_files)?;
            }
        }

        {
            let regularizations = &mut self.world.regularizations;
            if let Some(config) = &set.regularization {
                let mut term = *regularizations.base();
                config.apply_to(&mut term);
                regularizations.set_base(term);
            }
            if let Some(config) = &set.regularization_div_sqrt_n {
                let mut term = *regularizations.div_sqrt_n();
                config.apply_to(&mut term);
                regularizations.set_div_sqrt_n(term);
            }
            if let Some(config) = &set.regularization_mul_sqrt_n {
                let mut term = *regularizations.mul_sqrt_n();
                config.apply_to(&mut term);
                regularizations.set_mul_sqrt_n(term);
            }
            if let Some(config) = &set.regularization_confidence {
                let mut term = *regularizations.confidence();
                config.apply_to(&mut term);
                regularizations.set_confidence(term);
            }
        }

        if let Some(inertia_factor) = set.inertia_factor {
            self.world.gradboost.set_inertia_factor(inertia_factor);
        }
        if let Some(step_multiplier) = set.step_multiplier {
            self.world.gradboost.set_step_multiplier(step_multiplier);
        }
        if let Some(allow_undo) = set.allow_undo {
            self.world.gradboost.set_allow_undo(allow_undo);
        }
        if !set.logged_lift_fraction.is_empty() {
            self.lift_fractions
                .extend_from_slice(&set.logged_lift_fraction);
            self.lift_fractions
                .sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        }
        if let Some(schedule) = &set.sgd_learning_rate_schedule {
            self.world
                .sgd
                .set_learning_rate_schedule(schedule.start_learning_rate, schedule.decay_speed);
        }
        if let Some(deterministic) = set.deterministic {
            self.world.deterministic = deterministic;
            self.world
                .logger
                .set_run_id(if deterministic { 0 } else { self.run_id });
            if deterministic {
                self.world.logger.set_log_timestamp(false);
            }
        }
        if let Some(max_shard_size) = set.max_shard_size {
            self.world.data.set_max_shard_size(max_shard_size);
        }
        Ok(())
    }

    fn read_data(&mut self, read_data: &ReadDataCommand) -> Result<(), EngineError> {
        if let Some(set) = &read_data.set {
            if set.output_feature.is_some() {
                self.read_data_set.output_feature = set.output_feature.clone();
            }
        }
        if let Some(data_reader) = &read_data.data_reader {
            crate::io::read_data_files(&mut self.world, data_reader, &self.read_data_set)?;
        }
        Ok(())
    }

    fn initialize_bias(&mut self) -> Result<(), EngineError> {
        let bias_j = self
            .world
            .product_map
            .lookup(&JProduct::bias())
            .ok_or_else(|| {
                EngineError::Structural(
                    "asked to initialize_bias, but there is no bias feature".to_owned(),
                )
            })?;
        self.world.model.w[bias_j as usize] =
            self.world.data.training().stats().log_odds(bias_j);
        self.world.model.synced_with_weights = false;
        Ok(())
    }

    fn evaluate_auc(&mut self) {
        self.world.sync_model();
        let mut record = IterationRecord {
            index: self.world.model.iteration_no,
            ..Default::default()
        };
        record.training_data_stats = auc_stats(
            &self.world,
            true,
            &self.lift_fractions,
        );
        if self.world.data.holdout().stats().row_count() > 0 {
            record.holdout_data_stats =
                Some(auc_stats(&self.world, false, &self.lift_fractions));
        }
        self.world.logger.add_to_logs(LogLine::Iteration(record));
    }

    fn build_model(&mut self) -> Result<ModelRecord, EngineError> {
        if self.world.model.is_empty() {
            return Err(EngineError::Structural(
                "cannot build a model with no weights".to_owned(),
            ));
        }
        self.world.sync_model();
        Ok(ModelRecord {
            last_iteration: Some(self.world.gradboost.last_iteration().clone()),
            weights: build_model_weights(&self.world),
            internals: None,
        })
    }

    fn select_model(&mut self) -> Result<ModelRecord, EngineError> {
        if self.write_model_set.select_best_stored.unwrap_or(false) {
            if self.stored_models.is_empty() {
                return Err(EngineError::Structural(
                    "select_best_stored requires at least one stored model".to_owned(),
                ));
            }
            let regularization_l0 = self.write_model_set.regularization_l0.unwrap_or(0.0);
            let best = self
                .stored_models
                .iter()
                .max_by(|a, b| {
                    stored_model_eval(a, regularization_l0)
                        .partial_cmp(&stored_model_eval(b, regularization_l0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("stored models non-empty");
            Ok(best.clone())
        } else {
            self.build_model()
        }
    }

    fn write_model(&mut self) -> Result<(), EngineError> {
        let model = self.select_model()?;
        // The write event is logged with the model's final iteration
        // summary; weights go to the file, not the log.
        self.world.logger.add_to_logs(LogLine::Model(ModelRecord {
            last_iteration: model.last_iteration.clone(),
            weights: Vec::new(),
            internals: None,
        }));

        match self.write_model_set.output_model_path.clone() {
            None => {
                self.output_model = Some(model);
            }
            Some(path) => {
                let format = self.write_model_set.format.ok_or_else(|| {
                    EngineError::Structural("write_model format not set".to_owned())
                })?;
                write_model_file(&path, format, &model)?;
            }
        }
        Ok(())
    }

    fn write_scores(&mut self) -> Result<(), EngineError> {
        self.world.sync_model();
        let record = build_data_score(&self.world);
        let path = self.score_rows_set.output_path.clone().ok_or_else(|| {
            EngineError::Structural("score_rows output path not set".to_owned())
        })?;
        let format = self.score_rows_set.format.ok_or_else(|| {
            EngineError::Structural("score_rows output format not set".to_owned())
        })?;
        write_scores_file(&path, format, &record)?;
        Ok(())
    }

    fn internal(
        &mut self,
        command: crate::engine::command::InternalCommand,
    ) -> Result<(), EngineError> {
        use crate::engine::command::InternalCommand;
        match command {
            InternalCommand::GetModel => {
                let record = ModelRecord {
                    last_iteration: None,
                    weights: Vec::new(),
                    internals: Some(self.world.model.internals()),
                };
                self.world.logger.add_to_logs(LogLine::Model(record));
            }
            InternalCommand::GetScores => {
                self.world.sync_model();
                let record = build_data_score(&self.world);
                self.world.logger.add_to_logs(LogLine::DataScore(record));
            }
        }
        Ok(())
    }
}

fn auc_stats(world: &World, training: bool, lift_fractions: &[f64]) -> DataSetStats {
    let (shard_set, per_shard) = if training {
        (world.data.training(), &world.model.training)
    } else {
        (world.data.holdout(), &world.model.holdout)
    };
    let (auc, lift_values) = auc_and_lift(shard_set, &per_shard.wxs, lift_fractions);
    DataSetStats {
        size: shard_set.stats().row_count(),
        loss: None,
        dloss: None,
        auc: Some(auc),
        lift: lift_fractions
            .iter()
            .zip(lift_values)
            .map(|(&lift_fraction, lift_value)| LiftRecord {
                lift_fraction,
                lift_value,
            })
            .collect(),
    }
}

/// Higher is better: negated total loss plus an L0 penalty on rule count.
fn stored_model_eval(model: &ModelRecord, regularization_l0: f64) -> f64 {
    let iteration = model.last_iteration.as_ref();
    let total_loss = iteration
        .and_then(|i| i.total_loss)
        .unwrap_or(f64::INFINITY);
    let rule_count = iteration
        .map(|i| i.weight_stats.nonzero_count)
        .unwrap_or(0) as f64;
    -(total_loss + rule_count * regularization_l0)
}

fn merge_write_model_set(state: &mut WriteModelSet, update: &WriteModelSet) {
    if update.output_model_path.is_some() {
        state.output_model_path = update.output_model_path.clone();
    }
    if update.format.is_some() {
        state.format = update.format;
    }
    if update.select_best_stored.is_some() {
        state.select_best_stored = update.select_best_stored;
    }
    if update.regularization_l0.is_some() {
        state.regularization_l0 = update.regularization_l0;
    }
}
