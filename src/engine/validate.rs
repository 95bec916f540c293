//! Configuration validation.
//!
//! Every command is validated before execution; on any error the engine
//! refuses to run it. Nested command containers are validated recursively,
//! except `from_file` whose contents are only known at execution time.

use crate::engine::command::{Command, RegularizationConfig, SetConfig};
use crate::explore::{FeatureExplorationConfig, FeaturePruningConfig, FeatureScoringConfig};
use crate::training::LearningRateCommand;

#[derive(Default)]
pub struct Validator {
    errors: Vec<String>,
}

impl Validator {
    /// Validates a command tree; returns all collected errors.
    pub fn validate(command: &Command) -> Result<(), Vec<String>> {
        let mut validator = Validator::default();
        validator.command(command);
        if validator.errors.is_empty() {
            Ok(())
        } else {
            Err(validator.errors)
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn command(&mut self, command: &Command) {
        match command {
            Command::Set(set) => self.set(set),
            Command::AddNewProductFeatures(cmd) => {
                self.feature_exploration(&cmd.feature_exploration)
            }
            Command::PruneFeatures(cmd) => self.feature_pruning(&cmd.feature_pruning),
            Command::Sgd(cmd) => self.learning_rate_command(&cmd.learning_rate),
            Command::Repeat(repeat) => {
                for sub in &repeat.commands {
                    self.command(sub);
                }
            }
            Command::CommandList(list) => {
                for sub in &list.commands {
                    self.command(sub);
                }
            }
            _ => {}
        }
    }

    fn set(&mut self, set: &SetConfig) {
        if let Some(inertia_factor) = set.inertia_factor {
            if inertia_factor < 0.0 {
                self.error("inertia_factor must be non-negative");
            }
        }
        if let Some(step_multiplier) = set.step_multiplier {
            if step_multiplier < 1.0 {
                self.error("step_multiplier must be at least 1");
            }
        }
        if let Some(max_shard_size) = set.max_shard_size {
            if max_shard_size == 0 {
                self.error("max_shard_size must be positive");
            }
        }
        for &fraction in &set.logged_lift_fraction {
            if !(fraction > 0.0 && fraction <= 1.0) {
                self.error(format!(
                    "logged_lift_fraction must be in (0, 1], got {fraction}"
                ));
            }
        }
        for (name, regularization) in [
            ("regularization", &set.regularization),
            ("regularization_div_sqrt_n", &set.regularization_div_sqrt_n),
            ("regularization_mul_sqrt_n", &set.regularization_mul_sqrt_n),
            ("regularization_confidence", &set.regularization_confidence),
        ] {
            if let Some(regularization) = regularization {
                self.regularization(name, regularization);
            }
        }
        if let Some(schedule) = &set.sgd_learning_rate_schedule {
            if let Some(start) = schedule.start_learning_rate {
                if start <= 0.0 {
                    self.error("start_learning_rate must be positive");
                }
            }
            if let Some(decay) = schedule.decay_speed {
                if decay < 0.0 {
                    self.error("decay_speed must be non-negative");
                }
            }
        }
    }

    fn regularization(&mut self, name: &str, config: &RegularizationConfig) {
        for (field, value) in [
            ("l1", config.l1),
            ("l2", config.l2),
            ("l1_at_weight_zero", config.l1_at_weight_zero),
        ] {
            if let Some(value) = value {
                if value < 0.0 {
                    self.error(format!("{name}.{field} must be non-negative"));
                }
            }
        }
    }

    fn feature_scoring(&mut self, config: &FeatureScoringConfig) {
        if let Some(bonus) = &config.bonus {
            if bonus.factor < 0.0 {
                self.error("scoring bonus factor can't be negative");
            }
        }
    }

    fn feature_exploration(&mut self, config: &FeatureExplorationConfig) {
        self.feature_scoring(&config.feature_scoring);
        if let Some(max_product_size) = config.max_product_size {
            if max_product_size == 0 {
                self.error("max_product_size must be positive");
            }
        }
    }

    fn feature_pruning(&mut self, config: &FeaturePruningConfig) {
        self.feature_scoring(&config.feature_scoring);
        if let Some(top_fraction) = config.top_fraction {
            if !(0.0..=1.0).contains(&top_fraction) {
                self.error("top_fraction must be in [0, 1]");
            }
        }
        if config.score_threshold.is_none()
            && config.top_count.is_none()
            && config.top_fraction.is_none()
        {
            self.error(
                "at least one of {score_threshold, top_count, top_fraction} must be set",
            );
        }
    }

    fn learning_rate_command(&mut self, command: &LearningRateCommand) {
        if let LearningRateCommand::MaybeReduce { factor } = command {
            if !(*factor > 0.0 && *factor < 1.0) {
                self.error("maybe_reduce factor must be strictly between 0 and 1");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::{PruneFeatures, SgdCommand};

    #[test]
    fn valid_set_passes() {
        let command = Command::Set(SetConfig {
            inertia_factor: Some(0.0),
            step_multiplier: Some(1.0),
            logged_lift_fraction: vec![0.01, 1.0],
            ..Default::default()
        });
        assert!(Validator::validate(&command).is_ok());
    }

    #[test]
    fn negative_inertia_is_rejected() {
        let command = Command::Set(SetConfig {
            inertia_factor: Some(-0.1),
            ..Default::default()
        });
        assert!(Validator::validate(&command).is_err());
    }

    #[test]
    fn pruning_needs_a_bound() {
        let command = Command::PruneFeatures(PruneFeatures::default());
        let errors = Validator::validate(&command).unwrap_err();
        assert!(errors[0].contains("score_threshold"));
    }

    #[test]
    fn maybe_reduce_factor_must_be_a_proper_fraction() {
        for factor in [0.0, 1.0, 1.5, -0.5] {
            let command = Command::Sgd(SgdCommand {
                learning_rate: LearningRateCommand::MaybeReduce { factor },
            });
            assert!(Validator::validate(&command).is_err(), "factor {factor}");
        }
        let command = Command::Sgd(SgdCommand {
            learning_rate: LearningRateCommand::MaybeReduce { factor: 0.5 },
        });
        assert!(Validator::validate(&command).is_ok());
    }

    #[test]
    fn nested_commands_are_validated() {
        let command = Command::Repeat(crate::engine::command::Repeat {
            repetitions: 2,
            commands: vec![Command::Set(SetConfig {
                step_multiplier: Some(0.5),
                ..Default::default()
            })],
        });
        assert!(Validator::validate(&command).is_err());
    }
}
