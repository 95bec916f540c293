//! crossfeat: logistic regression over boolean feature crosses.
//!
//! A single-machine training engine for sparse ±1-labeled data. Atomic
//! string features are interned into a dense index space; conjunction
//! (cross) features are built on demand between fitting rounds, scored,
//! and pruned again. Weights are fit under elastic-net regularization by
//! either a quadratic-majorizer batch optimizer or asynchronous SGD.
//!
//! # Key Types
//!
//! - [`Engine`] / [`Command`] - Script-driven training runs
//! - [`World`] - The aggregate owning maps, data, model and optimizers
//! - [`FeatureMap`] / [`ProductMap`] - Concurrent feature interning
//! - [`GradBoost`] / [`Sgd`] - The two optimizers
//!
//! # Training
//!
//! Build a script of [`Command`]s (read data, fit, explore, prune, write)
//! and feed it to [`Engine::run_script`]. See the `engine` module for the
//! full command set.

pub mod data;
pub mod engine;
pub mod eval;
pub mod explore;
pub mod features;
pub mod io;
pub mod logging;
pub mod model;
pub mod testing;
pub mod training;
pub mod utils;
pub mod world;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use engine::{Command, Engine, EngineError};
pub use features::{FeatureMap, FeatureName, JProduct, ProductMap, Renumbering, INVALID_J, J};
pub use model::Model;
pub use training::{GradBoost, Regularizations, Sgd};
pub use utils::{run_with_threads, Parallelism};
pub use world::World;
