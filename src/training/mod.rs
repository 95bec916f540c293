//! Training infrastructure: regularization, the majorizer-based batch
//! optimizer and asynchronous SGD.
//!
//! Two optimizers share the [`Model`](crate::model::Model) and the
//! [`Regularizations`] container:
//!
//! - [`GradBoost`]: batch coordinate updates on a per-coordinate quadratic
//!   upper bound of the logistic loss ([`Majorizer`]), with inertia, step
//!   scaling and undo-on-regression.
//! - [`Sgd`]: lock-free asynchronous stochastic gradient descent over row
//!   shards with a decaying learning rate and proximal L1/L2 shrinkage.

mod gradboost;
mod majorizer;
mod regularization;
mod sgd;

pub use gradboost::GradBoost;
pub use majorizer::{Dim1Majorizer, Majorizer};
pub use regularization::{RegularizationTerm, Regularizations};
pub use sgd::{LearningRateCommand, Sgd, SgdTrainingMode};
