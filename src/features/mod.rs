//! The feature universe: names, products, index maps and renumbering.
//!
//! Every feature known to the engine - atomic or cross - is assigned a dense
//! 32-bit index called `J`. Atomic string features live in their own index
//! space inside [`FeatureMap`]; cross features ([`JProduct`]) live in the
//! engine-wide index space managed by [`ProductMap`], which is the space data
//! rows, model weights and the dependees graph are expressed in.

mod bimap;
mod name;
mod product;
mod renumbering;

pub use bimap::{FeatureBimap, FeatureKey, FeatureMap, ProductMap};
pub use name::FeatureName;
pub use product::JProduct;
pub use renumbering::Renumbering;

/// Dense feature index. Spans `[0, j_size)` with no gaps after sync.
pub type J = u32;

/// Reserved sentinel; never a valid feature index. Used as a tombstone
/// during renumbering.
pub const INVALID_J: J = u32::MAX;

/// Reserved sentinel; never a valid row id.
pub const INVALID_ROW_ID: u32 = u32::MAX;
