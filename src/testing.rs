//! Test utilities: hand-built worlds without going through the reader.
//!
//! Usable from both unit tests and integration tests; not part of the
//! stable API.

use crate::data::{CooMatrix, CsrMatrix, ShardBuilder};
use crate::features::{FeatureName, JProduct, J};
use crate::world::World;

/// Builds a world whose product map holds one product per entry of
/// `products`, each listing indices into `atom_names`. Product `i` gets
/// `J = i`; an empty factor list is the bias.
pub fn world_with_products(atom_names: &[&str], products: &[&[usize]]) -> World {
    let mut world = World::new();
    let atom_js: Vec<J> = atom_names
        .iter()
        .map(|name| world.feature_map.intern(FeatureName::new(*name)))
        .collect();
    for factors in products {
        let js: Vec<J> = factors.iter().map(|&i| atom_js[i]).collect();
        world.product_map.intern(JProduct::new(js));
    }
    world.feature_map.sync_j_to_key();
    world.logger.set_log_timestamp(false);
    world
}

/// Appends training rows; each row lists product `J`s directly.
pub fn push_training_rows(world: &mut World, rows: &[(f64, &[J])]) {
    let mut builder = ShardBuilder::new(world.data.training().max_shard_size());
    let mut bool_feature_count = 0u64;
    for (i, (y, js)) in rows.iter().enumerate() {
        builder.add_row(js, *y, i as u32);
        bool_feature_count += js.len() as u64;
    }
    world
        .data
        .training_mut()
        .absorb(bool_feature_count, builder.into_shards());
}

/// Installs dependee edges `(parent, child)`.
pub fn set_dependees_edges(world: &mut World, edges: &[(J, J)]) {
    let mut coo = CooMatrix::default();
    coo.set_row_count(world.product_map.len());
    for &(parent, child) in edges {
        coo.set_true(parent, child);
    }
    coo.sort();
    world.data.set_dependees(CsrMatrix::from_coo(&coo));
}

/// Completes construction: syncs maps, sizes all components through the
/// world choke point and prepares the per-shard caches. Optimizer knobs get
/// the driver's startup defaults.
pub fn finish_world(world: &mut World) {
    let size = world.product_map.len();
    world.add_features(0, size);
    let training_rows = world.data.training().stats().row_count() as usize;
    let holdout_rows = world.data.holdout().stats().row_count() as usize;
    world.model.init_per_shards(training_rows, holdout_rows);
    world.gradboost.set_inertia_factor(1.0);
    world.gradboost.set_step_multiplier(1.0);
}
