//! Score output: `(row_id, w·x)` per data row.

use std::io::Write;
use std::path::Path;

use crate::data::ShardSet;
use crate::logging::{DataScoreRecord, RowScore};
use crate::model::PerShard;
use crate::io::OutputFormat;
use crate::world::World;

/// Collects scores for every row, training set first, then holdout. Rows
/// are identified by their user ids; the model must be synced so the
/// cached `w·x` values are current.
pub fn build_data_score(world: &World) -> DataScoreRecord {
    assert!(world.model.synced_with_weights);
    let mut record = DataScoreRecord::default();
    collect_shard_set(
        world.data.training(),
        &world.model.training,
        &mut record,
    );
    collect_shard_set(world.data.holdout(), &world.model.holdout, &mut record);
    record
}

fn collect_shard_set(shard_set: &ShardSet, per_shard: &PerShard, record: &mut DataScoreRecord) {
    let mut offset = 0usize;
    for shard in shard_set.shards() {
        let user_ids = shard.user_ids();
        for i in 0..shard.row_count() as usize {
            record.row_scores.push(RowScore {
                row_id: user_ids[i],
                wx: per_shard.wxs[offset],
            });
            offset += 1;
        }
    }
}

pub fn write_scores_file(
    path: &Path,
    format: OutputFormat,
    record: &DataScoreRecord,
) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    match format {
        OutputFormat::Text => {
            let text = serde_json::to_string_pretty(record)?;
            file.write_all(text.as_bytes())?;
            file.write_all(b"\n")?;
        }
        OutputFormat::Serialized => {
            for row_score in &record.row_scores {
                let line = serde_json::to_string(row_score)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
        }
    }
    file.flush()
}
