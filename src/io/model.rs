//! Model files: writing, reading, and weight extraction.
//!
//! Two encodings of the same content: a pretty-printed JSON document
//! (`Text`) and a JSON-lines stream of weight records (`Serialized`). Zero
//! weights are omitted either way.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::io::{DataError, OutputFormat};
use crate::logging::{ModelRecord, ModelWeight};
use crate::world::World;

/// Extracts all non-zero weights with their factor names, ordered by
/// ascending weight. Maps must be synced.
pub fn build_model_weights(world: &World) -> Vec<ModelWeight> {
    let mut model_weights = Vec::new();
    for j in 0..world.product_map.len() {
        let weight = world.model.w[j as usize];
        if weight == 0.0 {
            continue;
        }
        model_weights.push(ModelWeight {
            features: world.j_to_product_names(j),
            weight,
        });
    }
    model_weights.sort_by(|a, b| {
        a.weight
            .partial_cmp(&b.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    model_weights
}

pub fn write_model_file(
    path: &Path,
    format: OutputFormat,
    model: &ModelRecord,
) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    match format {
        OutputFormat::Text => {
            let text = serde_json::to_string_pretty(model)?;
            file.write_all(text.as_bytes())?;
            file.write_all(b"\n")?;
        }
        OutputFormat::Serialized => {
            for weight in &model.weights {
                let line = serde_json::to_string(weight)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
        }
    }
    file.flush()
}

pub fn read_model_weights(
    path: &Path,
    format: OutputFormat,
) -> Result<Vec<ModelWeight>, DataError> {
    let io_err = |source| DataError::Io {
        path: path.to_owned(),
        source,
    };
    let parse_err = |e: serde_json::Error| DataError::ModelParse {
        path: path.to_owned(),
        message: e.to_string(),
    };
    match format {
        OutputFormat::Text => {
            let contents = std::fs::read_to_string(path).map_err(io_err)?;
            let model: ModelRecord = serde_json::from_str(&contents).map_err(parse_err)?;
            Ok(model.weights)
        }
        OutputFormat::Serialized => {
            let file = std::fs::File::open(path).map_err(io_err)?;
            let mut weights = Vec::new();
            for line in std::io::BufReader::new(file).lines() {
                let line = line.map_err(io_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                weights.push(serde_json::from_str(&line).map_err(parse_err)?);
            }
            Ok(weights)
        }
    }
}
