//! Directory export and compact-artifact conversion
//!
//! Two-stage deployment pipeline: a full directory export of the
//! computation graph plus weights, then conversion into the single
//! flattened `.sgm` file the server loads. Conversion refuses graphs
//! containing ops the compact runtime cannot execute.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactMeta, WeightTensor};
use crate::autoencoder::Autoencoder;
use crate::error::ModelError;
use crate::lstm::LstmLayer;

pub const GRAPH_FILE: &str = "graph.json";
pub const WEIGHTS_FILE: &str = "weights.bin";

const SAVED_FORMAT: &str = "smartguard-saved";

/// Ops the compact runtime can execute.
const SUPPORTED_OPS: [&str; 3] = ["lstm", "repeat_vector", "time_distributed_dense"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedGraph {
    pub format: String,
    pub version: u32,
    pub meta: ArtifactMeta,
    pub layers: Vec<SavedLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedLayer {
    pub op: String,
    pub name: String,
    #[serde(default)]
    pub steps: usize,
    #[serde(default)]
    pub tensors: Vec<SavedTensor>,
}

/// Slice of `weights.bin`, offsets in f32 units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// Quantize weights to int16 in the compact artifact.
    pub quantize: bool,
}

/// Write the full computation graph and weights under `dir`.
pub fn export_saved(model: &Autoencoder, meta: &ArtifactMeta, dir: &Path) -> Result<(), ModelError> {
    fs::create_dir_all(dir)?;

    let mut weights: Vec<f32> = Vec::new();
    let mut layers = Vec::new();

    layers.push(SavedLayer {
        op: "lstm".to_string(),
        name: "encoder".to_string(),
        steps: 0,
        tensors: lstm_tensors("encoder", &model.encoder, &mut weights),
    });
    layers.push(SavedLayer {
        op: "repeat_vector".to_string(),
        name: "repeat".to_string(),
        steps: meta.sequence_len,
        tensors: Vec::new(),
    });
    layers.push(SavedLayer {
        op: "lstm".to_string(),
        name: "decoder".to_string(),
        steps: 0,
        tensors: lstm_tensors("decoder", &model.decoder, &mut weights),
    });
    layers.push(SavedLayer {
        op: "time_distributed_dense".to_string(),
        name: "output".to_string(),
        steps: 0,
        tensors: vec![
            push_tensor(
                "output.w",
                vec![1, model.hidden_size()],
                model.output.w.iter().copied(),
                &mut weights,
            ),
            push_tensor(
                "output.b",
                vec![1],
                model.output.b.iter().copied(),
                &mut weights,
            ),
        ],
    });

    let graph = SavedGraph {
        format: SAVED_FORMAT.to_string(),
        version: 1,
        meta: meta.clone(),
        layers,
    };
    fs::write(dir.join(GRAPH_FILE), serde_json::to_vec_pretty(&graph)?)?;

    let mut bytes = Vec::with_capacity(weights.len() * 4);
    for v in &weights {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(dir.join(WEIGHTS_FILE), bytes)?;

    log::info!(
        "exported graph ({} layers, {} weights) to {}",
        graph.layers.len(),
        weights.len(),
        dir.display()
    );
    Ok(())
}

/// Convert a directory export into the compact artifact.
pub fn convert(dir: &Path, options: ConvertOptions) -> Result<Artifact, ModelError> {
    let graph_bytes = fs::read(dir.join(GRAPH_FILE))?;
    let graph: SavedGraph = serde_json::from_slice(&graph_bytes)?;
    if graph.format != SAVED_FORMAT {
        return Err(ModelError::CorruptArtifact(format!(
            "unexpected export format `{}`",
            graph.format
        )));
    }

    // An op the runtime cannot execute is a fatal conversion error, not
    // a silent degradation.
    for layer in &graph.layers {
        if !SUPPORTED_OPS.contains(&layer.op.as_str()) {
            return Err(ModelError::UnsupportedOp(layer.op.clone()));
        }
    }

    let weight_bytes = fs::read(dir.join(WEIGHTS_FILE))?;
    if weight_bytes.len() % 4 != 0 {
        return Err(ModelError::CorruptArtifact(
            "weights.bin length is not a multiple of 4".to_string(),
        ));
    }
    let weights: Vec<f32> = weight_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut tensors = Vec::new();
    for layer in &graph.layers {
        for saved in &layer.tensors {
            let end = saved
                .offset
                .checked_add(saved.len)
                .filter(|&e| e <= weights.len())
                .ok_or_else(|| {
                    ModelError::CorruptArtifact(format!(
                        "tensor `{}` is out of bounds of weights.bin",
                        saved.name
                    ))
                })?;
            let expected: usize = saved.shape.iter().product();
            if expected != saved.len {
                return Err(ModelError::CorruptArtifact(format!(
                    "tensor `{}` length {} does not match shape {:?}",
                    saved.name, saved.len, saved.shape
                )));
            }

            let values = &weights[saved.offset..end];
            let tensor = if options.quantize {
                WeightTensor::quantize(&saved.name, saved.shape.clone(), values)
            } else {
                WeightTensor::from_f32(&saved.name, saved.shape.clone(), values)
            };
            tensors.push(tensor);
        }
    }

    Ok(Artifact::new(graph.meta, tensors, options.quantize))
}

fn push_tensor(
    name: &str,
    shape: Vec<usize>,
    values: impl Iterator<Item = f32>,
    weights: &mut Vec<f32>,
) -> SavedTensor {
    let offset = weights.len();
    weights.extend(values);
    SavedTensor {
        name: name.to_string(),
        shape,
        offset,
        len: weights.len() - offset,
    }
}

fn lstm_tensors(prefix: &str, layer: &LstmLayer, weights: &mut Vec<f32>) -> Vec<SavedTensor> {
    vec![
        push_tensor(
            &format!("{prefix}.w_ih"),
            vec![4 * layer.hidden_size, layer.input_size],
            layer.w_ih.iter().copied(),
            weights,
        ),
        push_tensor(
            &format!("{prefix}.w_hh"),
            vec![4 * layer.hidden_size, layer.hidden_size],
            layer.w_hh.iter().copied(),
            weights,
        ),
        push_tensor(
            &format!("{prefix}.b"),
            vec![4 * layer.hidden_size],
            layer.b.iter().copied(),
            weights,
        ),
    ]
}
