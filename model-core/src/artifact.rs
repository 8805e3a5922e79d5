//! Compact model artifact (`.sgm`)
//!
//! Single-file, flattened serialization of a trained autoencoder: magic,
//! format version, JSON metadata, a tensor table with stable input and
//! output descriptors, named weight blobs (f32 or symmetric int16), and
//! a CRC32 over everything after the magic.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::autoencoder::{Autoencoder, DenseLayer};
use crate::error::ModelError;
use crate::lstm::LstmLayer;

pub const MAGIC: [u8; 4] = *b"SGM1";
pub const FORMAT_VERSION: u16 = 1;

const FLAG_QUANTIZED: u16 = 0b1;

/// Stable index of the single input tensor descriptor.
pub const INPUT_TENSOR_INDEX: u32 = 0;
/// Stable index of the single output tensor descriptor.
pub const OUTPUT_TENSOR_INDEX: u32 = 1;

/// Min/max scaling parameters fitted on the training corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub min_val: f32,
    pub max_val: f32,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            min_val: 0.0,
            max_val: 1.0,
        }
    }
}

impl NormalizationParams {
    /// Fit over every scalar in the corpus.
    pub fn fit(corpus: &Array3<f32>) -> Self {
        let mut min_val = f32::INFINITY;
        let mut max_val = f32::NEG_INFINITY;
        for &v in corpus.iter() {
            min_val = min_val.min(v);
            max_val = max_val.max(v);
        }
        if !min_val.is_finite() || !max_val.is_finite() || min_val >= max_val {
            return Self::default();
        }
        Self { min_val, max_val }
    }

    /// Map a raw traffic value into [0, 1], clamping out-of-range input.
    pub fn normalize(&self, value: f32) -> f32 {
        let range = (self.max_val - self.min_val).max(1e-8);
        ((value - self.min_val) / range).clamp(0.0, 1.0)
    }
}

/// Metadata embedded in the artifact and in the directory export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub sequence_len: usize,
    pub hidden_size: usize,
    /// Calibrated anomaly threshold, normalized-MSE units.
    pub threshold: f32,
    pub normalization: NormalizationParams,
    pub trained_at: DateTime<Utc>,
}

/// Descriptor for an I/O tensor, queryable by its stable index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub index: u32,
    pub name: String,
    /// (batch, timesteps, features)
    pub shape: [usize; 3],
}

/// One named weight blob.
#[derive(Debug, Clone)]
pub struct WeightTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: WeightData,
}

#[derive(Debug, Clone)]
pub enum WeightData {
    F32(Vec<f32>),
    /// Symmetric int16 quantization: value = q * scale.
    Q16 { scale: f32, data: Vec<i16> },
}

impl WeightTensor {
    pub fn from_f32(name: &str, shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            name: name.to_string(),
            shape,
            data: WeightData::F32(values.to_vec()),
        }
    }

    pub fn quantize(name: &str, shape: Vec<usize>, values: &[f32]) -> Self {
        let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let scale = (max_abs / f32::from(i16::MAX)).max(1e-12);
        let data = values
            .iter()
            .map(|&v| (v / scale).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect();
        Self {
            name: name.to_string(),
            shape,
            data: WeightData::Q16 { scale, data },
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            WeightData::F32(d) => d.len(),
            WeightData::Q16 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the blob as f32, dequantizing if needed.
    pub fn dequantize(&self) -> Vec<f32> {
        match &self.data {
            WeightData::F32(d) => d.clone(),
            WeightData::Q16 { scale, data } => {
                data.iter().map(|&q| f32::from(q) * scale).collect()
            }
        }
    }
}

/// In-memory form of a `.sgm` file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub tensors: Vec<WeightTensor>,
    io: [TensorInfo; 2],
    quantized: bool,
}

impl Artifact {
    pub fn new(meta: ArtifactMeta, tensors: Vec<WeightTensor>, quantized: bool) -> Self {
        let shape = [1, meta.sequence_len, 1];
        let io = [
            TensorInfo {
                index: INPUT_TENSOR_INDEX,
                name: "traffic_sequence".to_string(),
                shape,
            },
            TensorInfo {
                index: OUTPUT_TENSOR_INDEX,
                name: "reconstruction".to_string(),
                shape,
            },
        ];
        Self {
            meta,
            tensors,
            io,
            quantized,
        }
    }

    pub fn is_quantized(&self) -> bool {
        self.quantized
    }

    pub fn input_info(&self) -> &TensorInfo {
        &self.io[0]
    }

    pub fn output_info(&self) -> &TensorInfo {
        &self.io[1]
    }

    /// Look up an I/O descriptor by its stable index.
    pub fn tensor_info(&self, index: u32) -> Option<&TensorInfo> {
        self.io.iter().find(|t| t.index == index)
    }

    pub fn tensor(&self, name: &str) -> Result<&WeightTensor, ModelError> {
        self.tensors
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ModelError::MissingTensor(name.to_string()))
    }

    /// Rebuild the autoencoder from the stored tensors.
    pub fn to_model(&self) -> Result<Autoencoder, ModelError> {
        let h = self.meta.hidden_size;
        let encoder = self.lstm_layer("encoder", 1, h)?;
        let decoder = self.lstm_layer("decoder", h, h)?;
        let output = DenseLayer {
            w: self.array2("output.w", (1, h))?,
            b: self.array1("output.b", 1)?,
        };
        Ok(Autoencoder {
            encoder,
            decoder,
            output,
        })
    }

    fn lstm_layer(
        &self,
        name: &str,
        input_size: usize,
        hidden_size: usize,
    ) -> Result<LstmLayer, ModelError> {
        Ok(LstmLayer {
            input_size,
            hidden_size,
            w_ih: self.array2(&format!("{name}.w_ih"), (4 * hidden_size, input_size))?,
            w_hh: self.array2(&format!("{name}.w_hh"), (4 * hidden_size, hidden_size))?,
            b: self.array1(&format!("{name}.b"), 4 * hidden_size)?,
        })
    }

    fn array2(&self, name: &str, shape: (usize, usize)) -> Result<Array2<f32>, ModelError> {
        let tensor = self.tensor(name)?;
        if tensor.shape != [shape.0, shape.1] {
            return Err(ModelError::ShapeMismatch {
                tensor: name.to_string(),
                expected: vec![shape.0, shape.1],
                got: tensor.shape.clone(),
            });
        }
        Array2::from_shape_vec(shape, tensor.dequantize()).map_err(|_| {
            ModelError::ShapeMismatch {
                tensor: name.to_string(),
                expected: vec![shape.0, shape.1],
                got: vec![tensor.len()],
            }
        })
    }

    fn array1(&self, name: &str, len: usize) -> Result<Array1<f32>, ModelError> {
        let tensor = self.tensor(name)?;
        if tensor.shape != [len] {
            return Err(ModelError::ShapeMismatch {
                tensor: name.to_string(),
                expected: vec![len],
                got: tensor.shape.clone(),
            });
        }
        Ok(Array1::from_vec(tensor.dequantize()))
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        let mut file = BufWriter::new(File::create(path)?);
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ModelError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        let flags = if self.quantized { FLAG_QUANTIZED } else { 0 };
        payload.extend_from_slice(&flags.to_le_bytes());

        let meta = serde_json::to_vec(&self.meta)?;
        payload.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        payload.extend_from_slice(&meta);

        payload.push(self.io.len() as u8);
        for info in &self.io {
            payload.extend_from_slice(&info.index.to_le_bytes());
            write_str(&mut payload, &info.name);
            for dim in info.shape {
                payload.extend_from_slice(&(dim as u32).to_le_bytes());
            }
        }

        payload.extend_from_slice(&(self.tensors.len() as u32).to_le_bytes());
        for tensor in &self.tensors {
            write_str(&mut payload, &tensor.name);
            payload.push(tensor.shape.len() as u8);
            for &dim in &tensor.shape {
                payload.extend_from_slice(&(dim as u32).to_le_bytes());
            }
            match &tensor.data {
                WeightData::F32(data) => {
                    payload.push(0);
                    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
                    for v in data {
                        payload.extend_from_slice(&v.to_le_bytes());
                    }
                }
                WeightData::Q16 { scale, data } => {
                    payload.push(1);
                    payload.extend_from_slice(&scale.to_le_bytes());
                    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
                    for q in data {
                        payload.extend_from_slice(&q.to_le_bytes());
                    }
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        writer.write_all(&MAGIC)?;
        writer.write_all(&payload)?;
        writer.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::ArtifactNotFound(path.display().to_string()));
        }
        let mut bytes = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
        Self::read_bytes(&bytes)
    }

    pub fn read_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        if bytes.len() < MAGIC.len() + 8 {
            return Err(ModelError::CorruptArtifact("truncated file".to_string()));
        }
        if bytes[..4] != MAGIC {
            return Err(ModelError::CorruptArtifact("bad magic".to_string()));
        }

        let (payload, crc_bytes) = bytes[4..].split_at(bytes.len() - 8);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(ModelError::CorruptArtifact("checksum mismatch".to_string()));
        }

        let mut reader = ByteReader::new(payload);

        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        let flags = reader.u16()?;
        let quantized = flags & FLAG_QUANTIZED != 0;

        let meta_len = reader.u32()? as usize;
        let meta: ArtifactMeta = serde_json::from_slice(reader.take(meta_len)?)?;

        let io_count = reader.u8()?;
        if io_count != 2 {
            return Err(ModelError::CorruptArtifact(format!(
                "expected 2 i/o descriptors, found {io_count}"
            )));
        }
        let mut io = Vec::with_capacity(2);
        for _ in 0..2 {
            let index = reader.u32()?;
            let name = reader.string()?;
            let shape = [
                reader.u32()? as usize,
                reader.u32()? as usize,
                reader.u32()? as usize,
            ];
            io.push(TensorInfo { index, name, shape });
        }
        if io[0].index != INPUT_TENSOR_INDEX || io[1].index != OUTPUT_TENSOR_INDEX {
            return Err(ModelError::CorruptArtifact(
                "i/o descriptor indices out of order".to_string(),
            ));
        }

        let tensor_count = reader.u32()? as usize;
        let mut tensors = Vec::with_capacity(tensor_count);
        for _ in 0..tensor_count {
            let name = reader.string()?;
            let rank = reader.u8()? as usize;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank {
                shape.push(reader.u32()? as usize);
            }
            let dtype = reader.u8()?;
            let data = match dtype {
                0 => {
                    let len = reader.u32()? as usize;
                    let mut data = Vec::with_capacity(len);
                    for _ in 0..len {
                        data.push(reader.f32()?);
                    }
                    WeightData::F32(data)
                }
                1 => {
                    let scale = reader.f32()?;
                    let len = reader.u32()? as usize;
                    let mut data = Vec::with_capacity(len);
                    for _ in 0..len {
                        data.push(reader.i16()?);
                    }
                    WeightData::Q16 { scale, data }
                }
                other => {
                    return Err(ModelError::CorruptArtifact(format!(
                        "unknown tensor dtype {other}"
                    )))
                }
            };
            tensors.push(WeightTensor { name, shape, data });
        }

        let io: [TensorInfo; 2] = [io[0].clone(), io[1].clone()];
        Ok(Self {
            meta,
            tensors,
            io,
            quantized,
        })
    }
}

fn write_str(payload: &mut Vec<u8>, s: &str) {
    payload.extend_from_slice(&(s.len() as u16).to_le_bytes());
    payload.extend_from_slice(s.as_bytes());
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ModelError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| ModelError::CorruptArtifact("unexpected end of artifact".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ModelError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ModelError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ModelError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, ModelError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i16(&mut self) -> Result<i16, ModelError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Result<String, ModelError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ModelError::CorruptArtifact("invalid tensor name".to_string()))
    }
}
