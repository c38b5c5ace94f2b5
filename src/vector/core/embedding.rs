//! Embedding element types and raw byte encoding.
//!
//! Segments store embeddings as raw little-endian element bytes, so every
//! embedding of an index occupies exactly `dimension * element_size` bytes.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSegError};

/// Numeric type of each embedding element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    #[default]
    Float32,
    Int8,
}

impl ElementType {
    /// Bytes per element.
    pub fn byte_size(self) -> usize {
        match self {
            ElementType::Float32 => 4,
            ElementType::Int8 => 1,
        }
    }

    /// Bytes of one embedding of `dimension` elements.
    pub fn embedding_bytes(self, dimension: usize) -> usize {
        self.byte_size() * dimension
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Int8 => "int8",
        }
    }

    /// Encode float values into raw element bytes.
    ///
    /// Int8 values are rounded and saturated to `[-128, 127]`.
    pub fn encode(self, values: &[f32]) -> Vec<u8> {
        match self {
            ElementType::Float32 => {
                let mut bytes = vec![0u8; values.len() * 4];
                LittleEndian::write_f32_into(values, &mut bytes);
                bytes
            }
            ElementType::Int8 => values
                .iter()
                .map(|v| (v.round().clamp(-128.0, 127.0) as i8) as u8)
                .collect(),
        }
    }

    /// Decode raw element bytes into float values.
    pub fn decode(self, bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
        let expected = self.embedding_bytes(dimension);
        if bytes.len() != expected {
            return Err(VecSegError::invalid_operation(format!(
                "embedding has {} bytes, expected {} ({} x {})",
                bytes.len(),
                expected,
                dimension,
                self.name()
            )));
        }

        let mut values = vec![0.0f32; dimension];
        self.decode_into(bytes, &mut values);
        Ok(values)
    }

    /// Decode into a caller-provided slice of matching length.
    pub fn decode_into(self, bytes: &[u8], out: &mut [f32]) {
        match self {
            ElementType::Float32 => LittleEndian::read_f32_into(bytes, out),
            ElementType::Int8 => {
                for (slot, &b) in out.iter_mut().zip(bytes) {
                    *slot = (b as i8) as f32;
                }
            }
        }
    }
}

/// One embedding value in its native element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Embedding {
    F32(Vec<f32>),
    I8(Vec<i8>),
}

impl Embedding {
    pub fn element_type(&self) -> ElementType {
        match self {
            Embedding::F32(_) => ElementType::Float32,
            Embedding::I8(_) => ElementType::Int8,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Embedding::F32(v) => v.len(),
            Embedding::I8(v) => v.len(),
        }
    }

    /// Raw little-endian bytes as stored in buffers and segment files.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Embedding::F32(v) => ElementType::Float32.encode(v),
            Embedding::I8(v) => v.iter().map(|&x| x as u8).collect(),
        }
    }

    /// Rebuild an embedding from raw bytes.
    pub fn from_bytes(element_type: ElementType, bytes: &[u8], dimension: usize) -> Result<Self> {
        let values = element_type.decode(bytes, dimension)?;
        Ok(match element_type {
            ElementType::Float32 => Embedding::F32(values),
            ElementType::Int8 => Embedding::I8(values.into_iter().map(|v| v as i8).collect()),
        })
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Embedding::F32(v) => v.clone(),
            Embedding::I8(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Check this embedding against an index's dimension and element type.
    pub fn check(&self, dimension: usize, element_type: ElementType) -> Result<()> {
        if self.element_type() != element_type {
            return Err(VecSegError::invalid_operation(format!(
                "embedding element type {} does not match index type {}",
                self.element_type().name(),
                element_type.name()
            )));
        }
        if self.dimension() != dimension {
            return Err(VecSegError::invalid_operation(format!(
                "embedding dimension {} does not match index dimension {}",
                self.dimension(),
                dimension
            )));
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding::F32(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float32_bytes() {
        let embedding = Embedding::F32(vec![1.0, -2.5, 0.25]);
        let bytes = embedding.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());

        let decoded = Embedding::from_bytes(ElementType::Float32, &bytes, 3).unwrap();
        assert_eq!(decoded, embedding);
    }

    #[test]
    fn test_int8_saturates() {
        let bytes = ElementType::Int8.encode(&[300.0, -300.0, 1.4]);
        assert_eq!(bytes, vec![127u8, 128u8, 1u8]);
        let values = ElementType::Int8.decode(&bytes, 3).unwrap();
        assert_eq!(values, vec![127.0, -128.0, 1.0]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(ElementType::Float32.decode(&[0u8; 7], 2).is_err());
    }

    #[test]
    fn test_check() {
        let embedding = Embedding::I8(vec![1, 2]);
        assert!(embedding.check(2, ElementType::Int8).is_ok());
        assert!(embedding.check(3, ElementType::Int8).is_err());
        assert!(embedding.check(2, ElementType::Float32).is_err());
    }
}
