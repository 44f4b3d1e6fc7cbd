use std::fmt::Debug;

use bytes::Bytes;
use log::{debug, error, info};
use ndarray::{ArrayD, IxDyn};
use num_traits::{Num, NumCast};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::memory::pool::{slice_region, MemoryPoolSet};
use crate::model::{Model, Operand, OperandLifetime, OperandType};

/// Element types that can be read out of a constant operand's raw bytes
pub trait ConstantElement: Copy + Debug + Num + NumCast + Send + Sync + 'static {
    /// Size of one element in bytes
    const SIZE: usize;

    /// Decode one element from exactly `SIZE` native-endian bytes
    fn from_ne_slice(bytes: &[u8]) -> Self;

    /// Append the native-endian encoding of `self`
    fn write_ne(&self, out: &mut Vec<u8>);
}

macro_rules! impl_constant_element {
    ($($t:ty),*) => {
        $(
            impl ConstantElement for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }

                fn write_ne(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_constant_element!(f32, i32, u32, i64, u8);

/// Encode a slice of elements as native-endian bytes
pub fn encode_elements<T: ConstantElement>(values: &[T]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * T::SIZE);
    for value in values {
        value.write_ne(&mut out);
    }
    Bytes::from(out)
}

/// Resolved, runtime view of a model operand
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOperandInfo {
    /// Type as declared in the model
    pub declared_type: OperandType,
    /// Type after scalar promotion
    pub runtime_type: OperandType,
    pub dimensions: Vec<u32>,
    /// Byte length; 0 when not statically known
    pub length: usize,
    pub lifetime: OperandLifetime,
    pub scale: f32,
    pub zero_point: i32,
    pub number_of_consumers: u32,
    /// Backing bytes for constant operands, `None` for everything bound later
    pub buffer: Option<Bytes>,
}

impl RuntimeOperandInfo {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_constant(&self) -> bool {
        self.lifetime.is_constant()
    }

    /// Dimensions as `usize`, the form shape arithmetic works in
    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|&d| d as usize).collect()
    }
}

/// Shape reported back to the caller for each model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputShape {
    pub dimensions: Vec<u32>,
    pub is_sufficient: bool,
}

/// Runtime descriptors for every operand of a model.
///
/// Built once per model and never mutated afterwards; request buffers are
/// bound elsewhere.
#[derive(Debug, Clone)]
pub struct OperandTable {
    operands: Vec<RuntimeOperandInfo>,
    input_indexes: Vec<usize>,
    output_indexes: Vec<usize>,
}

impl OperandTable {
    /// Resolve every operand of `model`, materializing constant buffers
    pub fn resolve(model: &Model, pools: &MemoryPoolSet) -> Result<Self> {
        let mut operands = Vec::with_capacity(model.operands.len());

        for (index, operand) in model.operands.iter().enumerate() {
            let info = Self::resolve_operand(index, operand, model, pools).map_err(|e| {
                error!("Failed to resolve operand {}: {}", index, e);
                e
            })?;
            debug!(
                "Operand {}: {:?} -> {:?} {:?} {:?} ({} bytes)",
                index, info.declared_type, info.runtime_type, info.dimensions, info.lifetime, info.length
            );
            operands.push(info);
        }

        info!("Resolved {} operands", operands.len());

        Ok(Self {
            operands,
            input_indexes: model.input_indexes.iter().map(|&i| i as usize).collect(),
            output_indexes: model.output_indexes.iter().map(|&i| i as usize).collect(),
        })
    }

    fn resolve_operand(
        index: usize,
        operand: &Operand,
        model: &Model,
        pools: &MemoryPoolSet,
    ) -> Result<RuntimeOperandInfo> {
        let runtime_type = Self::runtime_type(index, operand)?;
        let location = &operand.location;

        let buffer = match operand.lifetime {
            OperandLifetime::TemporaryVariable
            | OperandLifetime::ModelInput
            | OperandLifetime::ModelOutput
            | OperandLifetime::NoValue => None,
            OperandLifetime::ConstantCopy => {
                if location.pool_index != 0 {
                    return Err(Error::InvalidModel(format!(
                        "constant copy operand {} names pool {}",
                        index, location.pool_index
                    )));
                }
                Some(slice_region(
                    &model.operand_values,
                    index,
                    location.offset as usize,
                    location.length as usize,
                )?)
            }
            OperandLifetime::ConstantReference => Some(pools.region(index, location)?),
            OperandLifetime::Other(code) => {
                return Err(Error::UnknownLifetime { index, lifetime: code });
            }
        };

        let length = match &buffer {
            Some(bytes) => {
                if let Some(expected) = operand.byte_size() {
                    if expected != bytes.len() {
                        return Err(Error::SizeMismatch {
                            index,
                            length: bytes.len(),
                            element_size: operand.operand_type.element_size().unwrap_or(0),
                        });
                    }
                }
                bytes.len()
            }
            None => operand.byte_size().unwrap_or(0),
        };

        Ok(RuntimeOperandInfo {
            declared_type: operand.operand_type,
            runtime_type,
            dimensions: operand.dimensions.clone(),
            length,
            lifetime: operand.lifetime,
            scale: operand.scale,
            zero_point: operand.zero_point,
            number_of_consumers: operand.number_of_consumers,
            buffer,
        })
    }

    /// Promote scalars to their tensor type and reject what the graph cannot carry
    fn runtime_type(index: usize, operand: &Operand) -> Result<OperandType> {
        let unsupported = || Error::UnsupportedOperandType {
            index,
            operand_type: operand.operand_type,
        };

        match operand.operand_type {
            OperandType::Float32 => Ok(OperandType::TensorFloat32),
            OperandType::Int32 | OperandType::Uint32 if operand.scale != 0.0 => Err(Error::InvalidModel(format!(
                "integer scalar operand {} carries a quantization scale",
                index
            ))),
            OperandType::Int32 => Ok(OperandType::TensorInt32),
            OperandType::Uint32 | OperandType::Bool => Ok(operand.operand_type),
            OperandType::TensorFloat32 | OperandType::TensorInt32 => Ok(operand.operand_type),
            quantized if quantized.is_quantized() => {
                debug!(
                    "Operand {} is quantized (scale {}, zero point {})",
                    index, operand.scale, operand.zero_point
                );
                Err(unsupported())
            }
            _ => Err(unsupported()),
        }
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn operands(&self) -> &[RuntimeOperandInfo] {
        &self.operands
    }

    /// Model input operand indices, in declaration order
    pub fn input_indexes(&self) -> &[usize] {
        &self.input_indexes
    }

    /// Model output operand indices, in declaration order
    pub fn output_indexes(&self) -> &[usize] {
        &self.output_indexes
    }

    pub fn operand(&self, index: usize) -> Result<&RuntimeOperandInfo> {
        self.operands
            .get(index)
            .ok_or_else(|| Error::InvalidModel(format!("operand index {} out of range", index)))
    }

    /// Backing bytes and length of an operand, dispatching on its lifetime.
    ///
    /// Request-bound operands report their static length with no buffer.
    pub fn operand_memory(&self, index: usize) -> Result<(Option<Bytes>, usize)> {
        let info = self.operand(index)?;
        match info.lifetime {
            OperandLifetime::ConstantCopy | OperandLifetime::ConstantReference => {
                Ok((info.buffer.clone(), info.length))
            }
            OperandLifetime::Other(code) => Err(Error::UnknownLifetime { index, lifetime: code }),
            _ => Ok((None, info.length)),
        }
    }

    fn constant_bytes(&self, index: usize) -> Result<&Bytes> {
        let info = self.operand(index)?;
        info.buffer
            .as_ref()
            .filter(|_| info.is_constant())
            .ok_or_else(|| Error::InvalidModel(format!("operand {} is not a constant", index)))
    }

    /// Reinterpret a constant operand's bytes as a sequence of `T`
    pub fn constant_buffer_as_vec<T: ConstantElement>(&self, index: usize) -> Result<Vec<T>> {
        let bytes = self.constant_bytes(index)?;
        if bytes.len() % T::SIZE != 0 {
            return Err(Error::SizeMismatch {
                index,
                length: bytes.len(),
                element_size: T::SIZE,
            });
        }
        Ok(bytes.chunks_exact(T::SIZE).map(T::from_ne_slice).collect())
    }

    /// Constant operand as an n-dimensional array shaped by its dimensions
    pub fn constant_as_array<T: ConstantElement>(&self, index: usize) -> Result<ArrayD<T>> {
        let values = self.constant_buffer_as_vec::<T>(index)?;
        let shape = self.operand(index)?.shape();
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| Error::InvalidModel(format!("constant operand {}: {}", index, e)))
    }

    /// Read a single constant scalar
    pub fn scalar<T: ConstantElement>(&self, index: usize) -> Result<T> {
        let bytes = self.constant_bytes(index)?;
        if bytes.len() != T::SIZE {
            return Err(Error::SizeMismatch {
                index,
                length: bytes.len(),
                element_size: T::SIZE,
            });
        }
        Ok(T::from_ne_slice(bytes))
    }

    /// One fully specified shape per model output
    pub fn output_shapes(&self) -> Vec<OutputShape> {
        self.output_indexes
            .iter()
            .filter_map(|&index| self.operands.get(index))
            .map(|info| OutputShape {
                dimensions: info.dimensions.clone(),
                is_sufficient: true,
            })
            .collect()
    }
}
