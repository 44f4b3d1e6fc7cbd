use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// Operand data types, numbered as in the Android NN HAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum OperandType {
    Float32,
    Int32,
    Uint32,
    TensorFloat32,
    TensorInt32,
    TensorQuant8Asymm,
    Bool,
    TensorQuant16Symm,
    TensorFloat16,
    TensorBool8,
    Float16,
    TensorQuant8SymmPerChannel,
    TensorQuant16Asymm,
    TensorQuant8Symm,
    Other(i32),
}

impl From<i32> for OperandType {
    fn from(code: i32) -> Self {
        match code {
            0 => OperandType::Float32,
            1 => OperandType::Int32,
            2 => OperandType::Uint32,
            3 => OperandType::TensorFloat32,
            4 => OperandType::TensorInt32,
            5 => OperandType::TensorQuant8Asymm,
            6 => OperandType::Bool,
            7 => OperandType::TensorQuant16Symm,
            8 => OperandType::TensorFloat16,
            9 => OperandType::TensorBool8,
            10 => OperandType::Float16,
            11 => OperandType::TensorQuant8SymmPerChannel,
            12 => OperandType::TensorQuant16Asymm,
            13 => OperandType::TensorQuant8Symm,
            other => OperandType::Other(other),
        }
    }
}

impl From<OperandType> for i32 {
    fn from(operand_type: OperandType) -> Self {
        match operand_type {
            OperandType::Float32 => 0,
            OperandType::Int32 => 1,
            OperandType::Uint32 => 2,
            OperandType::TensorFloat32 => 3,
            OperandType::TensorInt32 => 4,
            OperandType::TensorQuant8Asymm => 5,
            OperandType::Bool => 6,
            OperandType::TensorQuant16Symm => 7,
            OperandType::TensorFloat16 => 8,
            OperandType::TensorBool8 => 9,
            OperandType::Float16 => 10,
            OperandType::TensorQuant8SymmPerChannel => 11,
            OperandType::TensorQuant16Asymm => 12,
            OperandType::TensorQuant8Symm => 13,
            OperandType::Other(code) => code,
        }
    }
}

impl OperandType {
    /// Check if the type describes a single value rather than a tensor
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            OperandType::Float32
                | OperandType::Int32
                | OperandType::Uint32
                | OperandType::Bool
                | OperandType::Float16
        )
    }

    /// Check if the type is one of the quantized tensor types
    pub fn is_quantized(&self) -> bool {
        matches!(
            self,
            OperandType::TensorQuant8Asymm
                | OperandType::TensorQuant16Symm
                | OperandType::TensorQuant8SymmPerChannel
                | OperandType::TensorQuant16Asymm
                | OperandType::TensorQuant8Symm
        )
    }

    /// Size in bytes of one element of this type
    pub fn element_size(&self) -> Option<usize> {
        match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32 => Some(4),
            OperandType::TensorQuant16Symm
            | OperandType::TensorQuant16Asymm
            | OperandType::TensorFloat16
            | OperandType::Float16 => Some(2),
            OperandType::TensorQuant8Asymm
            | OperandType::TensorQuant8SymmPerChannel
            | OperandType::TensorQuant8Symm
            | OperandType::Bool
            | OperandType::TensorBool8 => Some(1),
            OperandType::Other(_) => None,
        }
    }
}

/// Storage lifetime of an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum OperandLifetime {
    TemporaryVariable,
    ModelInput,
    ModelOutput,
    ConstantCopy,
    ConstantReference,
    NoValue,
    Other(i32),
}

impl From<i32> for OperandLifetime {
    fn from(code: i32) -> Self {
        match code {
            0 => OperandLifetime::TemporaryVariable,
            1 => OperandLifetime::ModelInput,
            2 => OperandLifetime::ModelOutput,
            3 => OperandLifetime::ConstantCopy,
            4 => OperandLifetime::ConstantReference,
            5 => OperandLifetime::NoValue,
            other => OperandLifetime::Other(other),
        }
    }
}

impl From<OperandLifetime> for i32 {
    fn from(lifetime: OperandLifetime) -> Self {
        match lifetime {
            OperandLifetime::TemporaryVariable => 0,
            OperandLifetime::ModelInput => 1,
            OperandLifetime::ModelOutput => 2,
            OperandLifetime::ConstantCopy => 3,
            OperandLifetime::ConstantReference => 4,
            OperandLifetime::NoValue => 5,
            OperandLifetime::Other(code) => code,
        }
    }
}

impl OperandLifetime {
    pub fn is_constant(&self) -> bool {
        matches!(self, OperandLifetime::ConstantCopy | OperandLifetime::ConstantReference)
    }
}

/// Operation kinds understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum OperationType {
    Add,
    Concatenation,
    Conv2d,
    DepthwiseConv2d,
    FullyConnected,
    Relu,
    Reshape,
    Other(i32),
}

impl From<i32> for OperationType {
    fn from(code: i32) -> Self {
        match code {
            0 => OperationType::Add,
            2 => OperationType::Concatenation,
            3 => OperationType::Conv2d,
            4 => OperationType::DepthwiseConv2d,
            9 => OperationType::FullyConnected,
            19 => OperationType::Relu,
            22 => OperationType::Reshape,
            other => OperationType::Other(other),
        }
    }
}

impl From<OperationType> for i32 {
    fn from(operation_type: OperationType) -> Self {
        match operation_type {
            OperationType::Add => 0,
            OperationType::Concatenation => 2,
            OperationType::Conv2d => 3,
            OperationType::DepthwiseConv2d => 4,
            OperationType::FullyConnected => 9,
            OperationType::Relu => 19,
            OperationType::Reshape => 22,
            OperationType::Other(code) => code,
        }
    }
}

/// Activation fused onto the output of arithmetic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(i32)]
pub enum FusedActivation {
    #[strum(serialize = "none")]
    None = 0,
    #[strum(serialize = "relu")]
    Relu = 1,
    #[strum(serialize = "relu1")]
    Relu1 = 2,
    #[strum(serialize = "relu6")]
    Relu6 = 3,
}

/// Implicit padding schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(i32)]
pub enum PaddingScheme {
    #[strum(serialize = "same")]
    Same = 1,
    #[strum(serialize = "valid")]
    Valid = 2,
}

/// Where a constant operand's bytes live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLocation {
    pub pool_index: u32,
    pub offset: u32,
    pub length: u32,
}

/// An operand as declared by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operand {
    #[serde(rename = "type")]
    pub operand_type: OperandType,
    #[serde(default)]
    pub dimensions: Vec<u32>,
    #[serde(default)]
    pub number_of_consumers: u32,
    #[serde(default)]
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i32,
    pub lifetime: OperandLifetime,
    #[serde(default)]
    pub location: DataLocation,
}

impl Operand {
    /// Number of elements, or None if a tensor dimension is unspecified
    pub fn element_count(&self) -> Option<usize> {
        if self.operand_type.is_scalar() {
            return Some(1);
        }
        if self.dimensions.is_empty() || self.dimensions.contains(&0) {
            return None;
        }
        Some(self.dimensions.iter().map(|&d| d as usize).product())
    }

    /// Byte size implied by type and dimensions, when statically known
    pub fn byte_size(&self) -> Option<usize> {
        Some(self.element_count()? * self.operand_type.element_size()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

/// Opaque handle to a memory pool owned by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryHandle {
    pub name: String,
    pub size: usize,
}

/// A complete model: operands, operations and their backing memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub operands: Vec<Operand>,
    pub operations: Vec<Operation>,
    pub input_indexes: Vec<u32>,
    pub output_indexes: Vec<u32>,
    #[serde(default)]
    pub operand_values: Bytes,
    #[serde(default)]
    pub pools: Vec<MemoryHandle>,
}

impl Model {
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}
