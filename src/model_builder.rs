use bytes::Bytes;

use crate::model::{DataLocation, MemoryHandle, Model, Operand, OperandLifetime, OperandType, Operation, OperationType};
use crate::parser::operand_table::{encode_elements, ConstantElement};

/// Incremental construction of a `Model`, mostly for hosts and tests.
///
/// Constants added through the builder are copied into the model's
/// constant blob, each aligned to 4 bytes.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    model: Model,
    values: Vec<u8>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_operand(&mut self, operand_type: OperandType, dimensions: &[u32], lifetime: OperandLifetime, location: DataLocation) -> u32 {
        self.model.operands.push(Operand {
            operand_type,
            dimensions: dimensions.to_vec(),
            number_of_consumers: 0,
            scale: 0.0,
            zero_point: 0,
            lifetime,
            location,
        });
        (self.model.operands.len() - 1) as u32
    }

    /// Declare a model input; inputs are listed in the order they are added
    pub fn add_input(&mut self, operand_type: OperandType, dimensions: &[u32]) -> u32 {
        let index = self.push_operand(operand_type, dimensions, OperandLifetime::ModelInput, DataLocation::default());
        self.model.input_indexes.push(index);
        index
    }

    /// Declare a model output; outputs are listed in the order they are added
    pub fn add_output(&mut self, operand_type: OperandType, dimensions: &[u32]) -> u32 {
        let index = self.push_operand(operand_type, dimensions, OperandLifetime::ModelOutput, DataLocation::default());
        self.model.output_indexes.push(index);
        index
    }

    /// Declare a value produced and consumed inside the model
    pub fn add_temporary(&mut self, operand_type: OperandType, dimensions: &[u32]) -> u32 {
        self.push_operand(operand_type, dimensions, OperandLifetime::TemporaryVariable, DataLocation::default())
    }

    /// Declare an operand with an explicit lifetime and location
    pub fn add_operand(
        &mut self,
        operand_type: OperandType,
        dimensions: &[u32],
        lifetime: OperandLifetime,
        location: DataLocation,
    ) -> u32 {
        self.push_operand(operand_type, dimensions, lifetime, location)
    }

    /// Constant copied into the model's constant blob
    pub fn add_constant<T: ConstantElement>(&mut self, operand_type: OperandType, dimensions: &[u32], values: &[T]) -> u32 {
        while self.values.len() % 4 != 0 {
            self.values.push(0);
        }
        let data = encode_elements(values);
        let location = DataLocation {
            pool_index: 0,
            offset: self.values.len() as u32,
            length: data.len() as u32,
        };
        self.values.extend_from_slice(&data);
        self.push_operand(operand_type, dimensions, OperandLifetime::ConstantCopy, location)
    }

    pub fn add_i32(&mut self, value: i32) -> u32 {
        self.add_constant(OperandType::Int32, &[], &[value])
    }

    pub fn add_f32(&mut self, value: f32) -> u32 {
        self.add_constant(OperandType::Float32, &[], &[value])
    }

    pub fn add_bool(&mut self, value: bool) -> u32 {
        self.add_constant(OperandType::Bool, &[], &[u8::from(value)])
    }

    /// Constant that lives in memory pool `pool_index`
    pub fn add_reference(
        &mut self,
        operand_type: OperandType,
        dimensions: &[u32],
        pool_index: u32,
        offset: u32,
        length: u32,
    ) -> u32 {
        let location = DataLocation {
            pool_index,
            offset,
            length,
        };
        self.push_operand(operand_type, dimensions, OperandLifetime::ConstantReference, location)
    }

    /// Declare a memory pool; returns its pool index
    pub fn add_pool(&mut self, name: impl Into<String>, size: usize) -> u32 {
        self.model.pools.push(MemoryHandle {
            name: name.into(),
            size,
        });
        (self.model.pools.len() - 1) as u32
    }

    pub fn add_operation(&mut self, operation_type: OperationType, inputs: &[u32], outputs: &[u32]) -> &mut Self {
        self.model.operations.push(Operation {
            operation_type,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        self
    }

    /// Finish the model, filling in consumer counts
    pub fn build(mut self) -> Model {
        for operation in &self.model.operations {
            for &input in &operation.inputs {
                if let Some(operand) = self.model.operands.get_mut(input as usize) {
                    operand.number_of_consumers += 1;
                }
            }
        }
        self.model.operand_values = Bytes::from(self.values);
        self.model
    }
}
