use log::debug;

use crate::error::{Error, Result};
use crate::graph::NodeKind;
use crate::model::{OperandType, Operation, OperationType};
use crate::ops::common::{
    check_arity, expect_input_type, expect_output_type, input_index, input_operand, publish_output, rank_offset,
    reshape_to, resolve_input, scalar_input, unsqueeze_leading,
};
use crate::ops::registry::{GraphContext, Translator};
use crate::parser::operand_table::OperandTable;

const TENSOR_TYPES: [OperandType; 2] = [OperandType::TensorFloat32, OperandType::TensorInt32];

/// CONCATENATION of `n - 1` tensors along the axis held by the last input
#[derive(Debug, Clone, Default)]
pub struct ConcatTranslator;

impl ConcatTranslator {
    /// Axis normalised against the output rank
    fn axis(operation: &Operation, operands: &OperandTable) -> Result<usize> {
        let axis_slot = operation.inputs.len() - 1;
        expect_input_type(operation, operands, axis_slot, &[OperandType::Int32])?;
        let axis = scalar_input::<i32>(operation, operands, axis_slot)?;

        let rank = expect_output_type(operation, operands, &TENSOR_TYPES)?.rank() as i32;
        let normalised = if axis < 0 { axis + rank } else { axis };
        if normalised < 0 || normalised >= rank {
            return Err(Error::validation(
                operation.operation_type,
                format!("axis {} out of range for rank {}", axis, rank),
            ));
        }
        Ok(normalised as usize)
    }
}

impl Translator for ConcatTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::Concatenation
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        let kind = operation.operation_type;
        if operation.inputs.len() < 2 {
            return Err(Error::validation(kind, "needs at least one tensor and the axis"));
        }
        if operation.outputs.len() != 1 {
            return Err(Error::validation(
                kind,
                format!("expected 1 output, got {}", operation.outputs.len()),
            ));
        }

        let output = expect_output_type(operation, operands, &TENSOR_TYPES)?;
        let axis = Self::axis(operation, operands)?;

        let mut axis_total = 0;
        for slot in 0..operation.inputs.len() - 1 {
            let input = expect_input_type(operation, operands, slot, &[output.declared_type])?;
            if input.rank() != output.rank() {
                return Err(Error::validation(
                    kind,
                    format!("input {} has rank {}, output rank {}", slot, input.rank(), output.rank()),
                ));
            }
            axis_total += input.dimensions[axis];
        }

        let expected = output.dimensions[axis];
        if expected != 0 && axis_total != expected {
            return Err(Error::validation(
                kind,
                format!("inputs sum to {} along axis {}, output has {}", axis_total, axis, expected),
            ));
        }
        Ok(())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        let axis = Self::axis(operation, operands)?;

        // The trailing axis operand is never a tensor input
        let mut inputs = Vec::with_capacity(operation.inputs.len() - 1);
        let mut offsets = Vec::with_capacity(operation.inputs.len() - 1);
        for slot in 0..operation.inputs.len() - 1 {
            let input = resolve_input(operation, operands, context, slot)?;
            let declared_rank = input_operand(operation, operands, slot)?.rank();
            offsets.push(rank_offset(operation, context, input, declared_rank)?);
            inputs.push(input);
        }

        // Promoted inputs carry a leading batch dimension; align the rest with them
        let offset = offsets.iter().copied().max().unwrap_or(0);
        for (input, &own) in inputs.iter_mut().zip(&offsets) {
            if own < offset {
                *input = unsqueeze_leading(context, *input, offset - own)?;
            }
        }
        if offset > 0 {
            debug!("Concat axis {} shifted by {} promoted dimensions", axis, offset);
        }

        let concat = context.add_node(NodeKind::Concat { axis: axis + offset }, &inputs)?;
        publish_output(operation, operands, context, concat)
    }
}

/// RESHAPE to the constant shape held by input 1
#[derive(Debug, Clone, Default)]
pub struct ReshapeTranslator;

impl ReshapeTranslator {
    fn target_shape(operation: &Operation, operands: &OperandTable) -> Result<Vec<i32>> {
        let index = input_index(operation, 1)?;
        let info = expect_input_type(operation, operands, 1, &[OperandType::TensorInt32])?;
        if !info.is_constant() || info.rank() != 1 {
            return Err(Error::validation(
                operation.operation_type,
                "target shape must be a constant 1-D INT32 tensor",
            ));
        }
        operands.constant_buffer_as_vec::<i32>(index)
    }
}

impl Translator for ReshapeTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::Reshape
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        check_arity(operation, &[2], 1)?;
        let input = expect_input_type(operation, operands, 0, &TENSOR_TYPES)?;
        expect_output_type(operation, operands, &[input.declared_type])?;

        let target = Self::target_shape(operation, operands)?;
        if target.iter().filter(|&&d| d == -1).count() > 1 || target.iter().any(|&d| d < -1) {
            return Err(Error::validation(
                operation.operation_type,
                format!("invalid target shape {:?}", target),
            ));
        }
        Ok(())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        let target = Self::target_shape(operation, operands)?;
        let special_zero = target.contains(&0);

        let input = resolve_input(operation, operands, context, 0)?;
        let declared_rank = input_operand(operation, operands, 0)?.rank();
        let offset = rank_offset(operation, context, input, declared_rank)?;

        let reshaped = if offset == 0 {
            let shape = resolve_input(operation, operands, context, 1)?;
            context.add_node(NodeKind::Reshape { special_zero }, &[input, shape])?
        } else {
            // Keep the promoted leading dimensions so zeros still copy the matching input dimension
            let promoted: Vec<i64> = std::iter::repeat(1)
                .take(offset)
                .chain(target.iter().map(|&d| i64::from(d)))
                .collect();
            debug!("Reshape target {:?} extended to {:?} for a promoted input", target, promoted);
            reshape_to(context, input, &promoted, special_zero)?
        };
        publish_output(operation, operands, context, reshaped)
    }
}
