use crate::error::{Error, Result};
use crate::graph::NodeKind;
use crate::model::{OperandType, Operation, OperationType};
use crate::ops::activations::apply_activation;
use crate::ops::common::{
    activation_input, check_arity, expect_input_type, expect_output_type, expect_rank, publish_output,
    reshape_to, resolve_input,
};
use crate::ops::registry::{GraphContext, Translator};
use crate::parser::operand_table::OperandTable;

/// FULLY_CONNECTED: `activation(input x weights^T + bias)`.
///
/// Inputs are the data, weights `[units, input_size]`, bias `[units]` and the
/// fused activation code. Data of any other rank than 2 is flattened to
/// `[batch, input_size]` first.
#[derive(Debug, Clone, Default)]
pub struct FullyConnectedTranslator;

impl Translator for FullyConnectedTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::FullyConnected
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        let kind = operation.operation_type;
        check_arity(operation, &[4], 1)?;

        let float = [OperandType::TensorFloat32];
        let input = expect_input_type(operation, operands, 0, &float)?;
        let weights = expect_input_type(operation, operands, 1, &float)?;
        let bias = expect_input_type(operation, operands, 2, &float)?;
        expect_output_type(operation, operands, &float)?;

        expect_rank(kind, weights, "weights", 2)?;
        expect_rank(kind, bias, "bias", 1)?;
        if input.rank() < 2 || input.rank() > 4 {
            return Err(Error::validation(
                kind,
                format!("input must be 2-D to 4-D, got {:?}", input.dimensions),
            ));
        }

        let (units, input_size) = (weights.dimensions[0], weights.dimensions[1]);
        if bias.dimensions[0] != units {
            return Err(Error::validation(
                kind,
                format!("bias has {} entries for {} units", bias.dimensions[0], units),
            ));
        }

        let elements: u64 = input.dimensions.iter().map(|&d| u64::from(d)).product();
        if input_size == 0 || elements % u64::from(input_size) != 0 {
            return Err(Error::validation(
                kind,
                format!("input {:?} does not split into rows of {}", input.dimensions, input_size),
            ));
        }

        activation_input(operation, operands, 3)?;
        Ok(())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        let mut input = resolve_input(operation, operands, context, 0)?;
        let weights = resolve_input(operation, operands, context, 1)?;
        let bias = resolve_input(operation, operands, context, 2)?;
        let activation = activation_input(operation, operands, 3)?;

        let input_size = context.output_desc(weights)?.shape[1];
        if context.output_desc(input)?.rank() != 2 {
            input = reshape_to(context, input, &[-1, input_size as i64], false)?;
        }

        let product = context.add_node(
            NodeKind::MatMul {
                transpose_a: false,
                transpose_b: true,
            },
            &[input, weights],
        )?;
        let biased = context.add_node(NodeKind::Add, &[product, bias])?;
        let output = apply_activation(context, biased, activation)?;
        publish_output(operation, operands, context, output)
    }
}
