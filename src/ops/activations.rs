use crate::error::Result;
use crate::graph::{NodeKind, NodeOutput};
use crate::model::{FusedActivation, OperandType, Operation, OperationType};
use crate::ops::common::{check_arity, expect_input_type, expect_output_type, publish_output, resolve_input};
use crate::ops::registry::{GraphContext, Translator};
use crate::parser::operand_table::OperandTable;

/// Append the node for a fused activation; `None` passes the value through
pub(crate) fn apply_activation(
    context: &mut dyn GraphContext,
    input: NodeOutput,
    activation: FusedActivation,
) -> Result<NodeOutput> {
    match activation {
        FusedActivation::None => Ok(input),
        FusedActivation::Relu => context.add_node(NodeKind::Relu, &[input]),
        FusedActivation::Relu1 => context.add_node(NodeKind::Clamp { min: -1.0, max: 1.0 }, &[input]),
        FusedActivation::Relu6 => context.add_node(NodeKind::Clamp { min: 0.0, max: 6.0 }, &[input]),
    }
}

/// Standalone RELU: `max(x, 0)` with the input's shape and type
#[derive(Debug, Clone, Default)]
pub struct ReluTranslator;

impl Translator for ReluTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::Relu
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        check_arity(operation, &[1], 1)?;
        expect_input_type(operation, operands, 0, &[OperandType::TensorFloat32])?;
        expect_output_type(operation, operands, &[OperandType::TensorFloat32])?;
        Ok(())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        let input = resolve_input(operation, operands, context, 0)?;
        let relu = context.add_node(NodeKind::Relu, &[input])?;
        publish_output(operation, operands, context, relu)
    }
}
