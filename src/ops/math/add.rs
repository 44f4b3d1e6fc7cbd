use crate::error::{Error, Result};
use crate::graph::NodeKind;
use crate::layout::broadcast_shapes;
use crate::model::{OperandType, Operation, OperationType};
use crate::ops::activations::apply_activation;
use crate::ops::common::{
    activation_input, check_arity, expect_input_type, expect_output_type, publish_output, resolve_input,
};
use crate::ops::registry::{GraphContext, Translator};
use crate::parser::operand_table::OperandTable;

const TENSOR_TYPES: [OperandType; 2] = [OperandType::TensorFloat32, OperandType::TensorInt32];

/// Elementwise ADD with NumPy broadcasting and a fused activation in input 2
#[derive(Debug, Clone, Default)]
pub struct AddTranslator;

impl Translator for AddTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::Add
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        check_arity(operation, &[3], 1)?;

        let a = expect_input_type(operation, operands, 0, &TENSOR_TYPES)?;
        let b = expect_input_type(operation, operands, 1, &TENSOR_TYPES)?;
        let output = expect_output_type(operation, operands, &TENSOR_TYPES)?;
        if a.declared_type != b.declared_type || a.declared_type != output.declared_type {
            return Err(Error::validation(
                operation.operation_type,
                format!(
                    "operand types differ: {:?} + {:?} -> {:?}",
                    a.declared_type, b.declared_type, output.declared_type
                ),
            ));
        }

        // Unspecified (zero) dimensions are only known at request time
        let fully_specified = !a.dimensions.contains(&0) && !b.dimensions.contains(&0);
        if fully_specified && broadcast_shapes(&a.shape(), &b.shape()).is_none() {
            return Err(Error::validation(
                operation.operation_type,
                format!("shapes {:?} and {:?} do not broadcast", a.dimensions, b.dimensions),
            ));
        }

        activation_input(operation, operands, 2)?;
        Ok(())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        let a = resolve_input(operation, operands, context, 0)?;
        let b = resolve_input(operation, operands, context, 1)?;
        let activation = activation_input(operation, operands, 2)?;

        let sum = context.add_node(NodeKind::Add, &[a, b])?;
        let output = apply_activation(context, sum, activation)?;
        publish_output(operation, operands, context, output)
    }
}
