//! Plumbing shared by all translators: operand checks, input resolution,
//! output publication and layout changes that may fold on the host.

use bytes::Bytes;
use log::{debug, error};
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::graph::{ElementType, NodeKind, NodeOutput, TensorDesc};
use crate::layout::permute_array;
use crate::model::{FusedActivation, OperandLifetime, OperandType, Operation, OperationType};
use crate::parser::operand_table::{encode_elements, ConstantElement, OperandTable, RuntimeOperandInfo};

use super::registry::GraphContext;

/// Check input and output counts against the accepted input arities
pub(crate) fn check_arity(operation: &Operation, input_counts: &[usize], output_count: usize) -> Result<()> {
    let kind = operation.operation_type;
    if !input_counts.contains(&operation.inputs.len()) {
        return Err(Error::validation(
            kind,
            format!("expected {:?} inputs, got {}", input_counts, operation.inputs.len()),
        ));
    }
    if operation.outputs.len() != output_count {
        return Err(Error::validation(
            kind,
            format!("expected {} outputs, got {}", output_count, operation.outputs.len()),
        ));
    }
    Ok(())
}

/// Operand feeding input `slot`
pub(crate) fn input_operand<'a>(
    operation: &Operation,
    operands: &'a OperandTable,
    slot: usize,
) -> Result<&'a RuntimeOperandInfo> {
    let index = input_index(operation, slot)?;
    operands.operand(index)
}

pub(crate) fn input_index(operation: &Operation, slot: usize) -> Result<usize> {
    operation
        .inputs
        .get(slot)
        .map(|&i| i as usize)
        .ok_or_else(|| Error::validation(operation.operation_type, format!("missing input {}", slot)))
}

pub(crate) fn output_index(operation: &Operation) -> Result<usize> {
    operation
        .outputs
        .first()
        .map(|&i| i as usize)
        .ok_or_else(|| Error::validation(operation.operation_type, "missing output"))
}

/// Require the declared type of input `slot` to be one of `allowed`
pub(crate) fn expect_input_type<'a>(
    operation: &Operation,
    operands: &'a OperandTable,
    slot: usize,
    allowed: &[OperandType],
) -> Result<&'a RuntimeOperandInfo> {
    let info = input_operand(operation, operands, slot)?;
    if !allowed.contains(&info.declared_type) {
        return Err(Error::validation(
            operation.operation_type,
            format!("input {} has type {:?}, expected one of {:?}", slot, info.declared_type, allowed),
        ));
    }
    Ok(info)
}

pub(crate) fn expect_output_type<'a>(
    operation: &Operation,
    operands: &'a OperandTable,
    allowed: &[OperandType],
) -> Result<&'a RuntimeOperandInfo> {
    let info = operands.operand(output_index(operation)?)?;
    if !allowed.contains(&info.declared_type) {
        return Err(Error::validation(
            operation.operation_type,
            format!("output has type {:?}, expected one of {:?}", info.declared_type, allowed),
        ));
    }
    Ok(info)
}

pub(crate) fn expect_rank(kind: OperationType, info: &RuntimeOperandInfo, what: &str, rank: usize) -> Result<()> {
    if info.rank() != rank {
        return Err(Error::validation(
            kind,
            format!("{} must be {}-D, got {:?}", what, rank, info.dimensions),
        ));
    }
    Ok(())
}

/// Constant scalar held by input `slot`
pub(crate) fn scalar_input<T: ConstantElement>(operation: &Operation, operands: &OperandTable, slot: usize) -> Result<T> {
    let index = input_index(operation, slot)?;
    if !operands.operand(index)?.is_constant() {
        return Err(Error::validation(
            operation.operation_type,
            format!("input {} must be a constant scalar", slot),
        ));
    }
    operands.scalar::<T>(index)
}

/// Non-negative INT32 scalar parameter
pub(crate) fn usize_input(operation: &Operation, operands: &OperandTable, slot: usize) -> Result<usize> {
    expect_input_type(operation, operands, slot, &[OperandType::Int32])?;
    let value = scalar_input::<i32>(operation, operands, slot)?;
    usize::try_from(value).map_err(|_| {
        Error::validation(
            operation.operation_type,
            format!("input {} must be non-negative, got {}", slot, value),
        )
    })
}

pub(crate) fn bool_input(operation: &Operation, operands: &OperandTable, slot: usize) -> Result<bool> {
    expect_input_type(operation, operands, slot, &[OperandType::Bool])?;
    Ok(scalar_input::<u8>(operation, operands, slot)? != 0)
}

pub(crate) fn activation_input(operation: &Operation, operands: &OperandTable, slot: usize) -> Result<FusedActivation> {
    expect_input_type(operation, operands, slot, &[OperandType::Int32])?;
    let code = scalar_input::<i32>(operation, operands, slot)?;
    FusedActivation::from_repr(code).ok_or_else(|| {
        Error::validation(operation.operation_type, format!("unknown fused activation {}", code))
    })
}

/// Graph element type of a resolved operand
pub(crate) fn element_type(info: &RuntimeOperandInfo) -> Result<ElementType> {
    ElementType::from_operand_type(info.runtime_type)
        .ok_or_else(|| Error::InvalidModel(format!("no graph element type for {:?}", info.runtime_type)))
}

/// Resolve the graph value feeding input `slot`.
///
/// Model inputs become parameters, constants become constant nodes and
/// everything else must have been produced by an earlier operation.
pub(crate) fn resolve_input(
    operation: &Operation,
    operands: &OperandTable,
    context: &mut dyn GraphContext,
    slot: usize,
) -> Result<NodeOutput> {
    let index = input_index(operation, slot)?;
    let info = operands.operand(index)?;

    match info.lifetime {
        OperandLifetime::ModelInput => context.create_input_parameter(index),
        OperandLifetime::ConstantCopy | OperandLifetime::ConstantReference => {
            let data = info
                .buffer
                .clone()
                .ok_or_else(|| Error::InvalidModel(format!("constant operand {} has no buffer", index)))?;
            let desc = TensorDesc::new(element_type(info)?, info.shape());
            debug!("Operand {} becomes a constant {:?}", index, desc.shape);
            context.add_constant(desc, data)
        }
        _ => context.lookup_intermediate(index),
    }
}

/// Register `output` as the value of the operation's output operand
pub(crate) fn publish_output(
    operation: &Operation,
    operands: &OperandTable,
    context: &mut dyn GraphContext,
    output: NodeOutput,
) -> Result<()> {
    let index = output_index(operation)?;
    let info = operands.operand(index)?;
    let produced = context.output_desc(output)?;
    check_output_shape(operation.operation_type, index, &produced.shape, &info.shape())?;

    match info.lifetime {
        OperandLifetime::TemporaryVariable => context.register_intermediate(index, output),
        OperandLifetime::ModelOutput => {
            context.register_result(index, output)?;
            let name = context.node_name(output)?;
            context.register_layer_binding(index, &name, false)
        }
        other => Err(Error::validation(
            operation.operation_type,
            format!("output operand {} has unsupported lifetime {:?}", index, other),
        )),
    }
}

/// Compare a produced shape with the declared one.
///
/// A declared 0 (or an empty declaration) leaves the dimension open, and a
/// single leading unit dimension from input promotion is tolerated.
fn check_output_shape(kind: OperationType, index: usize, produced: &[usize], declared: &[usize]) -> Result<()> {
    if declared.is_empty() {
        return Ok(());
    }
    let compared = if produced.len() == declared.len() + 1 && produced.first() == Some(&1) {
        &produced[1..]
    } else {
        produced
    };

    let consistent = compared.len() == declared.len()
        && compared
            .iter()
            .zip(declared)
            .all(|(&p, &d)| p == d || p == 0 || d == 0);
    if !consistent {
        error!("Operand {} is declared {:?} but computes to {:?}", index, declared, produced);
        return Err(Error::validation(
            kind,
            format!("output operand {} is declared {:?}, graph produces {:?}", index, declared, produced),
        ));
    }
    Ok(())
}

/// Leading dimensions the graph value carries beyond the operand's declared rank
pub(crate) fn rank_offset(
    operation: &Operation,
    context: &dyn GraphContext,
    value: NodeOutput,
    declared_rank: usize,
) -> Result<usize> {
    let rank = context.output_desc(value)?.rank();
    rank.checked_sub(declared_rank).ok_or_else(|| {
        Error::validation(
            operation.operation_type,
            format!("graph value of rank {} is below the declared rank {}", rank, declared_rank),
        )
    })
}

/// Prepend `count` unit dimensions to a value with a fully known shape
pub(crate) fn unsqueeze_leading(context: &mut dyn GraphContext, input: NodeOutput, count: usize) -> Result<NodeOutput> {
    let desc = context.output_desc(input)?;
    if desc.shape.contains(&0) {
        return Err(Error::InvalidModel(format!(
            "cannot add leading dimensions to open shape {:?}",
            desc.shape
        )));
    }
    let shape: Vec<usize> = std::iter::repeat(1).take(count).chain(desc.shape.iter().copied()).collect();
    reshape(context, input, &shape)
}

fn fold_permutation<T: ConstantElement>(data: &Bytes, shape: &[usize], order: &[usize]) -> Result<Bytes> {
    let values: Vec<T> = data.chunks_exact(T::SIZE).map(T::from_ne_slice).collect();
    let array = ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| Error::InvalidModel(format!("constant does not match its shape: {}", e)))?;
    let permuted = permute_array(&array, order)?;
    Ok(encode_elements(&permuted.iter().copied().collect::<Vec<T>>()))
}

/// Transpose a value, folding into a new constant when possible
pub(crate) fn transpose(context: &mut dyn GraphContext, input: NodeOutput, order: &[usize]) -> Result<NodeOutput> {
    if context.fold_constant_layouts() {
        if let Some(data) = context.constant_data(input) {
            let desc = context.output_desc(input)?;
            let permuted = match desc.element_type.size() {
                8 => fold_permutation::<i64>(&data, &desc.shape, order)?,
                4 => fold_permutation::<u32>(&data, &desc.shape, order)?,
                _ => fold_permutation::<u8>(&data, &desc.shape, order)?,
            };
            let shape = order.iter().map(|&axis| desc.shape[axis]).collect();
            return context.add_constant(TensorDesc::new(desc.element_type, shape), permuted);
        }
    }

    context.add_node(NodeKind::Transpose { order: order.to_vec() }, &[input])
}

/// Reshape a value to a fully specified `shape`, folding constants when possible
pub(crate) fn reshape(context: &mut dyn GraphContext, input: NodeOutput, shape: &[usize]) -> Result<NodeOutput> {
    if context.fold_constant_layouts() {
        if let Some(data) = context.constant_data(input) {
            let desc = context.output_desc(input)?;
            if shape.iter().product::<usize>() == desc.element_count() {
                return context.add_constant(TensorDesc::new(desc.element_type, shape.to_vec()), data);
            }
        }
    }

    let target: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
    reshape_to(context, input, &target, false)
}

/// Reshape against a target that may contain `-1` (and `0` with `special_zero`)
pub(crate) fn reshape_to(
    context: &mut dyn GraphContext,
    input: NodeOutput,
    target: &[i64],
    special_zero: bool,
) -> Result<NodeOutput> {
    let shape_node = context.add_constant(
        TensorDesc::new(ElementType::I64, vec![target.len()]),
        encode_elements(target),
    )?;
    context.add_node(NodeKind::Reshape { special_zero }, &[input, shape_node])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape_check() {
        let kind = OperationType::Add;
        assert!(check_output_shape(kind, 3, &[2, 3], &[2, 3]).is_ok());
        assert!(check_output_shape(kind, 3, &[2, 3], &[0, 3]).is_ok());
        assert!(check_output_shape(kind, 3, &[2, 3], &[]).is_ok());
        // Leading unit dimension from a promoted input
        assert!(check_output_shape(kind, 3, &[1, 2, 3, 8], &[2, 3, 8]).is_ok());

        assert!(check_output_shape(kind, 3, &[2, 3], &[7, 7]).is_err());
        assert!(check_output_shape(kind, 3, &[2, 2, 3], &[2, 3]).is_err());
        assert!(matches!(
            check_output_shape(kind, 3, &[2, 3], &[2]),
            Err(Error::OperatorValidationFailed { operation: OperationType::Add, .. })
        ));
    }
}
