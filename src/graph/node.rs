//! Node kinds of the target dataflow graph and their shape/type inference.
//!
//! Activations of spatial operators are channel-first `[N, C, H, W]` and
//! convolution weights `[O, I, kH, kW]`; translators insert the transposes
//! needed to get there.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{Error, Result};
use crate::layout::{broadcast_shapes, conv_output_size, permute_shape};
use crate::model::OperandType;
use crate::parser::operand_table::ConstantElement;

/// Element types carried by graph tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ElementType {
    F32,
    I32,
    U32,
    I64,
    Boolean,
}

impl ElementType {
    /// Graph element type for a runtime (already promoted) operand type
    pub fn from_operand_type(operand_type: OperandType) -> Option<Self> {
        match operand_type {
            OperandType::TensorFloat32 | OperandType::Float32 => Some(ElementType::F32),
            OperandType::TensorInt32 | OperandType::Int32 => Some(ElementType::I32),
            OperandType::Uint32 => Some(ElementType::U32),
            OperandType::Bool => Some(ElementType::Boolean),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
            ElementType::I64 => 8,
            ElementType::Boolean => 1,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ElementType::Boolean)
    }
}

/// Element type and static shape of one node output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub element_type: ElementType,
    pub shape: Vec<usize>,
}

impl TensorDesc {
    pub fn new(element_type: ElementType, shape: Vec<usize>) -> Self {
        Self { element_type, shape }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() * self.element_type.size()
    }
}

/// How a convolution's padding was specified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PadType {
    Explicit,
    SameUpper,
    Valid,
}

/// Spatial parameters shared by plain and grouped convolutions, `[H, W]` order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvAttributes {
    pub strides: [usize; 2],
    pub pads_begin: [usize; 2],
    pub pads_end: [usize; 2],
    pub dilations: [usize; 2],
    pub auto_pad: PadType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NodeKind {
    Parameter,
    Constant,
    Add,
    Concat { axis: usize },
    Convolution(ConvAttributes),
    GroupConvolution(ConvAttributes),
    MatMul { transpose_a: bool, transpose_b: bool },
    Reshape { special_zero: bool },
    Transpose { order: Vec<usize> },
    Relu,
    Clamp { min: f32, max: f32 },
    Result,
}

impl NodeKind {
    /// Short operator name, used for friendly node names
    pub fn op_name(&self) -> &'static str {
        match self {
            NodeKind::Parameter => "Parameter",
            NodeKind::Constant => "Constant",
            NodeKind::Add => "Add",
            NodeKind::Concat { .. } => "Concat",
            NodeKind::Convolution(_) => "Convolution",
            NodeKind::GroupConvolution(_) => "GroupConvolution",
            NodeKind::MatMul { .. } => "MatMul",
            NodeKind::Reshape { .. } => "Reshape",
            NodeKind::Transpose { .. } => "Transpose",
            NodeKind::Relu => "Relu",
            NodeKind::Clamp { .. } => "Clamp",
            NodeKind::Result => "Result",
        }
    }
}

/// A node of the target dataflow graph
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub outputs: Vec<TensorDesc>,
    /// Raw bytes of constant nodes
    #[serde(skip)]
    pub constant: Option<Bytes>,
}

impl Node {
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant)
    }

    /// Decode the constant payload as `T`, if this is a constant node
    pub fn constant_values<T: ConstantElement>(&self) -> Option<Vec<T>> {
        let data = self.constant.as_ref()?;
        if data.len() % T::SIZE != 0 {
            return None;
        }
        Some(data.chunks_exact(T::SIZE).map(T::from_ne_slice).collect())
    }
}

/// One input of a node being inferred: its description and, for constants, its bytes
pub(crate) struct InferInput<'a> {
    pub desc: &'a TensorDesc,
    pub constant: Option<&'a Node>,
}

fn shape_error(node: &str, reason: impl Into<String>) -> Error {
    Error::ShapeInference {
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn expect_inputs(node: &str, inputs: &[InferInput], count: usize) -> Result<()> {
    if inputs.len() != count {
        return Err(shape_error(
            node,
            format!("expected {} inputs, got {}", count, inputs.len()),
        ));
    }
    Ok(())
}

/// Infer the output descriptions of a node from its inputs
pub(crate) fn infer_outputs(name: &str, kind: &NodeKind, inputs: &[InferInput]) -> Result<Vec<TensorDesc>> {
    let desc = match kind {
        NodeKind::Parameter | NodeKind::Constant => {
            return Err(shape_error(name, "parameters and constants have no inputs to infer from"));
        }
        NodeKind::Add => {
            expect_inputs(name, inputs, 2)?;
            let (a, b) = (inputs[0].desc, inputs[1].desc);
            if a.element_type != b.element_type {
                return Err(shape_error(
                    name,
                    format!("element types differ: {} vs {}", a.element_type, b.element_type),
                ));
            }
            let shape = broadcast_shapes(&a.shape, &b.shape).ok_or_else(|| {
                shape_error(name, format!("shapes {:?} and {:?} do not broadcast", a.shape, b.shape))
            })?;
            TensorDesc::new(a.element_type, shape)
        }
        NodeKind::Concat { axis } => infer_concat(name, *axis, inputs)?,
        NodeKind::Convolution(attrs) => {
            expect_inputs(name, inputs, 2)?;
            let (data, weights) = (inputs[0].desc, inputs[1].desc);
            if data.rank() != 4 || weights.rank() != 4 {
                return Err(shape_error(name, "convolution expects 4-D data and weights"));
            }
            if data.shape[1] != weights.shape[1] {
                return Err(shape_error(
                    name,
                    format!("data has {} channels, weights expect {}", data.shape[1], weights.shape[1]),
                ));
            }
            let spatial = conv_spatial(name, attrs, data, &weights.shape[2..])?;
            TensorDesc::new(data.element_type, vec![data.shape[0], weights.shape[0], spatial[0], spatial[1]])
        }
        NodeKind::GroupConvolution(attrs) => {
            expect_inputs(name, inputs, 2)?;
            let (data, weights) = (inputs[0].desc, inputs[1].desc);
            if data.rank() != 4 {
                return Err(shape_error(name, "group convolution expects 4-D data"));
            }
            // [G, I/G, kH, kW] has one output per group, [G, O/G, I/G, kH, kW] is general
            let (groups, out_per_group, in_per_group, kernel) = match weights.rank() {
                4 => (weights.shape[0], 1, weights.shape[1], &weights.shape[2..]),
                5 => (weights.shape[0], weights.shape[1], weights.shape[2], &weights.shape[3..]),
                rank => {
                    return Err(shape_error(name, format!("group convolution weights of rank {}", rank)));
                }
            };
            if groups * in_per_group != data.shape[1] {
                return Err(shape_error(
                    name,
                    format!(
                        "{} groups of {} channels do not cover {} input channels",
                        groups, in_per_group, data.shape[1]
                    ),
                ));
            }
            let spatial = conv_spatial(name, attrs, data, kernel)?;
            TensorDesc::new(
                data.element_type,
                vec![data.shape[0], groups * out_per_group, spatial[0], spatial[1]],
            )
        }
        NodeKind::MatMul { transpose_a, transpose_b } => {
            expect_inputs(name, inputs, 2)?;
            let (a, b) = (inputs[0].desc, inputs[1].desc);
            if a.rank() != 2 || b.rank() != 2 {
                return Err(shape_error(name, "matmul expects 2-D operands"));
            }
            let (m, k_a) = if *transpose_a { (a.shape[1], a.shape[0]) } else { (a.shape[0], a.shape[1]) };
            let (k_b, n) = if *transpose_b { (b.shape[1], b.shape[0]) } else { (b.shape[0], b.shape[1]) };
            if k_a != k_b {
                return Err(shape_error(name, format!("inner dimensions differ: {} vs {}", k_a, k_b)));
            }
            TensorDesc::new(a.element_type, vec![m, n])
        }
        NodeKind::Reshape { special_zero } => {
            expect_inputs(name, inputs, 2)?;
            infer_reshape(name, *special_zero, inputs[0].desc, inputs[1].constant)?
        }
        NodeKind::Transpose { order } => {
            expect_inputs(name, inputs, 1)?;
            let input = inputs[0].desc;
            let shape = permute_shape(&input.shape, order).map_err(|e| shape_error(name, e.to_string()))?;
            TensorDesc::new(input.element_type, shape)
        }
        NodeKind::Relu | NodeKind::Clamp { .. } => {
            expect_inputs(name, inputs, 1)?;
            if !inputs[0].desc.element_type.is_numeric() {
                return Err(shape_error(name, "activation over a boolean tensor"));
            }
            inputs[0].desc.clone()
        }
        NodeKind::Result => {
            expect_inputs(name, inputs, 1)?;
            inputs[0].desc.clone()
        }
    };

    Ok(vec![desc])
}

fn conv_spatial(name: &str, attrs: &ConvAttributes, data: &TensorDesc, kernel: &[usize]) -> Result<[usize; 2]> {
    let mut out = [0; 2];
    for axis in 0..2 {
        out[axis] = conv_output_size(
            data.shape[2 + axis],
            attrs.pads_begin[axis],
            attrs.pads_end[axis],
            kernel[axis],
            attrs.strides[axis],
            attrs.dilations[axis],
        )
        .ok_or_else(|| {
            shape_error(
                name,
                format!("kernel {:?} does not fit input {:?}", kernel, &data.shape[2..]),
            )
        })?;
    }
    Ok(out)
}

fn infer_concat(name: &str, axis: usize, inputs: &[InferInput]) -> Result<TensorDesc> {
    let first = inputs
        .first()
        .ok_or_else(|| shape_error(name, "concat needs at least one input"))?
        .desc;
    if axis >= first.rank() {
        return Err(shape_error(name, format!("axis {} out of range for rank {}", axis, first.rank())));
    }

    let mut shape = first.shape.clone();
    for input in &inputs[1..] {
        let desc = input.desc;
        if desc.element_type != first.element_type || desc.rank() != first.rank() {
            return Err(shape_error(name, "concat inputs differ in type or rank"));
        }
        for (i, (&d, &f)) in desc.shape.iter().zip(first.shape.iter()).enumerate() {
            if i != axis && d != f {
                return Err(shape_error(
                    name,
                    format!("dimension {} differs off the concat axis: {} vs {}", i, d, f),
                ));
            }
        }
        shape[axis] += desc.shape[axis];
    }

    Ok(TensorDesc::new(first.element_type, shape))
}

fn infer_reshape(name: &str, special_zero: bool, input: &TensorDesc, shape_node: Option<&Node>) -> Result<TensorDesc> {
    let node = shape_node.ok_or_else(|| shape_error(name, "target shape must be a constant"))?;
    let target: Vec<i64> = match node.outputs.first().map(|d| d.element_type) {
        Some(ElementType::I64) => node.constant_values::<i64>(),
        Some(ElementType::I32) => node
            .constant_values::<i32>()
            .map(|v| v.into_iter().map(i64::from).collect()),
        _ => None,
    }
    .ok_or_else(|| shape_error(name, "target shape must be an integer constant"))?;

    let mut shape = Vec::with_capacity(target.len());
    let mut inferred = None;
    for (i, &dim) in target.iter().enumerate() {
        match dim {
            -1 if inferred.is_none() => {
                inferred = Some(i);
                shape.push(1);
            }
            0 if special_zero => {
                let copied = input
                    .shape
                    .get(i)
                    .ok_or_else(|| shape_error(name, format!("no input dimension {} to copy", i)))?;
                shape.push(*copied);
            }
            d if d >= 0 => shape.push(d as usize),
            d => return Err(shape_error(name, format!("invalid target dimension {}", d))),
        }
    }

    let total = input.element_count();
    let known: usize = shape.iter().product();
    if let Some(i) = inferred {
        if known == 0 || total % known != 0 {
            return Err(shape_error(
                name,
                format!("cannot infer dimension {} of {:?} from {} elements", i, target, total),
            ));
        }
        shape[i] = total / known;
    } else if known != total {
        return Err(shape_error(
            name,
            format!("cannot reshape {:?} into {:?}", input.shape, shape),
        ));
    }

    Ok(TensorDesc::new(input.element_type, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::operand_table::encode_elements;

    fn f32_desc(shape: &[usize]) -> TensorDesc {
        TensorDesc::new(ElementType::F32, shape.to_vec())
    }

    fn shape_constant(values: &[i64]) -> Node {
        Node {
            name: "shape".to_string(),
            kind: NodeKind::Constant,
            outputs: vec![TensorDesc::new(ElementType::I64, vec![values.len()])],
            constant: Some(encode_elements(values)),
        }
    }

    fn infer(kind: &NodeKind, descs: &[&TensorDesc], constants: &[Option<&Node>]) -> Result<TensorDesc> {
        let inputs: Vec<InferInput> = descs
            .iter()
            .enumerate()
            .map(|(i, &desc)| InferInput {
                desc,
                constant: constants.get(i).copied().flatten(),
            })
            .collect();
        Ok(infer_outputs("test", kind, &inputs)?.remove(0))
    }

    fn conv_attrs(stride: usize, pad: usize) -> ConvAttributes {
        ConvAttributes {
            strides: [stride, stride],
            pads_begin: [pad, pad],
            pads_end: [pad, pad],
            dilations: [1, 1],
            auto_pad: PadType::Explicit,
        }
    }

    #[test]
    fn test_convolution_shape() {
        let data = f32_desc(&[1, 3, 7, 7]);
        let weights = f32_desc(&[8, 3, 3, 3]);
        let out = infer(&NodeKind::Convolution(conv_attrs(2, 1)), &[&data, &weights], &[]).unwrap();
        assert_eq!(out.shape, vec![1, 8, 4, 4]);

        let wrong_channels = f32_desc(&[8, 4, 3, 3]);
        assert!(infer(&NodeKind::Convolution(conv_attrs(2, 1)), &[&data, &wrong_channels], &[]).is_err());
    }

    #[test]
    fn test_group_convolution_shapes() {
        let data = f32_desc(&[1, 4, 5, 5]);

        // One output per group
        let depthwise = f32_desc(&[4, 1, 3, 3]);
        let out = infer(&NodeKind::GroupConvolution(conv_attrs(1, 1)), &[&data, &depthwise], &[]).unwrap();
        assert_eq!(out.shape, vec![1, 4, 5, 5]);

        // Multiplier of 2
        let multiplied = f32_desc(&[4, 2, 1, 3, 3]);
        let out = infer(&NodeKind::GroupConvolution(conv_attrs(1, 0)), &[&data, &multiplied], &[]).unwrap();
        assert_eq!(out.shape, vec![1, 8, 3, 3]);
    }

    #[test]
    fn test_reshape_special_zero_and_inferred() {
        let input = f32_desc(&[2, 3, 4]);

        let target = shape_constant(&[0, -1]);
        let out = infer(&NodeKind::Reshape { special_zero: true }, &[&input, &target.outputs[0]], &[None, Some(&target)]).unwrap();
        assert_eq!(out.shape, vec![2, 12]);

        let target = shape_constant(&[4, 6]);
        let out = infer(&NodeKind::Reshape { special_zero: false }, &[&input, &target.outputs[0]], &[None, Some(&target)]).unwrap();
        assert_eq!(out.shape, vec![4, 6]);

        let target = shape_constant(&[5, 5]);
        assert!(infer(&NodeKind::Reshape { special_zero: false }, &[&input, &target.outputs[0]], &[None, Some(&target)]).is_err());
    }

    #[test]
    fn test_concat_and_add() {
        let a = f32_desc(&[1, 2, 4]);
        let b = f32_desc(&[1, 3, 4]);
        let out = infer(&NodeKind::Concat { axis: 1 }, &[&a, &b], &[]).unwrap();
        assert_eq!(out.shape, vec![1, 5, 4]);
        assert!(infer(&NodeKind::Concat { axis: 2 }, &[&a, &b], &[]).is_err());

        let bias = f32_desc(&[4]);
        let out = infer(&NodeKind::Add, &[&a, &bias], &[]).unwrap();
        assert_eq!(out.shape, vec![1, 2, 4]);

        let ints = TensorDesc::new(ElementType::I32, vec![4]);
        assert!(infer(&NodeKind::Add, &[&a, &ints], &[]).is_err());
    }

    #[test]
    fn test_matmul_transpose_b() {
        let input = f32_desc(&[2, 8]);
        let weights = f32_desc(&[16, 8]);
        let out = infer(&NodeKind::MatMul { transpose_a: false, transpose_b: true }, &[&input, &weights], &[]).unwrap();
        assert_eq!(out.shape, vec![2, 16]);
    }
}
