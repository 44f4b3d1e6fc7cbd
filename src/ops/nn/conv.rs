//! 2-D convolution and depthwise convolution translators.
//!
//! Both operators come in an explicit-padding and an implicit-padding form,
//! each with optional layout and dilation trailers:
//!
//! | form      | CONV_2D    | DEPTHWISE_CONV_2D |
//! |-----------|------------|-------------------|
//! | explicit  | 10, 11, 13 | 11, 12, 14        |
//! | implicit  | 7, 8, 10   | 8, 9, 11          |
//!
//! The one input count shared by both forms is implicit when the slot that
//! holds the layout flag in the implicit form is a BOOL.

use log::debug;

use crate::error::{Error, Result};
use crate::graph::{ConvAttributes, NodeKind, NodeOutput, PadType};
use crate::layout::{implicit_padding, DataLayout, IHWO_TO_OIHW, NCHW_TO_NHWC, NHWC_TO_NCHW, OHWI_TO_OIHW};
use crate::model::{FusedActivation, OperandType, Operation, OperationType, PaddingScheme};
use crate::ops::activations::apply_activation;
use crate::ops::common::{
    activation_input, bool_input, expect_input_type, expect_output_type, expect_rank, input_operand, publish_output,
    reshape, resolve_input, scalar_input, transpose, usize_input,
};
use crate::ops::registry::{GraphContext, Translator};
use crate::parser::operand_table::OperandTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvFamily {
    Standard,
    Depthwise,
}

impl ConvFamily {
    fn explicit_counts(&self) -> [usize; 3] {
        match self {
            ConvFamily::Standard => [10, 11, 13],
            ConvFamily::Depthwise => [11, 12, 14],
        }
    }

    fn implicit_counts(&self) -> [usize; 3] {
        match self {
            ConvFamily::Standard => [7, 8, 10],
            ConvFamily::Depthwise => [8, 9, 11],
        }
    }

    /// Extra slot taken by the depth multiplier
    fn shift(&self) -> usize {
        match self {
            ConvFamily::Standard => 0,
            ConvFamily::Depthwise => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    /// `[top, left]`, `[bottom, right]`
    Explicit { begin: [usize; 2], end: [usize; 2] },
    Implicit(PaddingScheme),
}

/// Everything read from the scalar inputs of a convolution
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConvParams {
    padding: Padding,
    /// `[H, W]`
    strides: [usize; 2],
    /// `[H, W]`
    dilations: [usize; 2],
    multiplier: usize,
    activation: FusedActivation,
    layout: DataLayout,
}

impl ConvParams {
    fn parse(family: ConvFamily, operation: &Operation, operands: &OperandTable) -> Result<Self> {
        let kind = operation.operation_type;
        let count = operation.inputs.len();
        let e = family.shift();

        let explicit = family.explicit_counts().contains(&count);
        let implicit = family.implicit_counts().contains(&count);
        let explicit = match (explicit, implicit) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => {
                let layout_slot = 7 + e;
                input_operand(operation, operands, layout_slot)?.declared_type != OperandType::Bool
            }
            (false, false) => {
                return Err(Error::validation(kind, format!("unexpected input count {}", count)));
            }
        };

        // Slot of the activation code; the layout flag and dilations follow it
        let (padding, strides, activation_slot) = if explicit {
            let left = usize_input(operation, operands, 3)?;
            let right = usize_input(operation, operands, 4)?;
            let top = usize_input(operation, operands, 5)?;
            let bottom = usize_input(operation, operands, 6)?;
            let stride_w = usize_input(operation, operands, 7)?;
            let stride_h = usize_input(operation, operands, 8)?;
            (
                Padding::Explicit {
                    begin: [top, left],
                    end: [bottom, right],
                },
                [stride_h, stride_w],
                9 + e,
            )
        } else {
            expect_input_type(operation, operands, 3, &[OperandType::Int32])?;
            let code = scalar_input::<i32>(operation, operands, 3)?;
            let scheme = PaddingScheme::from_repr(code)
                .ok_or_else(|| Error::validation(kind, format!("unknown padding scheme {}", code)))?;
            let stride_w = usize_input(operation, operands, 4)?;
            let stride_h = usize_input(operation, operands, 5)?;
            (Padding::Implicit(scheme), [stride_h, stride_w], 6 + e)
        };

        let multiplier = match family {
            ConvFamily::Standard => 1,
            ConvFamily::Depthwise => usize_input(operation, operands, activation_slot - 1)?,
        };

        let activation = activation_input(operation, operands, activation_slot)?;

        let layout = if count > activation_slot + 1 && bool_input(operation, operands, activation_slot + 1)? {
            DataLayout::ChannelFirst
        } else {
            DataLayout::ChannelLast
        };

        let dilations = if count > activation_slot + 2 {
            let dilation_w = usize_input(operation, operands, activation_slot + 2)?;
            let dilation_h = usize_input(operation, operands, activation_slot + 3)?;
            [dilation_h, dilation_w]
        } else {
            [1, 1]
        };

        if strides.contains(&0) || dilations.contains(&0) || multiplier == 0 {
            return Err(Error::validation(
                kind,
                format!(
                    "strides {:?}, dilations {:?} and multiplier {} must be positive",
                    strides, dilations, multiplier
                ),
            ));
        }

        Ok(Self {
            padding,
            strides,
            dilations,
            multiplier,
            activation,
            layout,
        })
    }

    /// Spatial `[H, W]` of the data tensor as laid out by the operator
    fn spatial(&self, dims: &[u32]) -> [usize; 2] {
        match self.layout {
            DataLayout::ChannelLast => [dims[1] as usize, dims[2] as usize],
            DataLayout::ChannelFirst => [dims[2] as usize, dims[3] as usize],
        }
    }

    fn channels(&self, dims: &[u32]) -> usize {
        match self.layout {
            DataLayout::ChannelLast => dims[3] as usize,
            DataLayout::ChannelFirst => dims[1] as usize,
        }
    }

    /// Explicit pads and the pad type passed to the graph
    fn resolve_padding(&self, input: [usize; 2], kernel: [usize; 2]) -> Result<([usize; 2], [usize; 2], PadType)> {
        match self.padding {
            Padding::Explicit { begin, end } => Ok((begin, end, PadType::Explicit)),
            Padding::Implicit(scheme) => {
                let mut begin = [0; 2];
                let mut end = [0; 2];
                for axis in 0..2 {
                    let padding =
                        implicit_padding(scheme, input[axis], self.strides[axis], kernel[axis], self.dilations[axis])?;
                    begin[axis] = padding.head;
                    end[axis] = padding.tail;
                }
                let pad_type = match scheme {
                    PaddingScheme::Same => PadType::SameUpper,
                    PaddingScheme::Valid => PadType::Valid,
                };
                Ok((begin, end, pad_type))
            }
        }
    }
}

fn validate_tensors(family: ConvFamily, operation: &Operation, operands: &OperandTable) -> Result<ConvParams> {
    let kind = operation.operation_type;
    let params = ConvParams::parse(family, operation, operands)?;

    let float = [OperandType::TensorFloat32];
    let input = expect_input_type(operation, operands, 0, &float)?;
    let filter = expect_input_type(operation, operands, 1, &float)?;
    let bias = expect_input_type(operation, operands, 2, &float)?;
    expect_output_type(operation, operands, &float)?;

    expect_rank(kind, input, "input", 4)?;
    expect_rank(kind, filter, "filter", 4)?;
    expect_rank(kind, bias, "bias", 1)?;

    let channels = params.channels(&input.dimensions);
    let out_channels = match family {
        ConvFamily::Standard => {
            let filter_in = filter.dimensions[3] as usize;
            if filter_in != channels {
                return Err(Error::validation(
                    kind,
                    format!("filter expects {} input channels, data has {}", filter_in, channels),
                ));
            }
            filter.dimensions[0]
        }
        ConvFamily::Depthwise => {
            if filter.dimensions[0] != 1 {
                return Err(Error::validation(kind, format!("invalid depthwise filter {:?}", filter.dimensions)));
            }
            let filter_out = filter.dimensions[3] as usize;
            if filter_out != channels * params.multiplier {
                return Err(Error::validation(
                    kind,
                    format!(
                        "filter has {} outputs, expected {} channels x multiplier {}",
                        filter_out, channels, params.multiplier
                    ),
                ));
            }
            filter.dimensions[3]
        }
    };

    if bias.dimensions[0] != out_channels {
        return Err(Error::validation(
            kind,
            format!("bias has {} entries for {} output channels", bias.dimensions[0], out_channels),
        ));
    }

    Ok(params)
}

fn build_convolution(
    family: ConvFamily,
    native_layout: DataLayout,
    operation: &Operation,
    operands: &OperandTable,
    context: &mut dyn GraphContext,
) -> Result<()> {
    let params = ConvParams::parse(family, operation, operands)?;

    let input_info = input_operand(operation, operands, 0)?;
    let filter_info = input_operand(operation, operands, 1)?;
    let spatial = params.spatial(&input_info.dimensions);
    let kernel = [filter_info.dimensions[1] as usize, filter_info.dimensions[2] as usize];
    let (pads_begin, pads_end, auto_pad) = params.resolve_padding(spatial, kernel)?;

    let mut data = resolve_input(operation, operands, context, 0)?;
    let filter = resolve_input(operation, operands, context, 1)?;
    let bias = resolve_input(operation, operands, context, 2)?;

    let relayout = params.layout != native_layout;
    if relayout {
        data = transpose(context, data, &NHWC_TO_NCHW)?;
    }

    let attributes = ConvAttributes {
        strides: params.strides,
        pads_begin,
        pads_end,
        dilations: params.dilations,
        auto_pad,
    };

    let (conv, out_channels) = match family {
        ConvFamily::Standard => {
            let weights = transpose(context, filter, &OHWI_TO_OIHW)?;
            let out_channels = context.output_desc(weights)?.shape[0];
            let node = context.add_node(NodeKind::Convolution(attributes), &[data, weights])?;
            (node, out_channels)
        }
        ConvFamily::Depthwise => {
            let weights = depthwise_weights(context, filter, params.multiplier)?;
            let desc = context.output_desc(weights)?;
            let out_channels = desc.shape[0] * if desc.rank() == 5 { desc.shape[1] } else { 1 };
            let node = context.add_node(NodeKind::GroupConvolution(attributes), &[data, weights])?;
            (node, out_channels)
        }
    };

    let bias = reshape(context, bias, &[1, out_channels, 1, 1])?;
    let biased = context.add_node(NodeKind::Add, &[conv, bias])?;
    let mut output = apply_activation(context, biased, params.activation)?;

    if relayout {
        output = transpose(context, output, &NCHW_TO_NHWC)?;
    }

    debug!(
        "{:?}: strides {:?}, pads {:?}/{:?}, dilations {:?}, {} -> {} layout",
        operation.operation_type, params.strides, pads_begin, pads_end, params.dilations, params.layout, native_layout
    );

    publish_output(operation, operands, context, output)
}

/// Permute `[1, kH, kW, C*M]` into grouped-convolution weights.
///
/// With a multiplier of 1 the result is `[C, 1, kH, kW]`; otherwise the
/// leading dimension is split into `[C, M, 1, kH, kW]`.
fn depthwise_weights(context: &mut dyn GraphContext, filter: NodeOutput, multiplier: usize) -> Result<NodeOutput> {
    let weights = transpose(context, filter, &IHWO_TO_OIHW)?;
    if multiplier == 1 {
        return Ok(weights);
    }

    let mut grouped = context.output_desc(weights)?.shape;
    grouped[0] /= multiplier;
    grouped.insert(1, multiplier);
    reshape(context, weights, &grouped)
}

/// CONV_2D
#[derive(Debug, Clone)]
pub struct Conv2dTranslator {
    native_layout: DataLayout,
}

impl Conv2dTranslator {
    pub fn new(native_layout: DataLayout) -> Self {
        Self { native_layout }
    }
}

impl Translator for Conv2dTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::Conv2d
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        validate_tensors(ConvFamily::Standard, operation, operands).map(|_| ())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        build_convolution(ConvFamily::Standard, self.native_layout, operation, operands, context)
    }
}

/// DEPTHWISE_CONV_2D, lowered to a grouped convolution with one group per input channel
#[derive(Debug, Clone)]
pub struct DepthwiseConv2dTranslator {
    native_layout: DataLayout,
}

impl DepthwiseConv2dTranslator {
    pub fn new(native_layout: DataLayout) -> Self {
        Self { native_layout }
    }
}

impl Translator for DepthwiseConv2dTranslator {
    fn operation_type(&self) -> OperationType {
        OperationType::DepthwiseConv2d
    }

    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()> {
        validate_tensors(ConvFamily::Depthwise, operation, operands).map(|_| ())
    }

    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()> {
        build_convolution(ConvFamily::Depthwise, self.native_layout, operation, operands, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::options::CompilerOptions;
    use crate::graph::{CompiledGraph, NodeOutput};
    use crate::memory::MemoryPoolSet;
    use crate::model::Model;
    use crate::model_builder::ModelBuilder;
    use crate::parser::graph_builder::GraphBuilder;
    use petgraph::graph::NodeIndex;

    const F32: OperandType = OperandType::TensorFloat32;

    fn depthwise_model(multiplier: u32) -> Model {
        let channels = 3;
        let out = channels * multiplier;
        let mut builder = ModelBuilder::new();
        let input = builder.add_input(F32, &[1, 5, 5, channels]);
        let filter = builder.add_constant(F32, &[1, 3, 3, out], &vec![0.5f32; 9 * out as usize]);
        let bias = builder.add_constant(F32, &[out], &vec![0.0f32; out as usize]);
        let scheme = builder.add_i32(PaddingScheme::Same as i32);
        let stride = builder.add_i32(1);
        let depth = builder.add_i32(multiplier as i32);
        let activation = builder.add_i32(0);
        let output = builder.add_output(F32, &[1, 5, 5, out]);
        builder.add_operation(
            OperationType::DepthwiseConv2d,
            &[input, filter, bias, scheme, stride, stride, depth, activation],
            &[output],
        );
        builder.build()
    }

    /// Ten-input CONV_2D; implicit channel-first or explicit channel-last
    fn ambiguous_conv_model(implicit: bool) -> Model {
        let mut builder = ModelBuilder::new();
        let dims = if implicit { [1, 2, 4, 4] } else { [1, 4, 4, 2] };
        let input = builder.add_input(F32, &dims);
        let filter = builder.add_constant(F32, &[4, 3, 3, 2], &[1.0f32; 72]);
        let bias = builder.add_constant(F32, &[4], &[0.0f32; 4]);

        let mut inputs = vec![input, filter, bias];
        let output = if implicit {
            inputs.push(builder.add_i32(PaddingScheme::Valid as i32));
            inputs.push(builder.add_i32(1));
            inputs.push(builder.add_i32(1));
            inputs.push(builder.add_i32(0));
            inputs.push(builder.add_bool(true));
            inputs.push(builder.add_i32(1));
            inputs.push(builder.add_i32(1));
            builder.add_output(F32, &[1, 4, 2, 2])
        } else {
            for _ in 0..4 {
                inputs.push(builder.add_i32(1));
            }
            inputs.push(builder.add_i32(2));
            inputs.push(builder.add_i32(1));
            inputs.push(builder.add_i32(0));
            builder.add_output(F32, &[1, 4, 2, 4])
        };
        builder.add_operation(OperationType::Conv2d, &inputs, &[output]);
        builder.build()
    }

    fn resolve(model: &Model) -> OperandTable {
        OperandTable::resolve(model, &MemoryPoolSet::new()).unwrap()
    }

    fn compile(model: &Model) -> CompiledGraph {
        let operands = resolve(model);
        GraphBuilder::new(&operands, &CompilerOptions::default())
            .compile(&model.operations)
            .unwrap()
    }

    fn nodes_named(graph: &CompiledGraph, op: &str) -> Vec<NodeIndex> {
        let dataflow = graph.dataflow().graph();
        dataflow
            .node_indices()
            .filter(|&index| dataflow[index].kind.op_name() == op)
            .collect()
    }

    fn result_shape(graph: &CompiledGraph) -> Vec<usize> {
        let result = graph.results()[0].node;
        graph.dataflow().output_desc(NodeOutput::new(result, 0)).unwrap().shape.clone()
    }

    fn group_weights_shape(graph: &CompiledGraph) -> Vec<usize> {
        let group = nodes_named(graph, "GroupConvolution");
        assert_eq!(group.len(), 1);
        let weights = graph.dataflow().inputs_of(group[0])[1];
        graph.dataflow().output_desc(weights).unwrap().shape.clone()
    }

    #[test]
    fn test_depthwise_unit_multiplier_keeps_weights() {
        let graph = compile(&depthwise_model(1));
        assert_eq!(group_weights_shape(&graph), vec![3, 1, 3, 3]);
        assert_eq!(result_shape(&graph), vec![1, 5, 5, 3]);
    }

    #[test]
    fn test_depthwise_multiplier_splits_weights() {
        let graph = compile(&depthwise_model(2));
        assert_eq!(group_weights_shape(&graph), vec![3, 2, 1, 3, 3]);
        assert_eq!(result_shape(&graph), vec![1, 5, 5, 6]);
    }

    #[test]
    fn test_ambiguous_count_implicit() {
        let model = ambiguous_conv_model(true);
        let operands = resolve(&model);
        let params = ConvParams::parse(ConvFamily::Standard, &model.operations[0], &operands).unwrap();

        assert_eq!(params.padding, Padding::Implicit(PaddingScheme::Valid));
        assert_eq!(params.layout, DataLayout::ChannelFirst);
        assert_eq!(params.dilations, [1, 1]);
    }

    #[test]
    fn test_ambiguous_count_explicit() {
        let model = ambiguous_conv_model(false);
        let operands = resolve(&model);
        let params = ConvParams::parse(ConvFamily::Standard, &model.operations[0], &operands).unwrap();

        assert_eq!(
            params.padding,
            Padding::Explicit {
                begin: [1, 1],
                end: [1, 1]
            }
        );
        // stride_w = 2, stride_h = 1
        assert_eq!(params.strides, [1, 2]);
        assert_eq!(params.layout, DataLayout::ChannelLast);
    }

    #[test]
    fn test_channel_first_data_is_not_transposed() {
        let graph = compile(&ambiguous_conv_model(true));
        assert!(nodes_named(&graph, "Transpose").is_empty());
        assert_eq!(result_shape(&graph), vec![1, 4, 2, 2]);
    }

    #[test]
    fn test_channel_last_data_round_trips_through_native_layout() {
        let graph = compile(&ambiguous_conv_model(false));

        // Filter permutation is folded, only data is transposed
        assert_eq!(nodes_named(&graph, "Transpose").len(), 2);
        assert_eq!(nodes_named(&graph, "Convolution").len(), 1);
        assert_eq!(result_shape(&graph), vec![1, 4, 2, 4]);
    }

    #[test]
    fn test_filter_transpose_without_folding() {
        let model = ambiguous_conv_model(true);
        let operands = resolve(&model);
        let options = CompilerOptions::default().fold_constant_layouts(false);
        let graph = GraphBuilder::new(&operands, &options).compile(&model.operations).unwrap();
        assert_eq!(nodes_named(&graph, "Transpose").len(), 1);
    }

    #[test]
    fn test_depthwise_filter_must_match_multiplier() {
        let mut model = depthwise_model(2);
        // Declare a multiplier of 3 against a [1, 3, 3, 6] filter
        let depth = model.operations[0].inputs[6] as usize;
        let offset = model.operands[depth].location.offset as usize;
        let mut values = model.operand_values.to_vec();
        values[offset..offset + 4].copy_from_slice(&3i32.to_ne_bytes());
        model.operand_values = values.into();

        let operands = resolve(&model);
        let translator = DepthwiseConv2dTranslator::new(DataLayout::ChannelFirst);
        assert!(matches!(
            translator.validate(&model.operations[0], &operands),
            Err(Error::OperatorValidationFailed { .. })
        ));
    }

    #[test]
    fn test_unexpected_input_count() {
        let mut model = ambiguous_conv_model(false);
        model.operations[0].inputs.truncate(9);
        let operands = resolve(&model);
        assert!(Conv2dTranslator::new(DataLayout::ChannelFirst)
            .validate(&model.operations[0], &operands)
            .is_err());
    }
}
