use bytes::Bytes;
use log::trace;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::error::{Error, Result};

use super::node::{infer_outputs, InferInput, Node, NodeKind, TensorDesc};

/// Handle to one output of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeOutput {
    pub node: NodeIndex,
    pub slot: usize,
}

impl NodeOutput {
    pub fn new(node: NodeIndex, slot: usize) -> Self {
        Self { node, slot }
    }
}

/// Edge payload: which producer output feeds which consumer input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Port {
    pub output: usize,
    pub input: usize,
}

/// The target dataflow graph under construction.
///
/// Every node gets its output descriptions inferred on insertion, so a
/// graph that was built without error is shape-consistent.
#[derive(Debug, Clone, Default)]
pub struct Dataflow {
    graph: DiGraph<Node, Port>,
}

impl Dataflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a graph input
    pub fn add_parameter(&mut self, name: impl Into<String>, desc: TensorDesc) -> NodeOutput {
        let node = self.graph.add_node(Node {
            name: name.into(),
            kind: NodeKind::Parameter,
            outputs: vec![desc],
            constant: None,
        });
        NodeOutput::new(node, 0)
    }

    /// Add an immutable constant; `data` must hold exactly `desc.byte_size()` bytes
    pub fn add_constant(&mut self, name: impl Into<String>, desc: TensorDesc, data: Bytes) -> Result<NodeOutput> {
        let name = name.into();
        if data.len() != desc.byte_size() {
            return Err(Error::ShapeInference {
                node: name,
                reason: format!(
                    "constant of shape {:?} needs {} bytes, got {}",
                    desc.shape,
                    desc.byte_size(),
                    data.len()
                ),
            });
        }
        let node = self.graph.add_node(Node {
            name,
            kind: NodeKind::Constant,
            outputs: vec![desc],
            constant: Some(data),
        });
        Ok(NodeOutput::new(node, 0))
    }

    /// Add an operator node fed by `inputs`, inferring its outputs
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind, inputs: &[NodeOutput]) -> Result<NodeOutput> {
        let name = name.into();

        let outputs = {
            let mut infer_inputs = Vec::with_capacity(inputs.len());
            for input in inputs {
                let producer = self.node(input.node)?;
                infer_inputs.push(InferInput {
                    desc: self.output_desc(*input)?,
                    constant: producer.constant.as_ref().map(|_| producer),
                });
            }
            infer_outputs(&name, &kind, &infer_inputs)?
        };

        trace!("Adding node {} ({}) -> {:?}", name, kind.op_name(), outputs);

        let node = self.graph.add_node(Node {
            name,
            kind,
            outputs,
            constant: None,
        });
        for (i, input) in inputs.iter().enumerate() {
            self.graph.add_edge(input.node, node, Port { output: input.slot, input: i });
        }

        Ok(NodeOutput::new(node, 0))
    }

    pub fn node(&self, index: NodeIndex) -> Result<&Node> {
        self.graph
            .node_weight(index)
            .ok_or_else(|| Error::InvalidModel(format!("graph node {} does not exist", index.index())))
    }

    /// Description of a node output
    pub fn output_desc(&self, output: NodeOutput) -> Result<&TensorDesc> {
        let node = self.node(output.node)?;
        node.outputs.get(output.slot).ok_or_else(|| Error::ShapeInference {
            node: node.name.clone(),
            reason: format!("node has no output slot {}", output.slot),
        })
    }

    /// Raw bytes behind an output, if it is a constant
    pub fn constant_data(&self, output: NodeOutput) -> Option<&Bytes> {
        self.graph.node_weight(output.node)?.constant.as_ref()
    }

    /// Inputs of a node, ordered by input port
    pub fn inputs_of(&self, index: NodeIndex) -> Vec<NodeOutput> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| (edge.weight().input, NodeOutput::new(edge.source(), edge.weight().output)))
            .collect();
        edges.sort_by_key(|(port, _)| *port);
        edges.into_iter().map(|(_, output)| output).collect()
    }

    /// Number of consumers of a node
    pub fn consumer_count(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Outgoing).count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn graph(&self) -> &DiGraph<Node, Port> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ElementType;
    use crate::parser::operand_table::encode_elements;

    #[test]
    fn test_add_node_infers_and_wires() {
        let mut dataflow = Dataflow::new();
        let a = dataflow.add_parameter("a", TensorDesc::new(ElementType::F32, vec![1, 4]));
        let b = dataflow
            .add_constant("b", TensorDesc::new(ElementType::F32, vec![4]), encode_elements(&[1.0f32; 4]))
            .unwrap();

        let sum = dataflow.add_node("sum", NodeKind::Add, &[a, b]).unwrap();
        assert_eq!(dataflow.output_desc(sum).unwrap().shape, vec![1, 4]);
        assert_eq!(dataflow.inputs_of(sum.node), vec![a, b]);
        assert_eq!(dataflow.consumer_count(a.node), 1);
        assert_eq!(dataflow.edge_count(), 2);
        assert!(dataflow.constant_data(b).is_some());
        assert!(dataflow.constant_data(a).is_none());
    }

    #[test]
    fn test_constant_size_checked() {
        let mut dataflow = Dataflow::new();
        let result = dataflow.add_constant(
            "bad",
            TensorDesc::new(ElementType::F32, vec![3]),
            encode_elements(&[1.0f32; 2]),
        );
        assert!(matches!(result, Err(Error::ShapeInference { .. })));
    }

    #[test]
    fn test_failed_inference_adds_nothing() {
        let mut dataflow = Dataflow::new();
        let a = dataflow.add_parameter("a", TensorDesc::new(ElementType::F32, vec![2, 3]));
        let b = dataflow.add_parameter("b", TensorDesc::new(ElementType::F32, vec![4, 3]));

        assert!(dataflow.add_node("sum", NodeKind::Add, &[a, b]).is_err());
        assert_eq!(dataflow.node_count(), 2);
    }
}
