use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{debug, info, warn};
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::execution::options::TargetDevice;

use super::dataflow::Dataflow;
use super::node::{Node, NodeKind, TensorDesc};

/// Stable layer name attached to a model input or output operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub layer_name: String,
    pub is_input: bool,
}

/// Operand index to layer name, for model inputs and outputs only
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerBindings {
    inputs: BTreeMap<usize, LayerInfo>,
    outputs: BTreeMap<usize, LayerInfo>,
}

impl LayerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding; binding the same operand twice is an error
    pub fn insert(&mut self, operand_index: usize, layer_name: impl Into<String>, is_input: bool) -> Result<()> {
        let table = if is_input { &mut self.inputs } else { &mut self.outputs };
        if table.contains_key(&operand_index) {
            return Err(Error::OperandRedefined(operand_index));
        }
        table.insert(
            operand_index,
            LayerInfo {
                layer_name: layer_name.into(),
                is_input,
            },
        );
        Ok(())
    }

    pub fn input(&self, operand_index: usize) -> Option<&LayerInfo> {
        self.inputs.get(&operand_index)
    }

    pub fn output(&self, operand_index: usize) -> Option<&LayerInfo> {
        self.outputs.get(&operand_index)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (usize, &LayerInfo)> {
        self.inputs.iter().map(|(&index, info)| (index, info))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (usize, &LayerInfo)> {
        self.outputs.iter().map(|(&index, info)| (index, info))
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A graph endpoint tied to the model operand it stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEndpoint {
    pub operand_index: usize,
    pub node: NodeIndex,
}

/// The finished, immutable compilation product.
///
/// Parameters follow the model's input order and results its output order.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    dataflow: Dataflow,
    parameters: Vec<GraphEndpoint>,
    results: Vec<GraphEndpoint>,
    bindings: LayerBindings,
    device: TargetDevice,
}

#[derive(Debug, Serialize)]
struct NodeSummary<'a> {
    name: &'a str,
    kind: &'a NodeKind,
    inputs: Vec<String>,
    outputs: &'a [TensorDesc],
}

#[derive(Debug, Serialize)]
struct GraphSummary<'a> {
    device: String,
    parameters: Vec<&'a str>,
    results: Vec<&'a str>,
    bindings: &'a LayerBindings,
    nodes: Vec<NodeSummary<'a>>,
}

impl CompiledGraph {
    pub(crate) fn new(
        dataflow: Dataflow,
        parameters: Vec<GraphEndpoint>,
        results: Vec<GraphEndpoint>,
        bindings: LayerBindings,
        device: TargetDevice,
    ) -> Result<Self> {
        let graph = Self {
            dataflow,
            parameters,
            results,
            bindings,
            device,
        };

        // A cycle would mean a translator wired a node into its own inputs
        graph.topological_order()?;

        // Constants whose layout was folded on the host are left behind unused
        let (constants, dangling): (Vec<_>, Vec<_>) = graph
            .dangling_nodes()
            .into_iter()
            .partition(|&index| matches!(graph.dataflow.graph()[index].kind, NodeKind::Constant));
        if !constants.is_empty() {
            debug!("{} constant nodes are unused", constants.len());
        }
        if !dangling.is_empty() {
            warn!("{} graph nodes do not reach any result", dangling.len());
        }

        info!(
            "Compiled graph: {} nodes, {} parameters, {} results, {} layer bindings",
            graph.dataflow.node_count(),
            graph.parameters.len(),
            graph.results.len(),
            graph.bindings.len()
        );
        Ok(graph)
    }

    pub fn dataflow(&self) -> &Dataflow {
        &self.dataflow
    }

    pub fn parameters(&self) -> &[GraphEndpoint] {
        &self.parameters
    }

    pub fn results(&self) -> &[GraphEndpoint] {
        &self.results
    }

    pub fn bindings(&self) -> &LayerBindings {
        &self.bindings
    }

    pub fn device(&self) -> TargetDevice {
        self.device
    }

    pub fn node(&self, index: NodeIndex) -> Result<&Node> {
        self.dataflow.node(index)
    }

    /// Parameter node standing for a model input operand
    pub fn parameter_for(&self, operand_index: usize) -> Option<NodeIndex> {
        self.parameters
            .iter()
            .find(|p| p.operand_index == operand_index)
            .map(|p| p.node)
    }

    /// Result node standing for a model output operand
    pub fn result_for(&self, operand_index: usize) -> Option<NodeIndex> {
        self.results
            .iter()
            .find(|r| r.operand_index == operand_index)
            .map(|r| r.node)
    }

    /// Nodes in dependency order
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        toposort(self.dataflow.graph(), None).map_err(|cycle| {
            let name = self
                .dataflow
                .node(cycle.node_id())
                .map(|n| n.name.clone())
                .unwrap_or_default();
            Error::InvalidModel(format!("compiled graph contains a cycle through {}", name))
        })
    }

    /// Non-result nodes whose outputs nobody consumes
    pub fn dangling_nodes(&self) -> Vec<NodeIndex> {
        self.dataflow
            .graph()
            .node_indices()
            .filter(|&index| {
                !matches!(self.dataflow.graph()[index].kind, NodeKind::Result)
                    && self.dataflow.consumer_count(index) == 0
            })
            .collect()
    }

    /// JSON description of the graph in topological order
    pub fn to_json(&self) -> Result<String> {
        let summary = self.summary()?;
        Ok(serde_json::to_string_pretty(&summary)?)
    }

    /// Write the JSON description to `path`
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let summary = self.summary()?;
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, &summary)?;
        info!("Dumped compiled graph to {}", path.as_ref().display());
        Ok(())
    }

    fn summary(&self) -> Result<GraphSummary<'_>> {
        let graph = self.dataflow.graph();

        let mut nodes = Vec::with_capacity(graph.node_count());
        for index in self.topological_order()? {
            let node = &graph[index];
            let inputs = self
                .dataflow
                .inputs_of(index)
                .into_iter()
                .map(|input| format!("{}:{}", graph[input.node].name, input.slot))
                .collect();
            nodes.push(NodeSummary {
                name: &node.name,
                kind: &node.kind,
                inputs,
                outputs: &node.outputs,
            });
        }

        Ok(GraphSummary {
            device: self.device.to_string(),
            parameters: self.parameters.iter().map(|p| graph[p.node].name.as_str()).collect(),
            results: self.results.iter().map(|r| graph[r.node].name.as_str()).collect(),
            bindings: &self.bindings,
            nodes,
        })
    }
}
