use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info};

use crate::error::{Error, Result};
use crate::execution::options::CompilerOptions;
use crate::execution::request::{Request, RequestArgument};
use crate::graph::CompiledGraph;
use crate::memory::{MemoryPoolSet, PoolMapper, RequestPools};
use crate::model::Model;
use crate::parser::graph_builder::GraphBuilder;
use crate::parser::model_loader::ModelLoader;
use crate::parser::operand_table::{OperandTable, OutputShape, RuntimeOperandInfo};

/// Engine that runs a compiled graph.
///
/// Inputs and outputs are keyed by the layer names recorded in the graph's
/// bindings.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, graph: &CompiledGraph, inputs: &HashMap<String, &[u8]>) -> Result<HashMap<String, Vec<u8>>>;
}

/// A compiled model ready to serve requests.
///
/// Immutable once prepared; clones share the same graph and operand table,
/// so requests may run concurrently from several threads.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    graph: Arc<CompiledGraph>,
    operands: Arc<OperandTable>,
}

impl PreparedModel {
    /// Map pools, resolve operands, validate and compile `model`
    pub fn prepare(model: &Model, mapper: &dyn PoolMapper, options: &CompilerOptions) -> Result<Self> {
        ModelLoader::validate_structure(model)?;

        let pools = MemoryPoolSet::map_all(&model.pools, mapper)?;
        let operands = OperandTable::resolve(model, &pools)?;

        let mut builder = GraphBuilder::new(&operands, options);
        info!("Validating {} operations", model.operations.len());
        builder.check_supported(&model.operations)?;
        let graph = builder.compile(&model.operations)?;

        info!(
            "Prepared model: {} nodes, {} inputs, {} outputs",
            graph.dataflow().node_count(),
            graph.parameters().len(),
            graph.results().len()
        );

        Ok(Self {
            graph: Arc::new(graph),
            operands: Arc::new(operands),
        })
    }

    /// Per-operation support flags, in operation order
    pub fn supported_operations(model: &Model, mapper: &dyn PoolMapper, options: &CompilerOptions) -> Result<Vec<bool>> {
        ModelLoader::validate_structure(model)?;
        let pools = MemoryPoolSet::map_all(&model.pools, mapper)?;
        let operands = OperandTable::resolve(model, &pools)?;

        let mut builder = GraphBuilder::new(&operands, options);
        let registry = builder.registry_mut();
        Ok(model
            .operations
            .iter()
            .map(|operation| registry.is_supported(operation, &operands))
            .collect())
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn operands(&self) -> &OperandTable {
        &self.operands
    }

    /// Output shapes as declared by the model
    pub fn output_shapes(&self) -> Vec<OutputShape> {
        self.operands.output_shapes()
    }

    /// Run one request through `backend`, writing outputs into `pools`
    pub fn execute(
        &self,
        request: &Request,
        pools: &mut RequestPools,
        backend: &dyn InferenceBackend,
    ) -> Result<Vec<OutputShape>> {
        let input_indexes = self.operands.input_indexes();
        let output_indexes = self.operands.output_indexes();
        if request.inputs.len() != input_indexes.len() || request.outputs.len() != output_indexes.len() {
            error!(
                "Request has {} inputs and {} outputs, model expects {} and {}",
                request.inputs.len(),
                request.outputs.len(),
                input_indexes.len(),
                output_indexes.len()
            );
            return Err(Error::BindingMismatch(format!(
                "request has {} inputs and {} outputs, model expects {} and {}",
                request.inputs.len(),
                request.outputs.len(),
                input_indexes.len(),
                output_indexes.len()
            )));
        }

        info!("Executing request on {}", self.graph.device());

        let mut produced = {
            let mut inputs = HashMap::with_capacity(input_indexes.len());
            for (argument, &index) in request.inputs.iter().zip(input_indexes) {
                if argument.has_no_value {
                    return Err(Error::BindingMismatch(format!("model input {} has no value", index)));
                }
                let layer = self.graph.bindings().input(index).ok_or_else(|| {
                    Error::BindingMismatch(format!("model input {} has no layer binding", index))
                })?;
                check_region(index, self.operands.operand(index)?, argument)?;

                let data = pools.read(&argument.location)?;
                debug!("Input {} -> {} ({} bytes)", index, layer.layer_name, data.len());
                inputs.insert(layer.layer_name.clone(), data);
            }

            backend.infer(&self.graph, &inputs).map_err(|e| {
                error!("Backend failed: {}", e);
                e
            })?
        };

        let mut shapes = Vec::with_capacity(output_indexes.len());
        for (argument, &index) in request.outputs.iter().zip(output_indexes) {
            let info = self.operands.operand(index)?;
            let dimensions = argument.effective_dimensions(&info.dimensions).to_vec();

            if !argument.has_no_value {
                let layer = self.graph.bindings().output(index).ok_or_else(|| {
                    Error::BindingMismatch(format!("model output {} has no layer binding", index))
                })?;
                let data = produced.remove(&layer.layer_name).ok_or_else(|| {
                    Error::Backend(format!("no data produced for layer '{}'", layer.layer_name))
                })?;
                pools.write(&argument.location, &data).map_err(|e| {
                    error!("Cannot store model output {}: {}", index, e);
                    e
                })?;
                debug!("Output {} <- {} ({} bytes)", index, layer.layer_name, data.len());
            }

            shapes.push(OutputShape {
                dimensions,
                is_sufficient: true,
            });
        }

        Ok(shapes)
    }
}

/// Byte length implied by the argument's dimensions, when fully known
fn expected_length(info: &RuntimeOperandInfo, argument: &RequestArgument) -> Option<usize> {
    let dimensions = argument.effective_dimensions(&info.dimensions);
    if dimensions.contains(&0) {
        return None;
    }
    let count: usize = dimensions.iter().map(|&d| d as usize).product();
    info.runtime_type.element_size().map(|size| count * size)
}

fn check_region(index: usize, info: &RuntimeOperandInfo, argument: &RequestArgument) -> Result<()> {
    match expected_length(info, argument) {
        Some(expected) if expected != argument.location.length as usize => {
            error!(
                "Request region for operand {} is {} bytes, expected {}",
                index, argument.location.length, expected
            );
            Err(Error::BindingMismatch(format!(
                "operand {} needs {} bytes, request provides {}",
                index, expected, argument.location.length
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMapper;
    use crate::model::{OperandType, OperationType};
    use crate::model_builder::ModelBuilder;
    use crate::parser::operand_table::encode_elements;

    /// Applies relu to the single input
    struct ReluBackend;

    impl InferenceBackend for ReluBackend {
        fn infer(&self, graph: &CompiledGraph, inputs: &HashMap<String, &[u8]>) -> Result<HashMap<String, Vec<u8>>> {
            let input = inputs
                .values()
                .next()
                .ok_or_else(|| Error::Backend("no input".to_string()))?;
            let data: Vec<u8> = input
                .chunks_exact(4)
                .flat_map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]).max(0.0).to_ne_bytes())
                .collect();
            Ok(graph
                .bindings()
                .outputs()
                .map(|(_, layer)| (layer.layer_name.clone(), data.clone()))
                .collect())
        }
    }

    struct FailingBackend;

    impl InferenceBackend for FailingBackend {
        fn infer(&self, _: &CompiledGraph, _: &HashMap<String, &[u8]>) -> Result<HashMap<String, Vec<u8>>> {
            Err(Error::Backend("device lost".to_string()))
        }
    }

    fn relu_model() -> Model {
        let mut builder = ModelBuilder::new();
        let input = builder.add_input(OperandType::TensorFloat32, &[1, 4]);
        let output = builder.add_output(OperandType::TensorFloat32, &[1, 4]);
        builder.add_operation(OperationType::Relu, &[input], &[output]);
        builder.build()
    }

    fn request() -> Request {
        Request {
            inputs: vec![RequestArgument::new(0, 0, 16)],
            outputs: vec![RequestArgument::new(1, 0, 16)],
        }
    }

    #[test]
    fn test_execute_relu() {
        let prepared = PreparedModel::prepare(&relu_model(), &InMemoryMapper::new(), &CompilerOptions::default()).unwrap();
        let input = encode_elements(&[-1.0f32, 2.0, -3.0, 4.0]).to_vec();
        let mut pools = RequestPools::new(vec![input, vec![0; 16]]);

        let shapes = prepared.execute(&request(), &mut pools, &ReluBackend).unwrap();
        assert_eq!(shapes, vec![OutputShape { dimensions: vec![1, 4], is_sufficient: true }]);
        assert_eq!(pools.buffer(1).unwrap(), &encode_elements(&[0.0f32, 2.0, 0.0, 4.0])[..]);
    }

    #[test]
    fn test_failed_request_keeps_model_usable() {
        let prepared = PreparedModel::prepare(&relu_model(), &InMemoryMapper::new(), &CompilerOptions::default()).unwrap();
        let input = encode_elements(&[1.0f32, 2.0, 3.0, 4.0]).to_vec();
        let mut pools = RequestPools::new(vec![input, vec![0; 16]]);

        assert!(matches!(
            prepared.execute(&request(), &mut pools, &FailingBackend),
            Err(Error::Backend(_))
        ));
        assert!(prepared.execute(&request(), &mut pools, &ReluBackend).is_ok());
    }

    #[test]
    fn test_region_size_is_checked() {
        let prepared = PreparedModel::prepare(&relu_model(), &InMemoryMapper::new(), &CompilerOptions::default()).unwrap();
        let mut pools = RequestPools::new(vec![vec![0; 16], vec![0; 16]]);
        let mut request = request();
        request.inputs[0].location.length = 8;

        assert!(matches!(
            prepared.execute(&request, &mut pools, &ReluBackend),
            Err(Error::BindingMismatch(_))
        ));
    }

    #[test]
    fn test_prepared_model_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PreparedModel>();
    }
}
