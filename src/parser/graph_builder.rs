use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::execution::options::CompilerOptions;
use crate::graph::{CompiledGraph, Dataflow, GraphEndpoint, LayerBindings, NodeKind, NodeOutput, TensorDesc};
use crate::model::{OperandLifetime, Operation};
use crate::ops::common::element_type;
use crate::ops::registry::{GraphContext, OperatorRegistry};
use crate::parser::operand_table::OperandTable;

/// Graph builder responsible for turning a resolved model into a dataflow graph.
///
/// Operations are translated in declaration order; a builder is single-use
/// and any failure means the partially built graph must be discarded.
pub struct GraphBuilder<'a> {
    operands: &'a OperandTable,
    options: CompilerOptions,
    registry: OperatorRegistry,
    dataflow: Dataflow,
    parameters: HashMap<usize, NodeOutput>,
    intermediates: HashMap<usize, NodeOutput>,
    results: HashMap<usize, NodeOutput>,
    bindings: LayerBindings,
    name_counter: usize,
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder over a resolved operand table
    pub fn new(operands: &'a OperandTable, options: &CompilerOptions) -> Self {
        Self {
            operands,
            options: options.clone(),
            registry: OperatorRegistry::new(options.device),
            dataflow: Dataflow::new(),
            parameters: HashMap::new(),
            intermediates: HashMap::new(),
            results: HashMap::new(),
            bindings: LayerBindings::new(),
            name_counter: 0,
        }
    }

    pub fn registry_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.registry
    }

    /// Reject the model before any node is built if an operation is unsupported
    pub fn check_supported(&mut self, operations: &[Operation]) -> Result<()> {
        for (i, operation) in operations.iter().enumerate() {
            let translator = self.registry.translator_for(operation.operation_type)?;
            translator.validate(operation, self.operands).map_err(|e| {
                error!("Operation {} ({:?}) is not supported: {}", i, operation.operation_type, e);
                e
            })?;
        }
        debug!("All {} operations passed validation", operations.len());
        Ok(())
    }

    /// Translate every operation and assemble the compiled graph
    pub fn compile(mut self, operations: &[Operation]) -> Result<CompiledGraph> {
        info!("Compiling {} operations for {}", operations.len(), self.options.device);
        let operands = self.operands;

        for (i, operation) in operations.iter().enumerate() {
            let translator = self.registry.translator_for(operation.operation_type).map_err(|e| {
                error!("Operation {}: {}", i, e);
                e
            })?;
            translator.validate(operation, operands)?;

            debug!("Translating operation {} ({:?})", i, operation.operation_type);
            translator.build(operation, operands, &mut self).map_err(|e| {
                error!("Failed to translate operation {} ({:?}): {}", i, operation.operation_type, e);
                e
            })?;
        }

        // One parameter per model input, in input order, even if nothing consumed it
        let mut parameters = Vec::with_capacity(operands.input_indexes().len());
        for &index in operands.input_indexes() {
            let parameter = self.create_input_parameter(index)?;
            if self.dataflow.consumer_count(parameter.node) == 0 {
                warn!("Model input {} is not consumed by any operation", index);
            }
            parameters.push(GraphEndpoint {
                operand_index: index,
                node: parameter.node,
            });
        }

        let mut results = Vec::with_capacity(operands.output_indexes().len());
        for &index in operands.output_indexes() {
            let producer = self.results.get(&index).copied().ok_or_else(|| {
                error!("Model output {} was never produced", index);
                Error::DisconnectedGraph(index)
            })?;
            let name = self.next_name("Result");
            let result = self.dataflow.add_node(name, NodeKind::Result, &[producer])?;
            results.push(GraphEndpoint {
                operand_index: index,
                node: result.node,
            });
        }

        let graph = CompiledGraph::new(self.dataflow, parameters, results, self.bindings, self.options.device)?;

        if let Some(path) = &self.options.dump_graph {
            graph.dump(path)?;
        }

        Ok(graph)
    }

    fn next_name(&mut self, prefix: &str) -> String {
        let name = format!("{}-{}", prefix, self.name_counter);
        self.name_counter += 1;
        name
    }
}

impl GraphContext for GraphBuilder<'_> {
    fn create_input_parameter(&mut self, operand_index: usize) -> Result<NodeOutput> {
        if let Some(&existing) = self.parameters.get(&operand_index) {
            return Ok(existing);
        }

        let info = self.operands.operand(operand_index)?;
        if info.lifetime != OperandLifetime::ModelInput {
            return Err(Error::InvalidModel(format!(
                "operand {} is not a model input",
                operand_index
            )));
        }

        let mut shape = info.shape();
        if shape.len() == 3 && self.options.promote_3d_inputs {
            info!("Promoting 3-D input {} {:?} to 4-D", operand_index, shape);
            shape.insert(0, 1);
        }

        let name = self.next_name("Parameter");
        let parameter = self
            .dataflow
            .add_parameter(name.clone(), TensorDesc::new(element_type(info)?, shape));
        self.parameters.insert(operand_index, parameter);
        self.register_layer_binding(operand_index, &name, true)?;

        debug!("Created parameter {} for operand {}", name, operand_index);
        Ok(parameter)
    }

    fn register_intermediate(&mut self, operand_index: usize, output: NodeOutput) -> Result<()> {
        if self.intermediates.contains_key(&operand_index) {
            error!("Operand {} is produced twice", operand_index);
            return Err(Error::OperandRedefined(operand_index));
        }
        self.intermediates.insert(operand_index, output);
        Ok(())
    }

    fn register_result(&mut self, operand_index: usize, output: NodeOutput) -> Result<()> {
        if self.results.contains_key(&operand_index) {
            error!("Model output {} is produced twice", operand_index);
            return Err(Error::OperandRedefined(operand_index));
        }
        self.results.insert(operand_index, output);
        Ok(())
    }

    fn register_layer_binding(&mut self, operand_index: usize, layer_name: &str, is_input: bool) -> Result<()> {
        self.bindings.insert(operand_index, layer_name, is_input)
    }

    fn lookup_intermediate(&self, operand_index: usize) -> Result<NodeOutput> {
        // Model outputs may also feed later operations
        self.intermediates
            .get(&operand_index)
            .or_else(|| self.results.get(&operand_index))
            .copied()
            .ok_or(Error::UnresolvedOperand(operand_index))
    }

    fn add_node(&mut self, kind: NodeKind, inputs: &[NodeOutput]) -> Result<NodeOutput> {
        let name = self.next_name(kind.op_name());
        self.dataflow.add_node(name, kind, inputs)
    }

    fn add_constant(&mut self, desc: TensorDesc, data: Bytes) -> Result<NodeOutput> {
        let name = self.next_name("Constant");
        self.dataflow.add_constant(name, desc, data)
    }

    fn output_desc(&self, output: NodeOutput) -> Result<TensorDesc> {
        self.dataflow.output_desc(output).cloned()
    }

    fn constant_data(&self, output: NodeOutput) -> Option<Bytes> {
        self.dataflow.constant_data(output).cloned()
    }

    fn node_name(&self, output: NodeOutput) -> Result<String> {
        Ok(self.dataflow.node(output.node)?.name.clone())
    }

    fn fold_constant_layouts(&self) -> bool {
        self.options.fold_constant_layouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPoolSet;
    use crate::model::{Model, OperandType, OperationType};
    use crate::model_builder::ModelBuilder;

    fn add_model() -> Model {
        let mut builder = ModelBuilder::new();
        let a = builder.add_input(OperandType::TensorFloat32, &[1, 4]);
        let b = builder.add_input(OperandType::TensorFloat32, &[1, 4]);
        let act = builder.add_i32(0);
        let out = builder.add_output(OperandType::TensorFloat32, &[1, 4]);
        builder.add_operation(OperationType::Add, &[a, b, act], &[out]);
        builder.build()
    }

    fn table(model: &Model) -> OperandTable {
        OperandTable::resolve(model, &MemoryPoolSet::new()).unwrap()
    }

    #[test]
    fn test_parameters_are_cached() {
        let model = add_model();
        let operands = table(&model);
        let mut builder = GraphBuilder::new(&operands, &CompilerOptions::default());

        let first = builder.create_input_parameter(0).unwrap();
        let second = builder.create_input_parameter(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(builder.bindings.input_count(), 1);

        // Operand 2 is the activation constant
        assert!(builder.create_input_parameter(2).is_err());
    }

    #[test]
    fn test_three_d_input_promotion() {
        let mut model_builder = ModelBuilder::new();
        let input = model_builder.add_input(OperandType::TensorFloat32, &[2, 3, 4]);
        let model = model_builder.build();
        let operands = table(&model);

        let mut builder = GraphBuilder::new(&operands, &CompilerOptions::default());
        let parameter = builder.create_input_parameter(input as usize).unwrap();
        assert_eq!(builder.output_desc(parameter).unwrap().shape, vec![1, 2, 3, 4]);

        let options = CompilerOptions::default().promote_3d_inputs(false);
        let mut builder = GraphBuilder::new(&operands, &options);
        let parameter = builder.create_input_parameter(input as usize).unwrap();
        assert_eq!(builder.output_desc(parameter).unwrap().shape, vec![2, 3, 4]);
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let model = add_model();
        let operands = table(&model);
        let mut builder = GraphBuilder::new(&operands, &CompilerOptions::default());
        let parameter = builder.create_input_parameter(0).unwrap();

        builder.register_intermediate(5, parameter).unwrap();
        assert!(matches!(
            builder.register_intermediate(5, parameter),
            Err(Error::OperandRedefined(5))
        ));
        builder.register_result(3, parameter).unwrap();
        assert!(matches!(builder.register_result(3, parameter), Err(Error::OperandRedefined(3))));
    }

    #[test]
    fn test_lookup_unresolved() {
        let model = add_model();
        let operands = table(&model);
        let builder = GraphBuilder::new(&operands, &CompilerOptions::default());
        assert!(matches!(builder.lookup_intermediate(7), Err(Error::UnresolvedOperand(7))));
    }

    #[test]
    fn test_names_are_unique() {
        let model = add_model();
        let operands = table(&model);
        let mut builder = GraphBuilder::new(&operands, &CompilerOptions::default());
        let a = builder.create_input_parameter(0).unwrap();
        let relu = builder.add_node(NodeKind::Relu, &[a]).unwrap();
        assert_eq!(builder.node_name(a).unwrap(), "Parameter-0");
        assert_eq!(builder.node_name(relu).unwrap(), "Relu-1");
    }

    #[test]
    fn test_compile_add() {
        let model = add_model();
        let operands = table(&model);
        let mut builder = GraphBuilder::new(&operands, &CompilerOptions::default());
        builder.check_supported(&model.operations).unwrap();

        let graph = builder.compile(&model.operations).unwrap();
        assert_eq!(graph.parameters().len(), 2);
        assert_eq!(graph.results().len(), 1);
        assert_eq!(graph.bindings().len(), 3);
        assert_eq!(graph.bindings().output(3).unwrap().layer_name, "Add-2");
    }
}
