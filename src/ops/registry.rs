use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::execution::options::TargetDevice;
use crate::graph::{NodeKind, NodeOutput, TensorDesc};
use crate::model::{Operation, OperationType};
use crate::parser::operand_table::OperandTable;

/// The slice of graph-builder state a translator may touch while building
pub trait GraphContext {
    /// Parameter node for a model input, created on first use
    fn create_input_parameter(&mut self, operand_index: usize) -> Result<NodeOutput>;

    /// Record a produced value that later operations consume
    fn register_intermediate(&mut self, operand_index: usize, output: NodeOutput) -> Result<()>;

    /// Record the value produced for a model output
    fn register_result(&mut self, operand_index: usize, output: NodeOutput) -> Result<()>;

    /// Bind a model input/output operand to a layer name
    fn register_layer_binding(&mut self, operand_index: usize, layer_name: &str, is_input: bool) -> Result<()>;

    /// Value previously produced for `operand_index`
    fn lookup_intermediate(&self, operand_index: usize) -> Result<NodeOutput>;

    /// Add an operator node with a generated name
    fn add_node(&mut self, kind: NodeKind, inputs: &[NodeOutput]) -> Result<NodeOutput>;

    /// Add a constant node with a generated name
    fn add_constant(&mut self, desc: TensorDesc, data: Bytes) -> Result<NodeOutput>;

    fn output_desc(&self, output: NodeOutput) -> Result<TensorDesc>;

    /// Bytes behind `output` when it is a constant
    fn constant_data(&self, output: NodeOutput) -> Option<Bytes>;

    fn node_name(&self, output: NodeOutput) -> Result<String>;

    /// Whether layout changes of constants should be folded on the host
    fn fold_constant_layouts(&self) -> bool;
}

/// Translates one kind of model operation into target graph nodes
pub trait Translator: Send + Sync + Debug {
    /// Operation kind handled by this translator
    fn operation_type(&self) -> OperationType;

    /// Check operand counts, types and shapes without touching any graph
    fn validate(&self, operation: &Operation, operands: &OperandTable) -> Result<()>;

    /// Emit nodes for `operation` and register its output with `context`
    fn build(&self, operation: &Operation, operands: &OperandTable, context: &mut dyn GraphContext) -> Result<()>;
}

/// Lazily built, per-compiler cache of translators
#[derive(Debug)]
pub struct OperatorRegistry {
    device: TargetDevice,
    translators: HashMap<OperationType, Arc<dyn Translator>>,
}

impl OperatorRegistry {
    /// Create a registry for the translator family of `device`
    pub fn new(device: TargetDevice) -> Self {
        Self {
            device,
            translators: HashMap::new(),
        }
    }

    pub fn device(&self) -> TargetDevice {
        self.device
    }

    /// Translator for `kind`, constructed on first request and cached afterwards
    pub fn translator_for(&mut self, kind: OperationType) -> Result<Arc<dyn Translator>> {
        if let Some(translator) = self.translators.get(&kind) {
            return Ok(Arc::clone(translator));
        }

        let translator = Self::create_translator(kind, self.device)?;
        debug!("Instantiated translator for {:?} ({})", kind, self.device);
        self.translators.insert(kind, Arc::clone(&translator));
        Ok(translator)
    }

    fn create_translator(kind: OperationType, device: TargetDevice) -> Result<Arc<dyn Translator>> {
        use crate::ops::activations::ReluTranslator;
        use crate::ops::math::add::AddTranslator;
        use crate::ops::math::fully_connected::FullyConnectedTranslator;
        use crate::ops::nn::conv::{Conv2dTranslator, DepthwiseConv2dTranslator};
        use crate::ops::tensor::{ConcatTranslator, ReshapeTranslator};

        let layout = device.native_layout();
        let translator: Arc<dyn Translator> = match kind {
            OperationType::Add => Arc::new(AddTranslator),
            OperationType::Concatenation => Arc::new(ConcatTranslator),
            OperationType::Conv2d => Arc::new(Conv2dTranslator::new(layout)),
            OperationType::DepthwiseConv2d => Arc::new(DepthwiseConv2dTranslator::new(layout)),
            OperationType::FullyConnected => Arc::new(FullyConnectedTranslator),
            OperationType::Relu => Arc::new(ReluTranslator),
            OperationType::Reshape => Arc::new(ReshapeTranslator),
            OperationType::Other(_) => return Err(Error::UnsupportedOperator(kind)),
        };
        Ok(translator)
    }

    /// Static pre-check of one operation; never mutates a graph
    pub fn is_supported(&mut self, operation: &Operation, operands: &OperandTable) -> bool {
        let result = self
            .translator_for(operation.operation_type)
            .and_then(|translator| translator.validate(operation, operands));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Operation {:?} is not supported: {}", operation.operation_type, e);
                false
            }
        }
    }

    /// Number of translators instantiated so far
    pub fn cached_count(&self) -> usize {
        self.translators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translator_is_cached() {
        let mut registry = OperatorRegistry::new(TargetDevice::Cpu);
        assert_eq!(registry.cached_count(), 0);

        let first = registry.translator_for(OperationType::Add).unwrap();
        let second = registry.translator_for(OperationType::Add).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.cached_count(), 1);

        let conv = registry.translator_for(OperationType::Conv2d).unwrap();
        assert_eq!(conv.operation_type(), OperationType::Conv2d);
        assert_eq!(registry.cached_count(), 2);
    }

    #[test]
    fn test_unknown_kind() {
        let mut registry = OperatorRegistry::new(TargetDevice::Gna);
        assert!(matches!(
            registry.translator_for(OperationType::Other(7)),
            Err(Error::UnsupportedOperator(OperationType::Other(7)))
        ));
        assert_eq!(registry.cached_count(), 0);
    }

    #[test]
    fn test_registries_are_independent() {
        let mut a = OperatorRegistry::new(TargetDevice::Cpu);
        let mut b = OperatorRegistry::new(TargetDevice::Cpu);
        let ta = a.translator_for(OperationType::Relu).unwrap();
        let tb = b.translator_for(OperationType::Relu).unwrap();
        assert!(!Arc::ptr_eq(&ta, &tb));
    }
}
