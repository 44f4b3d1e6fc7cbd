pub mod compiled;
pub mod dataflow;
pub mod node;

pub use compiled::{CompiledGraph, GraphEndpoint, LayerBindings, LayerInfo};
pub use dataflow::{Dataflow, NodeOutput, Port};
pub use node::{ConvAttributes, ElementType, Node, NodeKind, PadType, TensorDesc};
