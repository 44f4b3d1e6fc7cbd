pub mod error;
pub mod model;
pub mod model_builder;
pub mod memory;
pub mod parser;
pub mod layout;
pub mod graph;
pub mod ops;
pub mod execution;

// Re-export commonly used types
pub use error::{Error, Result};
pub use model::{DataLocation, MemoryHandle, Model, Operand, OperandLifetime, OperandType, Operation, OperationType};
pub use model_builder::ModelBuilder;
pub use memory::{FileMapper, InMemoryMapper, MemoryPoolSet, PoolMapper, RequestPools};
pub use parser::{GraphBuilder, ModelLoader, OperandTable, OutputShape};
pub use graph::{CompiledGraph, LayerBindings, NodeKind, TensorDesc};
pub use ops::registry::{GraphContext, OperatorRegistry, Translator};
pub use execution::{CompilerOptions, InferenceBackend, PreparedModel, Request, RequestArgument, TargetDevice};
