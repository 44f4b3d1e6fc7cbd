pub mod model_loader;
pub mod operand_table;
pub mod graph_builder;

// Re-export key types from the parser module
pub use model_loader::ModelLoader;
pub use operand_table::{ConstantElement, OperandTable, OutputShape, RuntimeOperandInfo};
pub use graph_builder::GraphBuilder;
