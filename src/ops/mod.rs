pub mod registry;
pub mod common;
pub mod tensor;
pub mod activations;

pub mod prelude {
    pub use super::registry::{GraphContext, OperatorRegistry, Translator};
}

pub use registry::{GraphContext, OperatorRegistry, Translator};

// Arithmetic translators
pub mod math {
    pub mod add;
    pub mod fully_connected;
}

// Neural network translators
pub mod nn {
    pub mod conv;
}
