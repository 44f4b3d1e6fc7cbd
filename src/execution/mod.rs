pub mod options;
pub mod request;
pub mod prepared_model;

pub use options::{CompilerOptions, TargetDevice};
pub use request::{Request, RequestArgument};
pub use prepared_model::{InferenceBackend, PreparedModel};
