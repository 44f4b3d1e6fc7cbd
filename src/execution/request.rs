use serde::{Deserialize, Serialize};

use crate::model::DataLocation;

/// Where one model input or output lives inside the request pools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestArgument {
    /// The caller omitted this argument
    pub has_no_value: bool,
    pub location: DataLocation,
    /// Overrides the model's dimensions; empty means "as declared"
    pub dimensions: Vec<u32>,
}

impl RequestArgument {
    pub fn new(pool_index: u32, offset: u32, length: u32) -> Self {
        Self {
            has_no_value: false,
            location: DataLocation {
                pool_index,
                offset,
                length,
            },
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: &[u32]) -> Self {
        self.dimensions = dimensions.to_vec();
        self
    }

    /// Dimensions in effect for this request
    pub fn effective_dimensions<'a>(&'a self, declared: &'a [u32]) -> &'a [u32] {
        if self.dimensions.is_empty() {
            declared
        } else {
            &self.dimensions
        }
    }
}

/// One inference request, arguments listed in model input/output order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    pub inputs: Vec<RequestArgument>,
    pub outputs: Vec<RequestArgument>,
}
