use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::layout::DataLayout;

/// Downstream backend a graph is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TargetDevice {
    Cpu,
    Gna,
    Vpu,
}

impl Default for TargetDevice {
    fn default() -> Self {
        TargetDevice::Cpu
    }
}

impl TargetDevice {
    /// Layout the backend's spatial kernels consume
    pub fn native_layout(&self) -> DataLayout {
        match self {
            TargetDevice::Cpu | TargetDevice::Gna | TargetDevice::Vpu => DataLayout::ChannelFirst,
        }
    }
}

/// Options for model compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Target backend; selects the translator family
    pub device: TargetDevice,
    /// Prefix 3-D model inputs with a unit batch dimension
    pub promote_3d_inputs: bool,
    /// Fold layout changes of constant tensors on the host
    pub fold_constant_layouts: bool,
    /// Write a JSON dump of each compiled graph here
    pub dump_graph: Option<PathBuf>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            device: TargetDevice::Cpu,
            promote_3d_inputs: true,
            fold_constant_layouts: true,
            dump_graph: None,
        }
    }
}

impl CompilerOptions {
    /// Create a new compiler options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to read compiler options: {}", e))
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Set the target device
    pub fn set_device(mut self, device: TargetDevice) -> Self {
        self.device = device;
        self
    }

    /// Enable or disable 3-D input promotion
    pub fn promote_3d_inputs(mut self, enable: bool) -> Self {
        self.promote_3d_inputs = enable;
        self
    }

    /// Enable or disable host-side folding of constant layouts
    pub fn fold_constant_layouts(mut self, enable: bool) -> Self {
        self.fold_constant_layouts = enable;
        self
    }

    /// Dump every compiled graph to `path`
    pub fn set_dump_graph<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.dump_graph = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_device_names() {
        assert_eq!(TargetDevice::from_str("gna").unwrap(), TargetDevice::Gna);
        assert_eq!(TargetDevice::from_str("CPU").unwrap(), TargetDevice::Cpu);
        assert!(TargetDevice::from_str("tpu").is_err());
        assert_eq!(TargetDevice::Vpu.to_string(), "VPU");
    }

    #[test]
    fn test_builder() {
        let options = CompilerOptions::new()
            .set_device(TargetDevice::Vpu)
            .promote_3d_inputs(false)
            .set_dump_graph("/tmp/graph.json");
        assert_eq!(options.device, TargetDevice::Vpu);
        assert!(!options.promote_3d_inputs);
        assert!(options.fold_constant_layouts);
        assert_eq!(options.dump_graph, Some(PathBuf::from("/tmp/graph.json")));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{"device": "GNA", "fold_constant_layouts": false}"#).unwrap();

        let options = CompilerOptions::from_file(&path).unwrap();
        assert_eq!(options.device, TargetDevice::Gna);
        assert!(!options.fold_constant_layouts);
        assert!(options.promote_3d_inputs);
        assert!(options.dump_graph.is_none());

        fs::write(&path, r#"{"device": "TPU"}"#).unwrap();
        assert!(matches!(CompilerOptions::from_file(&path), Err(Error::ParseError(_))));
    }
}
