use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::{Model, OperandLifetime};

/// Loads serialized models and checks their structural consistency
pub struct ModelLoader;

impl ModelLoader {
    /// Load a model from a JSON file
    pub fn load_model(path: &Path) -> Result<Model> {
        let mut file = File::open(path).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to open file: {}", e))
        })?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to read file: {}", e))
        })?;

        info!("Loading model from {}", path.display());
        Self::load_model_from_bytes(&buffer)
    }

    /// Load a model from JSON bytes
    pub fn load_model_from_bytes(data: &[u8]) -> Result<Model> {
        let model: Model = serde_json::from_slice(data)?;
        Self::validate_structure(&model)?;
        Ok(model)
    }

    pub fn load_model_from_str(data: &str) -> Result<Model> {
        Self::load_model_from_bytes(data.as_bytes())
    }

    /// Check every operand reference and the input/output lifetimes
    pub fn validate_structure(model: &Model) -> Result<()> {
        let operand_count = model.operands.len();
        let check = |index: u32, what: &str| -> Result<()> {
            if (index as usize) < operand_count {
                Ok(())
            } else {
                Err(Error::InvalidModel(format!(
                    "{} references operand {}, but the model has {} operands",
                    what, index, operand_count
                )))
            }
        };

        for (i, operation) in model.operations.iter().enumerate() {
            if operation.outputs.is_empty() {
                return Err(Error::InvalidModel(format!("operation {} has no outputs", i)));
            }
            for &index in operation.inputs.iter().chain(operation.outputs.iter()) {
                check(index, &format!("operation {} ({:?})", i, operation.operation_type))?;
            }
        }

        for &index in &model.input_indexes {
            check(index, "model input list")?;
            if model.operands[index as usize].lifetime != OperandLifetime::ModelInput {
                return Err(Error::InvalidModel(format!(
                    "model input operand {} does not have the MODEL_INPUT lifetime",
                    index
                )));
            }
        }

        for &index in &model.output_indexes {
            check(index, "model output list")?;
            if model.operands[index as usize].lifetime != OperandLifetime::ModelOutput {
                return Err(Error::InvalidModel(format!(
                    "model output operand {} does not have the MODEL_OUTPUT lifetime",
                    index
                )));
            }
        }

        debug!(
            "Model structure ok: {} operands, {} operations, {} inputs, {} outputs",
            operand_count,
            model.operations.len(),
            model.input_indexes.len(),
            model.output_indexes.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ADD_MODEL: &str = r#"{
        "operands": [
            {"type": 3, "dimensions": [1, 4], "lifetime": 1},
            {"type": 3, "dimensions": [1, 4], "lifetime": 1},
            {"type": 1, "lifetime": 3, "location": {"poolIndex": 0, "offset": 0, "length": 4}},
            {"type": 3, "dimensions": [1, 4], "lifetime": 2}
        ],
        "operations": [{"type": 0, "inputs": [0, 1, 2], "outputs": [3]}],
        "inputIndexes": [0, 1],
        "outputIndexes": [3],
        "operandValues": [0, 0, 0, 0]
    }"#;

    #[test]
    fn test_load_from_str() {
        let model = ModelLoader::load_model_from_str(ADD_MODEL).unwrap();
        assert_eq!(model.operands.len(), 4);
        assert_eq!(model.operations.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ADD_MODEL.as_bytes()).unwrap();

        let model = ModelLoader::load_model(file.path()).unwrap();
        assert_eq!(model.input_indexes, vec![0, 1]);

        let missing = ModelLoader::load_model(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(Error::ModelLoadError(_, _))));
    }

    #[test]
    fn test_rejects_dangling_reference() {
        let bad = ADD_MODEL.replace("\"outputs\": [3]", "\"outputs\": [9]");
        assert!(matches!(
            ModelLoader::load_model_from_str(&bad),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            ModelLoader::load_model_from_str("{\"operands\": 3}"),
            Err(Error::ParseError(_))
        ));
    }
}
