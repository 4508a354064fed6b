use jsonschema::JSONSchema;
use serde_json::Value;

/// Compiled argument schema for one tool.
pub struct SchemaValidator {
    compiled: JSONSchema,
}

impl SchemaValidator {
    /// Fails when the advertised schema itself is not a valid JSON schema.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        JSONSchema::compile(schema)
            .map(|compiled| Self { compiled })
            .map_err(|error| error.to_string())
    }

    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        self.compiled.validate(instance).map_err(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}
