use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the arguments the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a tool whose arguments are a closed JSON object.
    ///
    /// `properties` is the JSON schema `properties` map; every name in `required` must be one of
    /// its keys. Extra properties are never accepted.
    pub fn object<N, D>(name: N, description: D, properties: Value, required: &[&str]) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self::new(
            name,
            description,
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema_is_closed() {
        let tool = Tool::object(
            "open_file",
            "Open a file",
            json!({"path": {"type": "string"}}),
            &["path"],
        );

        assert_eq!(tool.parameters["type"], "object");
        assert_eq!(tool.parameters["required"], json!(["path"]));
        assert_eq!(tool.parameters["additionalProperties"], json!(false));
        assert_eq!(tool.parameters["properties"]["path"]["type"], "string");
    }
}
