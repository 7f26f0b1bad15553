//! ComfyUI API-format prompt graph.
//!
//! A workflow exported with "Save (API format)" is a JSON object mapping
//! node ids to `{"inputs": {...}, "class_type": "..."}`. Extra keys such
//! as `_meta` are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of the prompt graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Widget values and links (`["<node id>", <output index>]`) by input name.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub class_type: String,
    /// Any other keys present in the template.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A full prompt graph keyed by node id.
pub type Workflow = BTreeMap<String, WorkflowNode>;

impl WorkflowNode {
    /// Overwrite (or add) a single input value.
    pub fn set_input(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.inputs.insert(name.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_format_with_meta() {
        let json = r#"{
            "2": {"inputs": {"text": "", "clip": ["1", 0]}, "class_type": "CLIPTextEncode", "_meta": {"title": "Prompt"}}
        }"#;
        let workflow: Workflow = serde_json::from_str(json).unwrap();
        let node = &workflow["2"];
        assert_eq!(node.class_type, "CLIPTextEncode");
        assert_eq!(node.inputs["clip"], serde_json::json!(["1", 0]));
        assert_eq!(node.extra["_meta"]["title"], "Prompt");
    }

    #[test]
    fn meta_survives_serialization() {
        let json = r#"{"9": {"inputs": {}, "class_type": "SaveImage", "_meta": {"title": "Save"}}}"#;
        let workflow: Workflow = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&workflow).unwrap();
        assert_eq!(value["9"]["_meta"]["title"], "Save");
        assert_eq!(value["9"]["class_type"], "SaveImage");
    }

    #[test]
    fn set_input_overwrites() {
        let mut node = WorkflowNode {
            inputs: serde_json::Map::new(),
            class_type: "KSampler".into(),
            extra: serde_json::Map::new(),
        };
        node.set_input("seed", 1);
        node.set_input("seed", 42_i64);
        assert_eq!(node.inputs["seed"], 42);
    }
}
