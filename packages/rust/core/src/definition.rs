//! Pipeline definitions: branches of ordered steps wired by reference names.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use enrichkit_shared::{EnrichError, Result};

/// Plugin name marking a pass-through step: output = input.
pub const SEED_PLUGIN: &str = "seed";

/// Output names that bind a step's whole output list.
const WHOLE_OUTPUT: [&str; 2] = ["output", "*"];

/// Where a step input comes from.
///
/// A bare string names a reference; literals are written as
/// `{"literal": ...}` or as non-string JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputRef {
    Reference(String),
    Literal { literal: Value },
    List(Vec<InputRef>),
    Value(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    #[serde(alias = "step_id")]
    pub step_id: String,
    #[serde(alias = "pluginName", alias = "plugin_name")]
    pub plugin: String,
    /// Parameter name → input source. Resolved values are concatenated in
    /// declaration order.
    #[serde(default, alias = "inputRefs", alias = "input_refs")]
    pub inputs: IndexMap<String, InputRef>,
    /// Output name → reference name to bind.
    #[serde(default, alias = "outputRefs", alias = "output_refs")]
    pub outputs: IndexMap<String, String>,
    /// Raw plugin parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depth: u32,
}

impl StepDefinition {
    pub fn new(step_id: &str, plugin: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            plugin: plugin.to_string(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            params: Map::new(),
            depth: 0,
        }
    }

    pub fn input(mut self, name: &str, source: InputRef) -> Self {
        self.inputs.insert(name.to_string(), source);
        self
    }

    pub fn output(mut self, output: &str, reference: &str) -> Self {
        self.outputs.insert(output.to_string(), reference.to_string());
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn is_seed(&self) -> bool {
        self.plugin == SEED_PLUGIN
    }

    /// Project `values` for one declared output name.
    ///
    /// `output` / `*` select the whole list; any other name selects that
    /// field of each value, skipping values without it.
    pub fn project(output: &str, values: &[Value]) -> Vec<Value> {
        if WHOLE_OUTPUT.contains(&output) {
            return values.to_vec();
        }
        values
            .iter()
            .filter_map(|v| v.get(output).filter(|f| !f.is_null()).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

/// Caller-supplied pipeline; immutable for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub branches: Vec<Branch>,
}

impl PipelineDefinition {
    pub fn from_json(text: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(text)
            .map_err(|e| EnrichError::validation(format!("invalid pipeline JSON: {e}")))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(text)
            .map_err(|e| EnrichError::validation(format!("invalid pipeline YAML: {e}")))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load by extension: `.json`, else YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        }
    }

    /// Structural checks: unique branch ids, unique step ids per branch,
    /// non-empty plugin names.
    pub fn validate(&self) -> Result<()> {
        let mut branch_ids = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id.as_str()) {
                return Err(EnrichError::validation(format!(
                    "duplicate branch id '{}'",
                    branch.id
                )));
            }
            let mut step_ids = HashSet::new();
            for step in &branch.steps {
                if !step_ids.insert(step.step_id.as_str()) {
                    return Err(EnrichError::validation(format!(
                        "branch '{}': duplicate step id '{}'",
                        branch.id, step.step_id
                    )));
                }
                if step.plugin.trim().is_empty() {
                    return Err(EnrichError::validation(format!(
                        "branch '{}': step '{}' names no plugin",
                        branch.id, step.step_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON form.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    pub fn step_count(&self) -> usize {
        self.branches.iter().map(|b| b.steps.len()).sum()
    }
}
