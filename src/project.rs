//! Fixture project descriptors (v0.1)
//!
//! Minimal fluent builders for the descriptors the engine consumes. A
//! descriptor is a named set of targets whose steps script what the build
//! reports; `save` flushes it to `<name>.kiln.json`, which is the form the
//! engine operates on.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KilnError;
use crate::event::Importance;

/// One scripted step inside a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    /// Report an informational message
    Message {
        text: String,
        #[serde(default)]
        importance: Importance,
    },
    /// Report a warning; the target keeps running
    Warning {
        #[serde(default)]
        code: Option<String>,
        text: String,
    },
    /// Report an error; the target fails and later targets are skipped
    Error {
        #[serde(default)]
        code: Option<String>,
        text: String,
    },
    /// Raise a fatal engine failure mid-build
    Abort { text: String },
}

/// A named target with scripted steps and declared outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    name: String,
    #[serde(default)]
    steps: Vec<StepSpec>,
    #[serde(default)]
    outputs: Vec<String>,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Script a normal-importance message
    pub fn message(self, text: impl Into<String>) -> Self {
        self.message_with_importance(text, Importance::Normal)
    }

    pub fn message_with_importance(
        mut self,
        text: impl Into<String>,
        importance: Importance,
    ) -> Self {
        self.steps.push(StepSpec::Message {
            text: text.into(),
            importance,
        });
        self
    }

    pub fn warning(mut self, text: impl Into<String>) -> Self {
        self.steps.push(StepSpec::Warning {
            code: None,
            text: text.into(),
        });
        self
    }

    pub fn warning_with_code(mut self, code: impl Into<String>, text: impl Into<String>) -> Self {
        self.steps.push(StepSpec::Warning {
            code: Some(code.into()),
            text: text.into(),
        });
        self
    }

    pub fn error(mut self, text: impl Into<String>) -> Self {
        self.steps.push(StepSpec::Error {
            code: None,
            text: text.into(),
        });
        self
    }

    pub fn error_with_code(mut self, code: impl Into<String>, text: impl Into<String>) -> Self {
        self.steps.push(StepSpec::Error {
            code: Some(code.into()),
            text: text.into(),
        });
        self
    }

    pub fn abort(mut self, text: impl Into<String>) -> Self {
        self.steps.push(StepSpec::Abort { text: text.into() });
        self
    }

    /// Declare an output item surfaced when the target succeeds
    pub fn output(mut self, item: impl Into<String>) -> Self {
        self.outputs.push(item.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// A build-project descriptor used as a test fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    name: String,
    #[serde(default)]
    default_targets: Vec<String>,
    #[serde(default)]
    global_properties: BTreeMap<String, String>,
    #[serde(default)]
    targets: Vec<TargetSpec>,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_targets: Vec::new(),
            global_properties: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    /// Target to run when a request names none
    pub fn with_default_target(mut self, name: impl Into<String>) -> Self {
        self.default_targets.push(name.into());
        self
    }

    pub fn with_global_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.global_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.targets.push(target);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_targets(&self) -> &[String] {
        &self.default_targets
    }

    pub fn global_properties(&self) -> &BTreeMap<String, String> {
        &self.global_properties
    }

    pub fn targets(&self) -> &[TargetSpec] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Flush the in-memory descriptor to `<dir>/<name>.kiln.json` and return
    /// the saved path. Deterministic serialization (sorted properties).
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, KilnError> {
        let path = dir.as_ref().join(format!("{}.kiln.json", self.name));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KilnError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
