//! Target descriptors and sample record sets
//!
//! A `TargetDescriptor` is built once before synthesis starts and never
//! changes afterwards. Descriptors are usually loaded from a TOML or JSON file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One declared parameter of the target function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Type annotation as written in source, e.g. `pd.DataFrame` or `str`
    #[serde(default, rename = "type")]
    pub annotation: Option<String>,
    /// Default value as a source expression, e.g. `None` or `"id"`
    #[serde(default)]
    pub default: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
        }
    }

    pub fn typed(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// `self`, `cls`, the `/` and `*` markers, `*args` and `**kwargs` are
    /// never synthesized.
    pub fn is_implicit(&self) -> bool {
        self.name == "self" || self.name == "cls" || self.name == "/" || self.name.starts_with('*')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Qualified name, e.g. `Cleaner.drop_nulls` or `summarize`
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub docstring: String,
    /// Owning class name; empty for free functions
    #[serde(default)]
    pub owner: String,
    /// Importable module name of the implementation file
    pub module: String,
    pub implementation_path: PathBuf,
    #[serde(default)]
    test_path: Option<PathBuf>,
}

impl TargetDescriptor {
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        implementation_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type: None,
            docstring: String::new(),
            owner: String::new(),
            module: module.into(),
            implementation_path: implementation_path.into(),
            test_path: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = docstring.into();
        self
    }

    pub fn with_test_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_path = Some(path.into());
        self
    }

    /// Load a descriptor from `.toml` or `.json`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read target descriptor {}", path.display()))?;
        let descriptor: TargetDescriptor = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid target descriptor {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid target descriptor {}", path.display()))?,
        };
        if descriptor.bare_name().is_empty() {
            return Err(anyhow::anyhow!(
                "Target descriptor {} has an empty name",
                path.display()
            ));
        }
        Ok(descriptor)
    }

    /// Last dotted segment of the qualified name.
    pub fn bare_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn is_method(&self) -> bool {
        !self.owner.is_empty()
    }

    /// Test file path; defaults to `tests/test_<file>` beside the implementation's root.
    pub fn test_path(&self) -> PathBuf {
        if let Some(path) = &self.test_path {
            return path.clone();
        }
        let file_name = self
            .implementation_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.py", self.module));
        let root = self
            .implementation_path
            .parent()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        root.join("tests").join(format!("test_{}", file_name))
    }

    /// Python-style signature for prompts.
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                let mut rendered = p.name.clone();
                if let Some(annotation) = &p.annotation {
                    rendered.push_str(": ");
                    rendered.push_str(annotation);
                }
                if let Some(default) = &p.default {
                    rendered.push_str(" = ");
                    rendered.push_str(default);
                }
                rendered
            })
            .collect::<Vec<_>>()
            .join(", ");
        let ret = self
            .return_type
            .as_ref()
            .map(|r| format!(" -> {}", r))
            .unwrap_or_default();
        format!("def {}({}){}", self.bare_name(), params, ret)
    }
}

/// Column-oriented sample data handed to the generated function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sample {}", path.display()))?;
        let records: RecordSet = serde_json::from_str(&content)
            .with_context(|| format!("Invalid sample record set {}", path.display()))?;
        if let Some(bad) = records
            .rows
            .iter()
            .position(|row| row.len() != records.columns.len())
        {
            return Err(anyhow::anyhow!(
                "Row {} of {} has a different width than the header",
                bad,
                path.display()
            ));
        }
        Ok(records)
    }

    pub fn first_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }
}
