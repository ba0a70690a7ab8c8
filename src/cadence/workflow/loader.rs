// SPDX-License-Identifier: MIT

//! Workflow loader - YAML file loading and parsing

use std::fs;
use std::path::{Path, PathBuf};

use super::types::WorkflowDefinition;
use crate::kit::error::CadenceError;

/// Loads workflow definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a workflow definition from a YAML (or JSON) file
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition, CadenceError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Load every `.yaml`/`.yml` file in a directory, sorted by file name
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<WorkflowDefinition>, CadenceError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                log::debug!("Loading workflow from {}", path.display());
                self.load_workflow(path)
            })
            .collect()
    }

    /// Parse a workflow definition from a YAML string. JSON is valid YAML.
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition, CadenceError> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::workflow::types::{StepKind, TriggerBinding};

    #[test]
    fn test_parse_definition() {
        let yaml = r#"
id: invoice-approval
name: Invoice approval
description: "Route large invoices to a manager"
entry: intake
variables:
  approvals: { type: array, reducer: append, default: [] }
triggers:
  - kind: event
    event: invoice.created
steps:
  - id: intake
    kind: action
    action: set
    with: { status: received }
    next: done
  - id: done
    kind: terminal
"#;
        let def = WorkflowLoader::parse_yaml(yaml).unwrap();
        assert_eq!(def.id, "invoice-approval");
        assert_eq!(def.version, 0);
        assert_eq!(def.entry, "intake");
        assert_eq!(def.steps.len(), 2);
        assert!(matches!(def.steps[0].kind, StepKind::Action(_)));
        assert!(matches!(def.triggers[0], TriggerBinding::Event { .. }));
        assert!(def.variables.fields.contains_key("approvals"));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"id": "j", "version": 3, "steps": [{"id": "end", "kind": "terminal"}]}"#;
        let def = WorkflowLoader::parse_yaml(json).unwrap();
        assert_eq!(def.version, 3);
        assert_eq!(def.steps[0].kind, StepKind::Terminal);
    }

    #[test]
    fn test_unknown_step_kind_fails() {
        let yaml = r#"
id: bad
steps:
  - id: x
    kind: parallel
"#;
        assert!(matches!(
            WorkflowLoader::parse_yaml(yaml),
            Err(CadenceError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let loader = WorkflowLoader::new();
        assert!(matches!(
            loader.load_workflow("/nonexistent/workflow.yaml"),
            Err(CadenceError::Io(_))
        ));
    }

    #[test]
    fn test_load_dir() {
        let dir = std::env::temp_dir().join(format!("cadence-loader-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("b.yaml"),
            "id: second\nsteps:\n  - id: end\n    kind: terminal\n",
        )
        .unwrap();
        fs::write(
            dir.join("a.yml"),
            "id: first\nsteps:\n  - id: end\n    kind: terminal\n",
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let defs = WorkflowLoader::new().load_dir(&dir).unwrap();
        let ids: Vec<_> = defs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);

        let _ = fs::remove_dir_all(&dir);
    }
}
