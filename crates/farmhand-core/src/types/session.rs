//! Wizard session document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A print wizard session.
///
/// Step payloads (`rotation_config`, `profile_config`, `plating_info`,
/// `stl_processing`, …) are JSON-shaped and owned by the wizard steps;
/// the orchestrator only reads `selected_files` and writes its
/// `stl_processing` summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardSession {
    pub session_id: String,
    pub project_id: String,
    #[serde(default)]
    pub selected_files: Vec<String>,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// Free-form per-step payloads.
    #[serde(flatten)]
    pub steps: HashMap<String, Value>,
}

impl WizardSession {
    /// Create an empty session for a project.
    pub fn new(session_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            selected_files: Vec::new(),
            current_step: String::new(),
            completed_steps: Vec::new(),
            steps: HashMap::new(),
        }
    }

    /// Record a step payload.
    pub fn set_step_payload(&mut self, step: impl Into<String>, payload: Value) {
        self.steps.insert(step.into(), payload);
    }

    /// Mark a step completed (idempotent) and advance the cursor.
    pub fn complete_step(&mut self, step: impl Into<String>, next_step: impl Into<String>) {
        let step = step.into();
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.current_step = next_step.into();
    }

    /// Shallow-merge a JSON object into the session document.
    ///
    /// Known scalar fields are overwritten; unknown keys land in the
    /// step payload map. Used by the PATCH endpoint.
    pub fn merge(&mut self, patch: &Value) {
        let Some(obj) = patch.as_object() else {
            return;
        };
        for (key, value) in obj {
            match key.as_str() {
                "session_id" | "project_id" => {}
                "selected_files" => {
                    if let Ok(files) = serde_json::from_value(value.clone()) {
                        self.selected_files = files;
                    }
                }
                "current_step" => {
                    if let Some(step) = value.as_str() {
                        self.current_step = step.to_string();
                    }
                }
                "completed_steps" => {
                    if let Ok(steps) = serde_json::from_value(value.clone()) {
                        self.completed_steps = steps;
                    }
                }
                _ => {
                    self.steps.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_preserves_identity_fields() {
        let mut session = WizardSession::new("s1", "proj-1");
        session.merge(&json!({
            "session_id": "evil",
            "current_step": "profile",
            "rotation_config": {"enabled": true},
        }));
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.current_step, "profile");
        assert_eq!(session.steps["rotation_config"], json!({"enabled": true}));
    }

    #[test]
    fn test_complete_step_is_idempotent() {
        let mut session = WizardSession::new("s1", "proj-1");
        session.complete_step("stl_processing", "validation");
        session.complete_step("stl_processing", "validation");
        assert_eq!(session.completed_steps, vec!["stl_processing"]);
        assert_eq!(session.current_step, "validation");
    }

    #[test]
    fn test_step_payloads_flatten_through_serde() {
        let mut session = WizardSession::new("s1", "proj-1");
        session.set_step_payload("plating_info", json!({"rotation_applied_first": true}));
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(
            value["plating_info"],
            json!({"rotation_applied_first": true})
        );
        let back: WizardSession = serde_json::from_value(value).unwrap();
        assert!(back.steps.contains_key("plating_info"));
    }
}
