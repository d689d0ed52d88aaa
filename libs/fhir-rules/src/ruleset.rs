//! Rule set container and JSON loading.

use crate::rule::Rule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleSetError {
    #[error("rule set is not valid JSON: {0}")]
    InvalidJson(String),
}

/// An unordered collection of rules tagged with a project identity and
/// version. Rules never carry prose; human text is derived downstream from
/// the code catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, RuleSetError> {
        serde_json::from_str(raw).map_err(|e| RuleSetError::InvalidJson(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule lookup by id; last definition wins, matching the value-based
    /// identity of the persisted representation.
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().rev().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_lookup() {
        let raw = r#"{
            "projectId": "proj-1",
            "version": "7",
            "rules": [
                {"id": "a", "kind": "Required", "resourceType": "Patient", "path": "Patient.name"},
                {"id": "b", "kind": "Regex", "path": "Patient.birthDate",
                 "params": {"pattern": "^[0-9]{4}$"}},
                {"id": "a", "kind": "Required", "path": "Patient.gender"}
            ]
        }"#;
        let set = RuleSet::from_json(raw).unwrap();
        assert_eq!(set.rules.len(), 3);
        // last write wins for duplicate ids
        assert_eq!(set.rule("a").unwrap().path.as_deref(), Some("Patient.gender"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(RuleSet::from_json("{not json").is_err());
    }
}
