//! Project terminology: code systems and path-level coded-value constraints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TerminologyError {
    #[error("code master is not valid JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Parent code for hierarchical systems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCodeSystem {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    concepts: Vec<Concept>,
}

/// Binds a resource path to a code system (and optionally a code subset).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConstraint {
    pub resource_type: String,
    /// Resource-relative dotted path to the coded element.
    pub path: String,
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct CodeSystemIndex {
    name: Option<String>,
    /// code → concept; last write wins, matching value-based identity.
    concepts: HashMap<String, Concept>,
    /// Codes in original definition order for enumerated findings.
    order: Vec<String>,
}

/// In-memory project terminology, looked up by canonical URL.
#[derive(Debug, Default)]
pub struct TerminologyStore {
    systems: HashMap<String, CodeSystemIndex>,
    constraints: Vec<PathConstraint>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawStore {
    #[serde(default)]
    code_systems: Vec<RawCodeSystem>,
    #[serde(default)]
    constraints: Vec<PathConstraint>,
}

impl TerminologyStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, TerminologyError> {
        let parsed: RawStore =
            serde_json::from_str(raw).map_err(|e| TerminologyError::InvalidJson(e.to_string()))?;

        let mut store = TerminologyStore::default();
        for system in parsed.code_systems {
            let index = store.systems.entry(system.url).or_default();
            index.name = system.name.or(index.name.take());
            for concept in system.concepts {
                if !index.concepts.contains_key(&concept.code) {
                    index.order.push(concept.code.clone());
                }
                index.concepts.insert(concept.code.clone(), concept);
            }
        }
        store.constraints = parsed.constraints;
        Ok(store)
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty() && self.constraints.is_empty()
    }

    pub fn has_system(&self, url: &str) -> bool {
        self.systems.contains_key(url)
    }

    pub fn contains(&self, system: &str, code: &str) -> bool {
        self.systems
            .get(system)
            .is_some_and(|s| s.concepts.contains_key(code))
    }

    pub fn display(&self, system: &str, code: &str) -> Option<&str> {
        self.systems
            .get(system)?
            .concepts
            .get(code)?
            .display
            .as_deref()
    }

    /// Enumerated codes of a system, in definition order.
    pub fn codes(&self, system: &str) -> Option<Vec<&str>> {
        let index = self.systems.get(system)?;
        Some(index.order.iter().map(String::as_str).collect())
    }

    pub fn constraints_for<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a PathConstraint> {
        self.constraints
            .iter()
            .filter(move |c| c.resource_type == resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TerminologyStore {
        TerminologyStore::from_json(
            r#"{
                "codeSystems": [
                    {
                        "url": "http://example.org/cs/department",
                        "name": "Department",
                        "concepts": [
                            {"code": "card", "display": "Cardiology"},
                            {"code": "neuro", "display": "Neurology"},
                            {"code": "card", "display": "Cardiology (revised)"}
                        ]
                    }
                ],
                "constraints": [
                    {
                        "resourceType": "Encounter",
                        "path": "serviceType",
                        "system": "http://example.org/cs/department",
                        "codes": ["card"]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_and_last_write_wins() {
        let store = store();
        assert!(store.contains("http://example.org/cs/department", "card"));
        assert!(!store.contains("http://example.org/cs/department", "derm"));
        assert_eq!(
            store.display("http://example.org/cs/department", "card"),
            Some("Cardiology (revised)")
        );
        // duplicate code did not duplicate the enumeration
        assert_eq!(
            store.codes("http://example.org/cs/department"),
            Some(vec!["card", "neuro"])
        );
    }

    #[test]
    fn test_constraints_filtered_by_resource_type() {
        let store = store();
        assert_eq!(store.constraints_for("Encounter").count(), 1);
        assert_eq!(store.constraints_for("Patient").count(), 0);
    }
}
