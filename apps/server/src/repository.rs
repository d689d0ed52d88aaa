//! Persisted project state: rule sets, terminology, feature flags.
//!
//! Everything is stored as JSON documents addressed by project id (and, for
//! terminology, canonical URL). Identity is value-based and writes are
//! last-write-wins; there is deliberately no concurrency control.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Per-project feature flags. Missing keys read as `false`.
pub type FeatureFlags = BTreeMap<String, bool>;

/// Storage contract for project-scoped configuration.
pub trait ProjectRepository: Send + Sync {
    fn project_exists(&self, project_id: &str) -> bool;

    /// Raw rule-set JSON, as last saved.
    fn rule_set(&self, project_id: &str) -> Result<Option<String>, RepositoryError>;
    fn save_rule_set(&self, project_id: &str, raw: &str) -> Result<(), RepositoryError>;

    /// Assembled code-master document (`codeSystems` + `constraints`).
    fn code_master(&self, project_id: &str) -> Result<Option<String>, RepositoryError>;
    /// Store one code system under its canonical URL. Overwrites any prior
    /// definition for the same URL.
    fn save_code_system(
        &self,
        project_id: &str,
        canonical_url: &str,
        document: &Value,
    ) -> Result<(), RepositoryError>;
    fn save_constraints(
        &self,
        project_id: &str,
        constraints: &Value,
    ) -> Result<(), RepositoryError>;

    fn feature_flags(&self, project_id: &str) -> Result<FeatureFlags, RepositoryError>;
    /// PATCH-style merge: present keys are updated, absent keys keep their
    /// prior values.
    fn update_feature_flags(
        &self,
        project_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<FeatureFlags, RepositoryError>;
}

/// Filesystem-backed store, one directory per project.
pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join("projects").join(sanitize(project_id))
    }

    fn terminology_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("terminology")
    }

    fn read_json(path: &Path) -> Result<Option<Value>, RepositoryError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_json(path: &Path, value: &Value) -> Result<(), RepositoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }
}

/// Canonical URLs and project ids become path-safe file names.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ProjectRepository for FsProjectStore {
    fn project_exists(&self, project_id: &str) -> bool {
        self.project_dir(project_id).is_dir()
    }

    fn rule_set(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(Self::read_json(&self.project_dir(project_id).join("rules.json"))?
            .map(|v| v.to_string()))
    }

    fn save_rule_set(&self, project_id: &str, raw: &str) -> Result<(), RepositoryError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::write_json(&self.project_dir(project_id).join("rules.json"), &value)
    }

    fn code_master(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        let dir = self.terminology_dir(project_id);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut code_systems = Vec::new();
        let mut constraints = Value::Array(Vec::new());

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();

        for path in paths {
            let Some(document) = Self::read_json(&path)? else {
                continue;
            };
            if path.file_name().and_then(|n| n.to_str()) == Some("constraints.json") {
                constraints = document;
            } else {
                code_systems.push(document);
            }
        }

        if code_systems.is_empty() && constraints.as_array().map_or(true, Vec::is_empty) {
            return Ok(None);
        }

        Ok(Some(
            serde_json::json!({
                "codeSystems": code_systems,
                "constraints": constraints,
            })
            .to_string(),
        ))
    }

    fn save_code_system(
        &self,
        project_id: &str,
        canonical_url: &str,
        document: &Value,
    ) -> Result<(), RepositoryError> {
        let path = self
            .terminology_dir(project_id)
            .join(format!("{}.json", sanitize(canonical_url)));
        Self::write_json(&path, document)
    }

    fn save_constraints(
        &self,
        project_id: &str,
        constraints: &Value,
    ) -> Result<(), RepositoryError> {
        Self::write_json(
            &self.terminology_dir(project_id).join("constraints.json"),
            constraints,
        )
    }

    fn feature_flags(&self, project_id: &str) -> Result<FeatureFlags, RepositoryError> {
        let path = self.project_dir(project_id).join("features.json");
        let Some(value) = Self::read_json(&path)? else {
            return Ok(FeatureFlags::new());
        };
        let flags = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(flags)
    }

    fn update_feature_flags(
        &self,
        project_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<FeatureFlags, RepositoryError> {
        let mut flags = self.feature_flags(project_id)?;
        for (key, value) in patch {
            if let Some(enabled) = value.as_bool() {
                flags.insert(key.clone(), enabled);
            }
        }
        let serialized = serde_json::to_value(&flags)?;
        Self::write_json(&self.project_dir(project_id).join("features.json"), &serialized)?;
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, FsProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsProjectStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_rule_set_roundtrip() {
        let (_dir, store) = store();
        assert!(store.rule_set("p1").unwrap().is_none());

        store
            .save_rule_set("p1", r#"{"rules": [{"id": "a", "kind": "Required"}]}"#)
            .unwrap();
        let raw = store.rule_set("p1").unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["rules"][0]["id"], "a");
        assert!(store.project_exists("p1"));
    }

    #[test]
    fn test_feature_flags_patch_merge() {
        let (_dir, store) = store();

        let flags = store
            .update_feature_flags("p1", json!({"ruleEditor": true}).as_object().unwrap())
            .unwrap();
        assert_eq!(flags.get("ruleEditor"), Some(&true));

        // patching another key preserves the first one
        let flags = store
            .update_feature_flags("p1", json!({"pathPicker": true}).as_object().unwrap())
            .unwrap();
        assert_eq!(flags.get("ruleEditor"), Some(&true));
        assert_eq!(flags.get("pathPicker"), Some(&true));

        // last write wins
        let flags = store
            .update_feature_flags("p1", json!({"ruleEditor": false}).as_object().unwrap())
            .unwrap();
        assert_eq!(flags.get("ruleEditor"), Some(&false));

        // missing keys read as absent (callers default to false)
        assert!(!store.feature_flags("p1").unwrap().contains_key("unset"));
    }

    #[test]
    fn test_code_master_assembly_last_write_wins() {
        let (_dir, store) = store();
        assert!(store.code_master("p1").unwrap().is_none());

        store
            .save_code_system(
                "p1",
                "http://example.org/cs/department",
                &json!({"url": "http://example.org/cs/department",
                        "concepts": [{"code": "card"}]}),
            )
            .unwrap();
        store
            .save_code_system(
                "p1",
                "http://example.org/cs/department",
                &json!({"url": "http://example.org/cs/department",
                        "concepts": [{"code": "card"}, {"code": "neuro"}]}),
            )
            .unwrap();
        store
            .save_constraints(
                "p1",
                &json!([{"resourceType": "Encounter", "path": "serviceType",
                         "system": "http://example.org/cs/department"}]),
            )
            .unwrap();

        let raw = store.code_master("p1").unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["codeSystems"].as_array().unwrap().len(), 1);
        assert_eq!(
            value["codeSystems"][0]["concepts"].as_array().unwrap().len(),
            2
        );
        assert_eq!(value["constraints"][0]["resourceType"], "Encounter");
    }
}
