//! Rule model: kinds, aliases, parameter requirements, instance scope.

use lektor_findings::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical rule kinds. Dispatch in the evaluator is an exhaustive match on
/// this enum; authoring-side strings reach it only through [`RuleKind::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Required,
    FixedValue,
    AllowedValues,
    Regex,
    ArrayLength,
    CodeSystem,
    Reference,
    QuestionAnswer,
    CustomExpression,
    RequiredResources,
}

/// Case-fold and strip separators so authored kind strings compare loosely:
/// `ARRAY_LENGTH`, `array-length` and `ArrayLength` all normalize alike.
pub fn normalize_kind(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl RuleKind {
    /// Resolve an authored kind string, including the documented aliases.
    pub fn parse(raw: &str) -> Option<RuleKind> {
        Some(match normalize_kind(raw).as_str() {
            "REQUIRED" => Self::Required,
            "FIXEDVALUE" => Self::FixedValue,
            "ALLOWEDVALUES" => Self::AllowedValues,
            "REGEX" => Self::Regex,
            "ARRAYLENGTH" | "CARDINALITY" | "ARRAYSIZE" => Self::ArrayLength,
            "CODESYSTEM" | "VALUESET" | "VALUESETBINDING" => Self::CodeSystem,
            "REFERENCE" => Self::Reference,
            "QUESTIONANSWER" => Self::QuestionAnswer,
            "CUSTOMEXPRESSION" | "CUSTOMFHIRPATH" => Self::CustomExpression,
            "REQUIREDRESOURCES" => Self::RequiredResources,
            _ => return None,
        })
    }

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::FixedValue => "FIXEDVALUE",
            Self::AllowedValues => "ALLOWEDVALUES",
            Self::Regex => "REGEX",
            Self::ArrayLength => "ARRAYLENGTH",
            Self::CodeSystem => "CODESYSTEM",
            Self::Reference => "REFERENCE",
            Self::QuestionAnswer => "QUESTIONANSWER",
            Self::CustomExpression => "CUSTOMEXPRESSION",
            Self::RequiredResources => "REQUIREDRESOURCES",
        }
    }

    /// Parameters a rule of this kind cannot run without. `ArrayLength` is
    /// special-cased in [`Rule::missing_params`]: one of `min`/`max` suffices.
    fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::Required | Self::Reference => &[],
            Self::FixedValue => &["value"],
            Self::AllowedValues => &["values"],
            Self::Regex => &["pattern"],
            Self::ArrayLength => &[],
            Self::CodeSystem => &["system"],
            Self::QuestionAnswer => &["codeSystem", "code"],
            Self::CustomExpression => &["expression"],
            Self::RequiredResources => &["resourceType"],
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Which of the matching nodes a rule evaluates against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstanceScope {
    #[default]
    All,
    First,
    Filter(String),
}

impl Serialize for InstanceScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::First => serializer.serialize_str("first"),
            Self::Filter(predicate) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("filter", predicate)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for InstanceScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            Filter { filter: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(k) if k == "all" => Ok(Self::All),
            Repr::Keyword(k) if k == "first" => Ok(Self::First),
            Repr::Keyword(other) => Err(serde::de::Error::custom(format!(
                "unknown instance scope '{other}' (expected 'all', 'first' or {{\"filter\": …}})"
            ))),
            Repr::Filter { filter } => Ok(Self::Filter(filter)),
        }
    }
}

fn default_severity() -> Severity {
    Severity::Error
}

/// One authored project rule. The kind stays a raw string until evaluation
/// so unknown kinds surface as configuration findings instead of load
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Resource-relative target path in expression form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub scope: InstanceScope,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Rule {
    pub fn kind(&self) -> Option<RuleKind> {
        RuleKind::parse(&self.kind)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// Required parameters this rule is missing. Empty means the rule is
    /// runnable as far as configuration goes.
    pub fn missing_params(&self) -> Vec<String> {
        let Some(kind) = self.kind() else {
            return Vec::new();
        };

        if kind == RuleKind::ArrayLength {
            if self.params.contains_key("min") || self.params.contains_key("max") {
                return Vec::new();
            }
            return vec!["min".to_string(), "max".to_string()];
        }

        kind.required_params()
            .iter()
            .filter(|key| !self.params.contains_key(**key))
            .map(|key| (*key).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalization_is_idempotent() {
        for raw in ["ARRAY_LENGTH", "array-length", "Array Length", "Cardinality"] {
            let once = normalize_kind(raw);
            assert_eq!(normalize_kind(&once), once);
        }
    }

    #[test]
    fn test_aliases_map_to_canonical_kinds() {
        assert_eq!(RuleKind::parse("Cardinality"), Some(RuleKind::ArrayLength));
        assert_eq!(RuleKind::parse("ArraySize"), Some(RuleKind::ArrayLength));
        assert_eq!(RuleKind::parse("ARRAY_LENGTH"), Some(RuleKind::ArrayLength));
        assert_eq!(RuleKind::parse("ValueSet"), Some(RuleKind::CodeSystem));
        assert_eq!(
            RuleKind::parse("CustomFHIRPath"),
            Some(RuleKind::CustomExpression)
        );
        assert_eq!(RuleKind::parse("Totally Unknown"), None);
    }

    #[test]
    fn test_missing_params() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r1",
            "kind": "Regex",
            "resourceType": "Patient",
            "path": "Patient.identifier.value"
        }))
        .unwrap();
        assert_eq!(rule.missing_params(), vec!["pattern".to_string()]);

        let rule: Rule = serde_json::from_value(json!({
            "id": "r2",
            "kind": "Cardinality",
            "path": "Patient.contact",
            "params": {"min": 1}
        }))
        .unwrap();
        assert!(rule.missing_params().is_empty());

        let rule: Rule = serde_json::from_value(json!({
            "id": "r3",
            "kind": "ArrayLength",
            "path": "Patient.contact",
            "params": {}
        }))
        .unwrap();
        assert_eq!(
            rule.missing_params(),
            vec!["min".to_string(), "max".to_string()]
        );
    }

    #[test]
    fn test_scope_deserialization() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r", "kind": "Required", "path": "Patient.name", "scope": "first"
        }))
        .unwrap();
        assert_eq!(rule.scope, InstanceScope::First);

        let rule: Rule = serde_json::from_value(json!({
            "id": "r", "kind": "Required", "path": "Patient.name",
            "scope": {"filter": "active = true"}
        }))
        .unwrap();
        assert_eq!(rule.scope, InstanceScope::Filter("active = true".to_string()));

        let err = serde_json::from_value::<Rule>(json!({
            "id": "r", "kind": "Required", "scope": "some"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_severity_defaults_to_error() {
        let rule: Rule = serde_json::from_value(json!({"id": "r", "kind": "Required"})).unwrap();
        assert_eq!(rule.severity, Severity::Error);
    }
}
