//! The schema index: a flattened, immutable element table per resource type.
//!
//! Built once per FHIR version from the embedded definition table and shared
//! behind an `Arc`; all lookups are lock-free reads. Complex element types
//! are expanded in place (so `Patient.name.given` is a single table row) with
//! a recursion depth cap — self-referential types past the cap become opaque
//! nodes the structural walker does not descend into.

use crate::primitives::PrimitiveType;
use crate::{SchemaError, SchemaVersion};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// Default recursion cap for expanding self-referential complex types.
pub const DEFAULT_EXPANSION_DEPTH: usize = 6;

const R4_DEFINITIONS: &str = include_str!("../schema/r4.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "required" => Self::Required,
            "extensible" => Self::Extensible,
            "preferred" => Self::Preferred,
            "example" => Self::Example,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub strength: BindingStrength,
    /// Enumerated allowed values; empty when the bound set is not
    /// materialized (open or externally defined).
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    /// `None` means unbounded (`*`).
    pub max: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ElementInfo {
    pub type_name: String,
    pub primitive: Option<PrimitiveType>,
    pub array: bool,
    pub cardinality: Cardinality,
    pub binding: Option<Binding>,
    /// Children of this element are not indexed (nested resource, undefined
    /// complex type, or past the expansion depth cap). The walker treats the
    /// node as a leaf.
    pub opaque: bool,
}

#[derive(Debug, Default)]
struct ResourceSchema {
    /// Dotted resource-relative path → element row.
    elements: HashMap<String, ElementInfo>,
    /// Parent path (`""` for the resource root) → child field names, in
    /// definition order.
    children: HashMap<String, Vec<String>>,
    /// Top-level fields with `min >= 1`, in definition order.
    required: Vec<String>,
}

/// Immutable, versioned element lookup for the structural validator, the
/// rule evaluator and the location resolver.
#[derive(Debug)]
pub struct SchemaIndex {
    version: SchemaVersion,
    resources: HashMap<String, ResourceSchema>,
}

impl SchemaIndex {
    /// Shared index for a FHIR version. Built on first use, cached for the
    /// process lifetime.
    pub fn for_version(version: SchemaVersion) -> Result<Arc<SchemaIndex>, SchemaError> {
        // R4B and R5 share the R4 core element subset covered by the
        // embedded table; the cache still keys per version so findings
        // report the requested version.
        static R4: OnceLock<Result<Arc<SchemaIndex>, SchemaError>> = OnceLock::new();
        static R4B: OnceLock<Result<Arc<SchemaIndex>, SchemaError>> = OnceLock::new();
        static R5: OnceLock<Result<Arc<SchemaIndex>, SchemaError>> = OnceLock::new();

        let cell = match version {
            SchemaVersion::R4 => &R4,
            SchemaVersion::R4B => &R4B,
            SchemaVersion::R5 => &R5,
        };
        cell.get_or_init(|| {
            SchemaIndex::from_definitions(version, R4_DEFINITIONS).map(Arc::new)
        })
        .clone()
    }

    /// Build an index from a definition document (see `schema/r4.json` for
    /// the format) with the default expansion depth.
    pub fn from_definitions(
        version: SchemaVersion,
        definitions: &str,
    ) -> Result<SchemaIndex, SchemaError> {
        Self::from_definitions_with_depth(version, definitions, DEFAULT_EXPANSION_DEPTH)
    }

    pub fn from_definitions_with_depth(
        version: SchemaVersion,
        definitions: &str,
        max_depth: usize,
    ) -> Result<SchemaIndex, SchemaError> {
        let raw: RawSchema = serde_json::from_str(definitions)
            .map_err(|e| SchemaError::InvalidDefinitions(e.to_string()))?;

        let mut resources = HashMap::new();
        for (resource_type, raw_type) in &raw.resources {
            let mut schema = ResourceSchema::default();
            expand_elements(
                &raw,
                raw_type,
                "",
                0,
                max_depth,
                &mut schema.elements,
                &mut schema.children,
            )?;

            schema.required = raw_type
                .elements
                .iter()
                .filter(|(_, e)| e.min >= 1)
                .map(|(name, _)| name.clone())
                .collect();

            resources.insert(resource_type.clone(), schema);
        }

        Ok(SchemaIndex { version, resources })
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn is_resource_type(&self, resource_type: &str) -> bool {
        self.resources.contains_key(resource_type)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Element row for a dotted resource-relative path.
    pub fn element(&self, resource_type: &str, path: &str) -> Option<&ElementInfo> {
        self.resources.get(resource_type)?.elements.get(path)
    }

    pub fn has_element(&self, resource_type: &str, path: &str) -> bool {
        self.element(resource_type, path).is_some()
    }

    /// Enumerated allowed values and binding strength, when the element has
    /// a materialized bound value set.
    pub fn allowed_values(
        &self,
        resource_type: &str,
        path: &str,
    ) -> Option<(&[String], BindingStrength)> {
        let binding = self.element(resource_type, path)?.binding.as_ref()?;
        if binding.values.is_empty() {
            return None;
        }
        Some((&binding.values, binding.strength))
    }

    pub fn binding_strength(&self, resource_type: &str, path: &str) -> Option<BindingStrength> {
        Some(self.element(resource_type, path)?.binding.as_ref()?.strength)
    }

    pub fn cardinality(&self, resource_type: &str, path: &str) -> Option<Cardinality> {
        Some(self.element(resource_type, path)?.cardinality)
    }

    pub fn is_array(&self, resource_type: &str, path: &str) -> bool {
        self.element(resource_type, path)
            .map(|e| e.array)
            .unwrap_or(false)
    }

    /// Defined and single-valued. Used to strip array indices that
    /// expression engines synthesize on singleton elements.
    pub fn is_singular(&self, resource_type: &str, path: &str) -> bool {
        self.element(resource_type, path)
            .map(|e| !e.array)
            .unwrap_or(false)
    }

    pub fn required_fields(&self, resource_type: &str) -> &[String] {
        self.resources
            .get(resource_type)
            .map(|r| r.required.as_slice())
            .unwrap_or(&[])
    }

    pub fn primitive_type(&self, resource_type: &str, path: &str) -> Option<PrimitiveType> {
        self.element(resource_type, path)?.primitive
    }

    /// All indexed element rows of a resource type, as `(path, info)` pairs.
    /// Iteration order is unspecified; callers needing determinism sort.
    pub fn elements(
        &self,
        resource_type: &str,
    ) -> impl Iterator<Item = (&String, &ElementInfo)> {
        self.resources
            .get(resource_type)
            .into_iter()
            .flat_map(|r| r.elements.iter())
    }

    /// Child field names under a parent path (`""` for the resource root),
    /// in definition order.
    pub fn children(&self, resource_type: &str, parent_path: &str) -> &[String] {
        self.resources
            .get(resource_type)
            .and_then(|r| r.children.get(parent_path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Children under `parent_path` that must be present (`min >= 1`).
    pub fn required_children<'a>(
        &'a self,
        resource_type: &str,
        parent_path: &'a str,
    ) -> impl Iterator<Item = &'a String> {
        let resource = self.resources.get(resource_type);
        self.children(resource_type, parent_path)
            .iter()
            .filter(move |name| {
                let path = if parent_path.is_empty() {
                    (*name).clone()
                } else {
                    format!("{parent_path}.{name}")
                };
                resource
                    .and_then(|r| r.elements.get(&path))
                    .map(|e| e.cardinality.min >= 1)
                    .unwrap_or(false)
            })
    }
}

fn expand_elements(
    raw: &RawSchema,
    raw_type: &RawType,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    out: &mut HashMap<String, ElementInfo>,
    children: &mut HashMap<String, Vec<String>>,
) -> Result<(), SchemaError> {
    for (name, element) in &raw_type.elements {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        children
            .entry(prefix.to_string())
            .or_default()
            .push(name.clone());

        let primitive = PrimitiveType::from_code(&element.type_);
        let binding = element
            .binding
            .as_ref()
            .map(|b| {
                let strength = BindingStrength::parse(&b.strength).ok_or_else(|| {
                    SchemaError::UnknownBindingStrength {
                        path: path.clone(),
                        strength: b.strength.clone(),
                    }
                })?;
                Ok::<_, SchemaError>(Binding {
                    strength,
                    values: b.values.clone(),
                })
            })
            .transpose()?;

        let child_type = (primitive.is_none()).then(|| raw.types.get(&element.type_)).flatten();
        let expandable = child_type.is_some() && depth < max_depth;

        out.insert(
            path.clone(),
            ElementInfo {
                type_name: element.type_.clone(),
                primitive,
                array: element.array,
                cardinality: Cardinality {
                    min: element.min,
                    max: element.max.or(if element.array { None } else { Some(1) }),
                },
                binding,
                opaque: primitive.is_none() && !expandable,
            },
        );

        if expandable {
            // Unwrap is safe: expandable implies child_type is Some.
            expand_elements(
                raw,
                child_type.unwrap(),
                &path,
                depth + 1,
                max_depth,
                out,
                children,
            )?;
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(rename = "fhirVersion")]
    #[allow(dead_code)]
    fhir_version: String,
    types: HashMap<String, RawType>,
    resources: BTreeMap<String, RawType>,
}

#[derive(Debug, Deserialize)]
struct RawType {
    elements: BTreeMap<String, RawElement>,
}

#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    array: bool,
    #[serde(default)]
    min: u32,
    max: Option<u32>,
    binding: Option<RawBinding>,
}

#[derive(Debug, Deserialize)]
struct RawBinding {
    strength: String,
    values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Arc<SchemaIndex> {
        SchemaIndex::for_version(SchemaVersion::R4).unwrap()
    }

    #[test]
    fn test_allowed_values_for_gender() {
        let idx = index();
        let (values, strength) = idx.allowed_values("Patient", "gender").unwrap();
        assert_eq!(strength, BindingStrength::Required);
        for v in ["male", "female", "other", "unknown"] {
            assert!(values.contains(&v.to_string()));
        }
    }

    #[test]
    fn test_required_fields() {
        let idx = index();
        assert!(idx.required_fields("Encounter").contains(&"status".to_string()));
        assert!(idx.required_fields("Observation").contains(&"code".to_string()));
        assert!(idx.required_fields("Patient").is_empty());
    }

    #[test]
    fn test_cardinality_and_arrays() {
        let idx = index();
        assert!(idx.is_array("Patient", "name"));
        assert!(idx.is_singular("Patient", "birthDate"));
        let card = idx.cardinality("Observation", "status").unwrap();
        assert_eq!(card.min, 1);
        assert_eq!(card.max, Some(1));
        let names = idx.cardinality("Patient", "name").unwrap();
        assert_eq!(names.min, 0);
        assert_eq!(names.max, None);
    }

    #[test]
    fn test_nested_expansion() {
        let idx = index();
        assert!(idx.has_element("Patient", "name.given"));
        assert!(idx.has_element("Patient", "contact.name.family"));
        assert_eq!(
            idx.primitive_type("Patient", "birthDate"),
            Some(PrimitiveType::Date)
        );
    }

    #[test]
    fn test_recursion_is_depth_capped() {
        let idx = index();
        // QuestionnaireResponse items nest; somewhere below the cap the
        // element must stop being indexed.
        assert!(idx.has_element("QuestionnaireResponse", "item.linkId"));
        assert!(idx.has_element("QuestionnaireResponse", "item.item.linkId"));
        let deep = "item.item.item.item.item.item.item.item.linkId";
        assert!(!idx.has_element("QuestionnaireResponse", deep));
    }

    #[test]
    fn test_children_map() {
        let idx = index();
        let top: Vec<&String> = idx.children("Patient", "").iter().collect();
        assert!(top.iter().any(|n| *n == "gender"));
        assert!(idx
            .children("Patient", "name")
            .iter()
            .any(|n| n == "given"));
        let required: Vec<&String> = idx.required_children("Encounter", "").collect();
        assert!(required.iter().any(|n| *n == "status"));
    }

    #[test]
    fn test_unknown_complex_types_are_opaque() {
        let idx = index();
        let resource_element = idx.element("Bundle", "entry.resource").unwrap();
        assert!(resource_element.opaque);
    }
}
