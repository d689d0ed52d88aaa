//! Expression path → structural pointer resolution.
//!
//! Expression paths are resource-relative dotted paths with optional array
//! indices (`Patient.name[0].given`). The resolver is the single source of
//! pointer truth for the pipeline: every phase that starts from an expression
//! goes through here instead of string-mangling its own pointers.

use crate::document::{entries, resource_type_of};
use crate::pointer::{Segment, StructuralPointer};
use serde_json::Value;

/// One parsed expression segment: a field name and an optional index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExprSegment {
    name: String,
    index: Option<usize>,
}

/// Parse `entry[0].resource.gender` into segments. Malformed index brackets
/// are kept as part of the name rather than dropped.
fn parse_segments(expression: &str) -> Vec<ExprSegment> {
    expression
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|raw| {
            if let Some(open) = raw.find('[') {
                if let Some(stripped) = raw.ends_with(']').then(|| &raw[open + 1..raw.len() - 1]) {
                    if let Ok(index) = stripped.parse::<usize>() {
                        return ExprSegment {
                            name: raw[..open].to_string(),
                            index: Some(index),
                        };
                    }
                }
            }
            ExprSegment {
                name: raw.to_string(),
                index: None,
            }
        })
        .collect()
}

/// Segments known to be single-valued in the bundle envelope. Expression
/// engines routinely synthesize `[0]` on these; the pointer must not carry it.
fn is_envelope_singleton(name: &str) -> bool {
    matches!(name, "resource" | "meta" | "text" | "subject" | "code")
}

/// Convert an expression path to a structural pointer.
///
/// `singular(path)` reports whether the schema defines the dotted,
/// resource-relative `path` as non-array; a synthesized `[0]` on such a
/// segment is dropped. The leading resource-type token (any `Bundle`-level or
/// resource-level type name) does not become a pointer segment.
pub fn expression_to_pointer(
    expression: &str,
    singular: &dyn Fn(&str) -> bool,
) -> StructuralPointer {
    let segments = parse_segments(expression);
    let mut pointer = StructuralPointer::root();
    let mut relative = String::new();

    for (i, segment) in segments.iter().enumerate() {
        // Drop the leading resource-type token (`Patient.name…` → `/name…`).
        let leading_type = i == 0
            && segment
                .name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase());
        if leading_type {
            continue;
        }

        if !relative.is_empty() {
            relative.push('.');
        }
        relative.push_str(&segment.name);

        pointer.push(Segment::Key(segment.name.clone()));
        if let Some(index) = segment.index {
            let synthesized_zero = index == 0
                && (is_envelope_singleton(&segment.name) || singular(&relative));
            if !synthesized_zero {
                pointer.push(Segment::Index(index));
            }
        }
    }

    pointer
}

/// A node located by a dot-path walk, with its canonical addresses.
#[derive(Debug, Clone)]
pub struct ResolvedNode<'a> {
    pub value: &'a Value,
    pub pointer: StructuralPointer,
    /// Expression form including explicit array indices.
    pub path: String,
}

/// Collect every node matching `relative_path` under `resource`.
///
/// Arrays fan out with explicit indices in both pointer and path; an explicit
/// index in the input selects that element only. Choice suffixes (`value[x]`)
/// match any present variant.
pub fn collect_nodes<'a>(
    resource: &'a Value,
    relative_path: &str,
    base_pointer: &StructuralPointer,
    base_path: &str,
) -> Vec<ResolvedNode<'a>> {
    let segments = parse_segments(relative_path);
    let mut results = Vec::new();
    descend(
        resource,
        &segments,
        0,
        base_pointer.clone(),
        base_path.to_string(),
        &mut results,
    );
    results
}

fn descend<'a>(
    value: &'a Value,
    segments: &[ExprSegment],
    depth: usize,
    pointer: StructuralPointer,
    path: String,
    results: &mut Vec<ResolvedNode<'a>>,
) {
    let Some(segment) = segments.get(depth) else {
        results.push(ResolvedNode {
            value,
            pointer,
            path,
        });
        return;
    };

    // `value[x]` choice segments match any key with the prefix followed by an
    // uppercase type name.
    if let Some(prefix) = segment.name.strip_suffix("[x]") {
        let Some(obj) = value.as_object() else {
            return;
        };
        for (key, child) in obj {
            let is_variant = key.starts_with(prefix)
                && key.len() > prefix.len()
                && key[prefix.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_uppercase());
            if is_variant {
                step_into(child, key, segment, segments, depth, &pointer, &path, results);
            }
        }
        return;
    }

    let Some(child) = value.get(&segment.name) else {
        return;
    };
    step_into(
        child,
        &segment.name,
        segment,
        segments,
        depth,
        &pointer,
        &path,
        results,
    );
}

#[allow(clippy::too_many_arguments)]
fn step_into<'a>(
    child: &'a Value,
    key: &str,
    segment: &ExprSegment,
    segments: &[ExprSegment],
    depth: usize,
    pointer: &StructuralPointer,
    path: &str,
    results: &mut Vec<ResolvedNode<'a>>,
) {
    let child_pointer = pointer.clone().key(key);
    let child_path = if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    };

    match (child, segment.index) {
        (Value::Array(items), Some(index)) => {
            if let Some(item) = items.get(index) {
                descend(
                    item,
                    segments,
                    depth + 1,
                    child_pointer.index(index),
                    format!("{child_path}[{index}]"),
                    results,
                );
            }
        }
        (Value::Array(items), None) => {
            for (i, item) in items.iter().enumerate() {
                descend(
                    item,
                    segments,
                    depth + 1,
                    child_pointer.clone().index(i),
                    format!("{child_path}[{i}]"),
                    results,
                );
            }
        }
        (_, _) => descend(
            child,
            segments,
            depth + 1,
            child_pointer,
            child_path,
            results,
        ),
    }
}

/// A container located by a dot-path walk: the node at the final segment
/// itself, without fanning out over its array items.
#[derive(Debug, Clone)]
pub struct ContainerNode<'a> {
    /// `None` when the final segment is absent from its parent.
    pub value: Option<&'a Value>,
    /// Pointer to the (possibly absent) final segment.
    pub pointer: StructuralPointer,
    pub path: String,
}

/// Like [`collect_nodes`], but the final segment is returned as-is — arrays
/// are not fanned out. Used for length checks on repeating elements. Parents
/// that are absent drop the branch; an absent final segment is reported with
/// `value: None`.
pub fn collect_containers<'a>(
    resource: &'a Value,
    relative_path: &str,
    base_pointer: &StructuralPointer,
    base_path: &str,
) -> Vec<ContainerNode<'a>> {
    let segments = parse_segments(relative_path);
    if segments.is_empty() {
        return vec![ContainerNode {
            value: Some(resource),
            pointer: base_pointer.clone(),
            path: base_path.to_string(),
        }];
    }

    // Walk everything but the last segment with the fanning walker, then
    // look the final segment up directly.
    let (parents, last) = segments.split_at(segments.len() - 1);
    let parent_path = parents
        .iter()
        .map(|s| match s.index {
            Some(i) => format!("{}[{}]", s.name, i),
            None => s.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(".");

    let parent_nodes = if parent_path.is_empty() {
        vec![ResolvedNode {
            value: resource,
            pointer: base_pointer.clone(),
            path: base_path.to_string(),
        }]
    } else {
        collect_nodes(resource, &parent_path, base_pointer, base_path)
    };

    let name = &last[0].name;
    parent_nodes
        .into_iter()
        .filter_map(|parent| {
            if !parent.value.is_object() {
                return None;
            }
            Some(ContainerNode {
                value: parent.value.get(name),
                pointer: parent.pointer.key(name),
                path: format!("{}.{}", parent.path, name),
            })
        })
        .collect()
}

/// Resolution result for a single expression path.
#[derive(Debug, Clone)]
pub struct NavigationInfo {
    pub pointer: StructuralPointer,
    pub breadcrumb: Vec<String>,
    pub exists: bool,
    /// Dotted prefixes of the path that are absent from the document,
    /// outermost first.
    pub missing_parents: Vec<String>,
}

/// Resolve an expression path against a live document.
///
/// The path may be bundle-absolute (`Bundle.entry[0].resource.gender`) or
/// resource-relative (`Patient.gender`); relative paths are anchored at
/// `entry_index` when given, otherwise at the first entry whose resource type
/// matches the path's leading token (or `resource_type`).
pub fn resolve_path(
    root: &Value,
    path: &str,
    resource_type: Option<&str>,
    entry_index: Option<usize>,
    singular: &dyn Fn(&str) -> bool,
) -> NavigationInfo {
    let segments = parse_segments(path);
    let leading = segments.first().map(|s| s.name.as_str());

    let (mut pointer, skip) = if leading == Some("Bundle") {
        (StructuralPointer::root(), 1)
    } else {
        let wanted_type = resource_type.or(leading);
        let index = entry_index.or_else(|| {
            entries(root)
                .find(|(_, r)| resource_type_of(r) == wanted_type)
                .map(|(i, _)| i)
        });
        let base = match index {
            Some(i) => StructuralPointer::root().key("entry").index(i).key("resource"),
            // No anchor resource: resolve against the root so the pointer is
            // at least well-formed.
            None => StructuralPointer::root(),
        };
        let skip = usize::from(
            leading.is_some_and(|l| l.chars().next().is_some_and(|c| c.is_ascii_uppercase())),
        );
        (base, skip)
    };

    let mut exists = true;
    let mut missing_parents = Vec::new();
    let mut relative = String::new();

    for segment in segments.iter().skip(skip) {
        if !relative.is_empty() {
            relative.push('.');
        }
        relative.push_str(&segment.name);

        pointer.push(Segment::Key(segment.name.clone()));
        let mut present = pointer.resolve(root).is_some();

        if let Some(index) = segment.index {
            let synthesized_zero = index == 0
                && (is_envelope_singleton(&segment.name) || singular(&relative))
                && !pointer.resolve(root).map(Value::is_array).unwrap_or(false);
            if !synthesized_zero {
                pointer.push(Segment::Index(index));
                present = pointer.resolve(root).is_some();
            }
        }

        if !present {
            exists = false;
            missing_parents.push(relative.clone());
        }
    }

    // Only prefixes strictly above the target are "missing parents"; the
    // last entry is the target itself.
    if exists {
        missing_parents.clear();
    } else {
        missing_parents.pop();
    }

    NavigationInfo {
        breadcrumb: breadcrumb_for(root, &pointer),
        exists,
        missing_parents,
        pointer,
    }
}

/// Human-ready labels for a pointer, derived from the live document.
fn breadcrumb_for(root: &Value, pointer: &StructuralPointer) -> Vec<String> {
    let mut labels = Vec::new();
    let mut current = Some(root);
    let segments = pointer.segments();
    let mut i = 0;

    while i < segments.len() {
        match &segments[i] {
            Segment::Key(k) if k == "entry" => {
                // `/entry/{n}/resource` collapses to "Entry n+1 · Type".
                if let (Some(Segment::Index(n)), Some(Segment::Key(r))) =
                    (segments.get(i + 1), segments.get(i + 2))
                {
                    if r == "resource" && labels.is_empty() {
                        labels.push(format!("Entry {}", n + 1));
                        current = current
                            .and_then(|v| v.get("entry"))
                            .and_then(|v| v.get(n))
                            .and_then(|v| v.get("resource"));
                        if let Some(rt) = current.and_then(resource_type_of) {
                            labels.push(rt.to_string());
                        }
                        i += 3;
                        continue;
                    }
                }
                labels.push(k.clone());
                current = current.and_then(|v| v.get(k));
                i += 1;
            }
            Segment::Key(k) => {
                labels.push(k.clone());
                current = current.and_then(|v| v.get(k));
                i += 1;
            }
            Segment::Index(n) => {
                labels.push(format!("#{}", n + 1));
                current = current.and_then(|v| v.get(n));
                i += 1;
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_schema(_: &str) -> bool {
        false
    }

    fn bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {
                    "resourceType": "Patient",
                    "id": "p1",
                    "gender": "male",
                    "birthDate": "1960-05-15",
                    "name": [
                        {"family": "Chalmers", "given": ["Peter", "James"]},
                        {"family": "Windsor"}
                    ]
                }},
                {"resource": {"resourceType": "Observation", "id": "o1", "status": "final"}}
            ]
        })
    }

    #[test]
    fn test_expression_to_pointer_basic() {
        let ptr = expression_to_pointer("Patient.name[0].given[1]", &no_schema);
        assert_eq!(ptr.to_string(), "/name/0/given/1");
    }

    #[test]
    fn test_expression_to_pointer_strips_singleton_zero() {
        let singular = |path: &str| path == "gender";
        let ptr = expression_to_pointer("Bundle.entry[0].resource[0].gender[0]", &singular);
        assert_eq!(ptr.to_string(), "/entry/0/resource/gender");
    }

    #[test]
    fn test_resolve_relative_path_anchors_on_type() {
        let root = bundle();
        let info = resolve_path(&root, "Observation.status", None, None, &no_schema);
        assert_eq!(info.pointer.to_string(), "/entry/1/resource/status");
        assert!(info.exists);
        assert!(info.missing_parents.is_empty());
    }

    #[test]
    fn test_resolve_missing_path_reports_parents() {
        let root = bundle();
        let info = resolve_path(&root, "Patient.contact.telecom.value", None, None, &no_schema);
        assert!(!info.exists);
        assert_eq!(
            info.missing_parents,
            vec!["contact".to_string(), "contact.telecom".to_string()]
        );
    }

    #[test]
    fn test_breadcrumb_labels() {
        let root = bundle();
        let info = resolve_path(&root, "Patient.name[1].family", None, None, &no_schema);
        assert_eq!(
            info.breadcrumb,
            vec!["Entry 1", "Patient", "name", "#2", "family"]
        );
    }

    #[test]
    fn test_collect_containers_returns_arrays_unfanned() {
        let root = bundle();
        let patient = root["entry"][0]["resource"].clone();
        let base = StructuralPointer::parse("/entry/0/resource").unwrap();

        let containers = collect_containers(&patient, "name", &base, "Patient");
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].value.unwrap().as_array().unwrap().len(), 2);
        assert_eq!(containers[0].pointer.to_string(), "/entry/0/resource/name");

        let absent = collect_containers(&patient, "contact", &base, "Patient");
        assert_eq!(absent.len(), 1);
        assert!(absent[0].value.is_none());
    }

    #[test]
    fn test_collect_nodes_fans_out_arrays() {
        let root = bundle();
        let patient = root["entry"][0]["resource"].clone();
        let base = StructuralPointer::parse("/entry/0/resource").unwrap();
        let nodes = collect_nodes(&patient, "name.given", &base, "Patient");
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Patient.name[0].given[0]", "Patient.name[0].given[1]"]
        );
        let pointers: Vec<String> = nodes.iter().map(|n| n.pointer.to_string()).collect();
        assert_eq!(
            pointers,
            vec!["/entry/0/resource/name/0/given/0", "/entry/0/resource/name/0/given/1"]
        );
    }
}
