//! Document tree navigation and location resolution for FHIR bundles.
//!
//! The validation pipeline reports every finding with a canonical structural
//! pointer (RFC 6901) into the raw document, next to the FHIRPath-style
//! expression the finding originated from. This crate owns both sides of that
//! mapping:
//!
//! - [`StructuralPointer`]: the canonical pointer type (parse, display,
//!   segment manipulation, `~0`/`~1` escaping).
//! - [`resolve_path`]: expression path → pointer resolution against a live
//!   document, with breadcrumbs and parent-existence information.
//! - [`pointer_from_exception`]: best-effort pointer recovery from parser
//!   error messages.
//! - [`collect_nodes`]: dot-path fan-out over the raw tree, used by the rule
//!   evaluator and the terminology step.
//! - Bundle helpers: entry iteration and reference → entry-index resolution.

mod document;
mod exception;
mod path;
mod pointer;

pub use document::{entries, entry_resource, find_entry_by_reference, resource_type_of};
pub use exception::{find_field_pointer, find_value_pointer, pointer_from_exception};
pub use path::{
    collect_containers, collect_nodes, expression_to_pointer, resolve_path, ContainerNode,
    NavigationInfo, ResolvedNode,
};
pub use pointer::{PointerParseError, Segment, StructuralPointer};
