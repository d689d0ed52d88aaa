//! Typed clinical resource model.
//!
//! Two parse passes over the raw document tree:
//!
//! - [`parse_bundle_strict`]: fail-closed. Unknown members, unrecognized
//!   coded literals and malformed temporal primitives are rejected; failures
//!   carry the entry index so they map to precise findings.
//! - [`parse_bundle_lenient`]: permissive twin, run only after a strict
//!   failure. Produces a best-effort [`Bundle`] for the typed rule path.
//!
//! The model intentionally covers the resource types with typed rule
//! shortcuts (code-system and question/answer semantics); everything else
//! passes through as [`Resource::Unsupported`] and is handled structurally.

mod datatypes;
mod lenient;
mod primitives;
mod resources;
mod strict;

pub use datatypes::{
    Address, CodeableConcept, Coding, ContactPoint, HumanName, Identifier, Period, Quantity,
    Reference,
};
pub use lenient::{parse_bundle_lenient, parse_resource_lenient};
pub use primitives::{Date, DateTime, Instant, Time};
pub use resources::{
    AdministrativeGender, Bundle, BundleType, Encounter, EncounterStatus, Entry, Observation,
    ObservationStatus, Organization, Patient, PatientContact, QuestionnaireResponse,
    QuestionnaireResponseAnswer, QuestionnaireResponseItem, QuestionnaireResponseStatus, Resource,
};
pub use strict::{parse_bundle_strict, parse_resource_strict, ParseFailure};
