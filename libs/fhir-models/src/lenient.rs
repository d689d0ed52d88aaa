//! Lenient parse pass: permissive, best-effort typed view.
//!
//! Runs only when the strict pass failed. Unknown members are ignored,
//! unrecognized coded literals become `None`, and malformed sub-objects are
//! dropped rather than failing the whole parse. The result feeds the typed
//! rule path; it is never used to report structural errors (the structural
//! validator already did).

use crate::resources::{
    Bundle, BundleType, Encounter, Entry, Observation, Organization, Patient,
    QuestionnaireResponse, Resource,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;

fn opt<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn vec_of<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Best-effort typed view of the document. `None` only when the input is not
/// even a bundle-shaped object.
pub fn parse_bundle_lenient(root: &Value) -> Option<Bundle> {
    let obj = root.as_object()?;
    if obj.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return None;
    }

    let entries = obj
        .get("entry")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(entry_lenient).collect())
        .unwrap_or_default();

    Some(Bundle {
        id: string(obj.get("id")),
        bundle_type: obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(|s| BundleType::from_str(s).ok()),
        entries,
    })
}

fn entry_lenient(entry: &Value) -> Entry {
    Entry {
        full_url: string(entry.get("fullUrl")),
        resource: entry.get("resource").map(parse_resource_lenient),
    }
}

pub fn parse_resource_lenient(value: &Value) -> Resource {
    match value.get("resourceType").and_then(Value::as_str) {
        Some("Patient") => Resource::Patient(patient_lenient(value)),
        Some("Observation") => Resource::Observation(observation_lenient(value)),
        Some("Encounter") => Resource::Encounter(encounter_lenient(value)),
        Some("Organization") => Resource::Organization(organization_lenient(value)),
        Some("QuestionnaireResponse") => {
            Resource::QuestionnaireResponse(questionnaire_response_lenient(value))
        }
        other => Resource::Unsupported {
            resource_type: other.unwrap_or_default().to_string(),
        },
    }
}

fn patient_lenient(v: &Value) -> Patient {
    Patient {
        resource_type: "Patient".to_string(),
        id: string(v.get("id")),
        meta: v.get("meta").cloned(),
        text: v.get("text").cloned(),
        identifier: vec_of(v.get("identifier")),
        active: v.get("active").and_then(Value::as_bool),
        name: vec_of(v.get("name")),
        telecom: vec_of(v.get("telecom")),
        gender: opt(v.get("gender")),
        birth_date: opt(v.get("birthDate")),
        deceased_boolean: v.get("deceasedBoolean").and_then(Value::as_bool),
        deceased_date_time: opt(v.get("deceasedDateTime")),
        address: vec_of(v.get("address")),
        marital_status: opt(v.get("maritalStatus")),
        multiple_birth_boolean: v.get("multipleBirthBoolean").and_then(Value::as_bool),
        multiple_birth_integer: v.get("multipleBirthInteger").and_then(Value::as_i64),
        contact: vec_of(v.get("contact")),
        general_practitioner: vec_of(v.get("generalPractitioner")),
        managing_organization: opt(v.get("managingOrganization")),
    }
}

fn observation_lenient(v: &Value) -> Observation {
    Observation {
        resource_type: "Observation".to_string(),
        id: string(v.get("id")),
        meta: v.get("meta").cloned(),
        text: v.get("text").cloned(),
        identifier: vec_of(v.get("identifier")),
        based_on: vec_of(v.get("basedOn")),
        part_of: vec_of(v.get("partOf")),
        status: opt(v.get("status")),
        category: vec_of(v.get("category")),
        code: opt(v.get("code")),
        subject: opt(v.get("subject")),
        encounter: opt(v.get("encounter")),
        effective_date_time: opt(v.get("effectiveDateTime")),
        effective_period: opt(v.get("effectivePeriod")),
        issued: opt(v.get("issued")),
        performer: vec_of(v.get("performer")),
        value_quantity: opt(v.get("valueQuantity")),
        value_codeable_concept: opt(v.get("valueCodeableConcept")),
        value_string: string(v.get("valueString")),
        value_boolean: v.get("valueBoolean").and_then(Value::as_bool),
        value_integer: v.get("valueInteger").and_then(Value::as_i64),
        value_date_time: opt(v.get("valueDateTime")),
        data_absent_reason: opt(v.get("dataAbsentReason")),
        interpretation: vec_of(v.get("interpretation")),
        body_site: opt(v.get("bodySite")),
        method: opt(v.get("method")),
        specimen: opt(v.get("specimen")),
        device: opt(v.get("device")),
        derived_from: vec_of(v.get("derivedFrom")),
    }
}

fn encounter_lenient(v: &Value) -> Encounter {
    Encounter {
        resource_type: "Encounter".to_string(),
        id: string(v.get("id")),
        meta: v.get("meta").cloned(),
        text: v.get("text").cloned(),
        identifier: vec_of(v.get("identifier")),
        status: opt(v.get("status")),
        class: opt(v.get("class")),
        type_: vec_of(v.get("type")),
        service_type: opt(v.get("serviceType")),
        priority: opt(v.get("priority")),
        subject: opt(v.get("subject")),
        episode_of_care: vec_of(v.get("episodeOfCare")),
        based_on: vec_of(v.get("basedOn")),
        period: opt(v.get("period")),
        reason_code: vec_of(v.get("reasonCode")),
        reason_reference: vec_of(v.get("reasonReference")),
        service_provider: opt(v.get("serviceProvider")),
        part_of: opt(v.get("partOf")),
    }
}

fn organization_lenient(v: &Value) -> Organization {
    Organization {
        resource_type: "Organization".to_string(),
        id: string(v.get("id")),
        meta: v.get("meta").cloned(),
        text: v.get("text").cloned(),
        identifier: vec_of(v.get("identifier")),
        active: v.get("active").and_then(Value::as_bool),
        type_: vec_of(v.get("type")),
        name: string(v.get("name")),
        alias: vec_of(v.get("alias")),
        telecom: vec_of(v.get("telecom")),
        address: vec_of(v.get("address")),
        part_of: opt(v.get("partOf")),
    }
}

fn questionnaire_response_lenient(v: &Value) -> QuestionnaireResponse {
    QuestionnaireResponse {
        resource_type: "QuestionnaireResponse".to_string(),
        id: string(v.get("id")),
        meta: v.get("meta").cloned(),
        text: v.get("text").cloned(),
        identifier: opt(v.get("identifier")),
        based_on: vec_of(v.get("basedOn")),
        part_of: vec_of(v.get("partOf")),
        questionnaire: string(v.get("questionnaire")),
        status: opt(v.get("status")),
        subject: opt(v.get("subject")),
        encounter: opt(v.get("encounter")),
        authored: opt(v.get("authored")),
        author: opt(v.get("author")),
        source: opt(v.get("source")),
        item: vec_of(v.get("item")),
    }
}
