//! Minimal data dictionary for integration tests
//!
//! program <- project <- case <- sample <- aliquot, plus a clinical
//! `demographic` and a `submitted_unaligned_reads` data file hanging off
//! the case.

use serde_json::{json, Value};

fn link(name: &str, backref: &str, target_type: &str, multiplicity: &str, required: bool) -> Value {
    json!({
        "name": name,
        "backref": backref,
        "label": format!("{}_{}", backref, name),
        "target_type": target_type,
        "multiplicity": multiplicity,
        "required": required
    })
}

/// Properties every project-scoped entity carries
fn base_properties(links: &[&str]) -> serde_json::Map<String, Value> {
    let mut props = json!({
        "id": {"type": "string"},
        "type": {"type": "string"},
        "submitter_id": {"type": "string"},
        "project_id": {"type": "string"},
        "state": {"type": "string", "default": "validated"},
        "created_datetime": {"type": ["string", "null"]},
        "updated_datetime": {"type": ["string", "null"]}
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    for name in links {
        props.insert(name.to_string(), json!({"type": ["object", "array"]}));
    }
    props
}

fn entity(category: &str, required_link: &str, links: Vec<Value>, extra: Value) -> Value {
    let link_names: Vec<String> = links
        .iter()
        .filter_map(|l| l["name"].as_str().map(str::to_string))
        .collect();
    let names: Vec<&str> = link_names.iter().map(String::as_str).collect();
    let mut properties = base_properties(&names);
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({
        "category": category,
        "required": ["submitter_id", "type", required_link],
        "systemProperties": ["id", "project_id", "state", "created_datetime", "updated_datetime"],
        "uniqueKeys": [["id"], ["project_id", "submitter_id"]],
        "links": links,
        "properties": properties
    })
}

pub fn dictionary() -> Value {
    let mut reads = entity(
        "data_file",
        "cases",
        vec![link("cases", "submitted_unaligned_reads_files", "case", "many_to_one", true)],
        json!({
            "file_name": {"type": "string"},
            "file_size": {"type": "integer"},
            "md5sum": {"type": "string"},
            "data_format": {"type": "string"},
            "file_state": {
                "type": "string",
                "enum": ["registered", "uploading", "uploaded", "validating", "validated",
                         "submitted", "processing", "processed", "released", "error"],
                "default": "registered"
            }
        }),
    );
    reads["required"] = json!(["submitter_id", "type", "cases", "file_name", "file_size", "md5sum"]);
    reads["systemProperties"] = json!([
        "id", "project_id", "state", "file_state", "created_datetime", "updated_datetime"
    ]);

    json!({
        "_definitions": {"uuid": {"type": "string"}},
        "program": {
            "category": "administrative",
            "required": ["name", "dbgap_accession_number"],
            "uniqueKeys": [["id"], ["name"]],
            "properties": {
                "id": {"type": "string"},
                "type": {"type": "string"},
                "name": {"type": "string"},
                "dbgap_accession_number": {"type": "string"}
            }
        },
        "project": {
            "category": "administrative",
            "required": ["code"],
            "uniqueKeys": [["id"], ["code"]],
            "links": [link("programs", "projects", "program", "many_to_one", true)],
            "properties": {
                "id": {"type": "string"},
                "type": {"type": "string"},
                "code": {"type": "string"},
                "name": {"type": "string"},
                "state": {"type": "string"},
                "releasable": {"type": "boolean"},
                "released": {"type": "boolean"},
                "availability_type": {"type": "string"},
                "dbgap_accession_number": {"type": "string"},
                "programs": {"type": ["object", "array"]}
            }
        },
        "case": entity(
            "administrative",
            "projects",
            vec![link("projects", "cases", "project", "many_to_one", true)],
            json!({
                "disease_type": {"type": "string"},
                "primary_site": {"type": "string"}
            }),
        ),
        "sample": entity(
            "biospecimen",
            "cases",
            vec![link("cases", "samples", "case", "many_to_one", true)],
            json!({
                "sample_type": {"type": "string"},
                "weight": {"type": "number"}
            }),
        ),
        "aliquot": entity(
            "biospecimen",
            "samples",
            vec![link("samples", "aliquots", "sample", "many_to_many", true)],
            json!({"concentration": {"type": "number"}}),
        ),
        "demographic": entity(
            "clinical",
            "cases",
            vec![link("cases", "demographics", "case", "one_to_one", true)],
            json!({"gender": {"enum": ["female", "male", "unknown"]}}),
        ),
        "submitted_unaligned_reads": reads,
        "data_release": {
            "category": "administrative",
            "uniqueKeys": [["id"], ["name"]],
            "properties": {
                "id": {"type": "string"},
                "type": {"type": "string"},
                "name": {"type": "string"},
                "major_version": {"type": "integer"},
                "minor_version": {"type": "integer"},
                "released": {"type": "boolean"}
            }
        }
    })
}
