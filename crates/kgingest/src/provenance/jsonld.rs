//! JSON-LD attachment. Provenance is added as expanded node objects so it
//! does not depend on the document's `@context`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::{namespace_of, ProvenanceRecord, DCTERMS, PROV};
use crate::error::ProvenanceError;

const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// Top-level node objects of a document.
fn top_level_nodes(doc: &Value) -> Vec<&Map<String, Value>> {
    let nodes: Vec<&Value> = match doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match obj.get("@graph") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
            None => vec![doc],
        },
        _ => Vec::new(),
    };
    nodes.into_iter().filter_map(Value::as_object).collect()
}

/// Absolute `@id` IRIs of top-level nodes, in document order.
fn subject_iris(doc: &Value) -> Vec<String> {
    let mut iris: Vec<String> = Vec::new();
    for node in top_level_nodes(doc) {
        if let Some(id) = node.get("@id").and_then(Value::as_str) {
            if id.contains("://") && !iris.iter().any(|i| i == id) {
                iris.push(id.to_string());
            }
        }
    }
    iris
}

fn provenance_nodes(record: &ProvenanceRecord, subjects: &[String]) -> Vec<Value> {
    let prov = |local: &str| format!("{}{}", PROV, local);
    let ts = record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    let timestamp = json!([{ "@value": ts, "@type": XSD_DATE_TIME }]);

    let mut associated = vec![json!({ "@id": record.agent.as_str() })];
    associated.extend(subjects.iter().map(|s| json!({ "@id": s })));

    let mut entity = Map::new();
    entity.insert("@id".into(), json!(record.entity.as_str()));
    entity.insert("@type".into(), json!([prov("Entity")]));
    entity.insert(prov("generatedAtTime"), timestamp.clone());
    entity.insert(
        prov("wasAttributedTo"),
        json!([{ "@id": record.agent.as_str() }]),
    );
    entity.insert(
        prov("wasGeneratedBy"),
        json!([{ "@id": record.activity.as_str() }]),
    );
    entity.insert(
        format!("{}provenance", DCTERMS),
        json!([{ "@value": format!("Data ingested by {} on {}", record.user, ts) }]),
    );

    let mut activity = Map::new();
    activity.insert("@id".into(), json!(record.activity.as_str()));
    activity.insert(
        "@type".into(),
        json!([prov("Activity"), record.activity_class.as_str()]),
    );
    activity.insert(prov("generatedAtTime"), timestamp);
    activity.insert(prov("wasAssociatedWith"), Value::Array(associated));

    let agent = json!({ "@id": record.agent.as_str(), "@type": [prov("Agent")] });

    vec![Value::Object(entity), Value::Object(activity), agent]
}

/// Returns the JSON-LD document with provenance nodes appended.
///
/// Nodes go into `@graph` when present; otherwise the document becomes a
/// top-level array holding the original object followed by the new nodes.
pub fn attach(
    content: &str,
    user: &str,
    default_namespace: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, ProvenanceError> {
    if content.trim().is_empty() {
        return Err(ProvenanceError::EmptyDocument);
    }
    let doc: Value = serde_json::from_str(content).map_err(|e| ProvenanceError::Parse {
        format: "json-ld".to_string(),
        message: e.to_string(),
    })?;

    let subjects = subject_iris(&doc);
    let base = subjects
        .iter()
        .find_map(|s| namespace_of(s))
        .unwrap_or_else(|| default_namespace.to_string());
    let record = ProvenanceRecord::new(user, &base, timestamp)?;
    let nodes = provenance_nodes(&record, &subjects);

    let augmented = match doc {
        Value::Array(mut items) => {
            items.extend(nodes);
            Value::Array(items)
        }
        Value::Object(mut obj) => match obj.remove("@graph") {
            Some(Value::Array(mut graph)) => {
                graph.extend(nodes);
                obj.insert("@graph".into(), Value::Array(graph));
                Value::Object(obj)
            }
            Some(single) => {
                let mut graph = vec![single];
                graph.extend(nodes);
                obj.insert("@graph".into(), Value::Array(graph));
                Value::Object(obj)
            }
            None => {
                let mut items = vec![Value::Object(obj)];
                items.extend(nodes);
                Value::Array(items)
            }
        },
        _ => {
            return Err(ProvenanceError::Parse {
                format: "json-ld".to_string(),
                message: "top-level value must be an object or array".to_string(),
            })
        }
    };

    serde_json::to_string_pretty(&augmented).map_err(|e| ProvenanceError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach_now(content: &str) -> Value {
        let out = attach(content, "alice", "https://fallback.org/", Utc::now()).unwrap();
        serde_json::from_str(&out).unwrap()
    }

    #[test]
    fn test_graph_document_gets_nodes_appended() {
        let doc = json!({
            "@context": { "name": "https://schema.org/name" },
            "@graph": [
                { "@id": "https://e.org/data/a", "name": "A" },
                { "@id": "https://e.org/data/b", "name": "B" }
            ]
        });
        let out = attach_now(&doc.to_string());
        let graph = out["@graph"].as_array().unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph[0], doc["@graph"][0]);
        assert_eq!(graph[1], doc["@graph"][1]);
        assert_eq!(out["@context"], doc["@context"]);

        let activity = &graph[3];
        let associated = activity[format!("{}wasAssociatedWith", PROV)]
            .as_array()
            .unwrap();
        assert_eq!(associated.len(), 3);
        assert!(graph[2]["@id"]
            .as_str()
            .unwrap()
            .starts_with("https://e.org/data/provenance/"));
    }

    #[test]
    fn test_single_object_becomes_array() {
        let doc = json!({ "@id": "https://e.org/x/thing", "https://schema.org/name": "T" });
        let out = attach_now(&doc.to_string());
        let items = out.as_array().unwrap();
        assert_eq!(items[0], doc);
        assert_eq!(items.len(), 4);
        assert_eq!(
            items[3]["@id"],
            json!("https://e.org/x/agent/alice")
        );
    }

    #[test]
    fn test_top_level_array_is_extended() {
        let doc = json!([{ "@id": "urn:x:1" }]);
        let out = attach_now(&doc.to_string());
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 4);
        assert!(items[1]["@id"]
            .as_str()
            .unwrap()
            .starts_with("https://fallback.org/provenance/"));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            attach("", "alice", "https://f.org/", Utc::now()),
            Err(ProvenanceError::EmptyDocument)
        ));
        assert!(matches!(
            attach("{ not json", "alice", "https://f.org/", Utc::now()),
            Err(ProvenanceError::Parse { .. })
        ));
        assert!(matches!(
            attach("42", "alice", "https://f.org/", Utc::now()),
            Err(ProvenanceError::Parse { .. })
        ));
    }
}
