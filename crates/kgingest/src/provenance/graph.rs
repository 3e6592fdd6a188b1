//! In-memory attachment: parse the whole document, link every IRI subject.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use oxrdf::{GraphName, NamedNode, Quad, Subject};
use oxrdfio::{RdfParser, RdfSerializer};

use super::{namespace_of, ProvenanceRecord};
use crate::error::ProvenanceError;
use crate::format::RdfFormat;

/// Parses `content` as `format`, returning its quads in document order.
pub(crate) fn parse_quads(content: &[u8], format: RdfFormat) -> Result<Vec<Quad>, ProvenanceError> {
    let Some(parser_format) = format.to_oxrdfio() else {
        return Err(ProvenanceError::Parse {
            format: format.to_string(),
            message: "not an RDF graph syntax".to_string(),
        });
    };
    RdfParser::from_format(parser_format)
        .for_reader(content)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProvenanceError::Parse {
            format: format.to_string(),
            message: e.to_string(),
        })
}

/// IRI subjects in first-seen order.
fn iri_subjects(quads: &[Quad]) -> Vec<NamedNode> {
    let mut seen = HashSet::new();
    quads
        .iter()
        .filter_map(|q| match &q.subject {
            Subject::NamedNode(n) => Some(n),
            _ => None,
        })
        .filter(|n| seen.insert(n.as_str().to_string()))
        .cloned()
        .collect()
}

/// Returns the serialized document with provenance statements appended.
pub fn attach(
    content: &[u8],
    format: RdfFormat,
    user: &str,
    default_namespace: &str,
    timestamp: DateTime<Utc>,
) -> Result<Vec<u8>, ProvenanceError> {
    if user.trim().is_empty() {
        return Err(ProvenanceError::EmptyUser);
    }
    let quads = parse_quads(content, format)?;
    if quads.is_empty() {
        return Err(ProvenanceError::EmptyDocument);
    }

    let subjects = iri_subjects(&quads);
    let base = subjects
        .iter()
        .find_map(|s| namespace_of(s.as_str()))
        .unwrap_or_else(|| default_namespace.to_string());
    let record = ProvenanceRecord::new(user, &base, timestamp)?;

    let Some(serializer_format) = format.to_oxrdfio() else {
        return Err(ProvenanceError::Serialize(format!("cannot serialize {}", format)));
    };
    let mut serializer = RdfSerializer::from_format(serializer_format).for_writer(Vec::new());
    let ser_err = |e: std::io::Error| ProvenanceError::Serialize(e.to_string());
    for quad in &quads {
        serializer.serialize_quad(quad).map_err(ser_err)?;
    }
    for triple in record.triples(&subjects) {
        serializer
            .serialize_quad(&triple.in_graph(GraphName::DefaultGraph))
            .map_err(ser_err)?;
    }
    serializer.finish().map_err(ser_err)
}
