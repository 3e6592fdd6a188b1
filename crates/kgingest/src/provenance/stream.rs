//! Bounded-memory attachment for large line-oriented documents.
//!
//! The original bytes are copied through untouched and a block of
//! N-Triples statements is appended. N-Triples lines are valid Turtle,
//! N-Quads (default graph) and TriG (default graph), so the result stays
//! in the original syntax. Only document-level provenance is written:
//! individual subjects are not linked.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use oxrdf::GraphName;
use oxrdfio::{RdfFormat as OxFormat, RdfSerializer};
use regex::Regex;

use super::{namespace_of, ProvenanceRecord};
use crate::error::ProvenanceError;

const HEAD_LEN: u64 = 64 * 1024;

static RE_SUBJECT_IRI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*<([^<>\s]+)>").unwrap());

/// Derives the base namespace from the first subject IRI in the head of the document.
pub fn namespace_from_head(head: &str) -> Option<String> {
    RE_SUBJECT_IRI
        .captures_iter(head)
        .filter_map(|c| c.get(1))
        .find_map(|m| namespace_of(m.as_str()))
}

/// Serializes the provenance block as N-Triples.
pub fn provenance_block(record: &ProvenanceRecord) -> Result<Vec<u8>, ProvenanceError> {
    let ser_err = |e: std::io::Error| ProvenanceError::Serialize(e.to_string());
    let mut serializer = RdfSerializer::from_format(OxFormat::NTriples).for_writer(Vec::new());
    for triple in record.triples(&[]) {
        serializer
            .serialize_quad(&triple.in_graph(GraphName::DefaultGraph))
            .map_err(ser_err)?;
    }
    serializer.finish().map_err(ser_err)
}

/// Copies `source` to `dest` and appends document-level provenance.
pub fn append_provenance(
    source: &Path,
    dest: &Path,
    user: &str,
    default_namespace: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), ProvenanceError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| ProvenanceError::Io { path, source: e }
    };

    let mut head = Vec::new();
    File::open(source)
        .map_err(io_err(source))?
        .take(HEAD_LEN)
        .read_to_end(&mut head)
        .map_err(io_err(source))?;
    if head.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ProvenanceError::EmptyDocument);
    }
    let base = namespace_from_head(&String::from_utf8_lossy(&head))
        .unwrap_or_else(|| default_namespace.to_string());
    let record = ProvenanceRecord::new(user, &base, timestamp)?;
    let block = provenance_block(&record)?;

    let mut reader = BufReader::new(File::open(source).map_err(io_err(source))?);
    let mut writer = BufWriter::new(File::create(dest).map_err(io_err(dest))?);
    std::io::copy(&mut reader, &mut writer).map_err(io_err(dest))?;
    writer.write_all(b"\n").map_err(io_err(dest))?;
    writer.write_all(&block).map_err(io_err(dest))?;
    writer.flush().map_err(io_err(dest))?;
    Ok(())
}
