//! Ingestion provenance.
//!
//! Every ingested document gains a small PROV-O description: an entity
//! generated by an ingestion activity, attributed to the ingesting user,
//! with a timestamp and a Dublin Core sentence. Original statements are
//! never altered.
//!
//! Three strategies share the same vocabulary:
//! - [`graph`]: parse, link every IRI subject, re-serialize.
//! - [`stream`]: copy the document through and append document-level
//!   statements, for payloads above the streaming threshold.
//! - [`jsonld`]: append expanded JSON-LD node objects.

pub mod graph;
pub mod jsonld;
pub mod stream;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use oxrdf::vocab::{rdf, xsd};
use oxrdf::{Literal, NamedNode, Subject, Term, Triple};
use tracing::debug;
use uuid::Uuid;

use crate::error::ProvenanceError;
use crate::format::RdfFormat;

pub const PROV: &str = "http://www.w3.org/ns/prov#";
pub const DCTERMS: &str = "http://purl.org/dc/terms/";

/// How a document was augmented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachMode {
    /// Parsed and re-serialized with per-subject links.
    Full,
    /// Original bytes followed by document-level statements.
    Streamed,
    /// Left unchanged; the reason is logged by the caller.
    PassedThrough(String),
}

#[derive(Debug, Clone)]
pub struct ProvenanceOptions {
    /// Namespace used when no suitable base can be derived from the data.
    pub default_namespace: String,
    /// Documents larger than this are never loaded into memory.
    pub streaming_threshold: u64,
}

impl Default for ProvenanceOptions {
    fn default() -> Self {
        Self {
            default_namespace: "https://kgingest.local/".to_string(),
            streaming_threshold: 50 * 1024 * 1024,
        }
    }
}

/// The resources describing one ingestion event.
#[derive(Debug, Clone)]
pub struct ProvenanceRecord {
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub base: String,
    pub entity: NamedNode,
    pub activity: NamedNode,
    pub activity_class: NamedNode,
    pub agent: NamedNode,
}

impl ProvenanceRecord {
    /// Mints fresh provenance resources under `base`.
    pub fn new(user: &str, base: &str, timestamp: DateTime<Utc>) -> Result<Self, ProvenanceError> {
        let user = user.trim();
        if user.is_empty() {
            return Err(ProvenanceError::EmptyUser);
        }
        let id = Uuid::new_v4();
        let iri = |suffix: String| {
            let full = format!("{}{}", base, suffix);
            NamedNode::new(full.clone()).map_err(|e| ProvenanceError::InvalidIri {
                iri: full,
                message: e.to_string(),
            })
        };

        Ok(Self {
            user: user.to_string(),
            timestamp,
            base: base.to_string(),
            entity: iri(format!("provenance/{}", id))?,
            activity: iri(format!("ingestionActivity/{}", id))?,
            activity_class: iri("IngestionActivity".to_string())?,
            agent: iri(format!("agent/{}", urlencoding::encode(user)))?,
        })
    }

    fn timestamp_literal(&self) -> Literal {
        Literal::new_typed_literal(
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            xsd::DATE_TIME,
        )
    }

    fn sentence(&self) -> String {
        format!(
            "Data ingested by {} on {}",
            self.user,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Statements describing the ingestion. The activity is associated
    /// with the agent and with every subject in `linked_subjects`.
    pub fn triples(&self, linked_subjects: &[NamedNode]) -> Vec<Triple> {
        let prov = |local: &str| NamedNode::new_unchecked(format!("{}{}", PROV, local));
        let dcterms_provenance = NamedNode::new_unchecked(format!("{}provenance", DCTERMS));
        let entity = Subject::from(self.entity.clone());
        let activity = Subject::from(self.activity.clone());

        let mut triples = vec![
            Triple::new(entity.clone(), rdf::TYPE, prov("Entity")),
            Triple::new(
                entity.clone(),
                prov("generatedAtTime"),
                self.timestamp_literal(),
            ),
            Triple::new(entity.clone(), prov("wasAttributedTo"), self.agent.clone()),
            Triple::new(entity.clone(), prov("wasGeneratedBy"), self.activity.clone()),
            Triple::new(
                entity,
                dcterms_provenance,
                Literal::new_simple_literal(self.sentence()),
            ),
            Triple::new(activity.clone(), rdf::TYPE, prov("Activity")),
            Triple::new(activity.clone(), rdf::TYPE, self.activity_class.clone()),
            Triple::new(
                activity.clone(),
                prov("generatedAtTime"),
                self.timestamp_literal(),
            ),
            Triple::new(activity.clone(), prov("wasAssociatedWith"), self.agent.clone()),
            Triple::new(Subject::from(self.agent.clone()), rdf::TYPE, prov("Agent")),
        ];
        for subject in linked_subjects {
            triples.push(Triple::new(
                activity.clone(),
                prov("wasAssociatedWith"),
                Term::from(subject.clone()),
            ));
        }
        triples
    }
}

/// Derives a base namespace from a subject IRI: IRIs with a fragment are
/// skipped, the rest are cut after their last `/`.
pub fn namespace_of(iri: &str) -> Option<String> {
    if iri.contains('#') {
        return None;
    }
    let cut = iri.rfind('/')?;
    let base = &iri[..=cut];
    if base.ends_with("://") {
        return None;
    }
    Some(base.to_string())
}

/// Augments the document at `source`, writing the result to `dest`.
///
/// Dispatches on format and size; the returned mode tells whether `dest`
/// was written.
pub fn attach_to_file(
    source: &Path,
    dest: &Path,
    format: RdfFormat,
    user: &str,
    options: &ProvenanceOptions,
) -> Result<AttachMode, ProvenanceError> {
    if user.trim().is_empty() {
        return Err(ProvenanceError::EmptyUser);
    }
    let size = std::fs::metadata(source)
        .map_err(|e| ProvenanceError::Io {
            path: source.to_path_buf(),
            source: e,
        })?
        .len();
    if size == 0 {
        return Err(ProvenanceError::EmptyDocument);
    }

    let now = Utc::now();
    if size > options.streaming_threshold {
        if !format.supports_line_append() {
            return Ok(AttachMode::PassedThrough(format!(
                "{} payload of {} bytes is above the streaming threshold",
                format, size
            )));
        }
        debug!(size, %format, "Appending document-level provenance");
        stream::append_provenance(source, dest, user, &options.default_namespace, now)?;
        return Ok(AttachMode::Streamed);
    }

    let read_err = |e| ProvenanceError::Io {
        path: source.to_path_buf(),
        source: e,
    };
    let augmented = match format {
        RdfFormat::JsonLd => {
            let content = std::fs::read_to_string(source).map_err(read_err)?;
            jsonld::attach(&content, user, &options.default_namespace, now)?.into_bytes()
        }
        _ => {
            let content = std::fs::read(source).map_err(read_err)?;
            graph::attach(&content, format, user, &options.default_namespace, now)?
        }
    };
    std::fs::write(dest, augmented).map_err(|e| ProvenanceError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;
    Ok(AttachMode::Full)
}
