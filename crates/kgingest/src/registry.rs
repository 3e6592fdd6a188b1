//! Named-graph registration gate. Ingestion into an unregistered graph is
//! rejected at submission.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::graph_repo::{self, GraphRow};
use crate::db::{Database, DatabaseError};
use crate::job::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NamedGraph {
    pub iri: String,
    pub description: Option<String>,
    pub registered_at: DateTime<Utc>,
}

pub trait GraphRegistry: Send + Sync {
    /// Registers `iri`. Idempotent; returns whether it was newly added.
    fn register(&self, iri: &str, description: Option<&str>) -> Result<bool, DatabaseError>;

    fn exists(&self, iri: &str) -> Result<bool, DatabaseError>;

    fn list(&self) -> Result<Vec<NamedGraph>, DatabaseError>;
}

pub struct SqliteGraphRegistry {
    db: Database,
}

impl SqliteGraphRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Registry keys are compared after trimming surrounding whitespace.
pub fn normalize_iri(iri: &str) -> &str {
    iri.trim()
}

impl GraphRegistry for SqliteGraphRegistry {
    fn register(&self, iri: &str, description: Option<&str>) -> Result<bool, DatabaseError> {
        let iri = normalize_iri(iri);
        if iri.is_empty() {
            return Err(DatabaseError::InvalidValue {
                column: "iri",
                value: iri.to_string(),
            });
        }
        graph_repo::register(
            &self.db,
            &GraphRow {
                iri: iri.to_string(),
                description: description.map(str::to_string),
                registered_at: format_timestamp(Utc::now()),
            },
        )
    }

    fn exists(&self, iri: &str) -> Result<bool, DatabaseError> {
        graph_repo::exists(&self.db, normalize_iri(iri))
    }

    fn list(&self) -> Result<Vec<NamedGraph>, DatabaseError> {
        graph_repo::list(&self.db)?
            .into_iter()
            .map(|row| {
                let registered_at = parse_timestamp(&row.registered_at).ok_or_else(|| {
                    DatabaseError::InvalidValue {
                        column: "registered_at",
                        value: row.registered_at.clone(),
                    }
                })?;
                Ok(NamedGraph {
                    iri: row.iri,
                    description: row.description,
                    registered_at,
                })
            })
            .collect()
    }
}
