//! Registered named graphs (`named_graphs`).

use rusqlite::params;

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct GraphRow {
    pub iri: String,
    pub description: Option<String>,
    pub registered_at: String,
}

/// Registers a graph. Returns `true` if it was not registered before.
pub fn register(db: &Database, row: &GraphRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO named_graphs (iri, description, registered_at)
             VALUES (?1, ?2, ?3)",
            params![row.iri, row.description, row.registered_at],
        )?;
        Ok(changed > 0)
    })
}

pub fn exists(db: &Database, iri: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM named_graphs WHERE iri = ?1",
            params![iri],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

pub fn list(db: &Database) -> Result<Vec<GraphRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT iri, description, registered_at FROM named_graphs ORDER BY iri")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(GraphRow {
                    iri: row.get(0)?,
                    description: row.get(1)?,
                    registered_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let row = GraphRow {
            iri: "https://example.org/g".to_string(),
            description: Some("test".to_string()),
            registered_at: "2026-01-01T00:00:00.000000Z".to_string(),
        };
        assert!(register(&db, &row).unwrap());
        assert!(!register(&db, &row).unwrap());
        assert!(exists(&db, "https://example.org/g").unwrap());
        assert!(!exists(&db, "https://example.org/other").unwrap());
        assert_eq!(list(&db).unwrap().len(), 1);
    }
}
