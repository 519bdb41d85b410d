//! RFP repository for SQLite persistence.
//!
//! The UNIQUE index on `source_url` backs the exactly-once ingestion
//! guarantee: a URL maps to at most one RFP row for the lifetime of the
//! system.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::{parse_datetime, to_option, Result};
use crate::models::Rfp;

/// SQLite-backed RFP repository.
pub struct RfpRepository {
    db_path: PathBuf,
}

impl RfpRepository {
    /// Create a new RFP repository, initializing the schema.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rfps (
                id TEXT PRIMARY KEY,
                portal_id TEXT NOT NULL,
                title TEXT NOT NULL,
                agency TEXT,
                source_url TEXT NOT NULL UNIQUE,
                deadline TEXT,
                estimated_value REAL,
                status TEXT NOT NULL,
                discovered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rfps_portal ON rfps(portal_id);
        "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Rfp> {
        Ok(Rfp {
            id: row.get("id")?,
            portal_id: row.get("portal_id")?,
            title: row.get("title")?,
            agency: row.get("agency")?,
            source_url: row.get("source_url")?,
            deadline: row.get("deadline")?,
            estimated_value: row.get("estimated_value")?,
            status: row.get("status")?,
            discovered_at: parse_datetime(&row.get::<_, String>("discovered_at")?),
        })
    }

    /// Check whether an RFP with this source URL is already persisted.
    pub fn exists_by_source_url(&self, source_url: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rfps WHERE source_url = ?",
            params![source_url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Persist an RFP. The caller is expected to have checked
    /// `exists_by_source_url` first; a racing duplicate insert is
    /// rejected by the unique index.
    pub fn save(&self, rfp: &Rfp) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO rfps (
                id, portal_id, title, agency, source_url,
                deadline, estimated_value, status, discovered_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                rfp.id,
                rfp.portal_id,
                rfp.title,
                rfp.agency,
                rfp.source_url,
                rfp.deadline,
                rfp.estimated_value,
                rfp.status,
                rfp.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get an RFP by ID.
    pub fn get(&self, id: &str) -> Result<Option<Rfp>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM rfps WHERE id = ?")?;
        to_option(stmt.query_row(params![id], Self::map_row))
    }

    /// Get all RFPs discovered from a portal, newest first.
    pub fn get_by_portal(&self, portal_id: &str) -> Result<Vec<Rfp>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT * FROM rfps WHERE portal_id = ? ORDER BY discovered_at DESC")?;
        let rfps = stmt
            .query_map(params![portal_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rfps)
    }

    /// Search RFPs by title keyword and minimum estimated value.
    pub fn search(&self, keyword: Option<&str>, min_value: Option<f64>) -> Result<Vec<Rfp>> {
        let conn = self.connect()?;
        let pattern = keyword.map(|k| format!("%{}%", k)).unwrap_or("%".to_string());
        let mut stmt = conn.prepare(
            r#"SELECT * FROM rfps
               WHERE title LIKE ?1
                 AND (?2 IS NULL OR estimated_value >= ?2)
               ORDER BY discovered_at DESC"#,
        )?;
        let rfps = stmt
            .query_map(params![pattern, min_value], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rfps)
    }

    /// Total number of persisted RFPs.
    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rfps", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveredRfp;
    use tempfile::tempdir;

    fn discovered(url: &str) -> DiscoveredRfp {
        DiscoveredRfp {
            title: "Road resurfacing".to_string(),
            agency: Some("DOT".to_string()),
            source_url: url.to_string(),
            deadline: Some("2026-10-01".to_string()),
            estimated_value: Some(250_000.0),
            portal_id: "state-gov".to_string(),
        }
    }

    #[test]
    fn source_url_maps_to_at_most_one_record() {
        let dir = tempdir().unwrap();
        let repo = RfpRepository::new(&dir.path().join("test.db")).unwrap();

        let url = "https://example.gov/rfp/42";
        assert!(!repo.exists_by_source_url(url).unwrap());

        repo.save(&Rfp::from_discovered(&discovered(url))).unwrap();
        assert!(repo.exists_by_source_url(url).unwrap());
        assert_eq!(repo.count().unwrap(), 1);

        // A second insert with the same URL hits the unique index.
        assert!(repo.save(&Rfp::from_discovered(&discovered(url))).is_err());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn search_filters_by_keyword_and_value() {
        let dir = tempdir().unwrap();
        let repo = RfpRepository::new(&dir.path().join("test.db")).unwrap();

        repo.save(&Rfp::from_discovered(&discovered("https://example.gov/rfp/1")))
            .unwrap();
        let mut small = discovered("https://example.gov/rfp/2");
        small.title = "Janitorial services".to_string();
        small.estimated_value = Some(5_000.0);
        repo.save(&Rfp::from_discovered(&small)).unwrap();

        let hits = repo.search(Some("resurfacing"), None).unwrap();
        assert_eq!(hits.len(), 1);

        let hits = repo.search(None, Some(100_000.0)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Road resurfacing");

        let hits = repo.search(None, None).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
