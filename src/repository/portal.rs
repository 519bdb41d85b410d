//! Portal repository for SQLite persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{parse_datetime, parse_datetime_opt, to_option, Result};
use crate::models::{Portal, PortalFilters, PortalSelectors, PortalStatus};

/// SQLite-backed portal repository.
pub struct PortalRepository {
    db_path: PathBuf,
}

impl PortalRepository {
    /// Create a new portal repository, initializing the schema.
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
            CREATE TABLE IF NOT EXISTS portals (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                requires_login INTEGER NOT NULL DEFAULT 0,
                login_url TEXT,
                username TEXT,
                password TEXT,
                selectors TEXT NOT NULL,
                filters TEXT NOT NULL,
                scan_frequency_hours INTEGER NOT NULL,
                max_rfps_per_scan INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL,
                last_scanned TEXT,
                last_error TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Portal> {
        Ok(Portal {
            id: row.get("id")?,
            name: row.get("name")?,
            base_url: row.get("base_url")?,
            requires_login: row.get::<_, i64>("requires_login")? != 0,
            login_url: row.get("login_url")?,
            username: row.get("username")?,
            password: row.get("password")?,
            selectors: serde_json::from_str::<PortalSelectors>(
                &row.get::<_, String>("selectors")?,
            )
            .unwrap_or_default(),
            filters: serde_json::from_str::<PortalFilters>(&row.get::<_, String>("filters")?)
                .unwrap_or_default(),
            scan_frequency_hours: row.get::<_, i64>("scan_frequency_hours")? as u32,
            max_rfps_per_scan: row.get::<_, i64>("max_rfps_per_scan")? as usize,
            is_active: row.get::<_, i64>("is_active")? != 0,
            status: PortalStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(PortalStatus::Active),
            last_scanned: parse_datetime_opt(row.get::<_, Option<String>>("last_scanned")?),
            last_error: row.get("last_error")?,
            error_count: row.get::<_, i64>("error_count")? as u32,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    }

    /// Get a portal by ID.
    pub fn get(&self, id: &str) -> Result<Option<Portal>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM portals WHERE id = ?")?;
        to_option(stmt.query_row(params![id], Self::map_row))
    }

    /// Get all portals.
    pub fn get_all(&self) -> Result<Vec<Portal>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM portals ORDER BY created_at")?;
        let portals = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(portals)
    }

    /// Get portals eligible for scheduled scanning.
    pub fn get_active(&self) -> Result<Vec<Portal>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM portals WHERE is_active = 1 ORDER BY created_at")?;
        let portals = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(portals)
    }

    /// Save a portal (insert or update).
    pub fn save(&self, portal: &Portal) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO portals (
                id, name, base_url, requires_login, login_url, username, password,
                selectors, filters, scan_frequency_hours, max_rfps_per_scan,
                is_active, status, last_scanned, last_error, error_count, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                requires_login = excluded.requires_login,
                login_url = excluded.login_url,
                username = excluded.username,
                password = excluded.password,
                selectors = excluded.selectors,
                filters = excluded.filters,
                scan_frequency_hours = excluded.scan_frequency_hours,
                max_rfps_per_scan = excluded.max_rfps_per_scan,
                is_active = excluded.is_active,
                status = excluded.status,
                last_scanned = excluded.last_scanned,
                last_error = excluded.last_error,
                error_count = excluded.error_count
            "#,
            params![
                portal.id,
                portal.name,
                portal.base_url,
                portal.requires_login as i64,
                portal.login_url,
                portal.username,
                portal.password,
                serde_json::to_string(&portal.selectors)?,
                serde_json::to_string(&portal.filters)?,
                portal.scan_frequency_hours as i64,
                portal.max_rfps_per_scan as i64,
                portal.is_active as i64,
                portal.status.as_str(),
                portal.last_scanned.map(|dt| dt.to_rfc3339()),
                portal.last_error,
                portal.error_count as i64,
                portal.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Update scan telemetry after a scan, success or failure.
    pub fn update_scan_telemetry(
        &self,
        id: &str,
        last_scanned: DateTime<Utc>,
        status: PortalStatus,
        last_error: Option<&str>,
        error_count: u32,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"UPDATE portals
               SET last_scanned = ?, status = ?, last_error = ?, error_count = ?
               WHERE id = ?"#,
            params![
                last_scanned.to_rfc3339(),
                status.as_str(),
                last_error,
                error_count as i64,
                id
            ],
        )?;
        Ok(())
    }

    /// Delete a portal.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute("DELETE FROM portals WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_portal(id: &str) -> Portal {
        Portal::new(
            id.to_string(),
            format!("Portal {}", id),
            "https://procurement.example.gov/listings".to_string(),
            PortalSelectors {
                item: ".listing".to_string(),
                title: ".title".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn save_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();

        let mut portal = test_portal("state-gov");
        portal.filters.min_value = Some(10_000.0);
        portal.filters.include_keywords = vec!["software".to_string()];
        repo.save(&portal).unwrap();

        let loaded = repo.get("state-gov").unwrap().unwrap();
        assert_eq!(loaded.name, "Portal state-gov");
        assert_eq!(loaded.filters.min_value, Some(10_000.0));
        assert_eq!(loaded.selectors.item, ".listing");
        assert!(loaded.is_active);

        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn get_active_excludes_inactive() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();

        repo.save(&test_portal("a")).unwrap();
        let mut inactive = test_portal("b");
        inactive.is_active = false;
        repo.save(&inactive).unwrap();

        let active = repo.get_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
        assert_eq!(repo.get_all().unwrap().len(), 2);
    }

    #[test]
    fn telemetry_update_persists() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();
        repo.save(&test_portal("p")).unwrap();

        let now = Utc::now();
        repo.update_scan_telemetry("p", now, PortalStatus::Error, Some("login failed"), 3)
            .unwrap();

        let loaded = repo.get("p").unwrap().unwrap();
        assert_eq!(loaded.status, PortalStatus::Error);
        assert_eq!(loaded.last_error.as_deref(), Some("login failed"));
        assert_eq!(loaded.error_count, 3);
        assert!(loaded.last_scanned.is_some());
    }
}
