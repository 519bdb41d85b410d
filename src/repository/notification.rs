//! Notification repository for SQLite persistence.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::{parse_datetime, Result};
use crate::models::{Notification, NotificationKind};

/// SQLite-backed notification repository.
pub struct NotificationRepository {
    db_path: PathBuf,
}

impl NotificationRepository {
    /// Create a new notification repository, initializing the schema.
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
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
        Ok(Notification {
            id: row.get("id")?,
            kind: NotificationKind::from_str(&row.get::<_, String>("kind")?)
                .unwrap_or(NotificationKind::ScanFailed),
            title: row.get("title")?,
            body: row.get("body")?,
            read: row.get::<_, i64>("read")? != 0,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    }

    /// Persist a notification.
    pub fn save(&self, notification: &Notification) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO notifications (id, kind, title, body, read, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                notification.id,
                notification.kind.as_str(),
                notification.title,
                notification.body,
                notification.read as i64,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent notifications, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM notifications ORDER BY created_at DESC LIMIT ?")?;
        let notifications = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_list_recent() {
        let dir = tempdir().unwrap();
        let repo = NotificationRepository::new(&dir.path().join("test.db")).unwrap();

        for i in 0..3 {
            repo.save(&Notification::new(
                NotificationKind::RfpDiscovered,
                format!("New RFP {}", i),
                "details".to_string(),
            ))
            .unwrap();
        }

        let recent = repo.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, NotificationKind::RfpDiscovered);
    }
}
