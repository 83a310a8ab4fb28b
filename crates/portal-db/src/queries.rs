use crate::Database;
use crate::models::{MessageRow, NotificationRow, SshKeyRow};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row};

impl Database {
    // -- SSH keys --

    pub fn insert_ssh_key(&self, uid: u64, name: &str, key: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ssh_keys (uid, name, key) VALUES (?1, ?2, ?3)",
                rusqlite::params![uid, name, key],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_ssh_keys_for_owner(&self, uid: u64) -> Result<Vec<SshKeyRow>> {
        self.with_conn(|conn| query_ssh_keys(conn, Some(uid)))
    }

    pub fn get_all_ssh_keys(&self) -> Result<Vec<SshKeyRow>> {
        self.with_conn(|conn| query_ssh_keys(conn, None))
    }

    /// Deletes a key only if `uid` owns it. Returns whether a row was removed.
    pub fn delete_ssh_key(&self, id: i64, uid: u64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM ssh_keys WHERE id = ?1 AND uid = ?2",
                rusqlite::params![id, uid],
            )?;
            Ok(n > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, body: &str, author: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (body, author) VALUES (?1, ?2)",
                rusqlite::params![body, author],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest first.
    pub fn get_messages(&self) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, body, author, created_at FROM messages ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        body: row.get(1)?,
                        author: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, body: &str, created_at: DateTime<Utc>) -> Result<NotificationRow> {
        let created_at = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (body, created_at) VALUES (?1, ?2)",
                rusqlite::params![body, created_at],
            )?;
            Ok(NotificationRow {
                id: conn.last_insert_rowid(),
                body: body.to_string(),
                created_at,
            })
        })
    }

    /// Newest first.
    pub fn get_notifications(&self, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, body, created_at FROM notifications
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        body: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_notifications(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))?)
        })
    }
}

fn ssh_key_from_row(row: &Row<'_>) -> rusqlite::Result<SshKeyRow> {
    Ok(SshKeyRow {
        id: row.get(0)?,
        uid: row.get(1)?,
        name: row.get(2)?,
        key: row.get(3)?,
    })
}

fn query_ssh_keys(conn: &Connection, owner: Option<u64>) -> Result<Vec<SshKeyRow>> {
    let rows = match owner {
        Some(uid) => {
            let mut stmt =
                conn.prepare("SELECT id, uid, name, key FROM ssh_keys WHERE uid = ?1 ORDER BY id")?;
            let rows = stmt
                .query_map([uid], ssh_key_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare("SELECT id, uid, name, key FROM ssh_keys ORDER BY id")?;
            let rows = stmt
                .query_map([], ssh_key_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_keys_are_scoped_to_owner_for_delete() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_ssh_key(1, "alice", "ssh-ed25519 AAAA").unwrap();
        db.insert_ssh_key(2, "bob", "ssh-rsa BBBB").unwrap();

        assert!(!db.delete_ssh_key(id, 2).unwrap());
        assert_eq!(db.get_all_ssh_keys().unwrap().len(), 2);

        assert!(db.delete_ssh_key(id, 1).unwrap());
        let remaining = db.get_all_ssh_keys().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "bob");
        assert!(db.get_ssh_keys_for_owner(1).unwrap().is_empty());
    }

    #[test]
    fn messages_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message("first", "alice").unwrap();
        let second = db.insert_message("second", "bob").unwrap();

        let rows = db.get_messages().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[0].body, "second");

        assert!(db.delete_message(second).unwrap());
        assert!(!db.delete_message(second).unwrap());
        assert_eq!(db.get_messages().unwrap().len(), 1);
    }

    #[test]
    fn notifications_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.insert_notification("old", t0).unwrap();
        db.insert_notification("new", t0 + chrono::Duration::seconds(5)).unwrap();

        let rows = db.get_notifications(10).unwrap();
        assert_eq!(rows.iter().map(|r| r.body.as_str()).collect::<Vec<_>>(), ["new", "old"]);
        assert_eq!(db.get_notifications(1).unwrap().len(), 1);
        assert_eq!(db.count_notifications().unwrap(), 2);
    }
}
