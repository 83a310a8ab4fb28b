use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE IF NOT EXISTS ssh_keys (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                uid     INTEGER NOT NULL,
                name    TEXT NOT NULL,
                key     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ssh_keys_uid ON ssh_keys(uid);

            -- Both columns are unique: one config per user, one user per config.
            CREATE TABLE IF NOT EXISTS wireguard (
                filename    TEXT PRIMARY KEY,
                uid         INTEGER NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                body        TEXT NOT NULL,
                author      TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_created
                ON notifications(created_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
