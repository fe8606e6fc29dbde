//! Numbered schema migrations, gated on `Config.SchemaVersion` (spec §6).

use rusqlite::Connection;

use crate::schema::CURRENT_VERSION;
use crate::Error;

/// Bring a dataset opened at `on_disk_version` up to [`CURRENT_VERSION`],
/// applying each numbered step in order. Returns [`Error::SchemaMismatch`]
/// for any version below the oldest step this build knows, or above
/// `CURRENT_VERSION` (a newer build wrote this file).
pub fn migrate(conn: &Connection, on_disk_version: u32) -> Result<(), Error> {
    if on_disk_version > CURRENT_VERSION {
        return Err(Error::SchemaMismatch { on_disk: on_disk_version, supported: CURRENT_VERSION });
    }
    if on_disk_version < 7 {
        return Err(Error::SchemaMismatch { on_disk: on_disk_version, supported: CURRENT_VERSION });
    }

    let mut version = on_disk_version;
    if version == 7 {
        v7_to_v8(conn)?;
        version = 8;
    }

    debug_assert_eq!(version, CURRENT_VERSION);
    conn.execute(
        "UPDATE Config SET Value = ?1 WHERE Key = 'SchemaVersion'",
        [CURRENT_VERSION.to_string()],
    )?;
    Ok(())
}

/// v7→v8: add per-`BackupSet` counters and backfill `CheckSums.Encrypted`
/// from `IV IS NOT NULL`, per the original implementation's migration of
/// the same name.
fn v7_to_v8(conn: &Connection) -> Result<(), Error> {
    let add_column = |sql: &str| -> rusqlite::Result<()> {
        match conn.execute(sql, []) {
            Ok(_) => Ok(()),
            // Re-running a migration against an already-migrated file is a
            // no-op; SQLite reports duplicate-column as a generic error.
            Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
            Err(e) => Err(e),
        }
    };
    add_column("ALTER TABLE Backups ADD COLUMN FilesFull INTEGER NOT NULL DEFAULT 0")?;
    add_column("ALTER TABLE Backups ADD COLUMN FilesDelta INTEGER NOT NULL DEFAULT 0")?;
    add_column("ALTER TABLE Backups ADD COLUMN BytesReceived INTEGER NOT NULL DEFAULT 0")?;
    add_column("ALTER TABLE CheckSums ADD COLUMN Encrypted INTEGER NOT NULL DEFAULT 0")?;
    conn.execute("UPDATE CheckSums SET Encrypted = 1 WHERE IV IS NOT NULL", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn rejects_version_below_oldest_known() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create(&conn, "client", false).unwrap();
        assert!(matches!(migrate(&conn, 3), Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn rejects_version_above_current() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create(&conn, "client", false).unwrap();
        assert!(matches!(migrate(&conn, 99), Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn v7_to_v8_adds_columns_and_backfills() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Config (Key TEXT PRIMARY KEY, Value TEXT NOT NULL);
             CREATE TABLE Backups (BackupSet INTEGER PRIMARY KEY);
             CREATE TABLE CheckSums (ChecksumId INTEGER PRIMARY KEY, IV BLOB);
             INSERT INTO Config (Key, Value) VALUES ('SchemaVersion', '7');
             INSERT INTO CheckSums (ChecksumId, IV) VALUES (1, X'00');
             INSERT INTO CheckSums (ChecksumId, IV) VALUES (2, NULL);",
        )
        .unwrap();

        migrate(&conn, 7).unwrap();

        let encrypted: i64 = conn
            .query_row("SELECT Encrypted FROM CheckSums WHERE ChecksumId = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(encrypted, 1);
        let not_encrypted: i64 = conn
            .query_row("SELECT Encrypted FROM CheckSums WHERE ChecksumId = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(not_encrypted, 0);
    }
}
