//! DDL for a freshly created dataset (spec §4.5/§6).

use rusqlite::Connection;

/// Schema version produced by [`create`]. Any on-disk version below this
/// must go through [`crate::migrations::migrate`]; any version above it is
/// an [`crate::Error::SchemaMismatch`].
pub const CURRENT_VERSION: u32 = 8;

const DDL: &str = "
CREATE TABLE Config (
    Key   TEXT PRIMARY KEY,
    Value TEXT NOT NULL
);

CREATE TABLE Backups (
    BackupSet     INTEGER PRIMARY KEY AUTOINCREMENT,
    Name          TEXT UNIQUE NOT NULL,
    Session       TEXT UNIQUE NOT NULL,
    StartTime     REAL NOT NULL,
    EndTime       REAL,
    Completed     INTEGER NOT NULL DEFAULT 0,
    Full          INTEGER NOT NULL DEFAULT 0,
    Priority      INTEGER NOT NULL DEFAULT 1,
    ClientVersion TEXT,
    ServerVersion TEXT,
    FilesFull     INTEGER NOT NULL DEFAULT 0,
    FilesDelta    INTEGER NOT NULL DEFAULT 0,
    BytesReceived INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE Names (
    NameId INTEGER PRIMARY KEY AUTOINCREMENT,
    Name   BLOB UNIQUE NOT NULL
);

CREATE TABLE CheckSums (
    ChecksumId  INTEGER PRIMARY KEY AUTOINCREMENT,
    Checksum    TEXT UNIQUE NOT NULL,
    Size        INTEGER NOT NULL,
    Basis       TEXT REFERENCES CheckSums(Checksum),
    IV          BLOB,
    Compressed  INTEGER NOT NULL DEFAULT 0,
    Encrypted   INTEGER NOT NULL DEFAULT 0,
    DeltaSize   INTEGER,
    ChainLength INTEGER NOT NULL DEFAULT 0,
    IsFile      INTEGER NOT NULL DEFAULT 1,
    DiskSize    INTEGER NOT NULL
);
CREATE INDEX CheckSumsByBasis ON CheckSums(Basis);

CREATE TABLE Files (
    FileId        INTEGER PRIMARY KEY AUTOINCREMENT,
    NameId        INTEGER NOT NULL REFERENCES Names(NameId),
    BackupSet     INTEGER NOT NULL REFERENCES Backups(BackupSet),
    Inode         INTEGER NOT NULL,
    Device        INTEGER NOT NULL,
    Parent        INTEGER NOT NULL,
    ParentDevice  INTEGER NOT NULL,
    Dir           INTEGER NOT NULL DEFAULT 0,
    Link          INTEGER NOT NULL DEFAULT 0,
    Size          INTEGER NOT NULL DEFAULT 0,
    MTime         INTEGER,
    CTime         INTEGER,
    ATime         INTEGER,
    Mode          INTEGER,
    UID           INTEGER,
    GID           INTEGER,
    NLinks        INTEGER,
    ChecksumId    INTEGER REFERENCES CheckSums(ChecksumId),
    XattrsId      INTEGER REFERENCES CheckSums(ChecksumId),
    AclId         INTEGER REFERENCES CheckSums(ChecksumId)
);
CREATE UNIQUE INDEX FilesKey ON Files(BackupSet, Parent, ParentDevice, NameId);
CREATE INDEX FilesByInode ON Files(Inode, Device, BackupSet);
CREATE INDEX FilesByChecksum ON Files(ChecksumId);

CREATE TABLE Keys (
    ClientId    TEXT PRIMARY KEY,
    Salt        BLOB NOT NULL,
    Verifier    BLOB NOT NULL,
    FilenameKey BLOB NOT NULL,
    ContentKey  BLOB NOT NULL
);
";

/// Create all tables/indices for a brand-new dataset and seed `Config`
/// with `SchemaVersion`, `ClientId`, and the caller-supplied defaults.
pub fn create(conn: &Connection, client_id: &str, encrypted: bool) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)?;
    conn.execute(
        "INSERT INTO Config (Key, Value) VALUES ('SchemaVersion', ?1)",
        [CURRENT_VERSION.to_string()],
    )?;
    conn.execute("INSERT INTO Config (Key, Value) VALUES ('ClientId', ?1)", [client_id])?;
    conn.execute(
        "INSERT INTO Config (Key, Value) VALUES ('Encrypted', ?1)",
        [if encrypted { "1" } else { "0" }],
    )?;
    conn.execute(
        "INSERT INTO Config (Key, Value) VALUES ('ChecksumAlgorithm', 'MD5')",
        [],
    )?;
    conn.execute("INSERT INTO Config (Key, Value) VALUES ('MaxDeltaChain', '5')", [])?;
    conn.execute("INSERT INTO Config (Key, Value) VALUES ('MaxChangePercent', '50')", [])?;
    Ok(())
}
