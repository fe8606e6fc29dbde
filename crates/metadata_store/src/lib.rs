//! Transactional relational store of backup sets, files, names and
//! checksums (spec component C5), backed by `rusqlite` (bundled SQLite) in
//! WAL journal mode.
//!
//! A `MetadataStore` is the "exclusive handle" referred to by the
//! concurrency model: one store per open dataset, serializing mutation
//! through the connection it owns. Every public mutating method either
//! runs in its own transaction or, for bulk operations, a single
//! transaction around the whole batch.

#![deny(unsafe_code)]

pub mod error;
pub mod migrations;
pub mod schema;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tardis_core::model::{BackupSet, CheckSumRow, FileRow, KeysRow};

pub use error::Error;

/// Parameters for opening a new backup set (spec §4.5 Session operations).
#[derive(Debug, Clone)]
pub struct NewBackupSet<'a> {
    /// Human-readable name, unique across the dataset.
    pub name: &'a str,
    /// Client-generated session identifier, unique across the dataset.
    pub session: &'a str,
    /// Whether this run was requested as a full (non-incremental) backup.
    pub full: bool,
    /// Retention priority; lower values are purged first.
    pub priority: i32,
    /// Reporting client's software version, if known.
    pub client_version: Option<&'a str>,
}

/// Report from a completed purge (spec §4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    /// `File` rows removed.
    pub files_deleted: u64,
    /// `BackupSet` rows removed.
    pub sets_deleted: u64,
}

/// A handle onto one client's dataset.
pub struct MetadataStore {
    conn: Connection,
    authenticated: bool,
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

impl MetadataStore {
    /// Create a brand-new dataset file at `path`.
    pub fn create(path: &Path, client_id: &str, encrypted: bool) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        schema::create(&conn, client_id, encrypted)?;
        Ok(Self { conn, authenticated: !encrypted })
    }

    /// Open an existing dataset file, migrating it to the current schema
    /// version if needed.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;

        let on_disk: Option<String> = conn
            .query_row("SELECT Value FROM Config WHERE Key = 'SchemaVersion'", [], |r| r.get(0))
            .optional()?;
        let on_disk: u32 = on_disk
            .and_then(|v| v.parse().ok())
            .ok_or(Error::SchemaMismatch { on_disk: 0, supported: schema::CURRENT_VERSION })?;
        if on_disk != schema::CURRENT_VERSION {
            migrations::migrate(&conn, on_disk)?;
        }

        let store = Self { conn, authenticated: false };
        let authenticated = store.get_keys()?.is_none();
        Ok(Self { conn: store.conn, authenticated })
    }

    fn require_authenticated(&self) -> Result<(), Error> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::NotAuthenticated)
        }
    }

    // ---- Config ---------------------------------------------------

    /// Read a `Config` value.
    pub fn get_config(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self
            .conn
            .query_row("SELECT Value FROM Config WHERE Key = ?1", [key], |r| r.get(0))
            .optional()?)
    }

    /// Write (or overwrite) a `Config` value.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO Config (Key, Value) VALUES (?1, ?2)
             ON CONFLICT(Key) DO UPDATE SET Value = excluded.Value",
            params![key, value],
        )?;
        Ok(())
    }

    /// This dataset's client identifier.
    pub fn client_id(&self) -> Result<String, Error> {
        self.get_config("ClientId")?.ok_or(Error::NotFound)
    }

    /// The schema version currently recorded in `Config`.
    pub fn schema_version(&self) -> Result<u32, Error> {
        let v = self.get_config("SchemaVersion")?.ok_or(Error::NotFound)?;
        v.parse().map_err(|_| Error::SchemaMismatch { on_disk: 0, supported: schema::CURRENT_VERSION })
    }

    // ---- Keys / authentication -------------------------------------

    /// Read the dataset's wrapped key material, if an encrypted dataset.
    pub fn get_keys(&self) -> Result<Option<KeysRow>, Error> {
        self.conn
            .query_row(
                "SELECT ClientId, Salt, Verifier, FilenameKey, ContentKey FROM Keys LIMIT 1",
                [],
                |r| {
                    Ok(KeysRow {
                        client_id: r.get(0)?,
                        salt: r.get(1)?,
                        verifier: r.get(2)?,
                        filename_key: r.get(3)?,
                        content_key: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    /// Persist the dataset's wrapped key material (called once, at dataset
    /// initialization with a password).
    pub fn set_keys(&self, keys: &KeysRow) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO Keys (ClientId, Salt, Verifier, FilenameKey, ContentKey)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ClientId) DO UPDATE SET
                Salt = excluded.Salt, Verifier = excluded.Verifier,
                FilenameKey = excluded.FilenameKey, ContentKey = excluded.ContentKey",
            params![keys.client_id, keys.salt, keys.verifier, keys.filename_key, keys.content_key],
        )?;
        Ok(())
    }

    /// Salt and verifier only, for a client that wants to authenticate
    /// without fetching the wrapped data keys.
    pub fn get_srp_values(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self.get_keys()?.map(|k| (k.salt, k.verifier)))
    }

    /// Check a password against the stored verifier using the simplified
    /// challenge/response handshake ([`crypto::Verifier`]). An unencrypted
    /// dataset (no `Keys` row) always succeeds.
    pub fn authenticate(&mut self, password: &[u8]) -> Result<(), Error> {
        let Some(row) = self.get_keys()? else {
            self.authenticated = true;
            return Ok(());
        };
        if row.salt.len() != crypto::SALT_LEN || row.verifier.len() != crypto::MASTER_KEY_LEN {
            return Err(Error::AuthenticationFailed);
        }
        let mut salt = [0u8; crypto::SALT_LEN];
        salt.copy_from_slice(&row.salt);
        let mut verifier_bytes = [0u8; crypto::MASTER_KEY_LEN];
        verifier_bytes.copy_from_slice(&row.verifier);

        let verifier =
            crypto::Verifier::from_parts(salt, crypto::DEFAULT_PBKDF2_ITERATIONS, verifier_bytes);
        let challenge = crypto::Verifier::challenge();
        let response = crypto::Verifier::respond(
            password,
            &salt,
            crypto::DEFAULT_PBKDF2_ITERATIONS,
            &challenge,
        );
        verifier.verify(&challenge, &response).map_err(|_| Error::AuthenticationFailed)?;
        self.authenticated = true;
        Ok(())
    }

    // ---- Session -----------------------------------------------------

    /// Open a new backup set. Fails with `AlreadyExists` if `name` or
    /// `session` is already taken.
    pub fn new_backup_set(&self, req: NewBackupSet<'_>) -> Result<i64, Error> {
        self.require_authenticated()?;
        self.conn
            .execute(
                "INSERT INTO Backups (Name, Session, StartTime, Completed, Full, Priority, ClientVersion)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)",
                params![req.name, req.session, now_unix(), req.full, req.priority, req.client_version],
            )
            .map_err(|e| unique_violation(e, req.name))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Mark a backup set complete, recording its final counters.
    pub fn complete_backup_set(
        &self,
        id: i64,
        files_full: i64,
        files_delta: i64,
        bytes_received: i64,
    ) -> Result<(), Error> {
        self.require_authenticated()?;
        let n = self.conn.execute(
            "UPDATE Backups SET Completed = 1, EndTime = ?2,
                FilesFull = ?3, FilesDelta = ?4, BytesReceived = ?5
             WHERE BackupSet = ?1",
            params![id, now_unix(), files_full, files_delta, bytes_received],
        )?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// All backup sets, in id order.
    pub fn list_backup_sets(&self) -> Result<Vec<BackupSet>, Error> {
        let mut stmt = self.conn.prepare(SELECT_BACKUP_SET_COLUMNS)?;
        let rows = stmt.query_map([], row_to_backup_set)?;
        rows.collect::<Result<_, _>>().map_err(Error::from)
    }

    /// The most recent completed backup set, if any.
    pub fn last_completed(&self) -> Result<Option<BackupSet>, Error> {
        let sql = format!(
            "{SELECT_BACKUP_SET_COLUMNS_NOORDER} WHERE Completed = 1 ORDER BY BackupSet DESC LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, [], row_to_backup_set).optional()?)
    }

    /// Look up a backup set by its unique name.
    pub fn backup_set_by_name(&self, name: &str) -> Result<Option<BackupSet>, Error> {
        let sql = format!("{SELECT_BACKUP_SET_COLUMNS_NOORDER} WHERE Name = ?1");
        Ok(self.conn.query_row(&sql, [name], row_to_backup_set).optional()?)
    }

    /// The latest completed backup set with `StartTime <= t`.
    pub fn backup_set_by_time(&self, t: f64) -> Result<Option<BackupSet>, Error> {
        let sql = format!(
            "{SELECT_BACKUP_SET_COLUMNS_NOORDER} WHERE Completed = 1 AND StartTime <= ?1 ORDER BY StartTime DESC LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, [t], row_to_backup_set).optional()?)
    }

    // ---- Names ---------------------------------------------------------

    /// Intern a filename (or path component); idempotent.
    pub fn intern_name(&self, bytes: &[u8]) -> Result<i64, Error> {
        self.require_authenticated()?;
        self.conn.execute("INSERT OR IGNORE INTO Names (Name) VALUES (?1)", [bytes])?;
        Ok(self.conn.query_row("SELECT NameId FROM Names WHERE Name = ?1", [bytes], |r| r.get(0))?)
    }

    // ---- Files: write ----------------------------------------------------

    /// Insert one file version row. `row.file_id` is ignored; the assigned
    /// id is returned.
    pub fn insert_file(&self, row: &FileRow) -> Result<i64, Error> {
        self.require_authenticated()?;
        insert_file_stmt(&self.conn, row)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert many file rows in a single transaction.
    pub fn insert_files(&mut self, rows: &[FileRow]) -> Result<Vec<i64>, Error> {
        self.require_authenticated()?;
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            insert_file_stmt(&tx, row)?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Attach a checksum to the file version identified by
    /// `(inode, device, backup_set)`.
    pub fn set_checksum_for_file(
        &self,
        inode: i64,
        device: i64,
        backup_set: i64,
        checksum_id: i64,
    ) -> Result<(), Error> {
        self.require_authenticated()?;
        let n = self.conn.execute(
            "UPDATE Files SET ChecksumId = ?4
             WHERE Inode = ?1 AND Device = ?2 AND BackupSet = ?3",
            params![inode, device, backup_set, checksum_id],
        )?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Copy every child of `(parent_inode, parent_device)` present at
    /// `from_bset` into `to_bset`, unchanged (same name, attributes, and
    /// checksum reference) — used when a directory's contents did not
    /// change between two backup sets.
    pub fn clone_directory(
        &mut self,
        parent_inode: i64,
        parent_device: i64,
        from_bset: i64,
        to_bset: i64,
    ) -> Result<u64, Error> {
        self.require_authenticated()?;
        let tx = self.conn.transaction()?;
        let n = tx.execute(
            "INSERT INTO Files
                (NameId, BackupSet, Inode, Device, Parent, ParentDevice, Dir, Link, Size,
                 MTime, CTime, ATime, Mode, UID, GID, NLinks, ChecksumId, XattrsId, AclId)
             SELECT NameId, ?3, Inode, Device, Parent, ParentDevice, Dir, Link, Size,
                 MTime, CTime, ATime, Mode, UID, GID, NLinks, ChecksumId, XattrsId, AclId
             FROM Files
             WHERE Parent = ?1 AND ParentDevice = ?2 AND BackupSet = ?4",
            params![parent_inode, parent_device, to_bset, from_bset],
        )?;
        tx.commit()?;
        Ok(n as u64)
    }

    // ---- Files: read -----------------------------------------------------

    /// Look up a single file version by its unique key.
    pub fn file_by_name(
        &self,
        name_id: i64,
        parent_inode: i64,
        parent_device: i64,
        backup_set: i64,
    ) -> Result<Option<FileRow>, Error> {
        let sql = format!(
            "{SELECT_FILE_COLUMNS} WHERE NameId = ?1 AND Parent = ?2 AND ParentDevice = ?3 AND BackupSet = ?4"
        );
        Ok(self
            .conn
            .query_row(&sql, params![name_id, parent_inode, parent_device, backup_set], row_to_file)
            .optional()?)
    }

    /// Resolve a path given as already-interned (possibly encrypted) name
    /// bytes, one per component, walking from the synthetic root
    /// `(inode=0, device=0)`.
    pub fn file_by_path(
        &self,
        components: &[Vec<u8>],
        backup_set: i64,
    ) -> Result<Option<FileRow>, Error> {
        let mut parent_inode = 0i64;
        let mut parent_device = 0i64;
        let mut current: Option<FileRow> = None;
        for component in components {
            let Some(name_id) = self.lookup_name_id(component)? else {
                return Ok(None);
            };
            let Some(row) = self.file_by_name(name_id, parent_inode, parent_device, backup_set)?
            else {
                return Ok(None);
            };
            parent_inode = row.inode;
            parent_device = row.device;
            current = Some(row);
        }
        Ok(current)
    }

    fn lookup_name_id(&self, bytes: &[u8]) -> Result<Option<i64>, Error> {
        Ok(self.conn.query_row("SELECT NameId FROM Names WHERE Name = ?1", [bytes], |r| r.get(0)).optional()?)
    }

    /// The interned byte string for a `Name` row (possibly ciphertext, if
    /// the dataset is encrypted).
    pub fn name_bytes(&self, name_id: i64) -> Result<Vec<u8>, Error> {
        self.conn
            .query_row("SELECT Name FROM Names WHERE NameId = ?1", [name_id], |r| r.get(0))
            .optional()?
            .ok_or(Error::NotFound)
    }

    /// Look up the newest file version for `(inode, device)` at or before
    /// `backup_set`.
    pub fn file_by_inode(
        &self,
        inode: i64,
        device: i64,
        backup_set: i64,
    ) -> Result<Option<FileRow>, Error> {
        let sql = format!(
            "{SELECT_FILE_COLUMNS} WHERE Inode = ?1 AND Device = ?2 AND BackupSet <= ?3 ORDER BY BackupSet DESC LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, params![inode, device, backup_set], row_to_file).optional()?)
    }

    /// All direct children of a directory within one backup set.
    pub fn read_directory(
        &self,
        inode: i64,
        device: i64,
        backup_set: i64,
    ) -> Result<Vec<FileRow>, Error> {
        let sql = format!(
            "{SELECT_FILE_COLUMNS} WHERE Parent = ?1 AND ParentDevice = ?2 AND BackupSet = ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![inode, device, backup_set], row_to_file)?;
        rows.collect::<Result<_, _>>().map_err(Error::from)
    }

    /// Find a file with matching `(size, mtime)` but a different inode,
    /// first appearing at or after `since_bset` — a heuristic for
    /// detecting a moved/renamed file so its content can be reused. Only
    /// considers rows with a non-null checksum.
    pub fn find_similar(
        &self,
        size: i64,
        inode: i64,
        mtime: i64,
        since_bset: i64,
    ) -> Result<Option<FileRow>, Error> {
        let sql = format!(
            "{SELECT_FILE_COLUMNS} WHERE Size = ?1 AND MTime = ?2 AND Inode != ?3
             AND BackupSet >= ?4 AND ChecksumId IS NOT NULL
             ORDER BY BackupSet DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![size, mtime, inode, since_bset], row_to_file)
            .optional()?)
    }

    // ---- CheckSums -------------------------------------------------------

    /// Insert a new checksum row, computing and validating its chain
    /// length against `max_delta_chain`. Returns `ChainTooLong` if the
    /// caller should fall back to a full blob instead.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_checksum(
        &self,
        checksum: &str,
        size: i64,
        basis: Option<&str>,
        iv: Option<&[u8]>,
        compressed: bool,
        encrypted: bool,
        delta_size: Option<i64>,
        is_file: bool,
        disk_size: i64,
        max_delta_chain: u32,
    ) -> Result<u32, Error> {
        self.require_authenticated()?;
        let chain_length = match basis {
            None => 0,
            Some(basis_cksum) => {
                if basis_cksum == checksum {
                    return Err(Error::CyclicBasis(checksum.to_string()));
                }
                self.assert_acyclic(checksum, basis_cksum)?;
                let basis_chain: u32 = self
                    .conn
                    .query_row(
                        "SELECT ChainLength FROM CheckSums WHERE Checksum = ?1",
                        [basis_cksum],
                        |r| r.get(0),
                    )
                    .optional()?
                    .ok_or(Error::NotFound)?;
                basis_chain + 1
            }
        };
        if chain_length > max_delta_chain {
            return Err(Error::ChainTooLong { length: chain_length, max: max_delta_chain });
        }

        self.conn
            .execute(
                "INSERT INTO CheckSums
                    (Checksum, Size, Basis, IV, Compressed, Encrypted, DeltaSize, ChainLength, IsFile, DiskSize)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    checksum, size, basis, iv, compressed, encrypted, delta_size, chain_length,
                    is_file, disk_size
                ],
            )
            .map_err(|e| unique_violation(e, checksum))?;
        Ok(chain_length)
    }

    /// Walk `basis`'s own basis chain, rejecting an insert that would
    /// close a cycle (a basis chain that eventually points back at
    /// `checksum`).
    fn assert_acyclic(&self, checksum: &str, basis: &str) -> Result<(), Error> {
        let mut current = basis.to_string();
        loop {
            if current == checksum {
                return Err(Error::CyclicBasis(checksum.to_string()));
            }
            let next: Option<String> = self
                .conn
                .query_row("SELECT Basis FROM CheckSums WHERE Checksum = ?1", [&current], |r| r.get(0))
                .optional()?
                .flatten();
            match next {
                Some(n) => current = n,
                None => return Ok(()),
            }
        }
    }

    /// Look up a checksum's full row.
    pub fn checksum_info(&self, checksum: &str) -> Result<Option<CheckSumRow>, Error> {
        let sql = format!("{SELECT_CHECKSUM_COLUMNS} WHERE Checksum = ?1");
        Ok(self.conn.query_row(&sql, [checksum], row_to_checksum).optional()?)
    }

    /// Look up a checksum's full row by its row id (what `FileRow.checksum_id`/
    /// `xattrs_id`/`acl_id` reference).
    pub fn checksum_info_by_id(&self, checksum_id: i64) -> Result<Option<CheckSumRow>, Error> {
        let sql = format!("{SELECT_CHECKSUM_COLUMNS} WHERE ChecksumId = ?1");
        Ok(self.conn.query_row(&sql, [checksum_id], row_to_checksum).optional()?)
    }

    /// Resolve a path (as pre-encoded name-byte components) to its
    /// checksum string, applying an optional permission check at every
    /// directory walked en route.
    pub fn checksum_by_path(
        &self,
        components: &[Vec<u8>],
        backup_set: i64,
        perm_checker: Option<&dyn Fn(&FileRow) -> bool>,
    ) -> Result<Option<String>, Error> {
        let mut parent_inode = 0i64;
        let mut parent_device = 0i64;
        let mut last: Option<FileRow> = None;
        for component in components {
            let Some(name_id) = self.lookup_name_id(component)? else {
                return Ok(None);
            };
            let Some(row) = self.file_by_name(name_id, parent_inode, parent_device, backup_set)?
            else {
                return Ok(None);
            };
            if let Some(checker) = perm_checker {
                if !checker(&row) {
                    return Ok(None);
                }
            }
            parent_inode = row.inode;
            parent_device = row.device;
            last = Some(row);
        }
        let Some(row) = last else { return Ok(None) };
        let Some(checksum_id) = row.checksum_id else { return Ok(None) };
        Ok(self
            .conn
            .query_row("SELECT Checksum FROM CheckSums WHERE ChecksumId = ?1", [checksum_id], |r| r.get(0))
            .optional()?)
    }

    // ---- Purge -----------------------------------------------------------

    /// Completed backup sets eligible for deletion: `priority <= max_priority`,
    /// `end_time < before_time`, excluding `keep_bset`.
    pub fn list_purge_candidates(
        &self,
        max_priority: i32,
        before_time: f64,
        keep_bset: i64,
    ) -> Result<Vec<BackupSet>, Error> {
        let sql = format!(
            "{SELECT_BACKUP_SET_COLUMNS_NOORDER} WHERE Completed = 1 AND Priority <= ?1
             AND EndTime IS NOT NULL AND EndTime < ?2 AND BackupSet != ?3
             ORDER BY BackupSet"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![max_priority, before_time, keep_bset], row_to_backup_set)?;
        rows.collect::<Result<_, _>>().map_err(Error::from)
    }

    /// Incomplete (crashed-mid-ingest) backup sets.
    pub fn list_purge_incomplete(&self) -> Result<Vec<BackupSet>, Error> {
        let sql = format!("{SELECT_BACKUP_SET_COLUMNS_NOORDER} WHERE Completed = 0 ORDER BY BackupSet");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_backup_set)?;
        rows.collect::<Result<_, _>>().map_err(Error::from)
    }

    /// Delete one backup set and its file rows, in a single transaction.
    /// Does not touch `CheckSums`; orphan reclamation is a separate step
    /// (`orphan_checksums` / the `purge` crate's removal pass).
    pub fn delete_backup_set(&mut self, id: i64) -> Result<u64, Error> {
        self.require_authenticated()?;
        let tx = self.conn.transaction()?;
        let files_deleted = tx.execute("DELETE FROM Files WHERE BackupSet = ?1", [id])?;
        let sets_deleted = tx.execute("DELETE FROM Backups WHERE BackupSet = ?1", [id])?;
        if sets_deleted == 0 {
            return Err(Error::NotFound);
        }
        tx.commit()?;
        Ok(files_deleted as u64)
    }

    /// Delete many backup sets in one transaction.
    pub fn purge_sets(&mut self, ids: &[i64]) -> Result<PurgeCounts, Error> {
        self.require_authenticated()?;
        let tx = self.conn.transaction()?;
        let mut counts = PurgeCounts::default();
        for &id in ids {
            counts.files_deleted += tx.execute("DELETE FROM Files WHERE BackupSet = ?1", [id])? as u64;
            counts.sets_deleted += tx.execute("DELETE FROM Backups WHERE BackupSet = ?1", [id])? as u64;
        }
        tx.commit()?;
        Ok(counts)
    }

    /// Checksums with zero `File` references and zero references as
    /// another checksum's basis — eligible for [`crate::MetadataStore::delete_checksum`].
    pub fn orphan_checksums(&self) -> Result<Vec<String>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT Checksum FROM CheckSums c
             WHERE NOT EXISTS (SELECT 1 FROM Files f WHERE f.ChecksumId = c.ChecksumId
                                 OR f.XattrsId = c.ChecksumId OR f.AclId = c.ChecksumId)
               AND NOT EXISTS (SELECT 1 FROM CheckSums b WHERE b.Basis = c.Checksum)",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>().map_err(Error::from)
    }

    /// Remove one checksum row (the caller is responsible for having
    /// already removed the corresponding blob via `BlobStore::remove`).
    pub fn delete_checksum(&self, checksum: &str) -> Result<(), Error> {
        self.require_authenticated()?;
        let n = self.conn.execute("DELETE FROM CheckSums WHERE Checksum = ?1", [checksum])?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> Result<(), Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn unique_violation(e: rusqlite::Error, what: &str) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::AlreadyExists(what.to_string())
        }
        _ => Error::from(e),
    }
}

const SELECT_BACKUP_SET_COLUMNS_NOORDER: &str = "
    SELECT BackupSet, Name, Session, StartTime, EndTime, Completed, Full, Priority,
           ClientVersion, ServerVersion, FilesFull, FilesDelta, BytesReceived
    FROM Backups";

const SELECT_BACKUP_SET_COLUMNS: &str = "
    SELECT BackupSet, Name, Session, StartTime, EndTime, Completed, Full, Priority,
           ClientVersion, ServerVersion, FilesFull, FilesDelta, BytesReceived
    FROM Backups ORDER BY BackupSet";

fn row_to_backup_set(r: &rusqlite::Row<'_>) -> rusqlite::Result<BackupSet> {
    Ok(BackupSet {
        id: r.get(0)?,
        name: r.get(1)?,
        session: r.get(2)?,
        start_time: r.get(3)?,
        end_time: r.get(4)?,
        completed: r.get(5)?,
        full: r.get(6)?,
        priority: r.get(7)?,
        client_version: r.get(8)?,
        server_version: r.get(9)?,
        files_full: r.get(10)?,
        files_delta: r.get(11)?,
        bytes_received: r.get(12)?,
    })
}

const SELECT_FILE_COLUMNS: &str = "
    SELECT FileId, NameId, BackupSet, Inode, Device, Parent, ParentDevice, Dir, Link, Size,
           MTime, CTime, ATime, Mode, UID, GID, NLinks, ChecksumId, XattrsId, AclId
    FROM Files";

fn row_to_file(r: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        file_id: r.get(0)?,
        name_id: r.get(1)?,
        backup_set: r.get(2)?,
        inode: r.get(3)?,
        device: r.get(4)?,
        parent: r.get(5)?,
        parent_device: r.get(6)?,
        dir: r.get(7)?,
        link: r.get(8)?,
        size: r.get(9)?,
        mtime: r.get(10)?,
        ctime: r.get(11)?,
        atime: r.get(12)?,
        mode: r.get(13)?,
        uid: r.get(14)?,
        gid: r.get(15)?,
        nlinks: r.get(16)?,
        checksum_id: r.get(17)?,
        xattrs_id: r.get(18)?,
        acl_id: r.get(19)?,
    })
}

fn insert_file_stmt(conn: &Connection, row: &FileRow) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO Files
            (NameId, BackupSet, Inode, Device, Parent, ParentDevice, Dir, Link, Size,
             MTime, CTime, ATime, Mode, UID, GID, NLinks, ChecksumId, XattrsId, AclId)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            row.name_id, row.backup_set, row.inode, row.device, row.parent, row.parent_device,
            row.dir, row.link, row.size, row.mtime, row.ctime, row.atime, row.mode, row.uid,
            row.gid, row.nlinks, row.checksum_id, row.xattrs_id, row.acl_id
        ],
    )
}

const SELECT_CHECKSUM_COLUMNS: &str = "
    SELECT ChecksumId, Checksum, Size, Basis, IV, Compressed, Encrypted, DeltaSize,
           ChainLength, IsFile, DiskSize
    FROM CheckSums";

fn row_to_checksum(r: &rusqlite::Row<'_>) -> rusqlite::Result<CheckSumRow> {
    Ok(CheckSumRow {
        checksum_id: r.get(0)?,
        checksum: r.get(1)?,
        size: r.get(2)?,
        basis: r.get(3)?,
        iv: r.get(4)?,
        compressed: r.get(5)?,
        encrypted: r.get(6)?,
        delta_size: r.get(7)?,
        chain_length: r.get(8)?,
        is_file: r.get(9)?,
        disk_size: r.get(10)?,
    })
}
