//! End-to-end recovery coverage: drives real `session` ingest against a
//! tempdir-backed `BlobStore` + `MetadataStore`, then reads it back through
//! `Regenerator`, exercising the full pipeline these two crates mirror.

use std::io::Cursor;

use blob_store::BlobStore;
use metadata_store::{MetadataStore, NewBackupSet};
use regenerator::{NullApplier, Regenerator};
use session::{NewFileAttrs, SessionCoordinator};
use tardis_core::model::{AuthFailAction, ChecksumAlgorithm, OverwriteMode};
use tempfile::tempdir;

fn fresh() -> (tempfile::TempDir, MetadataStore, BlobStore) {
    let dir = tempdir().unwrap();
    let store = MetadataStore::create(&dir.path().join("tardis.db"), "client-1", false).unwrap();
    let blobs = BlobStore::new(dir.path().join("blobs")).unwrap();
    (dir, store, blobs)
}

fn attrs(inode: i64, size: i64) -> NewFileAttrs {
    NewFileAttrs {
        inode,
        device: 1,
        parent: 0,
        parent_device: 0,
        size,
        mtime: Some(1000),
        ctime: None,
        atime: None,
        mode: Some(0o644),
        uid: Some(0),
        gid: Some(0),
        nlinks: Some(1),
    }
}

fn backup_set_req<'a>(name: &'a str, session: &'a str) -> NewBackupSet<'a> {
    NewBackupSet { name, session, full: true, priority: 1, client_version: None }
}

#[test]
fn full_ingest_then_recover_round_trips() {
    let (_dir, mut store, blobs) = fresh();
    let content = b"the quick brown fox jumps over the lazy dog".to_vec();
    let checksum = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, &content);

    let mut session =
        SessionCoordinator::open(&mut store, &blobs, backup_set_req("b1", "s1"), ChecksumAlgorithm::Sha256, 5)
            .unwrap();
    session.submit_full(b"fox.txt", attrs(1, content.len() as i64), &checksum, Cursor::new(&content), true).unwrap();
    session.finish().unwrap();

    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    let mut source = regen.recover_checksum(&checksum, true).unwrap();
    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut source, &mut out).unwrap();
    assert_eq!(out, content);
}

#[test]
fn delta_chain_depth_two_recovers_to_final_content() {
    let (_dir, mut store, blobs) = fresh();

    let v0 = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_vec();
    let v1 = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAB".to_vec();
    let v2 = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAABC".to_vec();

    let c0 = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, &v0);
    let c1 = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, &v1);
    let c2 = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, &v2);

    let sig0 = delta::Signature::build(Cursor::new(&v0), delta::MIN_BLOCK_SIZE, ChecksumAlgorithm::Sha256).unwrap();
    let ops1 = delta::diff(&sig0, Cursor::new(&v1), ChecksumAlgorithm::Sha256).unwrap();
    let delta1 = delta::encode(&ops1);

    let sig1 = delta::Signature::build(Cursor::new(&v1), delta::MIN_BLOCK_SIZE, ChecksumAlgorithm::Sha256).unwrap();
    let ops2 = delta::diff(&sig1, Cursor::new(&v2), ChecksumAlgorithm::Sha256).unwrap();
    let delta2 = delta::encode(&ops2);

    let mut session =
        SessionCoordinator::open(&mut store, &blobs, backup_set_req("b1", "s1"), ChecksumAlgorithm::Sha256, 5)
            .unwrap();
    session.submit_full(b"v.bin", attrs(1, v0.len() as i64), &c0, Cursor::new(&v0), false).unwrap();
    session
        .submit_delta(b"v.bin", attrs(1, v1.len() as i64), &c1, &c0, v1.len() as i64, Cursor::new(&delta1), false)
        .unwrap();
    session
        .submit_delta(b"v.bin", attrs(1, v2.len() as i64), &c2, &c1, v2.len() as i64, Cursor::new(&delta2), false)
        .unwrap();
    session.finish().unwrap();

    let info = store.checksum_info(&c2).unwrap().unwrap();
    assert_eq!(info.chain_length, 2);

    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    let mut source = regen.recover_checksum(&c2, true).unwrap();
    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut source, &mut out).unwrap();
    assert_eq!(out, v2);
}

#[test]
fn encrypted_dataset_round_trips() {
    let (_dir, mut store, blobs) = fresh();
    let content_key = [11u8; crypto::CONTENT_KEY_LEN];
    let filename_key = [22u8; crypto::FILENAME_KEY_LEN];
    let content = b"top secret backup payload".to_vec();
    let checksum = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, &content);

    let mut session = SessionCoordinator::open(
        &mut store,
        &blobs,
        backup_set_req("b1", "s1"),
        ChecksumAlgorithm::Sha256,
        5,
    )
    .unwrap()
    .with_keys(content_key, filename_key);
    session.submit_full(b"secret.txt", attrs(1, content.len() as i64), &checksum, Cursor::new(&content), true).unwrap();
    session.finish().unwrap();

    let info = store.checksum_info(&checksum).unwrap().unwrap();
    assert!(info.encrypted);
    assert!(info.iv.is_some());

    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5).with_keys(content_key, filename_key);
    let mut source = regen.recover_checksum(&checksum, true).unwrap();
    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut source, &mut out).unwrap();
    assert_eq!(out, content);

    let no_keys_regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    assert!(matches!(
        no_keys_regen.recover_checksum(&checksum, true),
        Err(regenerator::Error::MissingKeys)
    ));
}

fn ingest_one_file(out_name: &str, content: &[u8]) -> (tempfile::TempDir, MetadataStore, BlobStore, String, i64) {
    let (dir, mut store, blobs) = fresh();
    let checksum = tardis_core::digest::hash_hex(ChecksumAlgorithm::Sha256, content);
    let mut session =
        SessionCoordinator::open(&mut store, &blobs, backup_set_req("b1", "s1"), ChecksumAlgorithm::Sha256, 5)
            .unwrap();
    session
        .submit_full(out_name.as_bytes(), attrs(1, content.len() as i64), &checksum, Cursor::new(content), false)
        .unwrap();
    let bset = session.finish().unwrap();
    (dir, store, blobs, checksum, bset)
}

fn corrupt_blob(blobs: &BlobStore, checksum: &str) {
    let mut bytes = blobs.get_bytes(checksum).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    blobs.remove(checksum).unwrap();
    blobs.put_bytes(checksum, &bytes).unwrap();
}

#[test]
fn auth_failure_keep_leaves_existing_file_untouched() {
    let (out, store, blobs, checksum, bset) = ingest_one_file("keep.txt", b"keep this content");
    let out_dir = out.path().join("restore");
    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    let mut hardlinks = std::collections::HashMap::new();
    let report = regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Keep, &NullApplier, &mut hardlinks)
        .unwrap();
    assert!(report.errors.is_empty());
    let target = out_dir.join("keep.txt");
    assert!(target.exists());

    corrupt_blob(&blobs, &checksum);
    let mut hardlinks2 = std::collections::HashMap::new();
    let report2 = regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Keep, &NullApplier, &mut hardlinks2)
        .unwrap();
    assert_eq!(report2.errors.len(), 1);
    assert!(matches!(report2.errors[0].error, regenerator::Error::AuthenticationFailed { .. }));
    assert!(target.exists(), "Keep must leave the previously recovered file in place");
}

#[test]
fn auth_failure_delete_removes_existing_file() {
    let (out, store, blobs, checksum, bset) = ingest_one_file("delete.txt", b"delete this content");
    let out_dir = out.path().join("restore");
    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    let mut hardlinks = std::collections::HashMap::new();
    regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Delete, &NullApplier, &mut hardlinks)
        .unwrap();
    let target = out_dir.join("delete.txt");
    assert!(target.exists());

    corrupt_blob(&blobs, &checksum);
    let mut hardlinks2 = std::collections::HashMap::new();
    let report = regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Delete, &NullApplier, &mut hardlinks2)
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(!target.exists(), "Delete must remove the corrupt artifact");
}

#[test]
fn auth_failure_rename_labels_artifact_with_computed_hash() {
    let (out, store, blobs, checksum, bset) = ingest_one_file("rename.txt", b"rename this content");
    let out_dir = out.path().join("restore");
    let regen = Regenerator::new(&blobs, &store, ChecksumAlgorithm::Sha256, 5);
    let mut hardlinks = std::collections::HashMap::new();
    regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Rename, &NullApplier, &mut hardlinks)
        .unwrap();
    let target = out_dir.join("rename.txt");
    assert!(target.exists());

    corrupt_blob(&blobs, &checksum);
    let mut hardlinks2 = std::collections::HashMap::new();
    let report = regen
        .recover_subtree(0, 0, bset, &out_dir, OverwriteMode::Always, AuthFailAction::Rename, &NullApplier, &mut hardlinks2)
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    let regenerator::Error::AuthenticationFailed { computed, .. } = &report.errors[0].error else {
        panic!("expected AuthenticationFailed");
    };
    assert_ne!(computed, &checksum, "computed hash must reflect the corrupted bytes, not the expected checksum");
    assert!(!target.exists());
    let renamed = out_dir.join(format!("rename.txt-CORRUPT-{computed}"));
    assert!(renamed.exists(), "corrupt artifact should be renamed with the computed hash");
}
