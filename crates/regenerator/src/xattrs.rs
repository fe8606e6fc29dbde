//! Decoding for the xattrs-blob and acl-blob content referenced by
//! `FileRow.xattrs_id`/`FileRow.acl_id` (spec §4.6).
//!
//! This module only decodes bytes into data structures; it does not touch
//! a live filesystem inode (there is no portable, dependency-light xattr
//! or POSIX ACL syscall binding shared across the example pack, and doing
//! so is an OS-level concern the embedding CLI owns). See
//! [`crate::FilesystemApplier`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Decoded extended attributes: name to raw value bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattrs(pub BTreeMap<String, Vec<u8>>);

/// Decode an xattrs-blob: a JSON object mapping attribute name to
/// base64-encoded value bytes.
pub fn decode_xattrs(blob: &[u8]) -> Result<Xattrs, Error> {
    let encoded: BTreeMap<String, String> = serde_json::from_slice(blob)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let mut decoded = BTreeMap::new();
    for (name, value) in encoded {
        let bytes = BASE64
            .decode(value)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        decoded.insert(name, bytes);
    }
    Ok(Xattrs(decoded))
}

/// Encode xattrs back to the on-disk blob format (used when ingesting).
#[must_use]
pub fn encode_xattrs(xattrs: &Xattrs) -> Vec<u8> {
    let encoded: BTreeMap<String, String> =
        xattrs.0.iter().map(|(k, v)| (k.clone(), BASE64.encode(v))).collect();
    serde_json::to_vec(&encoded).expect("BTreeMap<String, String> always serializes")
}

/// Decoded POSIX ACL, kept as its textual form (`user::rwx,group::r-x,...`)
/// exactly as the original implementation's `posix1e` usage produced it;
/// no further parsing is attempted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixAcl(pub String);

/// Decode an acl-blob: raw UTF-8 POSIX ACL text.
pub fn decode_acl(blob: &[u8]) -> Result<PosixAcl, Error> {
    let text = String::from_utf8(blob.to_vec())
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    Ok(PosixAcl(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xattrs_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("user.comment".to_string(), b"hello".to_vec());
        let xattrs = Xattrs(map);
        let blob = encode_xattrs(&xattrs);
        let decoded = decode_xattrs(&blob).unwrap();
        assert_eq!(decoded, xattrs);
    }

    #[test]
    fn acl_round_trip_is_raw_text() {
        let text = "user::rwx,group::r-x,other::---";
        let decoded = decode_acl(text.as_bytes()).unwrap();
        assert_eq!(decoded.0, text);
    }
}
