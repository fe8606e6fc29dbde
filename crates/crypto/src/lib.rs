//! Password-derived key envelope (spec component C2).
//!
//! Three independent constructions, one derived key:
//! - [`derive_master_key`]: PBKDF2-HMAC-SHA256 turns a client password plus
//!   a stored salt into a 256-bit master key.
//! - [`ContentCipher`]: AES-256-GCM with a random IV per call, used for
//!   blob content (`CheckSum.iv` persists the nonce).
//! - [`FilenameCipher`]: AES-256-SIV, deterministic (same plaintext always
//!   yields the same ciphertext), used for `Name`/path values that the
//!   metadata store looks up by ciphertext equality.
//!
//! [`Verifier`] implements the client authentication handshake: a
//! simplified challenge/response built from PBKDF2 + HMAC, *not* full
//! SRP-6a. A real SRP exchange is a multi-round zero-knowledge protocol
//! over the wire; this crate only proves "the caller knows the password
//! that produced this salt/verifier pair" to whatever already-authenticated
//! channel calls it, which is the whole of what the original system's
//! "secure remote password" login gate buys it.

#![deny(unsafe_code)]

use aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_siv::Aes256SivAead;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Default PBKDF2 round count (2023-era OWASP minimum for PBKDF2-HMAC-SHA256).
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 210_000;

/// Length in bytes of the stored KDF salt.
pub const SALT_LEN: usize = 16;

/// Length in bytes of a derived master key.
pub const MASTER_KEY_LEN: usize = 32;

/// Length in bytes of an AES-256-SIV key (two concatenated 256-bit keys).
pub const FILENAME_KEY_LEN: usize = 64;

/// Length in bytes of an AES-256-GCM content key.
pub const CONTENT_KEY_LEN: usize = 32;

/// Errors raised by the crypto envelope.
#[derive(Debug, Error)]
pub enum Error {
    /// Ciphertext failed to authenticate (wrong key, or tampered bytes).
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,
    /// A key or IV byte slice was the wrong length for its algorithm.
    #[error("invalid key material length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },
    /// The supplied password did not match the stored verifier.
    #[error("authentication failed: wrong password")]
    WrongPassword,
}

/// Derive a 256-bit master key from a password and stored salt.
///
/// This key is never persisted; it unwraps the dataset's `KeySet` on every
/// login and is discarded afterward.
#[must_use]
pub fn derive_master_key(password: &[u8], salt: &[u8; SALT_LEN], iterations: u32) -> [u8; MASTER_KEY_LEN] {
    let mut key = [0u8; MASTER_KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    key
}

/// Generate a fresh random KDF salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// The pair of long-lived symmetric keys a dataset uses for content and
/// filename encryption. Generated once per dataset and then wrapped under
/// the password-derived master key for storage (see [`wrap`]/[`unwrap`]).
#[derive(Clone)]
pub struct KeySet {
    /// AES-256-GCM key used for blob content.
    pub content_key: [u8; CONTENT_KEY_LEN],
    /// AES-256-SIV key used for filenames and paths.
    pub filename_key: [u8; FILENAME_KEY_LEN],
}

impl KeySet {
    /// Generate a fresh random key set for a new encrypted dataset.
    #[must_use]
    pub fn generate() -> Self {
        let mut content_key = [0u8; CONTENT_KEY_LEN];
        let mut filename_key = [0u8; FILENAME_KEY_LEN];
        OsRng.fill_bytes(&mut content_key);
        OsRng.fill_bytes(&mut filename_key);
        Self { content_key, filename_key }
    }

    /// Serialize as `content_key || filename_key`, the layout wrapped by
    /// [`wrap`] for storage in the `Keys` table or an exported key file.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONTENT_KEY_LEN + FILENAME_KEY_LEN);
        out.extend_from_slice(&self.content_key);
        out.extend_from_slice(&self.filename_key);
        out
    }

    /// Parse the layout produced by [`KeySet::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let want = CONTENT_KEY_LEN + FILENAME_KEY_LEN;
        if bytes.len() != want {
            return Err(Error::InvalidLength { expected: want, actual: bytes.len() });
        }
        let mut content_key = [0u8; CONTENT_KEY_LEN];
        let mut filename_key = [0u8; FILENAME_KEY_LEN];
        content_key.copy_from_slice(&bytes[..CONTENT_KEY_LEN]);
        filename_key.copy_from_slice(&bytes[CONTENT_KEY_LEN..]);
        Ok(Self { content_key, filename_key })
    }
}

/// Wrap a `KeySet` under a master key for storage (`Keys.filenameKey`/
/// `Keys.contentKey` hold the output of this, salt-free since the nonce is
/// prepended to the ciphertext).
pub fn wrap(master_key: &[u8; MASTER_KEY_LEN], keys: &KeySet) -> Result<Vec<u8>, Error> {
    let cipher = Aes256Gcm::new_from_slice(master_key).map_err(|_| Error::InvalidLength {
        expected: MASTER_KEY_LEN,
        actual: master_key.len(),
    })?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, keys.to_bytes().as_slice())
        .map_err(|_| Error::AuthenticationFailed)?;
    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`wrap`]: recover a `KeySet` from its wrapped bytes and the
/// master key derived from the login password.
pub fn unwrap(master_key: &[u8; MASTER_KEY_LEN], wrapped: &[u8]) -> Result<KeySet, Error> {
    let cipher = Aes256Gcm::new_from_slice(master_key).map_err(|_| Error::InvalidLength {
        expected: MASTER_KEY_LEN,
        actual: master_key.len(),
    })?;
    if wrapped.len() < 12 {
        return Err(Error::InvalidLength { expected: 12, actual: wrapped.len() });
    }
    let (nonce, ciphertext) = wrapped.split_at(12);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthenticationFailed)?;
    KeySet::from_bytes(&plaintext)
}

/// AES-256-GCM encryption of blob content: a fresh random 96-bit IV per
/// call, persisted alongside the ciphertext (`CheckSum.iv`).
pub struct ContentCipher {
    cipher: Aes256Gcm,
}

impl ContentCipher {
    /// Build a cipher bound to `key`.
    pub fn new(key: &[u8; CONTENT_KEY_LEN]) -> Self {
        Self { cipher: Aes256Gcm::new_from_slice(key).expect("key is exactly 32 bytes") }
    }

    /// Encrypt `plaintext`, returning `(iv, ciphertext)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext =
            self.cipher.encrypt(&nonce, plaintext).map_err(|_| Error::AuthenticationFailed)?;
        Ok((nonce.to_vec(), ciphertext))
    }

    /// Decrypt `ciphertext` using the recorded `iv`.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if iv.len() != 12 {
            return Err(Error::InvalidLength { expected: 12, actual: iv.len() });
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| Error::AuthenticationFailed)
    }
}

/// AES-256-SIV encryption of filenames/paths: deterministic ciphertext, so
/// the metadata store can look up a `Name` row by encrypting the query
/// string and comparing ciphertexts rather than decrypting every row.
pub struct FilenameCipher {
    cipher: Aes256SivAead,
}

impl FilenameCipher {
    /// Build a cipher bound to `key` (64 bytes: two concatenated AES-256
    /// keys, per RFC 5297 SIV).
    pub fn new(key: &[u8; FILENAME_KEY_LEN]) -> Self {
        Self { cipher: Aes256SivAead::new_from_slice(key).expect("key is exactly 64 bytes") }
    }

    /// Deterministically encrypt `plaintext` (e.g. a UTF-8 filename).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        // SIV takes a zero-length nonce; determinism is the point.
        let nonce = aead::Nonce::<Aes256SivAead>::default();
        self.cipher.encrypt(&nonce, plaintext).map_err(|_| Error::AuthenticationFailed)
    }

    /// Decrypt a value produced by [`FilenameCipher::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = aead::Nonce::<Aes256SivAead>::default();
        self.cipher.decrypt(&nonce, ciphertext).map_err(|_| Error::AuthenticationFailed)
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Server-side record of a client's authentication state: the KDF salt and
/// a verifier derived from it, stored in the `Keys` table. Never stores
/// the password or master key itself.
pub struct Verifier {
    salt: [u8; SALT_LEN],
    iterations: u32,
    verifier: [u8; MASTER_KEY_LEN],
}

impl Verifier {
    /// Enroll a new password: generates a salt and computes its verifier.
    /// Called once, when a dataset is created or a password is changed.
    #[must_use]
    pub fn enroll(password: &[u8], iterations: u32) -> Self {
        let salt = generate_salt();
        let verifier = Self::compute_verifier(password, &salt, iterations);
        Self { salt, iterations, verifier }
    }

    /// Reconstruct a `Verifier` from its stored fields (`Keys.salt`,
    /// `Keys.verifier`).
    #[must_use]
    pub fn from_parts(salt: [u8; SALT_LEN], iterations: u32, verifier: [u8; MASTER_KEY_LEN]) -> Self {
        Self { salt, iterations, verifier }
    }

    /// The stored salt, to send to a client attempting to log in.
    #[must_use]
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// The stored verifier bytes, for persistence.
    #[must_use]
    pub fn verifier_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.verifier
    }

    fn compute_verifier(password: &[u8], salt: &[u8; SALT_LEN], iterations: u32) -> [u8; MASTER_KEY_LEN] {
        let master = derive_master_key(password, salt, iterations);
        let mut mac = HmacSha256::new_from_slice(&master).expect("hmac accepts any key length");
        mac.update(b"tardis-verifier-v1");
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; MASTER_KEY_LEN];
        out.copy_from_slice(&tag);
        out
    }

    /// Server side: issue a fresh random challenge for the client to sign.
    #[must_use]
    pub fn challenge() -> [u8; 32] {
        let mut c = [0u8; 32];
        OsRng.fill_bytes(&mut c);
        c
    }

    /// Client side: given the password and the server-supplied
    /// `salt`/`iterations`/`challenge`, compute the response to send back.
    #[must_use]
    pub fn respond(password: &[u8], salt: &[u8; SALT_LEN], iterations: u32, challenge: &[u8]) -> [u8; 32] {
        let verifier = Self::compute_verifier(password, salt, iterations);
        let mut mac = HmacSha256::new_from_slice(&verifier).expect("hmac accepts any key length");
        mac.update(challenge);
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&tag);
        out
    }

    /// Server side: verify a client's response to a previously issued
    /// challenge. Constant-time comparison against timing side channels.
    pub fn verify(&self, challenge: &[u8], response: &[u8]) -> Result<(), Error> {
        let mut mac =
            HmacSha256::new_from_slice(&self.verifier).expect("hmac accepts any key length");
        mac.update(challenge);
        let expected = mac.finalize().into_bytes();
        if expected.as_slice().ct_eq(response).into() {
            Ok(())
        } else {
            Err(Error::WrongPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_cipher_round_trips() {
        let key = [7u8; CONTENT_KEY_LEN];
        let cipher = ContentCipher::new(&key);
        let (iv, ct) = cipher.encrypt(b"hello world").unwrap();
        let pt = cipher.decrypt(&iv, &ct).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn content_cipher_ivs_differ() {
        let key = [9u8; CONTENT_KEY_LEN];
        let cipher = ContentCipher::new(&key);
        let (iv1, ct1) = cipher.encrypt(b"same plaintext").unwrap();
        let (iv2, ct2) = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(iv1, iv2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn filename_cipher_is_deterministic() {
        let key = [3u8; FILENAME_KEY_LEN];
        let cipher = FilenameCipher::new(&key);
        let a = cipher.encrypt(b"/home/user/file.txt").unwrap();
        let b = cipher.encrypt(b"/home/user/file.txt").unwrap();
        assert_eq!(a, b, "same plaintext must yield same ciphertext for lookup-by-equality");
        let decrypted = cipher.decrypt(&a).unwrap();
        assert_eq!(decrypted, b"/home/user/file.txt");
    }

    #[test]
    fn filename_cipher_differs_for_different_plaintext() {
        let key = [3u8; FILENAME_KEY_LEN];
        let cipher = FilenameCipher::new(&key);
        let a = cipher.encrypt(b"/home/user/a.txt").unwrap();
        let b = cipher.encrypt(b"/home/user/b.txt").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrap_unwrap_round_trips_keyset() {
        let master = derive_master_key(b"hunter2", &generate_salt(), 1_000);
        let keys = KeySet::generate();
        let wrapped = wrap(&master, &keys).unwrap();
        let recovered = unwrap(&master, &wrapped).unwrap();
        assert_eq!(recovered.content_key, keys.content_key);
        assert_eq!(recovered.filename_key, keys.filename_key);
    }

    #[test]
    fn unwrap_fails_with_wrong_master_key() {
        let salt = generate_salt();
        let master = derive_master_key(b"hunter2", &salt, 1_000);
        let wrong = derive_master_key(b"not-hunter2", &salt, 1_000);
        let keys = KeySet::generate();
        let wrapped = wrap(&master, &keys).unwrap();
        assert!(matches!(unwrap(&wrong, &wrapped), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn verifier_accepts_correct_password() {
        let v = Verifier::enroll(b"correct horse battery staple", 1_000);
        let challenge = Verifier::challenge();
        let response =
            Verifier::respond(b"correct horse battery staple", v.salt(), 1_000, &challenge);
        assert!(v.verify(&challenge, &response).is_ok());
    }

    #[test]
    fn verifier_rejects_wrong_password() {
        let v = Verifier::enroll(b"correct horse battery staple", 1_000);
        let challenge = Verifier::challenge();
        let response = Verifier::respond(b"wrong password", v.salt(), 1_000, &challenge);
        assert!(matches!(v.verify(&challenge, &response), Err(Error::WrongPassword)));
    }

    #[test]
    fn verifier_rejects_replayed_response_for_new_challenge() {
        let v = Verifier::enroll(b"password", 1_000);
        let challenge1 = Verifier::challenge();
        let response1 = Verifier::respond(b"password", v.salt(), 1_000, &challenge1);
        let challenge2 = Verifier::challenge();
        assert!(v.verify(&challenge2, &response1).is_err());
    }
}
