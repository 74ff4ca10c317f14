//! Persistent user store.
//!
//! The whole store serializes to one blob: a version byte, then
//! length-prefixed credential records. Writers snapshot the blob under
//! the guard and persist it outside via temp-file plus atomic rename, so
//! a crash mid-write leaves the previous store intact.
//!
//! Credentials are Argon2 hashes of the client-supplied SHA-256 digest,
//! salted per record and compared in constant time.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::task;
use tracing::debug;

use crate::crypto::{constant_time_eq, random_bytes};
use crate::error::{Error, Result};
use crate::protocol::payload::PasswordDigest;
use crate::protocol::{WireReader, WireWriter};

/// Version byte at offset zero of the persisted blob.
const STORE_VERSION: u8 = 0x01;

/// Salt length for credential hashing.
const SALT_SIZE: usize = 32;

/// Usernames are 1..=64 bytes of UTF-8.
pub const MAX_USERNAME_BYTES: usize = 64;

/// Reject usernames outside the 1..=64 byte bound.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_USERNAME_BYTES {
        return Err(Error::CredentialInvalid);
    }
    Ok(())
}

/// One persisted credential record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Unique username.
    pub username: String,
    pwd_hash: Vec<u8>,
    pwd_salt: [u8; SALT_SIZE],
}

fn hash_digest(digest: &PasswordDigest, salt: &[u8; SALT_SIZE]) -> Result<Vec<u8>> {
    argon2::hash_raw(digest, salt, &argon2::Config::default())
        .map_err(|e| Error::StoreIo(format!("credential hashing failed: {e}")))
}

impl UserRecord {
    fn new(username: String, digest: &PasswordDigest) -> Result<Self> {
        let pwd_salt: [u8; SALT_SIZE] = random_bytes();
        let pwd_hash = hash_digest(digest, &pwd_salt)?;
        Ok(Self {
            username,
            pwd_hash,
            pwd_salt,
        })
    }

    fn matches(&self, digest: &PasswordDigest) -> Result<bool> {
        let candidate = hash_digest(digest, &self.pwd_salt)?;
        Ok(constant_time_eq(&candidate, &self.pwd_hash))
    }
}

/// In-memory username → record map with blob persistence.
#[derive(Debug, Default)]
pub struct UserStore {
    users: HashMap<String, UserRecord>,
}

impl UserStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk. A missing file is an empty store; any deviation
    /// in an existing file is `StoreCorrupt`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no user store on disk, starting empty");
                return Ok(Self::new());
            }
            Err(err) => return Err(Error::StoreIo(err.to_string())),
        };
        Self::decode(&bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let corrupt = |_| Error::StoreCorrupt("invalid record layout".into());
        let mut r = WireReader::new(bytes);
        let version = r.get_u8().map_err(corrupt)?;
        if version != STORE_VERSION {
            return Err(Error::StoreCorrupt(format!(
                "unknown store version: {:#04x}",
                version
            )));
        }
        let count = r.get_u32().map_err(corrupt)? as usize;
        let mut users = HashMap::new();
        for _ in 0..count {
            let username = r.get_str().map_err(corrupt)?;
            let pwd_hash = r.get_bytes().map_err(corrupt)?;
            let pwd_salt = r.get_fixed::<SALT_SIZE>().map_err(corrupt)?;
            if validate_username(&username).is_err() {
                return Err(Error::StoreCorrupt("invalid username in record".into()));
            }
            if users
                .insert(
                    username.clone(),
                    UserRecord {
                        username,
                        pwd_hash,
                        pwd_salt,
                    },
                )
                .is_some()
            {
                return Err(Error::StoreCorrupt("duplicate username".into()));
            }
        }
        r.expect_end()
            .map_err(|_| Error::StoreCorrupt("trailing bytes".into()))?;
        Ok(Self { users })
    }

    /// Serialize the whole store. Records are emitted in sorted order so
    /// equal stores serialize bit-identically.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut names: Vec<&String> = self.users.keys().collect();
        names.sort();

        let mut w = WireWriter::new();
        w.put_u8(STORE_VERSION);
        w.put_u32(names.len() as u32);
        for name in names {
            let record = &self.users[name];
            w.put_str(&record.username);
            w.put_bytes(&record.pwd_hash);
            w.put_fixed(&record.pwd_salt);
        }
        w.finish()
    }

    /// Whether a user is registered.
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Registered usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a record with a fresh random salt.
    pub fn register(&mut self, username: &str, digest: &PasswordDigest) -> Result<()> {
        validate_username(username)?;
        if self.users.contains_key(username) {
            return Err(Error::UserExists);
        }
        let record = UserRecord::new(username.to_string(), digest)?;
        self.users.insert(username.to_string(), record);
        Ok(())
    }

    /// Check a credential. Absent user and hash mismatch are
    /// indistinguishable to the caller.
    pub fn verify(&self, username: &str, digest: &PasswordDigest) -> Result<()> {
        let record = self.users.get(username).ok_or(Error::CredentialInvalid)?;
        if record.matches(digest)? {
            Ok(())
        } else {
            Err(Error::CredentialInvalid)
        }
    }

    /// Replace a credential after verifying the old one.
    pub fn change_password(
        &mut self,
        username: &str,
        old: &PasswordDigest,
        new: &PasswordDigest,
    ) -> Result<()> {
        self.verify(username, old)?;
        let record = UserRecord::new(username.to_string(), new)?;
        self.users.insert(username.to_string(), record);
        Ok(())
    }
}

/// Write a snapshot to disk atomically: temp file in the same directory,
/// then rename over the canonical path.
pub async fn persist(blob: Vec<u8>, path: PathBuf) -> Result<()> {
    task::spawn_blocking(move || {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &blob).map_err(|e| Error::StoreIo(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::StoreIo(e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::StoreIo(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn digest(password: &str) -> PasswordDigest {
        Sha256::digest(password.as_bytes()).into()
    }

    #[test]
    fn test_register_and_verify() {
        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");

        store.verify("alice", &digest("pw1")).expect("verify");
        assert!(matches!(
            store.verify("alice", &digest("wrong")),
            Err(Error::CredentialInvalid)
        ));
        assert!(matches!(
            store.verify("nobody", &digest("pw1")),
            Err(Error::CredentialInvalid)
        ));
    }

    #[test]
    fn test_duplicate_registration_refused() {
        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");
        assert!(matches!(
            store.register("alice", &digest("pw2")),
            Err(Error::UserExists)
        ));
    }

    #[test]
    fn test_username_bounds() {
        let mut store = UserStore::new();
        assert!(store.register("", &digest("pw")).is_err());
        let long = "x".repeat(MAX_USERNAME_BYTES + 1);
        assert!(store.register(&long, &digest("pw")).is_err());
        let max = "x".repeat(MAX_USERNAME_BYTES);
        store.register(&max, &digest("pw")).expect("register");
    }

    #[test]
    fn test_change_password() {
        let mut store = UserStore::new();
        store.register("alice", &digest("old")).expect("register");

        assert!(matches!(
            store.change_password("alice", &digest("bad"), &digest("new")),
            Err(Error::CredentialInvalid)
        ));
        store
            .change_password("alice", &digest("old"), &digest("new"))
            .expect("change");
        store.verify("alice", &digest("new")).expect("verify");
        assert!(store.verify("alice", &digest("old")).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");
        store.register("bob", &digest("pw2")).expect("register");

        let restored = UserStore::decode(&store.snapshot()).expect("decode");
        assert_eq!(restored.usernames(), vec!["alice", "bob"]);
        restored.verify("alice", &digest("pw1")).expect("verify");
        restored.verify("bob", &digest("pw2")).expect("verify");
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let mut store = UserStore::new();
        store.register("bob", &digest("pw2")).expect("register");
        store.register("alice", &digest("pw1")).expect("register");
        assert_eq!(store.snapshot(), store.snapshot());
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");
        let blob = store.snapshot();

        for cut in 1..blob.len() {
            assert!(
                matches!(
                    UserStore::decode(&blob[..cut]),
                    Err(Error::StoreCorrupt(_))
                ),
                "truncation at byte {cut} must be corrupt"
            );
        }
    }

    #[test]
    fn test_bad_version_is_corrupt() {
        let mut blob = UserStore::new().snapshot();
        blob[0] = 0x02;
        assert!(matches!(
            UserStore::decode(&blob),
            Err(Error::StoreCorrupt(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut blob = UserStore::new().snapshot();
        blob.push(0);
        assert!(matches!(
            UserStore::decode(&blob),
            Err(Error::StoreCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UserStore::load(&dir.path().join("users.bin")).expect("load");
        assert!(store.usernames().is_empty());
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.bin");

        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");
        persist(store.snapshot(), path.clone()).await.expect("persist");

        let restored = UserStore::load(&path).expect("load");
        restored.verify("alice", &digest("pw1")).expect("verify");
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_store_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.bin");

        let mut store = UserStore::new();
        store.register("alice", &digest("pw1")).expect("register");
        persist(store.snapshot(), path.clone()).await.expect("persist");

        store.register("bob", &digest("pw2")).expect("register");
        persist(store.snapshot(), path.clone()).await.expect("persist");

        let restored = UserStore::load(&path).expect("load");
        assert_eq!(restored.usernames(), vec!["alice", "bob"]);
        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.bin");
        std::fs::write(&path, b"garbage").expect("write");
        assert!(matches!(
            UserStore::load(&path),
            Err(Error::StoreCorrupt(_))
        ));
    }
}
