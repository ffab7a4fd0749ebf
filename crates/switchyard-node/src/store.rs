//! Durable state-object store.
//!
//! Maps a (kind, identifier) pair to a file under the node's base directory
//! and persists opaque byte blobs there. Writes are atomic: data goes to a
//! `.tmp` sibling which is then renamed into place. Secret objects are created
//! owner-only from the first byte written.
//!
//! Layout:
//! - `identity.public`, `identity.secret`
//! - `locator`, `truststore`
//! - `peers.d/<10 hex address>.peer`
//! - `networks.d/<16 hex network id>.conf`
//! - `certs.d/<base32 serial>`
//!
//! This type has no internal locking; callers serialize access per object.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use switchyard_core::SerialNo;
use switchyard_core::base32;
use switchyard_core::certificate::SERIAL_NO_SIZE;

const PEERS_DIR: &str = "peers.d";
const NETWORKS_DIR: &str = "networks.d";
const CERTS_DIR: &str = "certs.d";

/// Number of 64-bit words identifying a certificate.
pub const CERTIFICATE_ID_WORDS: usize = SERIAL_NO_SIZE / 8;

/// Errors from state-object persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind:?} needs {needed} identifier word(s), got {got}")]
    MissingIdentifier {
        kind: StateObjectKind,
        needed: usize,
        got: usize,
    },
}

/// Kinds of object the engine asks the node to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateObjectKind {
    IdentityPublic,
    IdentitySecret,
    Locator,
    /// Keyed by the peer's 40-bit address.
    Peer,
    /// Keyed by the 64-bit network id.
    NetworkConfig,
    TrustStore,
    /// Keyed by the serial number as six little-endian words.
    Certificate,
}

impl StateObjectKind {
    /// Number of identifier words the kind requires.
    pub fn id_words(self) -> usize {
        match self {
            StateObjectKind::Peer | StateObjectKind::NetworkConfig => 1,
            StateObjectKind::Certificate => CERTIFICATE_ID_WORDS,
            _ => 0,
        }
    }

    /// Whether objects of this kind must be written owner-only.
    pub fn is_secret(self) -> bool {
        matches!(self, StateObjectKind::IdentitySecret | StateObjectKind::Peer)
    }
}

/// Split a certificate serial number into the identifier words used as its key.
pub fn certificate_id(serial: &SerialNo) -> [u64; CERTIFICATE_ID_WORDS] {
    let mut words = [0u64; CERTIFICATE_ID_WORDS];
    for (word, chunk) in words.iter_mut().zip(serial.0.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *word = u64::from_le_bytes(bytes);
    }
    words
}

/// File-backed state object store rooted at a node's base directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
}

impl StateStore {
    /// Open the store, creating the base and per-kind directories if missing.
    ///
    /// # Note
    /// This performs blocking I/O. Call at node construction.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        create_private_dir(&base.join(PEERS_DIR))?;
        fs::create_dir_all(base.join(NETWORKS_DIR))?;
        fs::create_dir_all(base.join(CERTS_DIR))?;
        Ok(Self { base })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Resolve an object to its file path and whether it is secret.
    pub fn path_for(
        &self,
        kind: StateObjectKind,
        id: &[u64],
    ) -> Result<(PathBuf, bool), StorageError> {
        let needed = kind.id_words();
        if id.len() < needed {
            return Err(StorageError::MissingIdentifier {
                kind,
                needed,
                got: id.len(),
            });
        }
        let path = match kind {
            StateObjectKind::IdentityPublic => self.base.join("identity.public"),
            StateObjectKind::IdentitySecret => self.base.join("identity.secret"),
            StateObjectKind::Locator => self.base.join("locator"),
            StateObjectKind::TrustStore => self.base.join("truststore"),
            StateObjectKind::Peer => self
                .base
                .join(PEERS_DIR)
                .join(format!("{:010x}.peer", id[0] & 0xff_ffff_ffff)),
            StateObjectKind::NetworkConfig => self
                .base
                .join(NETWORKS_DIR)
                .join(format!("{:016x}.conf", id[0])),
            StateObjectKind::Certificate => {
                let mut serial = [0u8; SERIAL_NO_SIZE];
                for (chunk, word) in serial.chunks_exact_mut(8).zip(id) {
                    chunk.copy_from_slice(&word.to_le_bytes());
                }
                self.base.join(CERTS_DIR).join(base32::encode(&serial))
            }
        };
        Ok((path, kind.is_secret()))
    }

    /// Read an object. Any failure, including a missing file, reads as absent.
    pub fn get(&self, kind: StateObjectKind, id: &[u64]) -> Option<Vec<u8>> {
        let (path, _) = self.path_for(kind, id).ok()?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "unable to read state object: {e}");
                None
            }
        }
    }

    /// Write an object atomically.
    pub fn put(&self, kind: StateObjectKind, id: &[u64], data: &[u8]) -> Result<(), StorageError> {
        let (path, secret) = self.path_for(kind, id)?;
        atomic_write(&path, data, secret)?;
        tracing::trace!(?kind, path = %path.display(), len = data.len(), "stored state object");
        Ok(())
    }

    /// Remove an object. Removing an absent object succeeds.
    pub fn delete(&self, kind: StateObjectKind, id: &[u64]) -> Result<(), StorageError> {
        let (path, _) = self.path_for(kind, id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write data atomically: write to a `.tmp` sibling then rename.
pub(crate) fn atomic_write(path: &Path, data: &[u8], secret: bool) -> std::io::Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(if secret { 0o600 } else { 0o644 });
    }

    let result = (|| {
        let mut file = options.open(&tmp)?;
        // An existing tmp file keeps its old mode, so set it explicitly.
        #[cfg(unix)]
        if secret {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
