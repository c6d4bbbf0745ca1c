//! Credential storage.
//!
//! Two mutually exclusive stores live in the vault directory:
//! - **Encrypted** (`credentials.vault`): `salt(16) ‖ nonce(12) ‖ AES-256-GCM(JSON)`,
//!   keyed by PBKDF2-HMAC-SHA256 (100 000 iterations) over the passphrase
//! - **Plaintext** (`credentials.json`): the credentials as readable JSON,
//!   only written when the operator explicitly asks for it
//!
//! Saving in one mode deletes the file of the other.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::model::Credentials;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

pub const VAULT_FILE_NAME: &str = "credentials.vault";
pub const PLAINTEXT_FILE_NAME: &str = "credentials.json";

/// Which store currently holds the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Encrypted,
    Plaintext,
}

/// Derive the AES-256 key for `passphrase` and `salt`.
fn derive_key(passphrase: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

/// Encrypt `credentials` under `passphrase` into the vault byte format.
pub fn seal(credentials: &Credentials, passphrase: &str) -> Result<Vec<u8>, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| VaultError::Serialization(e.to_string()))?;

    let plaintext = Zeroizing::new(
        serde_json::to_vec(credentials).map_err(|e| VaultError::Serialization(e.to_string()))?,
    );
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| VaultError::Serialization("encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a vault blob.
///
/// Truncation, tampering and a wrong passphrase all yield `DecryptFailed`.
pub fn open(blob: &[u8], passphrase: &str) -> Result<Credentials, VaultError> {
    if blob.len() < SALT_LEN + NONCE_LEN {
        return Err(VaultError::DecryptFailed);
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| VaultError::DecryptFailed)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::DecryptFailed)?,
    );
    serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptFailed)
}

/// The pair of credential files in one directory.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    dir: PathBuf,
}

impl CredentialVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CredentialVault { dir: dir.into() }
    }

    pub fn vault_path(&self) -> PathBuf {
        self.dir.join(VAULT_FILE_NAME)
    }

    pub fn plaintext_path(&self) -> PathBuf {
        self.dir.join(PLAINTEXT_FILE_NAME)
    }

    /// The mode of the stored credentials, if any. Encrypted wins if both
    /// files somehow exist.
    pub fn stored_mode(&self) -> Option<StorageMode> {
        if self.vault_path().is_file() {
            Some(StorageMode::Encrypted)
        } else if self.plaintext_path().is_file() {
            Some(StorageMode::Plaintext)
        } else {
            None
        }
    }

    pub fn save_encrypted(&self, credentials: &Credentials, passphrase: &str) -> Result<(), VaultError> {
        let blob = seal(credentials, passphrase)?;
        let path = self.vault_path();
        write_private(&path, &blob)?;
        remove_if_present(&self.plaintext_path())?;
        info!(path = %path.display(), "saved encrypted credentials");
        Ok(())
    }

    pub fn load_encrypted(&self, passphrase: &str) -> Result<Credentials, VaultError> {
        let path = self.vault_path();
        let blob = read_existing(&path)?;
        open(&blob, passphrase)
    }

    pub fn save_plaintext(&self, credentials: &Credentials) -> Result<(), VaultError> {
        let json = Zeroizing::new(
            serde_json::to_vec_pretty(credentials).map_err(|e| VaultError::Serialization(e.to_string()))?,
        );
        let path = self.plaintext_path();
        write_private(&path, &json)?;
        remove_if_present(&self.vault_path())?;
        info!(path = %path.display(), "saved plaintext credentials");
        Ok(())
    }

    pub fn load_plaintext(&self) -> Result<Credentials, VaultError> {
        let path = self.plaintext_path();
        let json = Zeroizing::new(read_existing(&path)?);
        serde_json::from_slice(&json).map_err(|e| VaultError::Serialization(e.to_string()))
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>, VaultError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VaultError::NotFound { path: path.to_path_buf() },
        _ => VaultError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

fn write_private(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let io_err = |e: io::Error| VaultError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(path, data).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), VaultError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed credential file of the other storage mode");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
