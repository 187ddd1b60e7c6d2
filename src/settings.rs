use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;

/// Credentials as written to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub server: String,
    pub username: String,
    #[serde(default)]
    pub password_encrypted: String,
}

/// Credentials ready to hand to `connect`
#[derive(Clone, PartialEq, Eq)]
pub struct SipCredentials {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SipCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipCredentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

const KEY: &[u8] = b"sip-session/credentials";

/// XOR each byte with `KEY`, hex-encode the result.
/// Hides the password from casual reading of the file; not encryption.
fn obfuscate_password(password: &str) -> String {
    password
        .bytes()
        .enumerate()
        .map(|(i, b)| format!("{:02x}", b ^ KEY[i % KEY.len()]))
        .collect()
}

fn deobfuscate_password(encrypted: &str) -> Result<String, SettingsError> {
    if encrypted.len() % 2 != 0 || !encrypted.is_ascii() {
        return Err(SettingsError::Decode("odd-length or non-hex input".to_string()));
    }

    let bytes = (0..encrypted.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&encrypted[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| SettingsError::Decode(e.to_string()))?;

    let decrypted: Vec<u8> = bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ KEY[i % KEY.len()])
        .collect();

    String::from_utf8(decrypted).map_err(|e| SettingsError::Decode(format!("invalid UTF-8: {}", e)))
}

/// Remembered account, one JSON file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save SIP credentials to disk
    pub fn save(&self, domain: &str, username: &str, password: &str) -> Result<(), SettingsError> {
        let credentials = StoredCredentials {
            server: domain.to_string(),
            username: username.to_string(),
            password_encrypted: obfuscate_password(password),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&credentials)?;
        fs::write(&self.path, json)?;

        tracing::info!("[Settings] Saved credentials to: {}", self.path.display());
        Ok(())
    }

    /// Load SIP credentials from disk, `None` when nothing was saved
    pub fn load(&self) -> Result<Option<SipCredentials>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let stored: StoredCredentials = serde_json::from_str(&json)?;

        let password = if stored.password_encrypted.is_empty() {
            String::new()
        } else {
            deobfuscate_password(&stored.password_encrypted)?
        };

        tracing::info!("[Settings] Loaded credentials from: {}", self.path.display());
        Ok(Some(SipCredentials {
            domain: stored.server,
            username: stored.username,
            password,
        }))
    }

    /// Clear saved credentials
    pub fn clear(&self) -> Result<(), SettingsError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            tracing::info!("[Settings] Cleared credentials");
        }
        Ok(())
    }
}
