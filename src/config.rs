use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::settings::CredentialStore;

/// Logging section of [`SessionConfig`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
    /// Write a daily rolling log file here in addition to stderr
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
            file_prefix: "sip-session.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Expiry requested on REGISTER
    pub registration_expiry_secs: u64,
    /// Dial and answer timeout handed to the transport
    pub call_timeout_secs: u64,
    /// Let the transport keep the registration alive across network changes
    pub auto_register: bool,
    /// Buffered notifications per subscriber
    pub event_capacity: usize,
    /// Drop the current/pending call slot when the transport reports the call ended.
    /// Off by default: the slot is kept until `end_call`/`reject_call`.
    pub clear_call_on_remote_end: bool,
    /// Move back to `RegistrationFailed` when a refresh fails after registration.
    /// Off by default: the session stays `Registered` and waits for recovery.
    pub revert_on_registration_loss: bool,
    pub logging: LogConfig,
    /// Where remembered credentials live, if anywhere
    pub credentials_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            registration_expiry_secs: 30,
            call_timeout_secs: 30,
            auto_register: true,
            event_capacity: 32,
            clear_call_on_remote_end: false,
            revert_on_registration_loss: false,
            logging: LogConfig::default(),
            credentials_path: None,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&json)?;
        config.validate()?;

        tracing::info!("[Config] Loaded session config from: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.registration_expiry_secs == 0 {
            return Err(SettingsError::Config(
                "registration_expiry_secs must be greater than zero".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(SettingsError::Config(
                "call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Store for remembered credentials, when a path is configured
    pub fn credential_store(&self) -> Option<CredentialStore> {
        self.credentials_path.clone().map(CredentialStore::new)
    }

    pub fn registration_expiry(&self) -> Duration {
        Duration::from_secs(self.registration_expiry_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
