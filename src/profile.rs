use std::fmt;

use thiserror::Error;

/// Reasons a profile cannot be built
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("username is empty")]
    EmptyUsername,

    #[error("domain is empty")]
    EmptyDomain,

    #[error("username '{0}' contains characters not allowed in a SIP URI user part")]
    InvalidUsername(String),
}

/// Immutable SIP identity (local account or remote peer)
#[derive(Clone, PartialEq, Eq)]
pub struct SipProfile {
    username: String,
    domain: String,
    password: Option<String>,
    auto_register: bool,
}

impl SipProfile {
    pub fn builder(username: impl Into<String>, domain: impl Into<String>) -> SipProfileBuilder {
        SipProfileBuilder {
            username: username.into(),
            domain: domain.into(),
            password: None,
            auto_register: false,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Whether the transport should keep the registration alive on its own
    pub fn auto_register(&self) -> bool {
        self.auto_register
    }

    /// `sip:user@domain`, the key the transport uses for this profile
    pub fn uri_string(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }
}

// Password stays out of logs
impl fmt::Debug for SipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipProfile")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("auto_register", &self.auto_register)
            .finish()
    }
}

impl fmt::Display for SipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.domain)
    }
}

pub struct SipProfileBuilder {
    username: String,
    domain: String,
    password: Option<String>,
    auto_register: bool,
}

impl SipProfileBuilder {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn auto_registration(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }

    pub fn build(self) -> Result<SipProfile, ProfileError> {
        let username = self.username.trim().to_string();
        let domain = self.domain.trim().to_string();

        if username.is_empty() {
            return Err(ProfileError::EmptyUsername);
        }
        if domain.is_empty() {
            return Err(ProfileError::EmptyDomain);
        }
        if username.contains('@') || username.contains(char::is_whitespace) {
            return Err(ProfileError::InvalidUsername(username));
        }

        Ok(SipProfile {
            username,
            domain,
            password: self.password,
            auto_register: self.auto_register,
        })
    }
}
