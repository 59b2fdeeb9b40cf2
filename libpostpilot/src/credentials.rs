//! Credential resolution for publish attempts
//!
//! Access tokens are stored per platform connection, encrypted with an age
//! passphrase and base64-encoded so they fit a TEXT column. At dispatch time
//! [`CredentialResolver`] picks the active connection for (user, platform)
//! and hands the adapter a decrypted [`Credential`].
//!
//! # Example
//!
//! ```no_run
//! use libpostpilot::credentials::{AgeCipher, TokenCipher};
//!
//! # fn example() -> libpostpilot::error::Result<()> {
//! let cipher = AgeCipher::new("correct horse battery".to_string())?;
//! let stored = cipher.seal("EAAGm0PX4ZCpsBA...")?;
//! let token = cipher.open(&stored)?;
//! # Ok(())
//! # }
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};
use std::sync::Arc;

use crate::db::PostStore;
use crate::error::{CredentialError, PlatformError, PostpilotError, Result};
use crate::types::Platform;

/// Message recorded on a post whose owner has no usable connection
pub const NO_ACTIVE_CONNECTION: &str = "No active connection";

/// Seals and opens stored access tokens
pub trait TokenCipher: Send + Sync {
    /// Encrypt a token into its stored (text) form
    fn seal(&self, token: &str) -> Result<String>;

    /// Decrypt a stored token
    fn open(&self, stored: &str) -> Result<SecretString>;
}

/// age passphrase encryption, base64 on the outside
pub struct AgeCipher {
    passphrase: SecretString,
}

impl AgeCipher {
    /// # Errors
    ///
    /// Returns `CredentialError::WeakPassword` if the passphrase is less than 8 characters.
    pub fn new(passphrase: String) -> Result<Self> {
        if passphrase.len() < 8 {
            return Err(CredentialError::WeakPassword.into());
        }

        Ok(Self {
            passphrase: SecretString::from(passphrase),
        })
    }

    /// Build from the configured master password
    pub fn from_config(config: &crate::config::CredentialConfig) -> Result<Self> {
        let password = config
            .master_password
            .clone()
            .ok_or(CredentialError::MasterPasswordNotSet)?;
        Self::new(password)
    }

    fn age_passphrase(&self) -> age::secrecy::Secret<String> {
        age::secrecy::Secret::new(self.passphrase.expose_secret().to_string())
    }

    fn encrypt(&self, data: &str) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.age_passphrase());

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .write_all(data.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(encrypted)
    }

    fn decrypt(&self, data: &[u8]) -> Result<String> {
        let decryptor = match age::Decryptor::new(data) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => {
                return Err(CredentialError::Encryption(
                    "Invalid encryption format (expected passphrase)".to_string(),
                )
                .into())
            }
            Err(e) => return Err(CredentialError::Encryption(e.to_string()).into()),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(&self.age_passphrase(), None)
            .map_err(|e| match e {
                age::DecryptError::DecryptionFailed | age::DecryptError::NoMatchingKeys => {
                    CredentialError::DecryptionFailed
                }
                other => CredentialError::Encryption(other.to_string()),
            })?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(String::from_utf8(decrypted)
            .map_err(|e| CredentialError::Encryption(format!("Invalid UTF-8: {}", e)))?)
    }
}

impl TokenCipher for AgeCipher {
    fn seal(&self, token: &str) -> Result<String> {
        Ok(STANDARD.encode(self.encrypt(token)?))
    }

    fn open(&self, stored: &str) -> Result<SecretString> {
        let bytes = STANDARD
            .decode(stored.trim())
            .map_err(|e| CredentialError::Encryption(format!("Invalid base64: {}", e)))?;
        Ok(SecretString::from(self.decrypt(&bytes)?))
    }
}

/// A decrypted access token plus the account it acts for
#[derive(Debug)]
pub struct Credential {
    pub platform: Platform,
    pub access_token: SecretString,
    /// Page id, Instagram business account id, or channel id
    pub account_id: Option<String>,
}

impl Credential {
    pub fn new(platform: Platform, access_token: &str, account_id: Option<&str>) -> Self {
        Self {
            platform,
            access_token: SecretString::from(access_token.to_string()),
            account_id: account_id.map(str::to_string),
        }
    }

    /// The account id, or a configuration error naming what is missing
    pub fn require_account(&self, what: &str) -> std::result::Result<&str, PlatformError> {
        self.account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PlatformError::Configuration(format!(
                    "{} connection has no {} configured",
                    self.platform, what
                ))
            })
    }
}

/// Looks up and decrypts the active connection for a post's owner
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn PostStore>,
    cipher: Arc<dyn TokenCipher>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn PostStore>, cipher: Arc<dyn TokenCipher>) -> Self {
        Self { store, cipher }
    }

    /// Resolve the credential for (user, platform).
    ///
    /// # Errors
    ///
    /// `PlatformError::Configuration` when no active connection exists or its
    /// token cannot be decrypted; database errors pass through.
    pub async fn resolve(&self, user_id: &str, platform: Platform) -> Result<Credential> {
        let connection = self
            .store
            .get_active_connection(user_id, platform)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| PlatformError::Configuration(NO_ACTIVE_CONNECTION.to_string()))?;

        let access_token = self.cipher.open(&connection.encrypted_token).map_err(|e| {
            tracing::warn!(
                user_id = %user_id,
                platform = %platform,
                error = %e,
                "Stored access token could not be decrypted"
            );
            match e {
                PostpilotError::Credential(inner) => {
                    PlatformError::Configuration(format!("Access token unusable: {}", inner))
                }
                other => PlatformError::Configuration(other.to_string()),
            }
        })?;

        Ok(Credential {
            platform,
            access_token,
            account_id: connection.account_id,
        })
    }
}
