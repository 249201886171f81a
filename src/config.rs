//! Engine Configuration
//!
//! Loaded from a JSON file; every field has a default so an empty object is
//! a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const MIN_RSA_BITS: usize = 2048;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub keys: KeyPolicy,
    #[serde(default)]
    pub signing: SigningPolicy,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPolicy {
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,
    /// Refuse to generate keypairs without a passphrase.
    #[serde(default)]
    pub require_passphrase: bool,
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
}

fn default_rsa_bits() -> usize { MIN_RSA_BITS }
fn default_pbkdf2_iterations() -> u32 { 100_000 }

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            rsa_bits: default_rsa_bits(),
            require_passphrase: false,
            pbkdf2_iterations: default_pbkdf2_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPolicy {
    /// Signers must sign in ascending order index.
    #[serde(default)]
    pub strict_ordering: bool,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_issuer")]
    pub certificate_issuer: String,
    #[serde(default = "default_validity_days")]
    pub certificate_validity_days: i64,
}

fn default_max_image_bytes() -> usize { 2 * 1024 * 1024 }
fn default_issuer() -> String { "CertForge Signing Authority".to_string() }
fn default_validity_days() -> i64 { 365 }

impl Default for SigningPolicy {
    fn default() -> Self {
        Self {
            strict_ordering: false,
            max_image_bytes: default_max_image_bytes(),
            certificate_issuer: default_issuer(),
            certificate_validity_days: default_validity_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String { "http://localhost:8080".to_string() }

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { base_url: default_base_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfig {
    #[serde(default = "default_number_column")]
    pub number_column: String,
    #[serde(default = "default_recipient_column")]
    pub recipient_column: String,
}

fn default_number_column() -> String { "certificate_number".to_string() }
fn default_recipient_column() -> String { "recipient_email".to_string() }

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            number_column: default_number_column(),
            recipient_column: default_recipient_column(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keys.rsa_bits < MIN_RSA_BITS {
            return Err(Error::validation(format!(
                "rsaBits must be at least {}",
                MIN_RSA_BITS
            )));
        }
        if self.keys.pbkdf2_iterations == 0 {
            return Err(Error::validation("pbkdf2Iterations must be positive"));
        }
        if self.signing.certificate_validity_days <= 0 {
            return Err(Error::validation("certificateValidityDays must be positive"));
        }
        if self.verification.base_url.trim().is_empty() {
            return Err(Error::validation("verification baseUrl is empty"));
        }
        if self.bulk.number_column == self.bulk.recipient_column {
            return Err(Error::validation(
                "bulk number and recipient columns must differ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.keys.rsa_bits, 2048);
        assert!(!config.signing.strict_ordering);
        assert_eq!(config.bulk.number_column, "certificate_number");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_small_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"keys": {{"rsaBits": 1024}}}}"#).unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("rsaBits"));
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = r#"{
            "signing": {"strictOrdering": true},
            "verification": {"baseUrl": "https://verify.example.org"}
        }"#;
        write!(file, "{}", json).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert!(config.signing.strict_ordering);
        assert_eq!(config.verification.base_url, "https://verify.example.org");
        assert_eq!(config.signing.certificate_validity_days, 365);
    }
}
