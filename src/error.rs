//! Error Taxonomy
//!
//! Every engine call returns `Result<T, Error>`. Variants carry internal
//! detail for the log sink; `public_message` is what callers may show users.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Ordering violation: {0}")]
    OrderingViolation(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Batch partially failed: {succeeded} succeeded, {failed} failed")]
    PartialBatchFailure { succeeded: usize, failed: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("plaintext of {len} bytes exceeds the {max} byte limit for this key")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Stable classification of an [`Error`], independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Key,
    Crypto,
    FileNotFound,
    OrderingViolation,
    DuplicateResource,
    PartialBatchFailure,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Key(_) => ErrorKind::Key,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::FileNotFound(_) => ErrorKind::FileNotFound,
            Error::OrderingViolation(_) => ErrorKind::OrderingViolation,
            Error::DuplicateResource(_) => ErrorKind::DuplicateResource,
            Error::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            Error::Storage(_) | Error::Serialization(_) | Error::Archive(_) => ErrorKind::Internal,
        }
    }

    /// User-facing text. Key, crypto and internal failures collapse to a
    /// generic sentence so no key material or storage detail leaks.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(msg)
            | Error::OrderingViolation(msg)
            | Error::DuplicateResource(msg) => msg.clone(),
            Error::PartialBatchFailure { .. } => self.to_string(),
            Error::Key(_) => "The signing key could not be used.".to_string(),
            Error::Crypto(CryptoError::PlaintextTooLong { max, .. }) => {
                format!("Data is too large to encrypt (maximum {} bytes).", max)
            }
            Error::Crypto(_) => "The cryptographic operation failed.".to_string(),
            Error::FileNotFound(_) => "The requested file is not available.".to_string(),
            Error::Storage(_) | Error::Serialization(_) | Error::Archive(_) => {
                "An internal error occurred.".to_string()
            }
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_message_is_generic() {
        let err = Error::Key("pkcs8 decrypt failed for -----BEGIN ENCRYPTED".into());
        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(!err.public_message().contains("BEGIN"));
    }

    #[test]
    fn test_plaintext_bound_is_reported() {
        let err: Error = CryptoError::PlaintextTooLong { len: 191, max: 190 }.into();
        assert_eq!(err.kind(), ErrorKind::Crypto);
        assert!(err.public_message().contains("190"));
    }
}
