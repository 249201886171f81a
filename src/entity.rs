//! Signable entities and the records they own.
//!
//! An entity exclusively owns its signers and signatures; a signature only
//! refers to the signing user by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::UserId;
use crate::error::{Error, Result};
use crate::variables::VariablePosition;

pub type EntityId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Document,
    Template,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    Unsigned,
    PartiallySigned,
    FullySigned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signer {
    pub user_id: UserId,
    pub name: String,
    pub order: u32,
    pub has_signed: bool,
    pub signature_id: Option<Uuid>,
}

impl Signer {
    pub fn new(user_id: UserId, name: impl Into<String>, order: u32) -> Self {
        Self {
            user_id,
            name: name.into(),
            order,
            has_signed: false,
            signature_id: None,
        }
    }
}

/// Where a signature is drawn. `page` is 1-based, coordinates in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    Physical,
    Digital,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub issuer: String,
    pub subject: String,
    pub key_fingerprint: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignaturePayload {
    Physical {
        image_key: String,
        image_sha256: String,
        media_type: String,
    },
    Digital {
        content_hash: String,
        #[serde(with = "base64_bytes")]
        signature: Vec<u8>,
        algorithm: String,
        /// Public key the signature was made with, kept so later key
        /// rotation does not invalidate old signatures.
        public_key_pem: String,
        certificate: CertificateMetadata,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub id: Uuid,
    pub entity_id: EntityId,
    pub signer_id: UserId,
    pub placement: Placement,
    pub signed_at: DateTime<Utc>,
    pub payload: SignaturePayload,
}

impl Signature {
    pub fn kind(&self) -> SignatureKind {
        match self.payload {
            SignaturePayload::Physical { .. } => SignatureKind::Physical,
            SignaturePayload::Digital { .. } => SignatureKind::Digital,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignableEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub title: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub original_key: String,
    pub signers: Vec<Signer>,
    pub signatures: Vec<Signature>,
    pub review_status: ReviewStatus,
    pub reviewed_by: Option<UserId>,
    pub review_note: Option<String>,
    pub signed_artifact_key: Option<String>,
    /// Bumped on every signature mutation.
    pub version: u64,
    #[serde(default)]
    pub variable_positions: Vec<VariablePosition>,
}

impl SignableEntity {
    pub fn signing_state(&self) -> SigningState {
        let signed = self.signers.iter().filter(|s| s.has_signed).count();
        if signed == 0 {
            SigningState::Unsigned
        } else if signed == self.signers.len() {
            SigningState::FullySigned
        } else {
            SigningState::PartiallySigned
        }
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signing_state() == SigningState::FullySigned
    }

    pub fn signer(&self, user_id: &UserId) -> Option<&Signer> {
        self.signers.iter().find(|s| &s.user_id == user_id)
    }

    pub fn signature_by(&self, user_id: &UserId) -> Option<&Signature> {
        self.signatures.iter().find(|s| &s.signer_id == user_id)
    }

    /// Signatures in drawing order: signer order, then signer id.
    pub fn ordered_signatures(&self) -> Vec<&Signature> {
        let mut sigs: Vec<&Signature> = self.signatures.iter().collect();
        sigs.sort_by_key(|sig| {
            let order = self.signer(&sig.signer_id).map_or(u32::MAX, |s| s.order);
            (order, sig.signer_id)
        });
        sigs
    }

    /// Signers are unique per user and per order index.
    pub fn validate_signers(signers: &[Signer]) -> Result<()> {
        if signers.is_empty() {
            return Err(Error::validation("at least one signer is required"));
        }
        for (idx, signer) in signers.iter().enumerate() {
            let rest = &signers[idx + 1..];
            if rest.iter().any(|s| s.user_id == signer.user_id) {
                return Err(Error::validation(format!(
                    "signer {} is listed more than once",
                    signer.name
                )));
            }
            if rest.iter().any(|s| s.order == signer.order) {
                return Err(Error::validation(format!(
                    "signer order {} is assigned more than once",
                    signer.order
                )));
            }
        }
        Ok(())
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_signers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let validate = SignableEntity::validate_signers;
        assert!(validate(&[]).is_err());
        assert!(validate(&[Signer::new(a, "A", 1), Signer::new(a, "A", 2)]).is_err());
        assert!(validate(&[Signer::new(a, "A", 1), Signer::new(b, "B", 1)]).is_err());
        assert!(validate(&[Signer::new(a, "A", 1), Signer::new(b, "B", 2)]).is_ok());
    }
}
