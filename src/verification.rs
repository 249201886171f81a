//! Verification Service - public, read-only status and integrity checks
//!
//! Nothing returned here carries key material or raw signature bytes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind, ReviewStatus, SignatureKind, SignaturePayload};
use crate::error::Result;
use crate::hashing::content_hash;
use crate::keys::{self, KeyManager};
use crate::registry::Registry;
use crate::storage::BlobStore;

/// `{base_url}/verify/{entity_id}`
pub fn reference_url(base_url: &str, entity_id: &EntityId) -> String {
    format!("{}/verify/{}", base_url.trim_end_matches('/'), entity_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReference {
    pub entity_id: EntityId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerStatus {
    pub name: String,
    pub order: u32,
    pub signed: bool,
    pub kind: Option<SignatureKind>,
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStatus {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub title: String,
    pub review_status: ReviewStatus,
    pub signers: Vec<SignerStatus>,
    pub is_fully_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCheck {
    pub signer: String,
    /// Stored hash equals the hash recomputed from the current original.
    pub content_matches: bool,
    /// The recorded key still has the fingerprint in the signing certificate.
    pub key_matches: bool,
    /// Signature verifies against the key recorded at signing time.
    pub signature_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub entity_id: EntityId,
    pub checks: Vec<SignatureCheck>,
    pub all_valid: bool,
}

pub struct VerificationService {
    base_url: String,
    registry: Arc<Registry>,
    blobs: Arc<dyn BlobStore>,
    keys: Arc<KeyManager>,
}

impl VerificationService {
    pub fn new(
        base_url: impl Into<String>,
        registry: Arc<Registry>,
        blobs: Arc<dyn BlobStore>,
        keys: Arc<KeyManager>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            registry,
            blobs,
            keys,
        }
    }

    pub fn build_verification_reference(&self, entity_id: &EntityId) -> VerificationReference {
        VerificationReference {
            entity_id: *entity_id,
            url: reference_url(&self.base_url, entity_id),
        }
    }

    pub fn get_status(&self, entity_id: &EntityId) -> Result<VerificationStatus> {
        let entity = self.registry.snapshot(entity_id)?;
        let signers = entity
            .signers
            .iter()
            .map(|signer| {
                let signature = entity.signature_by(&signer.user_id);
                SignerStatus {
                    name: signer.name.clone(),
                    order: signer.order,
                    signed: signer.has_signed,
                    kind: signature.map(|s| s.kind()),
                    signed_at: signature.map(|s| s.signed_at),
                }
            })
            .collect();
        let is_fully_signed = entity.is_fully_signed();
        let signed_at = if is_fully_signed {
            entity.signatures.iter().map(|s| s.signed_at).max()
        } else {
            None
        };

        Ok(VerificationStatus {
            entity_id: entity.id,
            kind: entity.kind,
            title: entity.title.clone(),
            review_status: entity.review_status,
            signers,
            is_fully_signed,
            signed_at,
        })
    }

    /// Re-check every digital signature against the stored original.
    /// Mismatches are reported as `false`, never as errors.
    pub fn verify_integrity(&self, entity_id: &EntityId) -> Result<IntegrityReport> {
        let entity = self.registry.snapshot(entity_id)?;
        let original = self.blobs.read(&entity.original_key)?;
        let current_hash = content_hash(&entity.id, &original);

        let mut checks = Vec::new();
        for signature in entity.ordered_signatures() {
            let SignaturePayload::Digital {
                content_hash: stored,
                signature: bytes,
                public_key_pem,
                certificate,
                ..
            } = &signature.payload
            else {
                continue;
            };
            let signer = entity
                .signer(&signature.signer_id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| signature.signer_id.to_string());
            let key_matches = keys::fingerprint(public_key_pem)
                .map(|fp| fp == certificate.key_fingerprint)
                .unwrap_or(false);
            let signature_valid = self
                .keys
                .verify(current_hash.as_bytes(), bytes, public_key_pem)
                .unwrap_or_else(|e| {
                    tracing::error!(
                        entity = %entity_id,
                        error = %e,
                        "recorded public key unusable"
                    );
                    false
                });
            checks.push(SignatureCheck {
                signer,
                content_matches: stored == &current_hash,
                key_matches,
                signature_valid,
            });
        }
        let all_valid = checks
            .iter()
            .all(|c| c.content_matches && c.key_matches && c.signature_valid);
        Ok(IntegrityReport {
            entity_id: entity.id,
            checks,
            all_valid,
        })
    }
}
