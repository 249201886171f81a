//! Signature Engine - review gate, signature records, artifact rebuild
//!
//! CRITICAL: the signed artifact is always rebuilt from the original plus the
//! current signature set. It is never patched incrementally.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{Actor, RequestContext, UserId};
use crate::document::{Alignment, Document, FontFamily, Overlay, Page};
use crate::entity::{
    CertificateMetadata, EntityId, EntityKind, Placement, ReviewStatus, SignableEntity, Signature,
    SignaturePayload, Signer,
};
use crate::error::{Error, Result};
use crate::hashing::{content_hash, sha256_hex, short_hash};
use crate::keys::{self, KeyManager, SIGNATURE_ALGORITHM};
use crate::registry::{lock, Registry};
use crate::storage::BlobStore;
use crate::verification::reference_url;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static REBUILD_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_rebuild_call_count() -> u32 {
    REBUILD_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_rebuild_call_count() {
    REBUILD_CALL_COUNT.store(0, Ordering::SeqCst);
}

pub const QR_SIZE: f64 = 72.0;
pub const QR_MARGIN: f64 = 18.0;
const DISPLAY_HASH_LEN: usize = 16;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

pub struct SignatureEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
    blobs: Arc<dyn BlobStore>,
    keys: Arc<KeyManager>,
}

impl SignatureEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<Registry>,
        blobs: Arc<dyn BlobStore>,
        keys: Arc<KeyManager>,
    ) -> Self {
        Self { config, registry, blobs, keys }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Register a document reviewed and signed by a single recipient.
    pub fn register_document(
        &self,
        ctx: &RequestContext,
        title: &str,
        original: &[u8],
        reviewer: &Actor,
    ) -> Result<SignableEntity> {
        let signers = vec![Signer::new(reviewer.id, reviewer.name.clone(), 1)];
        self.register(ctx, EntityKind::Document, title, original, signers)
    }

    /// Register a template signed by an ordered list of signers.
    pub fn register_template(
        &self,
        ctx: &RequestContext,
        title: &str,
        original: &[u8],
        signers: Vec<Signer>,
    ) -> Result<SignableEntity> {
        self.register(ctx, EntityKind::Template, title, original, signers)
    }

    fn register(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        title: &str,
        original: &[u8],
        mut signers: Vec<Signer>,
    ) -> Result<SignableEntity> {
        if title.trim().is_empty() {
            return Err(Error::validation("title is empty"));
        }
        Document::from_bytes(original)?.validate_original()?;
        SignableEntity::validate_signers(&signers)?;
        for signer in signers.iter_mut() {
            signer.has_signed = false;
            signer.signature_id = None;
        }
        signers.sort_by_key(|s| s.order);

        let id = Uuid::new_v4();
        let original_key = format!("originals/{}.json", id);
        self.blobs.save(&original_key, original)?;

        let entity = SignableEntity {
            id,
            kind,
            title: title.trim().to_string(),
            created_by: ctx.actor.id,
            created_at: ctx.now,
            original_key,
            signers,
            signatures: vec![],
            review_status: ReviewStatus::Pending,
            reviewed_by: None,
            review_note: None,
            signed_artifact_key: None,
            version: 0,
            variable_positions: vec![],
        };
        self.registry.insert_entity(entity.clone());
        tracing::info!(
            entity = %id,
            kind = ?kind,
            signers = entity.signers.len(),
            "registered entity"
        );
        Ok(entity)
    }

    /// Approve or reject. Documents are reviewed by their recipient,
    /// templates by their creator.
    pub fn review(
        &self,
        ctx: &RequestContext,
        entity_id: &EntityId,
        decision: ReviewStatus,
        note: Option<&str>,
    ) -> Result<SignableEntity> {
        if decision == ReviewStatus::Pending {
            return Err(Error::validation("review decision must be approved or rejected"));
        }
        let handle = self.registry.entity(entity_id)?;
        let mut entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        let allowed = match entity.kind {
            EntityKind::Document => entity.signer(&ctx.actor.id).is_some(),
            EntityKind::Template => entity.created_by == ctx.actor.id,
        };
        if !allowed {
            return Err(Error::validation(format!(
                "{} is not the reviewer of this entity",
                ctx.actor.name
            )));
        }
        entity.review_status = decision;
        entity.reviewed_by = Some(ctx.actor.id);
        entity.review_note = note.map(str::to_string);
        tracing::info!(entity = %entity_id, decision = ?decision, "review recorded");
        Ok(entity.clone())
    }

    pub fn record_physical_signature(
        &self,
        ctx: &RequestContext,
        entity_id: &EntityId,
        image: &[u8],
        placement: Placement,
    ) -> Result<Signature> {
        let media_type = self.check_image(image)?;
        let handle = self.registry.entity(entity_id)?;
        let mut entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        self.check_can_sign(&entity, &ctx.actor.id)?;
        self.check_placement(&entity, &placement)?;

        let image_key = format!("signatures/{}/{}.img", entity.id, ctx.actor.id);
        self.blobs.save(&image_key, image)?;

        let signature = Signature {
            id: Uuid::new_v4(),
            entity_id: entity.id,
            signer_id: ctx.actor.id,
            placement,
            signed_at: ctx.now,
            payload: SignaturePayload::Physical {
                image_key: image_key.clone(),
                image_sha256: sha256_hex(image),
                media_type: media_type.to_string(),
            },
        };
        match self.apply_signature(&mut entity, signature) {
            Ok(signature) => Ok(signature),
            Err(e) => {
                self.discard_blob(&image_key);
                Err(e)
            }
        }
    }

    /// The signed payload is the hex content hash of (entity id, original
    /// bytes). It carries no timestamp so verification can recompute it.
    pub fn record_digital_signature(
        &self,
        ctx: &RequestContext,
        entity_id: &EntityId,
        placement: Placement,
        passphrase: Option<&str>,
    ) -> Result<Signature> {
        let handle = self.registry.entity(entity_id)?;
        let mut entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        self.check_can_sign(&entity, &ctx.actor.id)?;
        self.check_placement(&entity, &placement)?;

        let original = self.blobs.read(&entity.original_key)?;
        let hash = content_hash(&entity.id, &original);
        let keypair = self
            .keys
            .keypair(&ctx.actor.id)
            .ok_or_else(|| Error::Key(format!("no keypair for signer {}", ctx.actor.id)))?;
        let signature_bytes =
            self.keys.sign(hash.as_bytes(), &keypair.private_key_pem, passphrase)?;

        let certificate = CertificateMetadata {
            issuer: self.config.signing.certificate_issuer.clone(),
            subject: ctx.actor.name.clone(),
            key_fingerprint: keys::fingerprint(&keypair.public_key_pem)?,
            valid_from: ctx.now,
            valid_to: ctx.now + Duration::days(self.config.signing.certificate_validity_days),
        };
        let signature = Signature {
            id: Uuid::new_v4(),
            entity_id: entity.id,
            signer_id: ctx.actor.id,
            placement,
            signed_at: ctx.now,
            payload: SignaturePayload::Digital {
                content_hash: hash,
                signature: signature_bytes,
                algorithm: SIGNATURE_ALGORITHM.to_string(),
                public_key_pem: keypair.public_key_pem.clone(),
                certificate,
            },
        };
        self.apply_signature(&mut entity, signature)
    }

    /// Append, flip the signer, rebuild. Rolls the entity back on failure.
    fn apply_signature(
        &self,
        entity: &mut SignableEntity,
        signature: Signature,
    ) -> Result<Signature> {
        let before = entity.clone();
        if let Some(signer) = entity.signers.iter_mut().find(|s| s.user_id == signature.signer_id) {
            signer.has_signed = true;
            signer.signature_id = Some(signature.id);
        }
        entity.signatures.push(signature.clone());
        entity.version += 1;

        if let Err(e) = self.rebuild_locked(entity) {
            tracing::error!(entity = %entity.id, error = %e, "rebuild failed, signature discarded");
            *entity = before;
            return Err(e);
        }
        tracing::info!(
            entity = %entity.id,
            signer = %signature.signer_id,
            kind = ?signature.kind(),
            state = ?entity.signing_state(),
            "signature recorded"
        );
        Ok(signature)
    }

    pub fn remove_signature(
        &self,
        ctx: &RequestContext,
        entity_id: &EntityId,
        signer_id: &UserId,
    ) -> Result<SignableEntity> {
        let handle = self.registry.entity(entity_id)?;
        let mut entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        if ctx.actor.id != *signer_id && ctx.actor.id != entity.created_by {
            return Err(Error::validation("only the signer or the creator may remove a signature"));
        }
        let position = entity
            .signatures
            .iter()
            .position(|s| &s.signer_id == signer_id)
            .ok_or_else(|| {
                Error::validation(format!("no signature by {} on this entity", signer_id))
            })?;

        let before = entity.clone();
        let removed = entity.signatures.remove(position);
        if let Some(signer) = entity.signers.iter_mut().find(|s| &s.user_id == signer_id) {
            signer.has_signed = false;
            signer.signature_id = None;
        }
        entity.version += 1;

        if let Err(e) = self.rebuild_locked(&mut entity) {
            *entity = before;
            return Err(e);
        }
        if let SignaturePayload::Physical { image_key, .. } = &removed.payload {
            self.discard_blob(image_key);
        }
        tracing::info!(
            entity = %entity_id,
            signer = %signer_id,
            state = ?entity.signing_state(),
            "signature removed"
        );
        Ok(entity.clone())
    }

    /// Delete a blob the committed state no longer references. A failure
    /// only leaves an orphan behind, so it is logged rather than returned.
    fn discard_blob(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key) {
            tracing::warn!(key = %key, error = %e, "failed to delete unreferenced blob");
        }
    }

    /// Rebuild the signed artifact from scratch. Returns the artifact key,
    /// or `None` when no signatures remain.
    pub fn rebuild_signed_artifact(&self, entity_id: &EntityId) -> Result<Option<String>> {
        let handle = self.registry.entity(entity_id)?;
        let mut entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        self.rebuild_locked(&mut entity)
    }

    fn rebuild_locked(&self, entity: &mut SignableEntity) -> Result<Option<String>> {
        #[cfg(feature = "test-hooks")]
        REBUILD_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let previous = entity.signed_artifact_key.clone();
        if entity.signatures.is_empty() {
            entity.signed_artifact_key = None;
            if let Some(old) = previous {
                self.discard_blob(&old);
            }
            tracing::debug!(entity = %entity.id, "no signatures left, artifact cleared");
            return Ok(None);
        }

        let artifact = self.render_artifact(entity)?;
        let bytes = artifact.to_bytes()?;
        let digest = sha256_hex(&bytes);
        let key = format!("signed/{}/{}.json", entity.id, short_hash(&digest, 32));

        if previous.as_deref() != Some(key.as_str()) || !self.blobs.exists(&key)? {
            self.blobs.save(&key, &bytes)?;
        }
        entity.signed_artifact_key = Some(key.clone());
        if let Some(old) = previous.filter(|old| old != &key) {
            self.discard_blob(&old);
        }
        tracing::debug!(
            entity = %entity.id,
            version = entity.version,
            overlays = artifact.overlay_count(),
            key = %key,
            "rebuilt signed artifact"
        );
        Ok(Some(key))
    }

    fn render_artifact(&self, entity: &SignableEntity) -> Result<Document> {
        let original = Document::from_bytes(&self.blobs.read(&entity.original_key)?)?;
        let signatures = entity.ordered_signatures();
        let mut pages: Vec<Page> = Vec::with_capacity(original.pages.len());

        for (idx, source) in original.pages.iter().enumerate() {
            let number = idx as u32 + 1;
            let mut page = source.clone();
            page.overlays.clear();
            for signature in signatures.iter().filter(|s| s.placement.page == number) {
                page.overlays.push(self.signature_overlay(entity, signature)?);
            }
            pages.push(page);
        }

        if let Some(last) = pages.last_mut() {
            let qr = self.embed_qr(&entity.id, last)?;
            last.overlays.push(qr);
        }

        Ok(Document {
            engine_min_version: original.engine_min_version,
            pages,
        })
    }

    fn signature_overlay(&self, entity: &SignableEntity, signature: &Signature) -> Result<Overlay> {
        let name = entity
            .signer(&signature.signer_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| signature.signer_id.to_string());
        let date = format_date(&signature.signed_at);
        let p = signature.placement;

        match &signature.payload {
            SignaturePayload::Physical { image_key, image_sha256, media_type } => {
                let image = self.blobs.read(image_key)?;
                Ok(Overlay::Image {
                    x: p.x,
                    y: p.y,
                    width: p.width,
                    height: p.height,
                    media_type: media_type.clone(),
                    data_base64: BASE64.encode(&image),
                    image_sha256: image_sha256.clone(),
                    caption: vec![format!("Signed by {}", name), format!("Date: {}", date)],
                })
            }
            SignaturePayload::Digital { content_hash, .. } => Ok(Overlay::Text {
                x: p.x,
                y: p.y,
                lines: vec![
                    format!("Digitally signed by {}", name),
                    format!("Hash: {}...", short_hash(content_hash, DISPLAY_HASH_LEN)),
                    format!("Date: {}", date),
                    "Cryptographically verified".to_string(),
                ],
                font_size: 8,
                font_family: FontFamily::Helvetica,
                alignment: Alignment::Left,
            }),
        }
    }

    /// The QR image is staged as a temporary blob and deleted once embedded.
    fn embed_qr(&self, entity_id: &EntityId, page: &Page) -> Result<Overlay> {
        let payload = reference_url(&self.config.verification.base_url, entity_id);
        let tmp_key = format!("tmp/qr/{}-{}.txt", entity_id, Uuid::new_v4());
        self.blobs.save(&tmp_key, payload.as_bytes())?;
        let staged = self.blobs.read(&tmp_key);
        self.blobs.delete(&tmp_key)?;
        let payload = String::from_utf8(staged?)
            .map_err(|_| Error::validation("verification payload is not UTF-8"))?;

        Ok(Overlay::Qr {
            x: (page.width - QR_SIZE - QR_MARGIN).max(0.0),
            y: QR_MARGIN,
            size: QR_SIZE,
            payload,
        })
    }

    /// Load the current signed artifact.
    pub fn signed_artifact(&self, entity_id: &EntityId) -> Result<Document> {
        let entity = self.registry.snapshot(entity_id)?;
        let key = entity.signed_artifact_key.ok_or_else(|| {
            Error::FileNotFound(format!("entity {} has no signed artifact", entity_id))
        })?;
        Document::from_bytes(&self.blobs.read(&key)?)
    }

    /// Remove an entity and every blob it owns. The entity guard is held
    /// across the cascade so no signer can write blobs in between.
    pub fn delete_entity(&self, ctx: &RequestContext, entity_id: &EntityId) -> Result<()> {
        let handle = self.registry.entity(entity_id)?;
        let entity = lock(&handle);
        self.registry.ensure_registered(entity_id)?;
        if entity.created_by != ctx.actor.id {
            return Err(Error::validation("only the creator may delete an entity"));
        }
        self.registry.remove_entity(entity_id)?;
        self.discard_blob(&entity.original_key);
        if let Some(key) = &entity.signed_artifact_key {
            self.discard_blob(key);
        }
        for signature in &entity.signatures {
            if let SignaturePayload::Physical { image_key, .. } = &signature.payload {
                self.discard_blob(image_key);
            }
        }
        tracing::info!(entity = %entity_id, "deleted entity");
        Ok(())
    }

    fn check_can_sign(&self, entity: &SignableEntity, user: &UserId) -> Result<()> {
        if entity.review_status == ReviewStatus::Rejected {
            return Err(Error::validation("entity was rejected and cannot be signed"));
        }
        let signer = entity
            .signer(user)
            .ok_or_else(|| Error::validation(format!("{} is not a designated signer", user)))?;
        if signer.has_signed || entity.signature_by(user).is_some() {
            return Err(Error::OrderingViolation(format!(
                "{} has already signed this entity",
                signer.name
            )));
        }
        if self.config.signing.strict_ordering {
            if let Some(waiting) = entity
                .signers
                .iter()
                .find(|s| s.order < signer.order && !s.has_signed)
            {
                return Err(Error::OrderingViolation(format!(
                    "{} must sign before {}",
                    waiting.name, signer.name
                )));
            }
        }
        Ok(())
    }

    fn check_placement(&self, entity: &SignableEntity, placement: &Placement) -> Result<()> {
        let original = Document::from_bytes(&self.blobs.read(&entity.original_key)?)?;
        let page = original.page(placement.page).ok_or_else(|| {
            Error::validation(format!(
                "page {} is outside the document ({} pages)",
                placement.page,
                original.pages.len()
            ))
        })?;
        let finite = [placement.x, placement.y, placement.width, placement.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || placement.width <= 0.0 || placement.height <= 0.0 {
            return Err(Error::validation("signature size must be positive"));
        }
        if placement.x < 0.0
            || placement.y < 0.0
            || placement.x + placement.width > page.width
            || placement.y + placement.height > page.height
        {
            return Err(Error::validation("signature does not fit on the page"));
        }
        Ok(())
    }

    fn check_image(&self, image: &[u8]) -> Result<&'static str> {
        if image.is_empty() {
            return Err(Error::validation("signature image is empty"));
        }
        if image.len() > self.config.signing.max_image_bytes {
            return Err(Error::validation(format!(
                "signature image exceeds {} bytes",
                self.config.signing.max_image_bytes
            )));
        }
        if image.starts_with(PNG_MAGIC) {
            Ok("image/png")
        } else if image.starts_with(JPEG_MAGIC) {
            Ok("image/jpeg")
        } else {
            Err(Error::validation("signature image must be PNG or JPEG"))
        }
    }
}

fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyPolicy;
    use crate::error::ErrorKind;
    use crate::storage::MemoryBlobStore;
    use chrono::TimeZone;

    pub(crate) const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

    fn engine(config: EngineConfig) -> (SignatureEngine, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let engine = engine_over(config, blobs.clone());
        (engine, blobs)
    }

    fn engine_over(config: EngineConfig, blobs: Arc<dyn BlobStore>) -> SignatureEngine {
        let policy = KeyPolicy { pbkdf2_iterations: 1_000, ..KeyPolicy::default() };
        let keys = Arc::new(KeyManager::new(policy));
        SignatureEngine::new(config, Arc::new(Registry::new()), blobs, keys)
    }

    /// Store whose deletes of signature images always fail.
    struct StickyImages(MemoryBlobStore);

    impl BlobStore for StickyImages {
        fn save(&self, key: &str, data: &[u8]) -> Result<()> {
            self.0.save(key, data)
        }

        fn read(&self, key: &str) -> Result<Vec<u8>> {
            self.0.read(key)
        }

        fn delete(&self, key: &str) -> Result<()> {
            if key.starts_with("signatures/") {
                let denied = std::io::ErrorKind::PermissionDenied;
                return Err(Error::Storage(std::io::Error::new(denied, "read-only volume")));
            }
            self.0.delete(key)
        }

        fn exists(&self, key: &str) -> Result<bool> {
            self.0.exists(key)
        }
    }

    fn original(pages: usize) -> Vec<u8> {
        let page = Page { width: 600.0, height: 800.0, content: "Body".into(), overlays: vec![] };
        Document::new(vec![page; pages]).to_bytes().unwrap()
    }

    fn ctx(actor: &Actor, minute: u32) -> RequestContext {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap();
        RequestContext::at(actor.clone(), at)
    }

    fn spot(page: u32) -> Placement {
        Placement { page, x: 50.0, y: 100.0, width: 120.0, height: 40.0 }
    }

    #[test]
    fn test_duplicate_signature_is_ordering_violation() {
        let (engine, _) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let b = Actor::new(Uuid::new_v4(), "Bob");
        let signers = vec![Signer::new(a.id, "Alice", 1), Signer::new(b.id, "Bob", 2)];
        let t = engine.register_template(&ctx(&owner, 0), "T", &original(1), signers).unwrap();

        engine.record_physical_signature(&ctx(&a, 1), &t.id, PNG, spot(1)).unwrap();
        let err = engine.record_physical_signature(&ctx(&a, 2), &t.id, PNG, spot(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderingViolation);
        assert_eq!(engine.registry().snapshot(&t.id).unwrap().signatures.len(), 1);
    }

    #[test]
    fn test_strict_ordering() {
        let mut config = EngineConfig::default();
        config.signing.strict_ordering = true;
        let (engine, _) = engine(config);
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let b = Actor::new(Uuid::new_v4(), "Bob");
        let signers = vec![Signer::new(b.id, "Bob", 2), Signer::new(a.id, "Alice", 1)];
        let t = engine.register_template(&ctx(&owner, 0), "T", &original(1), signers).unwrap();

        let err = engine.record_physical_signature(&ctx(&b, 1), &t.id, PNG, spot(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderingViolation);
        engine.record_physical_signature(&ctx(&a, 2), &t.id, PNG, spot(1)).unwrap();
        engine.record_physical_signature(&ctx(&b, 3), &t.id, PNG, spot(1)).unwrap();
        assert!(engine.registry().snapshot(&t.id).unwrap().is_fully_signed());
    }

    #[test]
    fn test_rejects_bad_input() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let stranger = Actor::new(Uuid::new_v4(), "Mallory");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(2), &a).unwrap();

        let sign = |actor: &Actor, image: &[u8], placement| {
            engine.record_physical_signature(&ctx(actor, 1), &d.id, image, placement).unwrap_err()
        };
        assert_eq!(sign(&a, PNG, spot(3)).kind(), ErrorKind::Validation);
        assert_eq!(sign(&a, b"GIF89a", spot(1)).kind(), ErrorKind::Validation);
        assert_eq!(sign(&stranger, PNG, spot(1)).kind(), ErrorKind::Validation);
        assert!(!blobs.keys().iter().any(|k| k.starts_with("signatures/")));
    }

    #[test]
    fn test_rejected_entity_cannot_be_signed() {
        let (engine, _) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();

        assert!(engine.review(&ctx(&owner, 1), &d.id, ReviewStatus::Rejected, None).is_err());
        engine.review(&ctx(&a, 1), &d.id, ReviewStatus::Rejected, Some("wrong amount")).unwrap();
        let err = engine.record_physical_signature(&ctx(&a, 2), &d.id, PNG, spot(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_original_is_file_not_found() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();
        blobs.delete(&d.original_key).unwrap();

        let err = engine.record_physical_signature(&ctx(&a, 1), &d.id, PNG, spot(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_qr_temp_blob_is_removed_and_old_artifact_superseded() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let b = Actor::new(Uuid::new_v4(), "Bob");
        let signers = vec![Signer::new(a.id, "Alice", 1), Signer::new(b.id, "Bob", 2)];
        let t = engine.register_template(&ctx(&owner, 0), "T", &original(1), signers).unwrap();

        engine.record_physical_signature(&ctx(&a, 1), &t.id, PNG, spot(1)).unwrap();
        let first = engine.registry().snapshot(&t.id).unwrap().signed_artifact_key.unwrap();
        engine.record_physical_signature(&ctx(&b, 2), &t.id, PNG, spot(1)).unwrap();
        let second = engine.registry().snapshot(&t.id).unwrap().signed_artifact_key.unwrap();

        assert_ne!(first, second);
        assert!(!blobs.exists(&first).unwrap());
        assert!(blobs.exists(&second).unwrap());
        assert!(!blobs.keys().iter().any(|k| k.starts_with("tmp/")));
    }

    #[test]
    fn test_removing_last_signature_clears_artifact() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();
        engine.record_physical_signature(&ctx(&a, 1), &d.id, PNG, spot(1)).unwrap();

        let after = engine.remove_signature(&ctx(&a, 2), &d.id, &a.id).unwrap();
        assert!(after.signed_artifact_key.is_none());
        assert_eq!(engine.signed_artifact(&d.id).unwrap_err().kind(), ErrorKind::FileNotFound);
        let leftover = |k: &String| k.starts_with("signed/") || k.starts_with("signatures/");
        assert!(!blobs.keys().iter().any(leftover));
    }

    #[test]
    fn test_delete_entity_cascades() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();
        engine.record_physical_signature(&ctx(&a, 1), &d.id, PNG, spot(1)).unwrap();

        assert!(engine.delete_entity(&ctx(&a, 2), &d.id).is_err());
        engine.delete_entity(&ctx(&owner, 2), &d.id).unwrap();
        assert!(blobs.keys().is_empty());
        assert!(engine.registry().entity_ids().is_empty());
        assert_eq!(engine.registry().snapshot(&d.id).unwrap_err().kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_remove_signature_survives_image_delete_failure() {
        let blobs = Arc::new(StickyImages(MemoryBlobStore::new()));
        let engine = engine_over(EngineConfig::default(), blobs.clone());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();
        engine.record_physical_signature(&ctx(&a, 1), &d.id, PNG, spot(1)).unwrap();

        let after = engine.remove_signature(&ctx(&a, 2), &d.id, &a.id).unwrap();
        assert!(after.signatures.is_empty());
        assert!(!after.is_fully_signed());
        let stored = engine.registry().snapshot(&d.id).unwrap();
        assert!(stored.signatures.is_empty());
        assert!(stored.signed_artifact_key.is_none());
        assert!(blobs.0.keys().iter().any(|k| k.starts_with("signatures/")));
    }

    #[test]
    fn test_delete_entity_waits_for_entity_lock() {
        let (engine, blobs) = engine(EngineConfig::default());
        let owner = Actor::new(Uuid::new_v4(), "Owner");
        let a = Actor::new(Uuid::new_v4(), "Alice");
        let d = engine.register_document(&ctx(&owner, 0), "Contract", &original(1), &a).unwrap();
        engine.record_physical_signature(&ctx(&a, 1), &d.id, PNG, spot(1)).unwrap();

        let handle = engine.registry().entity(&d.id).unwrap();
        std::thread::scope(|scope| {
            let guard = lock(&handle);
            let deleter = scope.spawn(|| engine.delete_entity(&ctx(&owner, 2), &d.id));
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert_eq!(engine.registry().entity_ids(), vec![d.id]);
            assert!(blobs.exists(&d.original_key).unwrap());
            drop(guard);
            deleter.join().unwrap().unwrap();
        });

        assert!(engine.registry().entity_ids().is_empty());
        assert!(blobs.keys().is_empty());
        let late = engine.record_physical_signature(&ctx(&a, 3), &d.id, PNG, spot(1)).unwrap_err();
        assert_eq!(late.kind(), ErrorKind::FileNotFound);
    }
}
