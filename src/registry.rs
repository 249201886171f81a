//! Record Registry - entities, certificates, certificate recipients
//!
//! Each entity sits behind its own mutex. Holding that guard is the critical
//! section for "mutate signatures, then rebuild the artifact".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use uuid::Uuid;

use crate::certificates::{Certificate, CertificateRecipient};
use crate::entity::{EntityId, SignableEntity};
use crate::error::{Error, Result};

pub type EntityHandle = Arc<Mutex<SignableEntity>>;

#[derive(Default)]
struct CertificateBook {
    by_id: HashMap<Uuid, Certificate>,
    by_number: HashMap<String, Uuid>,
    recipients: Vec<CertificateRecipient>,
}

#[derive(Default)]
pub struct Registry {
    entities: RwLock<HashMap<EntityId, EntityHandle>>,
    certificates: Mutex<CertificateBook>,
}

pub fn lock(handle: &EntityHandle) -> MutexGuard<'_, SignableEntity> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&self, entity: SignableEntity) -> EntityHandle {
        let handle = Arc::new(Mutex::new(entity));
        let id = lock(&handle).id;
        self.entities
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, Arc::clone(&handle));
        handle
    }

    pub fn entity(&self, id: &EntityId) -> Result<EntityHandle> {
        self.entities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(format!("entity {}", id)))
    }

    /// Point-in-time copy of an entity.
    pub fn snapshot(&self, id: &EntityId) -> Result<SignableEntity> {
        let handle = self.entity(id)?;
        let entity = lock(&handle).clone();
        Ok(entity)
    }

    /// Call while holding an entity guard: fails once the entity has been
    /// removed, so a waiter that got the handle earlier cannot write blobs
    /// for a deleted entity.
    pub fn ensure_registered(&self, id: &EntityId) -> Result<()> {
        let present = self
            .entities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(id);
        if present {
            Ok(())
        } else {
            Err(Error::FileNotFound(format!("entity {}", id)))
        }
    }

    /// Removes the entity together with the signers and signatures it owns.
    /// Callers hold the entity guard while removing.
    pub fn remove_entity(&self, id: &EntityId) -> Result<EntityHandle> {
        self.entities
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .ok_or_else(|| Error::FileNotFound(format!("entity {}", id)))
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect()
    }

    fn book(&self) -> MutexGuard<'_, CertificateBook> {
        self.certificates.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn number_taken(&self, number: &str) -> bool {
        self.book().by_number.contains_key(number)
    }

    /// Insert a certificate and its recipient link as one unit.
    pub fn insert_certificate(
        &self,
        certificate: Certificate,
        recipient: CertificateRecipient,
    ) -> Result<()> {
        let mut book = self.book();
        if book.by_number.contains_key(&certificate.number) {
            return Err(Error::DuplicateResource(format!(
                "certificate number {} already issued",
                certificate.number
            )));
        }
        book.by_number.insert(certificate.number.clone(), certificate.id);
        book.by_id.insert(certificate.id, certificate);
        book.recipients.push(recipient);
        Ok(())
    }

    pub fn certificate(&self, id: &Uuid) -> Option<Certificate> {
        self.book().by_id.get(id).cloned()
    }

    pub fn certificate_by_number(&self, number: &str) -> Option<Certificate> {
        let book = self.book();
        book.by_number
            .get(number)
            .and_then(|id| book.by_id.get(id))
            .cloned()
    }

    pub fn certificates_for_template(&self, template_id: &EntityId) -> Vec<Certificate> {
        let mut certs: Vec<Certificate> = self
            .book()
            .by_id
            .values()
            .filter(|c| &c.template_id == template_id)
            .cloned()
            .collect();
        certs.sort_by(|a, b| a.number.cmp(&b.number));
        certs
    }

    pub fn recipients_of(&self, certificate_id: &Uuid) -> Vec<CertificateRecipient> {
        self.book()
            .recipients
            .iter()
            .filter(|r| &r.certificate_id == certificate_id)
            .cloned()
            .collect()
    }

    pub fn certificate_count(&self) -> usize {
        self.book().by_id.len()
    }

    pub fn recipient_link_count(&self) -> usize {
        self.book().recipients.len()
    }
}
