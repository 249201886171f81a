//! Pipeline - wires the engines around one registry, blob store and key
//! manager.

use std::sync::Arc;

use crate::certificates::{CertificateEngine, RecipientDirectory};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys::KeyManager;
use crate::registry::Registry;
use crate::signing::SignatureEngine;
use crate::storage::BlobStore;
use crate::verification::VerificationService;

pub struct CertForge {
    pub keys: Arc<KeyManager>,
    pub registry: Arc<Registry>,
    pub signing: Arc<SignatureEngine>,
    pub certificates: Arc<CertificateEngine>,
    pub verification: Arc<VerificationService>,
}

impl CertForge {
    pub fn new(
        config: EngineConfig,
        blobs: Arc<dyn BlobStore>,
        directory: Arc<dyn RecipientDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let keys = Arc::new(KeyManager::new(config.keys.clone()));
        let registry = Arc::new(Registry::new());
        let verification = Arc::new(VerificationService::new(
            config.verification.base_url.clone(),
            Arc::clone(&registry),
            Arc::clone(&blobs),
            Arc::clone(&keys),
        ));
        let bulk = config.bulk.clone();
        let signing = Arc::new(SignatureEngine::new(
            config,
            Arc::clone(&registry),
            blobs,
            Arc::clone(&keys),
        ));
        let certificates = Arc::new(CertificateEngine::new(Arc::clone(&signing), directory, bulk));

        Ok(Self {
            keys,
            registry,
            signing,
            certificates,
            verification,
        })
    }
}
