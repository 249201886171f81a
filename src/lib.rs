//! CertForge Core - Signed Documents and Certificates
//!
//! # Guarantees
//! 1. The signed artifact is rebuilt from the original, never patched
//! 2. One signature per signer per entity
//! 3. Digital signatures cover reproducible content hashes
//! 4. Certificate numbers are globally unique
//! 5. Bulk rows fail alone
//! 6. Public status never exposes key material

pub mod batch;
pub mod certificates;
pub mod config;
pub mod context;
pub mod document;
pub mod entity;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod pipeline;
pub mod registry;
pub mod signing;
pub mod storage;
pub mod variables;
pub mod verification;

pub use batch::{spawn_bulk_issuance, spawn_notifications, BatchJob, BatchStatus, Notifier};
pub use certificates::{
    BulkReport, Certificate, CertificateEngine, CertificateRecipient, MemoryRecipientDirectory,
    Recipient, RecipientDirectory,
};
pub use config::EngineConfig;
pub use context::{Actor, RequestContext, UserId};
pub use document::{Document, Overlay, Page};
pub use entity::{
    EntityId, EntityKind, Placement, ReviewStatus, SignableEntity, Signature, SignatureKind, Signer,
    SigningState,
};
pub use error::{CryptoError, Error, ErrorKind, Result};
pub use keys::{KeyInfo, KeyManager, KeyProtection, Keypair};
pub use pipeline::CertForge;
pub use signing::SignatureEngine;
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use variables::{Values, VariablePosition};
pub use verification::{
    IntegrityReport, VerificationReference, VerificationService, VerificationStatus,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_DOCUMENT_VERSION: &str = "1.0.0";
