//! Certificate Engine - issuance from signed, approved templates
//!
//! A certificate is the template's signed artifact with every variable
//! position stamped for one recipient. Nothing is persisted for a failed
//! issuance, and in bulk mode no row failure stops the batch.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::BulkConfig;
use crate::context::{RequestContext, UserId};
use crate::document::Document;
use crate::entity::{EntityId, EntityKind, ReviewStatus, SignableEntity};
use crate::error::{Error, Result};
use crate::registry::lock;
use crate::signing::SignatureEngine;
use crate::variables::{stamp, validate_positions, Values, VariablePosition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub number: String,
    pub template_id: EntityId,
    pub recipient_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub file_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecipient {
    pub certificate_id: Uuid,
    pub recipient_id: UserId,
    pub issued_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl Recipient {
    /// Stamping values the recipient supplies, below explicit values and
    /// row cells.
    pub fn values(&self) -> Values {
        Values::from([
            ("recipient_id".to_string(), self.id.to_string()),
            ("recipient_name".to_string(), self.name.clone()),
            ("recipient_email".to_string(), self.email.clone()),
        ])
    }
}

/// Looks recipients up by id or email.
pub trait RecipientDirectory: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<Recipient>;
}

#[derive(Debug, Default)]
pub struct MemoryRecipientDirectory {
    recipients: RwLock<Vec<Recipient>>,
}

impl MemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, recipient: Recipient) {
        self.recipients
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(recipient);
    }
}

impl RecipientDirectory for MemoryRecipientDirectory {
    fn resolve(&self, reference: &str) -> Option<Recipient> {
        let reference = reference.trim();
        let by_id = Uuid::parse_str(reference).ok();
        self.recipients
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|r| Some(r.id) == by_id || r.email.eq_ignore_ascii_case(reference))
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based position in the submitted rows.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    pub generated: Vec<Certificate>,
    pub errors: Vec<RowError>,
    pub success_count: usize,
    pub error_count: usize,
}

impl BulkReport {
    pub fn record(&mut self, row: usize, outcome: Result<Certificate>) {
        match outcome {
            Ok(certificate) => {
                self.generated.push(certificate);
                self.success_count += 1;
            }
            Err(e) => {
                tracing::warn!(row, error = %e, "certificate row failed");
                self.errors.push(RowError { row, message: e.public_message() });
                self.error_count += 1;
            }
        }
    }

    /// `PartialBatchFailure` when any row failed.
    pub fn into_result(self) -> Result<BulkReport> {
        if self.error_count > 0 {
            return Err(Error::PartialBatchFailure {
                succeeded: self.success_count,
                failed: self.error_count,
            });
        }
        Ok(self)
    }
}

pub struct CertificateEngine {
    signing: Arc<SignatureEngine>,
    directory: Arc<dyn RecipientDirectory>,
    bulk: BulkConfig,
}

impl CertificateEngine {
    pub fn new(
        signing: Arc<SignatureEngine>,
        directory: Arc<dyn RecipientDirectory>,
        bulk: BulkConfig,
    ) -> Self {
        Self { signing, directory, bulk }
    }

    /// Attach variable positions. Only allowed once the template is fully
    /// signed and approved.
    pub fn set_variable_positions(
        &self,
        ctx: &RequestContext,
        template_id: &EntityId,
        positions: Vec<VariablePosition>,
    ) -> Result<()> {
        let handle = self.signing.registry().entity(template_id)?;
        let mut template = lock(&handle);
        self.signing.registry().ensure_registered(template_id)?;
        if template.kind != EntityKind::Template {
            return Err(Error::validation("variable positions apply to templates only"));
        }
        if template.created_by != ctx.actor.id {
            return Err(Error::validation("only the template creator may place variables"));
        }
        if !template.is_fully_signed() || template.review_status != ReviewStatus::Approved {
            return Err(Error::validation(
                "template must be fully signed and approved before placing variables",
            ));
        }
        let original = Document::from_bytes(&self.signing.blobs().read(&template.original_key)?)?;
        validate_positions(&positions, original.pages.len())?;
        template.variable_positions = positions;
        tracing::info!(
            template = %template_id,
            count = template.variable_positions.len(),
            "variable positions saved"
        );
        Ok(())
    }

    fn check_issuable(template: &SignableEntity) -> Result<&str> {
        if template.kind != EntityKind::Template {
            return Err(Error::validation("certificates are issued from templates only"));
        }
        if template.review_status != ReviewStatus::Approved {
            return Err(Error::validation("template is not approved"));
        }
        match &template.signed_artifact_key {
            Some(key) if template.is_fully_signed() => Ok(key.as_str()),
            _ => Err(Error::FileNotFound(format!("template {} is not fully signed", template.id))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn issue_certificate(
        &self,
        ctx: &RequestContext,
        template_id: &EntityId,
        number: &str,
        recipient: &Recipient,
        explicit: &Values,
        row: &Values,
        issued_at: DateTime<Utc>,
    ) -> Result<Certificate> {
        let number = number.trim();
        if number.is_empty() {
            return Err(Error::validation("certificate number is empty"));
        }
        let registry = self.signing.registry();
        if registry.number_taken(number) {
            return Err(Error::DuplicateResource(format!(
                "certificate number {} already issued",
                number
            )));
        }

        let handle = registry.entity(template_id)?;
        let template = lock(&handle);
        registry.ensure_registered(template_id)?;
        let artifact_key = Self::check_issuable(&template)?;
        let blobs = self.signing.blobs();
        let artifact = Document::from_bytes(&blobs.read(artifact_key)?)?;
        let fields = recipient.values();
        let rendered = stamp(&artifact, &template.variable_positions, &[explicit, row, &fields])?;

        let id = Uuid::new_v4();
        let file_key = format!("certificates/{}.json", id);
        blobs.save(&file_key, &rendered.to_bytes()?)?;

        let certificate = Certificate {
            id,
            number: number.to_string(),
            template_id: template.id,
            recipient_id: recipient.id,
            issued_at,
            file_key: file_key.clone(),
        };
        let link = CertificateRecipient {
            certificate_id: id,
            recipient_id: recipient.id,
            issued_on: issued_at.date_naive(),
        };
        if let Err(e) = registry.insert_certificate(certificate.clone(), link) {
            blobs.delete(&file_key)?;
            return Err(e);
        }
        tracing::info!(
            certificate = %id,
            number = %certificate.number,
            template = %template.id,
            actor = %ctx.actor.id,
            "issued certificate"
        );
        Ok(certificate)
    }

    /// Issue one spreadsheet row. `row_number` is only used for messages.
    /// The template is rechecked for every row.
    pub fn issue_row(
        &self,
        ctx: &RequestContext,
        template_id: &EntityId,
        row_number: usize,
        row: &Values,
    ) -> Result<Certificate> {
        let cell = |column: &str| {
            row.get(column)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::validation(format!("row {}: missing cell {}", row_number, column))
                })
        };
        let number = cell(&self.bulk.number_column)?;
        let reference = cell(&self.bulk.recipient_column)?;
        let recipient = self
            .directory
            .resolve(reference)
            .ok_or_else(|| {
                Error::validation(format!("row {}: unknown recipient {}", row_number, reference))
            })?;
        self.issue_certificate(ctx, template_id, number, &recipient, &Values::new(), row, ctx.now)
    }

    /// Issue every row independently and report per-row outcomes.
    pub fn issue_bulk(
        &self,
        ctx: &RequestContext,
        template_id: &EntityId,
        rows: &[Values],
    ) -> Result<BulkReport> {
        self.template(template_id)?;
        let mut report = BulkReport::default();
        for (idx, row) in rows.iter().enumerate() {
            let outcome = self.issue_row(ctx, template_id, idx + 1, row);
            report.record(idx + 1, outcome);
        }
        tracing::info!(
            template = %template_id,
            succeeded = report.success_count,
            failed = report.error_count,
            "bulk issuance finished"
        );
        Ok(report)
    }

    /// Snapshot of a template that can currently issue certificates.
    pub fn template(&self, template_id: &EntityId) -> Result<SignableEntity> {
        let template = self.signing.registry().snapshot(template_id)?;
        Self::check_issuable(&template)?;
        Ok(template)
    }

    pub fn resolve_recipient(&self, reference: &str) -> Option<Recipient> {
        self.directory.resolve(reference)
    }

    /// Zip the generated files, one entry per certificate named by number.
    pub fn package_bulk(&self, certificate_ids: &[Uuid]) -> Result<Vec<u8>> {
        let registry = self.signing.registry();
        let blobs = self.signing.blobs();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut used = HashSet::new();

        for id in certificate_ids {
            let certificate = registry
                .certificate(id)
                .ok_or_else(|| Error::FileNotFound(format!("certificate {}", id)))?;
            let data = blobs.read(&certificate.file_key)?;
            let mut name = format!("{}.json", entry_stem(&certificate.number));
            if !used.insert(name.clone()) {
                name = format!("{}-{}.json", entry_stem(&certificate.number), certificate.id);
                used.insert(name.clone());
            }
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(name, options)?;
            writer.write_all(&data)?;
        }
        let archive = writer.finish()?.into_inner();
        tracing::info!(
            entries = certificate_ids.len(),
            bytes = archive.len(),
            "packaged certificates"
        );
        Ok(archive)
    }
}

fn entry_stem(number: &str) -> String {
    number
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Recipient {
        Recipient { id: Uuid::new_v4(), name: "Ana".into(), email: "ana@example.org".into() }
    }

    #[test]
    fn test_directory_resolves_email_and_id() {
        let dir = MemoryRecipientDirectory::new();
        let r = ana();
        dir.add(r.clone());
        assert_eq!(dir.resolve("ANA@example.org"), Some(r.clone()));
        assert_eq!(dir.resolve(&r.id.to_string()), Some(r));
        assert_eq!(dir.resolve("nobody@example.org"), None);
    }

    #[test]
    fn test_recipient_values() {
        let r = ana();
        let values = r.values();
        assert_eq!(values.get("recipient_name").map(String::as_str), Some("Ana"));
        assert_eq!(values.get("recipient_email").map(String::as_str), Some("ana@example.org"));
        assert_eq!(values.get("recipient_id"), Some(&r.id.to_string()));
    }

    #[test]
    fn test_entry_stem_strips_separators() {
        assert_eq!(entry_stem("2026/CF-001"), "2026_CF-001");
        assert_eq!(entry_stem("..\\x"), ".._x");
    }

    #[test]
    fn test_report_into_result() {
        let mut report = BulkReport::default();
        report.record(1, Err(Error::validation("row 1: missing cell recipient_email")));
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors[0].row, 1);
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::PartialBatchFailure { succeeded: 0, failed: 1 }));
    }
}
