//! Paged Document Model
//!
//! Originals, signed artifacts and certificates share one canonical JSON
//! format. Serialization sorts keys so equal documents are equal bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::canonical_json;
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_min_version")]
    pub engine_min_version: String,
    pub pages: Vec<Page>,
}

fn default_min_version() -> String { crate::MIN_DOCUMENT_VERSION.to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        media_type: String,
        data_base64: String,
        image_sha256: String,
        caption: Vec<String>,
    },
    Text {
        x: f64,
        y: f64,
        lines: Vec<String>,
        font_size: u32,
        font_family: FontFamily,
        alignment: Alignment,
    },
    Qr {
        x: f64,
        y: f64,
        size: f64,
        payload: String,
    },
}

impl Overlay {
    pub fn is_qr(&self) -> bool {
        matches!(self, Overlay::Qr { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFamily {
    #[default]
    Helvetica,
    Times,
    Courier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Document {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            engine_min_version: default_min_version(),
            pages,
        }
    }

    /// Parse and check format compatibility with this engine.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let doc: Document = serde_json::from_slice(data)
            .map_err(|e| Error::validation(format!("unreadable document: {}", e)))?;
        doc.check_engine_version()?;
        Ok(doc)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(canonical_json(self)?)
    }

    /// An original is a non-empty set of well-formed pages without overlays.
    pub fn validate_original(&self) -> Result<()> {
        if self.pages.is_empty() {
            return Err(Error::validation("document has no pages"));
        }
        for (idx, page) in self.pages.iter().enumerate() {
            if !(page.width > 0.0 && page.height > 0.0) {
                return Err(Error::validation(format!(
                    "page {} has invalid dimensions {}x{}",
                    idx + 1,
                    page.width,
                    page.height
                )));
            }
            if !page.overlays.is_empty() {
                return Err(Error::validation(format!(
                    "page {} of an original must not carry overlays",
                    idx + 1
                )));
            }
        }
        Ok(())
    }

    /// 1-based page lookup.
    pub fn page(&self, number: u32) -> Option<&Page> {
        (number as usize)
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
    }

    pub fn overlay_count(&self) -> usize {
        self.pages.iter().map(|p| p.overlays.len()).sum()
    }

    fn check_engine_version(&self) -> Result<()> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| Error::validation("invalid engine version"))?;
        let min_ver = semver::Version::parse(&self.engine_min_version).map_err(|_| {
            Error::validation(format!(
                "invalid document engine version: {}",
                self.engine_min_version
            ))
        })?;
        if engine_ver < min_ver {
            return Err(Error::validation(format!(
                "document requires engine >= {}, current is {}",
                min_ver, engine_ver
            )));
        }
        Ok(())
    }
}
