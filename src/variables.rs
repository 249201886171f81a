//! Variable Positions - typed stamping slots on a signed template
//!
//! Value precedence follows the order of the sources handed to `stamp`
//! (explicit value, row cell, recipient fields), then the slot default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{Alignment, Document, FontFamily, Overlay, Page};
use crate::error::{Error, Result};

pub const MIN_FONT_SIZE: u32 = 6;
pub const MAX_FONT_SIZE: u32 = 96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablePosition {
    pub name: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub x_ratio: Option<f64>,
    #[serde(default)]
    pub y_ratio: Option<f64>,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default)]
    pub font_family: FontFamily,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

fn default_page() -> u32 { 1 }
fn default_font_size() -> u32 { 12 }
fn default_true() -> bool { true }

pub type Values = BTreeMap<String, String>;

impl VariablePosition {
    pub fn at(name: impl Into<String>, page: u32, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            page,
            x: Some(x),
            y: Some(y),
            x_ratio: None,
            y_ratio: None,
            font_size: default_font_size(),
            font_family: FontFamily::default(),
            alignment: Alignment::default(),
            required: true,
            default_value: None,
        }
    }

    pub fn validate(&self, page_count: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("variable name is empty"));
        }
        if self.page == 0 || self.page as usize > page_count {
            return Err(Error::validation(format!(
                "variable {} targets page {} of {}",
                self.name, self.page, page_count
            )));
        }
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&self.font_size) {
            return Err(Error::validation(format!(
                "variable {} font size {} outside {}-{}",
                self.name, self.font_size, MIN_FONT_SIZE, MAX_FONT_SIZE
            )));
        }
        for (axis, absolute, ratio) in [("x", self.x, self.x_ratio), ("y", self.y, self.y_ratio)] {
            if let Some(ratio) = ratio {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(Error::validation(format!(
                        "variable {} {} ratio {} outside 0-1",
                        self.name, axis, ratio
                    )));
                }
            }
            match absolute {
                Some(v) if !(v.is_finite() && v >= 0.0) => {
                    return Err(Error::validation(format!(
                        "variable {} has invalid {} coordinate",
                        self.name, axis
                    )));
                }
                None if ratio.is_none() => {
                    return Err(Error::validation(format!(
                        "variable {} has no {} coordinate",
                        self.name, axis
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Absolute coordinates win over fractions of the page size.
    pub fn anchor(&self, page: &Page) -> (f64, f64) {
        let x = self.x.or(self.x_ratio.map(|r| r * page.width)).unwrap_or(0.0);
        let y = self.y.or(self.y_ratio.map(|r| r * page.height)).unwrap_or(0.0);
        (x, y)
    }

    /// First non-blank value among `sources`, in order, else the default.
    pub fn resolve(&self, sources: &[&Values]) -> Option<String> {
        sources
            .iter()
            .filter_map(|values| values.get(&self.name))
            .chain(self.default_value.as_ref())
            .find(|v| !v.trim().is_empty())
            .cloned()
    }
}

pub fn validate_positions(positions: &[VariablePosition], page_count: usize) -> Result<()> {
    for (idx, pos) in positions.iter().enumerate() {
        pos.validate(page_count)?;
        if positions[idx + 1..].iter().any(|p| p.name == pos.name) {
            return Err(Error::validation(format!("variable {} is defined twice", pos.name)));
        }
    }
    Ok(())
}

/// Stamp resolved values onto a copy of `base`.
pub fn stamp(
    base: &Document,
    positions: &[VariablePosition],
    sources: &[&Values],
) -> Result<Document> {
    let mut doc = base.clone();
    for pos in positions {
        let value = match pos.resolve(sources) {
            Some(value) => value,
            None if pos.required => {
                return Err(Error::validation(format!("missing value for {}", pos.name)));
            }
            None => continue,
        };
        let idx = (pos.page as usize)
            .checked_sub(1)
            .filter(|i| *i < doc.pages.len())
            .ok_or_else(|| {
                Error::validation(format!("variable {} targets a missing page", pos.name))
            })?;
        let page = &mut doc.pages[idx];
        let (x, y) = pos.anchor(page);
        page.overlays.push(Overlay::Text {
            x,
            y,
            lines: vec![value],
            font_size: pos.font_size,
            font_family: pos.font_family,
            alignment: pos.alignment,
        });
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> Values {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_resolution_precedence() {
        let mut pos = VariablePosition::at("name", 1, 10.0, 10.0);
        pos.default_value = Some("Default".into());
        let explicit = values(&[("name", "Explicit")]);
        let row = values(&[("name", "Row")]);
        let recipient = values(&[("name", "Recipient")]);
        let blank = values(&[("name", " ")]);
        let empty = Values::new();
        assert_eq!(pos.resolve(&[&explicit, &row, &recipient]).as_deref(), Some("Explicit"));
        assert_eq!(pos.resolve(&[&empty, &row, &recipient]).as_deref(), Some("Row"));
        assert_eq!(pos.resolve(&[&blank, &empty, &recipient]).as_deref(), Some("Recipient"));
        assert_eq!(pos.resolve(&[&blank, &empty, &empty]).as_deref(), Some("Default"));
    }

    #[test]
    fn test_validation_ranges() {
        let mut pos = VariablePosition::at("name", 1, 10.0, 10.0);
        assert!(pos.validate(1).is_ok());
        assert!(pos.validate(0).is_err());
        pos.font_size = 200;
        assert!(pos.validate(1).is_err());
        pos.font_size = 12;
        pos.x = None;
        assert!(pos.validate(1).is_err());
        pos.x_ratio = Some(1.5);
        assert!(pos.validate(1).is_err());
        pos.x_ratio = Some(0.5);
        assert!(pos.validate(1).is_ok());

        let dup = vec![
            VariablePosition::at("a", 1, 0.0, 0.0),
            VariablePosition::at("a", 1, 1.0, 1.0),
        ];
        assert!(validate_positions(&dup, 1).is_err());
    }

    #[test]
    fn test_stamp_uses_ratio_anchor() {
        let page = Page { width: 200.0, height: 100.0, content: String::new(), overlays: vec![] };
        let base = Document::new(vec![page]);
        let mut pos = VariablePosition::at("course", 1, 0.0, 0.0);
        pos.x = None;
        pos.x_ratio = Some(0.5);
        pos.alignment = Alignment::Center;
        let doc = stamp(&base, &[pos], &[&values(&[("course", "Rust 101")])]).unwrap();
        match &doc.pages[0].overlays[0] {
            Overlay::Text { x, lines, alignment, .. } => {
                assert_eq!(*x, 100.0);
                assert_eq!(lines, &vec!["Rust 101".to_string()]);
                assert_eq!(*alignment, Alignment::Center);
            }
            other => panic!("unexpected overlay {:?}", other),
        }
        assert!(base.pages[0].overlays.is_empty());
    }

    #[test]
    fn test_stamp_missing_required() {
        let page = Page { width: 10.0, height: 10.0, content: String::new(), overlays: vec![] };
        let base = Document::new(vec![page]);
        let positions = [VariablePosition::at("name", 1, 0.0, 0.0)];
        let err = stamp(&base, &positions, &[&Values::new(), &Values::new()]).unwrap_err();
        assert!(err.to_string().contains("missing value for name"));
    }
}
