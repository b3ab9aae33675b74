//! Mime type table and byte-sniffing classification.
//!
//! The [`MimeTable`] declares which mime types are supported, which analyzer
//! handles each of them and which magic signatures the orchestrator may use
//! to resynchronize on an embedded file. Classification itself is pluggable
//! through [`MimeClassifier`]; [`SignatureClassifier`] covers the formats
//! this crate ships analyzers for.

use crate::analyzer::mpeg::FrameHeader;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Analyzer id of the PDF analyzer
pub const APPLICATION_PDF: &str = "application_pdf";
/// Analyzer id of the MPEG audio analyzer
pub const AUDIO_MPEG: &str = "audio_mpeg";
/// Analyzer id of the JPEG analyzer
pub const IMAGE_JPEG: &str = "image_jpeg";
/// Analyzer id of the zlib analyzer
pub const APPLICATION_ZLIB: &str = "application_zlib";

/// Table entry for one supported mime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeInfo {
    /// Id of the analyzer registered for this type
    pub analyzer_id: String,
    /// Human-readable name recorded on sections
    pub display_name: String,
    /// Magic signatures used to resynchronize on embedded files
    pub signatures: Vec<Vec<u8>>,
}

impl MimeInfo {
    /// Creates a new entry
    pub fn new(
        analyzer_id: impl Into<String>,
        display_name: impl Into<String>,
        signatures: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            analyzer_id: analyzer_id.into(),
            display_name: display_name.into(),
            signatures,
        }
    }
}

/// JSON shape: `["analyzer_id", "display name", ["hex", ...]]`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMimeInfo {
    Plain(String, String),
    WithSignatures(String, String, Vec<String>),
}

/// Supported mime types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTable {
    entries: BTreeMap<String, MimeInfo>,
}

impl Default for MimeTable {
    fn default() -> Self {
        Self::empty()
            .with(
                "application/pdf",
                MimeInfo::new(
                    APPLICATION_PDF,
                    "Portable Document Format",
                    vec![b"%PDF-".to_vec()],
                ),
            )
            .with(
                "audio/mpeg",
                MimeInfo::new(AUDIO_MPEG, "MPEG audio", vec![b"ID3".to_vec()]),
            )
            .with(
                "image/jpeg",
                MimeInfo::new(IMAGE_JPEG, "JPEG image", vec![vec![0xFF, 0xD8, 0xFF]]),
            )
            .with(
                "application/zlib",
                MimeInfo::new(APPLICATION_ZLIB, "zlib compressed data", Vec::new()),
            )
    }
}

impl MimeTable {
    /// Creates a table without entries
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Adds or replaces an entry
    pub fn with(mut self, mime_type: impl Into<String>, info: MimeInfo) -> Self {
        self.entries.insert(mime_type.into(), info);
        self
    }

    /// Parses a table from its JSON representation
    ///
    /// ```
    /// let table = contmap_core::MimeTable::from_json(
    ///     r#"{"image/jpeg": ["image_jpeg", "JPEG image", ["ffd8ff"]]}"#,
    /// )?;
    /// assert!(table.get("image/jpeg").is_some());
    /// # Ok::<(), contmap_core::Error>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawMimeInfo> = serde_json::from_str(json)?;
        let mut table = Self::empty();
        for (mime_type, entry) in raw {
            let info = match entry {
                RawMimeInfo::Plain(id, name) => MimeInfo::new(id, name, Vec::new()),
                RawMimeInfo::WithSignatures(id, name, signatures) => {
                    let signatures = signatures
                        .iter()
                        .map(|s| decode_hex(s))
                        .collect::<Result<Vec<_>>>()?;
                    MimeInfo::new(id, name, signatures)
                }
            };
            table.entries.insert(mime_type, info);
        }
        Ok(table)
    }

    /// Looks up a mime type
    pub fn get(&self, mime_type: &str) -> Option<&MimeInfo> {
        self.entries.get(mime_type)
    }

    /// All entries ordered by mime type
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MimeInfo)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of supported mime types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no mime type is supported
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text.len() % 2 != 0 {
        return Err(Error::invalid_signature(text));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::invalid_signature(text))
        })
        .collect()
}

/// Trait for deciding the mime type of a byte slice
///
/// Implementations must be deterministic and free of side effects.
pub trait MimeClassifier: Send + Sync {
    /// Classifies `data`, returning `None` when the type is unknown
    fn classify(&self, data: &[u8]) -> Option<String>;
}

impl<F> MimeClassifier for F
where
    F: Fn(&[u8]) -> Option<String> + Send + Sync,
{
    fn classify(&self, data: &[u8]) -> Option<String> {
        self(data)
    }
}

/// Classifier recognizing the formats this crate has analyzers for
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier;

impl SignatureClassifier {
    /// Creates a new classifier
    pub fn new() -> Self {
        Self
    }

    fn is_zlib(data: &[u8]) -> bool {
        let [cmf, flg, ..] = data else {
            return false;
        };
        let method = cmf & 0x0F;
        let window = cmf >> 4;
        let preset_dictionary = flg & 0x20 != 0;
        method == 8
            && window <= 7
            && !preset_dictionary
            && (u16::from(*cmf) * 256 + u16::from(*flg)) % 31 == 0
    }
}

impl MimeClassifier for SignatureClassifier {
    fn classify(&self, data: &[u8]) -> Option<String> {
        let mime = if data.starts_with(b"%PDF-") {
            "application/pdf"
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if data.starts_with(b"ID3") || FrameHeader::parse(data).is_some() {
            "audio/mpeg"
        } else if Self::is_zlib(data) {
            "application/zlib"
        } else {
            return None;
        };
        Some(mime.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_table() {
        let table = MimeTable::default();
        assert_eq!(table.len(), 4);
        assert_eq!(table.get("application/pdf").unwrap().analyzer_id, APPLICATION_PDF);
        assert!(table.get("text/plain").is_none());
    }

    #[test]
    fn test_table_from_json() {
        let table = MimeTable::from_json(
            r#"{
                "application/pdf": ["application_pdf", "PDF", ["255044462d"]],
                "application/zlib": ["application_zlib", "zlib"]
            }"#,
        )
        .unwrap();

        assert_eq!(table.get("application/pdf").unwrap().signatures, vec![b"%PDF-".to_vec()]);
        assert!(table.get("application/zlib").unwrap().signatures.is_empty());
    }

    #[test]
    fn test_table_rejects_bad_signature() {
        let err = MimeTable::from_json(r#"{"a/b": ["a_b", "AB", ["abc"]]}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature { .. }));

        let err = MimeTable::from_json(r#"{"a/b": ["a_b", "AB", ["zz"]]}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature { .. }));
    }

    #[test]
    fn test_signature_classifier() {
        let classifier = SignatureClassifier::new();
        assert_eq!(classifier.classify(b"%PDF-1.7\n").as_deref(), Some("application/pdf"));
        assert_eq!(classifier.classify(&[0xFF, 0xD8, 0xFF, 0xE0]).as_deref(), Some("image/jpeg"));
        assert_eq!(classifier.classify(b"ID3\x04\x00").as_deref(), Some("audio/mpeg"));
        assert_eq!(classifier.classify(&[0xFF, 0xFB, 0x90, 0x64]).as_deref(), Some("audio/mpeg"));
        assert_eq!(classifier.classify(&[0x78, 0x9C, 0x01]).as_deref(), Some("application/zlib"));
        assert_eq!(classifier.classify(b"plain text"), None);
        assert_eq!(classifier.classify(&[]), None);
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |data: &[u8]| (!data.is_empty()).then(|| "x/y".to_string());
        assert_eq!(classifier.classify(b"a").as_deref(), Some("x/y"));
        assert_eq!(classifier.classify(b""), None);
    }
}
