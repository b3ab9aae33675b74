//! Byte-range data model: [`Fragment`], [`Segment`] and [`Section`].
//!
//! A [`Section`] is a contiguous byte range classified to one mime type. It
//! is decomposed into named [`Segment`]s, each an ordered list of
//! [`Fragment`]s. Fragment offsets are relative to the owning section.
//!
//! Sections never own the bytes they describe; analyzers receive the slice
//! alongside the section and record only offsets, lengths and attributes.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Segment key reserved for the orchestrator's Coverage result
pub const UNCOVERED_KEY: &str = "uncovered";

/// Mime type recorded for sections the classifier could not identify
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

/// The atomic unit of a structure map: a byte range plus open attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    /// Offset relative to the owning section
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
    /// Analyzer-defined attributes, JSON-tree representable
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl Fragment {
    /// Creates a fragment without attributes
    pub fn new(offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            attributes: Map::new(),
        }
    }

    /// Creates a fragment spanning `start..end`
    pub fn spanning(start: usize, end: usize) -> Self {
        Self::new(start, end.saturating_sub(start))
    }

    /// Sets an attribute; a `Value::Null` removes an existing key
    ///
    /// The reserved keys `offset` and `length` are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == "offset" || key == "length" {
            warn!("ignoring reserved fragment attribute '{}'", key);
            return;
        }
        match value.into() {
            Value::Null => {
                self.attributes.remove(&key);
            }
            value => {
                self.attributes.insert(key, value);
            }
        }
    }

    /// Builder-style variant of [`Fragment::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Merges every entry of a JSON object into the attributes
    pub fn extend(&mut self, attributes: Map<String, Value>) {
        for (key, value) in attributes {
            self.set(key, value);
        }
    }

    /// Returns an attribute by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns all attributes
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// End offset (exclusive)
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Returns the fragment as a JSON object, for nesting inside attributes
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("offset".into(), self.offset.into());
        object.insert("length".into(), self.length.into());
        object.extend(self.attributes.clone());
        Value::Object(object)
    }
}

/// A named, ordered collection of fragments sharing a structural role
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    key: String,
    fragments: Vec<Fragment>,
}

impl Segment {
    /// Creates an empty segment
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fragments: Vec::new(),
        }
    }

    /// Appends a fragment
    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    /// The segment key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fragments in insertion order
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Returns true if the segment has no fragments
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fragments.serialize(serializer)
    }
}

/// A contiguous byte range classified to one mime type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    position: usize,
    length: Option<usize>,
    mime_type: String,
    mime_name: Option<String>,
    analysis_depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_from: Option<usize>,
    segments: BTreeMap<String, Segment>,
    #[serde(skip)]
    frozen: bool,
}

impl Section {
    /// Creates a section with unknown length and no segments
    pub fn new(position: usize, mime_type: impl Into<String>, analysis_depth: usize) -> Self {
        Self {
            position,
            length: None,
            mime_type: mime_type.into(),
            mime_name: None,
            analysis_depth,
            derived_from: None,
            segments: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Marks the section as describing bytes materialized by another section
    pub fn derived_from(mut self, section_index: Option<usize>) -> Self {
        self.derived_from = section_index;
        self
    }

    /// Adds a segment, appending to an existing one with the same key
    ///
    /// The reserved [`UNCOVERED_KEY`] is produced by the orchestrator only and
    /// is rejected here.
    pub fn add_segment(&mut self, segment: Segment) {
        if segment.key == UNCOVERED_KEY {
            warn!(
                "section at {} tried to add reserved segment '{}'",
                self.position, UNCOVERED_KEY
            );
            return;
        }
        self.insert_segment(segment);
    }

    fn insert_segment(&mut self, segment: Segment) {
        if !self.ensure_mutable() {
            return;
        }
        match self.segments.get_mut(&segment.key) {
            Some(existing) => existing.fragments.extend(segment.fragments),
            None => {
                self.segments.insert(segment.key.clone(), segment);
            }
        }
    }

    /// Sets the section length
    pub fn set_length(&mut self, length: usize) {
        if self.ensure_mutable() {
            self.length = Some(length);
        }
    }

    /// Sets the length to the furthest fragment end across all segments
    pub fn calculate_length(&mut self) {
        let end = self
            .fragments()
            .map(Fragment::end)
            .max()
            .unwrap_or(0);
        self.set_length(end);
    }

    /// Sets the human-readable mime name
    pub fn set_mime_name(&mut self, mime_name: impl Into<String>) {
        if self.ensure_mutable() {
            self.mime_name = Some(mime_name.into());
        }
    }

    /// Attaches the Coverage result and makes the section immutable
    pub(crate) fn finalize(&mut self, uncovered: Segment) {
        let mut uncovered = uncovered;
        uncovered.key = UNCOVERED_KEY.to_string();
        self.segments.remove(UNCOVERED_KEY);
        self.insert_segment(uncovered);
        self.frozen = true;
    }

    fn ensure_mutable(&self) -> bool {
        if self.frozen {
            warn!("ignoring mutation of finalized section at {}", self.position);
        }
        !self.frozen
    }

    /// Position of the section within its source buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Final length, `None` until an analyzer or the orchestrator sets it
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Classified mime type
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Display name from the mime table, if the type is supported
    pub fn mime_name(&self) -> Option<&str> {
        self.mime_name.as_deref()
    }

    /// Recursion depth at which this section was analyzed
    pub fn analysis_depth(&self) -> usize {
        self.analysis_depth
    }

    /// Index of the section whose derived bytes this section describes
    pub fn source_section(&self) -> Option<usize> {
        self.derived_from
    }

    /// Returns a segment by key
    pub fn segment(&self, key: &str) -> Option<&Segment> {
        self.segments.get(key)
    }

    /// All segments ordered by key
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Every fragment of every segment
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.segments.values().flat_map(|s| s.fragments.iter())
    }

    /// Returns true once Coverage has been attached
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_fragment_attributes() {
        let mut fragment = Fragment::new(4, 2).with("type", "name");
        fragment.set("data", "/Type");
        assert_eq!(fragment.get("type"), Some(&json!("name")));

        fragment.set("data", Value::Null);
        assert!(fragment.get("data").is_none());

        fragment.set("offset", 99);
        assert_eq!(fragment.offset, 4);
    }

    #[test]
    fn test_fragment_serialization_flattens_attributes() {
        let fragment = Fragment::new(0, 3).with("id", 216);
        assert_eq!(
            serde_json::to_value(&fragment).unwrap(),
            json!({"offset": 0, "length": 3, "id": 216})
        );
        assert_eq!(fragment.to_value(), json!({"offset": 0, "length": 3, "id": 216}));
    }

    #[test]
    fn test_add_segment_merges_same_key() {
        let mut section = Section::new(0, "application/pdf", 0);
        let mut first = Segment::new("body");
        first.push(Fragment::new(0, 5));
        let mut second = Segment::new("body");
        second.push(Fragment::new(5, 5));

        section.add_segment(first);
        section.add_segment(second);

        assert_eq!(section.segment("body").unwrap().len(), 2);
    }

    #[test]
    fn test_reserved_segment_rejected() {
        let mut section = Section::new(0, "image/jpeg", 0);
        let mut uncovered = Segment::new(UNCOVERED_KEY);
        uncovered.push(Fragment::new(0, 1));
        section.add_segment(uncovered);
        assert!(section.segment(UNCOVERED_KEY).is_none());
    }

    #[test]
    fn test_calculate_length() {
        let mut section = Section::new(10, "audio/mpeg", 1);
        let mut segment = Segment::new("mpeg_frames");
        segment.push(Fragment::new(0, 417));
        segment.push(Fragment::new(417, 418));
        section.add_segment(segment);
        section.calculate_length();
        assert_eq!(section.length(), Some(835));
    }

    #[test]
    fn test_finalized_section_is_immutable() {
        let mut section = Section::new(0, UNKNOWN_MIME_TYPE, 0);
        section.set_length(8);
        section.finalize(Segment::new("gaps"));
        section.set_length(1);
        section.add_segment(Segment::new("late"));

        assert!(section.is_frozen());
        assert_eq!(section.length(), Some(8));
        assert!(section.segment("late").is_none());
        assert!(section.segment(UNCOVERED_KEY).is_some());
    }

    #[test]
    fn test_section_serialization() {
        let mut section = Section::new(12, "image/jpeg", 1).derived_from(Some(0));
        section.set_mime_name("JPEG image");
        section.set_length(2);
        let mut segment = Segment::new("jpeg_segments");
        segment.push(Fragment::new(0, 2).with("name", "SOI"));
        section.add_segment(segment);

        assert_eq!(
            serde_json::to_value(&section).unwrap(),
            json!({
                "position": 12,
                "length": 2,
                "mime_type": "image/jpeg",
                "mime_name": "JPEG image",
                "analysis_depth": 1,
                "derived_from": 0,
                "segments": {
                    "jpeg_segments": [{"offset": 0, "length": 2, "name": "SOI"}]
                }
            })
        );
    }
}
