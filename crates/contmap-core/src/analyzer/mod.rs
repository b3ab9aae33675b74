//! Pluggable format analyzers.
//!
//! Every supported mime type is handled by one [`StructureAnalyzer`]. An
//! analyzer receives the [`Section`] built by the orchestrator together with
//! the bytes it covers, decomposes those bytes into segments and fragments,
//! and hands the section back inside an [`Outcome`]. Work that has to happen
//! elsewhere (an embedded thumbnail, a decompressed stream, the tail behind
//! a file's logical end) is requested through the outcome and scheduled by
//! the orchestrator after the analyzer returns.
//!
//! ## Contract
//!
//! - `process` never panics and never fails on malformed input; unknown
//!   structure degrades to uncovered bytes.
//! - Analyzers set the section length (usually via
//!   [`Section::calculate_length`]) and never emit fragments beyond it.
//! - The `uncovered` segment key is reserved for the orchestrator.
//!
//! ```
//! use contmap_core::analyzer::{Outcome, StructureAnalyzer};
//! use contmap_core::{Fragment, Section, Segment};
//!
//! struct MagicOnly;
//!
//! impl StructureAnalyzer for MagicOnly {
//!     fn process(&self, mut section: Section, data: &[u8]) -> Outcome {
//!         let mut magic = Segment::new("magic");
//!         magic.push(Fragment::new(0, data.len().min(4)));
//!         section.add_segment(magic);
//!         section.calculate_length();
//!         Outcome::new(section)
//!     }
//! }
//! ```

pub mod jpeg;
pub mod mpeg;
pub mod pdf;
pub mod zlib;

use crate::mime::{APPLICATION_PDF, APPLICATION_ZLIB, AUDIO_MPEG, IMAGE_JPEG};
use crate::model::Section;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

pub use jpeg::JpegAnalyzer;
pub use mpeg::AudioMpegAnalyzer;
pub use pdf::PdfAnalyzer;
pub use zlib::ZlibAnalyzer;

/// A sub-analysis requested by an analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    /// Analyze a range of the current source buffer
    Range {
        /// Offset relative to the requesting section
        offset: usize,
        /// Length, `None` for "until the end of the analyzed bytes"
        length: Option<usize>,
    },
    /// Analyze bytes the analyzer materialized itself
    Derived(Bytes),
}

/// Result of one analyzer invocation
#[derive(Debug, Clone)]
pub struct Outcome {
    section: Section,
    requests: Vec<AnalysisRequest>,
}

impl Outcome {
    /// Wraps a finished section without further requests
    pub fn new(section: Section) -> Self {
        Self {
            section,
            requests: Vec::new(),
        }
    }

    /// Requests analysis of `offset..offset+length` within the section
    pub fn request(&mut self, offset: usize, length: Option<usize>) {
        trace!(
            "section at {} requests analysis at +{} ({:?} bytes)",
            self.section.position(),
            offset,
            length
        );
        self.requests.push(AnalysisRequest::Range { offset, length });
    }

    /// Requests analysis of derived bytes
    pub fn request_derived(&mut self, data: impl Into<Bytes>) {
        self.requests.push(AnalysisRequest::Derived(data.into()));
    }

    /// Splits the outcome into its parts
    pub fn into_parts(self) -> (Section, Vec<AnalysisRequest>) {
        (self.section, self.requests)
    }
}

/// Trait implemented by every format analyzer
pub trait StructureAnalyzer: Send + Sync {
    /// Decomposes `data` (the bytes covered by `section`) into segments
    fn process(&self, section: Section, data: &[u8]) -> Outcome;
}

/// Maps analyzer ids to analyzer instances
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Box<dyn StructureAnalyzer>>,
}

impl fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.analyzers.keys().collect();
        ids.sort();
        f.debug_struct("AnalyzerRegistry").field("analyzers", &ids).finish()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::empty()
            .with(APPLICATION_PDF, PdfAnalyzer::new())
            .with(AUDIO_MPEG, AudioMpegAnalyzer::new())
            .with(IMAGE_JPEG, JpegAnalyzer::new())
            .with(APPLICATION_ZLIB, ZlibAnalyzer::new())
    }
}

impl AnalyzerRegistry {
    /// Creates a registry without analyzers
    pub fn empty() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    /// Registers an analyzer, replacing any previous one with the same id
    pub fn with(mut self, id: impl Into<String>, analyzer: impl StructureAnalyzer + 'static) -> Self {
        self.register(id, analyzer);
        self
    }

    /// Registers an analyzer in place
    pub fn register(&mut self, id: impl Into<String>, analyzer: impl StructureAnalyzer + 'static) {
        self.analyzers.insert(id.into(), Box::new(analyzer));
    }

    /// Looks up an analyzer
    pub fn get(&self, id: &str) -> Option<&dyn StructureAnalyzer> {
        self.analyzers.get(id).map(|a| a.as_ref())
    }

    /// Returns true if an analyzer is registered under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.analyzers.contains_key(id)
    }
}

/// Returns the index of the first occurrence of `needle` in `haystack`
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Returns the index of the first occurrence of `needle` at or after `from`
pub(crate) fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)
        .and_then(|tail| find_subsequence(tail, needle))
        .map(|i| from + i)
}
