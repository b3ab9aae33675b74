//! The structure mapping orchestrator.
//!
//! [`StructureMapper`] drains a FIFO queue of pending analyses. Each entry
//! names a byte range of a source buffer (the input file, or bytes an
//! analyzer materialized, such as inflated zlib data) and the recursion depth
//! it was requested at.
//!
//! ## Algorithm Overview
//!
//! 1. Pop the oldest entry; drop it silently if its depth exceeds the cap
//! 2. Classify the bytes of the entry
//! 3. If the type is unsupported, look for the nearest magic signature of a
//!    supported type after the start and split the range there
//! 4. Run the registered analyzer, append its requests to the queue
//! 5. Attach the Coverage result and emit the now immutable [`Section`]
//!
//! Appending requests to the tail makes the walk breadth-first, so the
//! output order follows file order for siblings.

use crate::analyzer::{AnalysisRequest, AnalyzerRegistry};
use crate::coverage;
use crate::error::{Error, Result};
use crate::mime::{MimeClassifier, MimeTable, SignatureClassifier};
use crate::model::{Section, Segment, UNCOVERED_KEY, UNKNOWN_MIME_TYPE};
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, trace, warn};

/// Default recursion depth cap
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Configuration for the mapper
#[derive(Debug, Clone)]
pub struct MappingConfig {
    /// Entries requested deeper than this are dropped without a section
    pub max_depth: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl MappingConfig {
    /// Creates a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recursion depth cap
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

#[derive(Debug, Clone)]
enum Source {
    File,
    Derived { data: Bytes, parent: usize },
}

#[derive(Debug, Clone)]
struct QueueEntry {
    position: usize,
    length: Option<usize>,
    depth: usize,
    source: Source,
}

/// Recursive structure mapper
pub struct StructureMapper {
    config: MappingConfig,
    classifier: Box<dyn MimeClassifier>,
    registry: AnalyzerRegistry,
    mime_table: MimeTable,
}

impl fmt::Debug for StructureMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureMapper")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("mime_table", &self.mime_table)
            .finish_non_exhaustive()
    }
}

impl Default for StructureMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureMapper {
    /// Creates a mapper with the built-in classifier, analyzers and table
    pub fn new() -> Self {
        Self::with_config(MappingConfig::default())
    }

    /// Creates a mapper with custom configuration
    pub fn with_config(config: MappingConfig) -> Self {
        Self {
            config,
            classifier: Box::new(SignatureClassifier::new()),
            registry: AnalyzerRegistry::default(),
            mime_table: MimeTable::default(),
        }
    }

    /// Replaces the mime classifier
    pub fn with_classifier(mut self, classifier: impl MimeClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Replaces the analyzer registry
    pub fn with_registry(mut self, registry: AnalyzerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the table of supported mime types
    pub fn with_mime_table(mut self, mime_table: MimeTable) -> Self {
        self.mime_table = mime_table;
        self
    }

    /// The active configuration
    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Maps a byte slice
    pub fn map(&self, data: &[u8]) -> Result<Vec<Section>> {
        self.run(Bytes::copy_from_slice(data))
    }

    /// Reads and maps a file
    pub fn map_file(&self, path: impl AsRef<Path>) -> Result<Vec<Section>> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        self.run(Bytes::from(data))
    }

    /// Maps `file` and returns its sections in completion order
    ///
    /// Fails only on configuration errors: a supported mime type whose
    /// analyzer is not registered.
    pub fn run(&self, file: Bytes) -> Result<Vec<Section>> {
        let mut queue = VecDeque::from([QueueEntry {
            position: 0,
            length: None,
            depth: 0,
            source: Source::File,
        }]);
        let mut sections = Vec::new();

        debug!("Starting structure mapping of {} bytes", file.len());

        while let Some(entry) = queue.pop_front() {
            if entry.depth > self.config.max_depth {
                debug!(
                    "dropping analysis at {} beyond depth {}",
                    entry.position, self.config.max_depth
                );
                continue;
            }

            let (buffer, derived_from) = match &entry.source {
                Source::File => (&file, None),
                Source::Derived { data, parent } => (data, Some(*parent)),
            };
            let start = entry.position.min(buffer.len());
            let end = entry
                .length
                .map_or(buffer.len(), |length| start.saturating_add(length).min(buffer.len()));
            if start >= end {
                debug!("nothing to map at {}", entry.position);
                continue;
            }
            let mut slice = &buffer[start..end];

            let mime_type = self.classifier.classify(slice);
            let info = mime_type.as_deref().and_then(|m| self.mime_table.get(m));

            if info.is_none() {
                if let Some(offset) = self.resync(slice) {
                    debug!("resynchronized at {} after {} unsupported bytes", start + offset, offset);
                    queue.push_back(QueueEntry {
                        position: start + offset,
                        length: Some(slice.len() - offset),
                        depth: entry.depth + 1,
                        source: entry.source.clone(),
                    });
                    slice = &slice[..offset];
                }
            }

            let mut section = Section::new(
                start,
                mime_type.as_deref().unwrap_or(UNKNOWN_MIME_TYPE),
                entry.depth,
            )
            .derived_from(derived_from);

            let requests = match info {
                Some(info) => {
                    let analyzer = self.registry.get(&info.analyzer_id).ok_or_else(|| {
                        Error::analyzer_not_registered(section.mime_type(), &info.analyzer_id)
                    })?;
                    section.set_mime_name(&info.display_name);
                    trace!("running {} at {}", info.analyzer_id, start);
                    let (analyzed, requests) = analyzer.process(section, slice).into_parts();
                    section = analyzed;
                    requests
                }
                None => {
                    if let Some(mime_type) = &mime_type {
                        warn!("unsupported mime type {} at {}", mime_type, start);
                    }
                    section.set_length(slice.len());
                    Vec::new()
                }
            };

            let index = sections.len();
            for request in requests {
                queue.push_back(match request {
                    AnalysisRequest::Range { offset, length } => QueueEntry {
                        position: start + offset,
                        length: length.or_else(|| Some(slice.len().saturating_sub(offset))),
                        depth: entry.depth + 1,
                        source: entry.source.clone(),
                    },
                    AnalysisRequest::Derived(data) => QueueEntry {
                        position: 0,
                        length: None,
                        depth: entry.depth + 1,
                        source: Source::Derived {
                            data,
                            parent: index,
                        },
                    },
                });
            }

            let uncovered = match coverage::for_section(&section) {
                Ok(segment) => segment,
                Err(e) => {
                    error!(
                        "coverage failed for {} section at {}: {}",
                        section.mime_type(),
                        start,
                        e
                    );
                    Segment::new(UNCOVERED_KEY)
                }
            };
            section.finalize(uncovered);

            debug!(
                "{} section at {} ({:?} bytes, depth {})",
                section.mime_type(),
                section.position(),
                section.length(),
                section.analysis_depth()
            );
            sections.push(section);
        }

        debug!("Structure mapping complete: {} sections", sections.len());
        Ok(sections)
    }

    /// Offset of the nearest supported magic signature after the start
    fn resync(&self, slice: &[u8]) -> Option<usize> {
        let tail = slice.get(1..)?;
        self.mime_table
            .iter()
            .flat_map(|(_, info)| info.signatures.iter())
            .filter_map(|signature| crate::analyzer::find_subsequence(tail, signature))
            .min()
            .map(|i| i + 1)
    }
}

/// Map a file with the default mapper
///
/// This is a convenience function that reads the file and maps it.
pub fn map_file(path: impl AsRef<Path>) -> Result<Vec<Section>> {
    StructureMapper::new().map_file(path)
}

/// Map a file with custom configuration
pub fn map_file_with_config(path: impl AsRef<Path>, config: MappingConfig) -> Result<Vec<Section>> {
    StructureMapper::with_config(config).map_file(path)
}
