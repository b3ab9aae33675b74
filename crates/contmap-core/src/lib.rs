//! # contmap-core
//!
//! A library for recursively mapping the byte-level structure of binary
//! container files.
//!
//! This crate provides the core functionality for:
//! - Classifying byte ranges by mime type and splitting off embedded files
//! - Decomposing PDF, MPEG audio, JPEG and zlib data into named segments of
//!   byte-range fragments
//! - Proving that every byte is accounted for by computing the uncovered gaps
//!   of each section
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`mapping`]: The work-queue orchestrator
//! - [`analyzer`]: The analyzer contract, registry and format analyzers
//! - [`model`]: Sections, segments and fragments
//! - [`coverage`]: The interval gap algorithm
//! - [`mime`]: Mime table and classification
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use contmap_core::{MappingConfig, StructureMapper};
//!
//! let mapper = StructureMapper::with_config(MappingConfig::new().max_depth(8));
//! for section in mapper.map_file("./document.pdf")? {
//!     println!(
//!         "{} at {} ({:?} bytes)",
//!         section.mime_type(),
//!         section.position(),
//!         section.length()
//!     );
//! }
//! # Ok::<(), contmap_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`StructureAnalyzer`]: Add an analyzer for another format
//! - [`MimeClassifier`]: Replace the byte-sniffing classification
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod analyzer;
pub mod bits;
pub mod coverage;
pub mod error;
pub mod mapping;
pub mod mime;
pub mod model;

// Re-export primary types for convenience
pub use analyzer::{AnalysisRequest, AnalyzerRegistry, Outcome, StructureAnalyzer};
pub use error::{Error, Result};
pub use mapping::{map_file, map_file_with_config, MappingConfig, StructureMapper};
pub use mime::{MimeClassifier, MimeInfo, MimeTable, SignatureClassifier};
pub use model::{Fragment, Section, Segment, UNCOVERED_KEY, UNKNOWN_MIME_TYPE};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
