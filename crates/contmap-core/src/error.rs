//! Error types for the contmap-core library.
//!
//! Only configuration and resource errors ever abort a mapping run. Decoding
//! gaps inside an analyzer are reported through [`Error::Truncated`] and
//! absorbed by the analyzer itself, and accounting errors from Coverage are
//! absorbed by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for contmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all contmap operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A mime type is declared as supported but no analyzer is registered for it
    #[error("mime type '{mime_type}' declares analyzer '{analyzer_id}' which is not registered")]
    AnalyzerNotRegistered {
        /// The declared mime type
        mime_type: String,
        /// The analyzer id the mime table points at
        analyzer_id: String,
    },

    /// Coverage was requested for a section without a usable length
    #[error("coverage is undefined for section length {length:?}")]
    UndefinedCoverage {
        /// The offending length (`None` when it was never set)
        length: Option<usize>,
    },

    /// A structure ran past the end of the available bytes
    #[error("truncated structure at offset {offset}: {details}")]
    Truncated {
        /// Byte (or bit, for bit readers) offset where reading stopped
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// A magic signature in the mime table is not valid hex
    #[error("invalid magic signature '{signature}': expected an even number of hex digits")]
    InvalidSignature {
        /// The rejected signature text
        signature: String,
    },

    /// Failed to parse a mime table document
    #[error("failed to parse mime table: {0}")]
    MimeTable(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new unregistered analyzer error
    pub fn analyzer_not_registered(
        mime_type: impl Into<String>,
        analyzer_id: impl Into<String>,
    ) -> Self {
        Self::AnalyzerNotRegistered {
            mime_type: mime_type.into(),
            analyzer_id: analyzer_id.into(),
        }
    }

    /// Creates a new truncation error
    pub fn truncated(offset: usize, details: impl Into<String>) -> Self {
        Self::Truncated {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new invalid signature error
    pub fn invalid_signature(signature: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
        }
    }

    /// Returns true if the mapping run can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::UndefinedCoverage { .. }
        )
    }
}
