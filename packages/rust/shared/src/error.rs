//! Error types for careerkb.
//!
//! Library crates use [`CareerKbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Why a document could not be turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The document is password protected.
    Encrypted,
    /// The document is damaged or the extractor rejected it.
    Corrupt,
    /// No extractor is available for the declared type.
    Unsupported,
    /// The file does not exist or cannot be opened.
    Missing,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Encrypted => "encrypted",
            Self::Corrupt => "corrupt",
            Self::Unsupported => "unsupported format",
            Self::Missing => "missing",
        })
    }
}

/// Why a public profile or patent page could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeFailure {
    PrivateProfile,
    Network,
    InvalidUrl,
}

impl fmt::Display for ScrapeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrivateProfile => "private profile",
            Self::Network => "network failure",
            Self::InvalidUrl => "invalid URL",
        })
    }
}

/// Top-level error type for all careerkb operations.
#[derive(Debug, thiserror::Error)]
pub enum CareerKbError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Upstream document problem; aborts ingestion of that document only.
    #[error("extraction error ({kind}) for {source_ref}: {message}")]
    Extraction {
        source_ref: String,
        kind: ExtractionFailure,
        message: String,
    },

    /// Profile or patent page could not be scraped.
    #[error("scrape error ({kind}) for {url}: {message}")]
    Scrape {
        url: String,
        kind: ScrapeFailure,
        message: String,
    },

    /// The normalizer found no usable content.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// An existing knowledge-base entry blocks comparison.
    #[error("conflict analysis error: {message}")]
    ConflictAnalysis { message: String },

    /// Invalid state transition or unresolved contradiction.
    #[error("approval error: {message}")]
    Approval { message: String },

    /// Filesystem I/O error in a store or collaborator.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A store lock could not be acquired in time.
    #[error("timed out after {timeout_ms}ms waiting for the {resource} lock")]
    LockTimeout {
        resource: &'static str,
        timeout_ms: u64,
    },

    /// A staged item or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The operation was cancelled before it committed anything.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CareerKbError>;

impl CareerKbError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn approval(msg: impl Into<String>) -> Self {
        Self::Approval {
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConflictAnalysis {
            message: msg.into(),
        }
    }

    pub fn extraction(
        source_ref: impl Into<String>,
        kind: ExtractionFailure,
        msg: impl Into<String>,
    ) -> Self {
        Self::Extraction {
            source_ref: source_ref.into(),
            kind,
            message: msg.into(),
        }
    }

    pub fn scrape(url: impl Into<String>, kind: ScrapeFailure, msg: impl Into<String>) -> Self {
        Self::Scrape {
            url: url.into(),
            kind,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Store failures imply the persistence layer itself is unavailable and
    /// abort a whole batch; everything else is local to one document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CareerKbError::config("missing staging dir");
        assert_eq!(err.to_string(), "config error: missing staging dir");

        let err = CareerKbError::extraction("cv.pdf", ExtractionFailure::Encrypted, "needs password");
        assert!(err.to_string().contains("(encrypted)"));
        assert!(err.to_string().contains("cv.pdf"));

        let err = CareerKbError::LockTimeout {
            resource: "staging",
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 250ms waiting for the staging lock"
        );
    }

    #[test]
    fn only_store_failures_are_fatal() {
        let io = CareerKbError::io("/tmp/x", std::io::Error::other("disk gone"));
        assert!(io.is_fatal());
        assert!(
            CareerKbError::LockTimeout {
                resource: "knowledge base",
                timeout_ms: 1
            }
            .is_fatal()
        );
        assert!(!CareerKbError::parse("empty").is_fatal());
        assert!(!CareerKbError::approval("not pending").is_fatal());
        assert!(
            !CareerKbError::scrape("https://x", ScrapeFailure::Network, "reset").is_fatal()
        );
    }
}
