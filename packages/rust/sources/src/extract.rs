//! Document-text extraction.
//!
//! Plain text is decoded in-process. PDF and DOCX go through external
//! converters (`pdftotext`, `pandoc` by default) whose argument vectors come
//! from config, with `{path}` replaced by the document path.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use careerkb_shared::{CareerKbError, ExtractionConfig, ExtractionFailure, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Declared type of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Pdf,
    Docx,
    Text,
}

impl DocumentType {
    /// Infer the type from the file extension. Anything that is not PDF or
    /// Word is read as text; legacy `.doc` files are unsupported.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "doc" => Err(CareerKbError::extraction(
                path.display().to_string(),
                ExtractionFailure::Unsupported,
                "legacy .doc files are not supported; convert to .docx",
            )),
            _ => Ok(Self::Text),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "text",
        })
    }
}

/// Turns a document on disk into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, kind: DocumentType) -> Result<String>;
}

/// Default extractor: in-process text decoding plus configured converters.
#[derive(Debug, Clone, Default)]
pub struct FileExtractor {
    config: ExtractionConfig,
}

impl FileExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, kind: DocumentType) -> &[String] {
        match kind {
            DocumentType::Pdf => &self.config.pdf_command,
            DocumentType::Docx => &self.config.docx_command,
            DocumentType::Text => &[],
        }
    }

    async fn run_converter(&self, path: &Path, kind: DocumentType) -> Result<String> {
        let source = path.display().to_string();
        let Some((program, args)) = self.command_for(kind).split_first() else {
            return Err(CareerKbError::extraction(
                &source,
                ExtractionFailure::Unsupported,
                format!("no {kind} converter configured"),
            ));
        };
        let args: Vec<String> = args.iter().map(|a| a.replace("{path}", &source)).collect();

        debug!(%program, ?args, "running converter");
        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let kind_of_failure = if e.kind() == ErrorKind::NotFound {
                    ExtractionFailure::Unsupported
                } else {
                    ExtractionFailure::Corrupt
                };
                CareerKbError::extraction(
                    &source,
                    kind_of_failure,
                    format!("failed to run `{program}`: {e}. Is it installed?"),
                )
            })?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                CareerKbError::extraction(
                    &source,
                    ExtractionFailure::Corrupt,
                    format!("`{program}` timed out after {:?}", self.config.timeout),
                )
            })?
            .map_err(|e| {
                CareerKbError::extraction(&source, ExtractionFailure::Corrupt, e.to_string())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lowered = stderr.to_ascii_lowercase();
            let failure = if lowered.contains("password") || lowered.contains("encrypt") {
                ExtractionFailure::Encrypted
            } else {
                ExtractionFailure::Corrupt
            };
            return Err(CareerKbError::extraction(
                &source,
                failure,
                format!("`{program}` exited with {}: {stderr}", output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextExtractor for FileExtractor {
    #[instrument(skip_all, fields(path = %path.display(), kind = %kind))]
    async fn extract(&self, path: &Path, kind: DocumentType) -> Result<String> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if !exists {
            return Err(CareerKbError::extraction(
                path.display().to_string(),
                ExtractionFailure::Missing,
                "file not found",
            ));
        }

        let text = match kind {
            DocumentType::Text => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    CareerKbError::extraction(
                        path.display().to_string(),
                        ExtractionFailure::Missing,
                        e.to_string(),
                    )
                })?;
                decode_text(&bytes)
            }
            DocumentType::Pdf | DocumentType::Docx => self.run_converter(path, kind).await?,
        };
        debug!(chars = text.len(), "extracted text");
        Ok(text)
    }
}

/// Decode text bytes: UTF-8 (BOM optional), UTF-16 with BOM, else lossy UTF-8.
///
/// Undecodable input keeps its U+FFFD replacements so the sanitizer can flag it.
pub fn decode_text(bytes: &[u8]) -> String {
    fn utf16(bytes: &[u8], from: fn([u8; 2]) -> u16) -> String {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| from([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }

    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
