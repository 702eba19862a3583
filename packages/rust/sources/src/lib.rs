//! Document collaborators for careerkb.
//!
//! Each collaborator turns an external source into plain text for the
//! sanitize and normalize stages:
//!
//! - [`FileExtractor`] reads text, PDF and DOCX files
//! - [`HttpProfileScraper`] pulls the public fields of a profile page
//! - [`PatentFetcher`] reads a patent page

pub mod extract;
mod http;
pub mod patent;
pub mod profile;

pub use extract::{DocumentType, FileExtractor, TextExtractor, decode_text};
pub use patent::{PatentFetcher, PatentPage};
pub use profile::{HttpProfileScraper, ProfileFields, ProfileScraper};
