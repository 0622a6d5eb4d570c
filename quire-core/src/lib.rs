//! # quire-core — content document model
//!
//! Data types shared by the sync engine and its collaborators:
//!
//! - [`document`] — [`ContentDocument`], a map of named JSON sections
//! - [`fingerprint`] — canonical serialization and [`Fingerprint`] digests
//! - [`history`] — [`VersionEntry`] / [`AuditEntry`] records kept by the remote store

pub mod document;
pub mod fingerprint;
pub mod history;

pub use document::{is_transient_key, ContentDocument, TRANSIENT_PREFIX};
pub use fingerprint::{
    canonical_document, canonical_value, fingerprint, fingerprint_value, fnv1a_64, Fingerprint,
};
pub use history::{most_recent_first, AuditEntry, Timestamped, VersionEntry};
