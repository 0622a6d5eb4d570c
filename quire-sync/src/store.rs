//! The Document Store: sole owner of the live document.
//!
//! Every mutating call writes the full document through to the
//! [`LocalCache`] before returning, so a reload never loses unsaved edits.
//! Cache failures are logged and swallowed; the cache has no authority.

use quire_core::{fingerprint, ContentDocument, Fingerprint};
use serde_json::Value;

use crate::cache::LocalCache;

pub struct DocumentStore {
    document: ContentDocument,
    cache: Box<dyn LocalCache>,
    dirty: bool,
    cache_failures: u64,
}

impl DocumentStore {
    pub fn new(cache: Box<dyn LocalCache>) -> Self {
        Self {
            document: ContentDocument::default(),
            cache,
            dirty: false,
            cache_failures: 0,
        }
    }

    pub fn document(&self) -> &ContentDocument {
        &self.document
    }

    pub fn get_section(&self, name: &str) -> Option<&Value> {
        self.document.section(name)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.document)
    }

    /// Whether local mutations happened since the last hydrate/replace.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of cache writes that failed since creation.
    pub fn cache_failures(&self) -> u64 {
        self.cache_failures
    }

    /// Snapshot from the local cache, if a usable one exists.
    pub fn load_cached(&self) -> Option<ContentDocument> {
        match self.cache.load() {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("Local cache unreadable: {e}");
                None
            }
        }
    }

    /// Replace the whole document with an authoritative copy.
    pub fn hydrate(&mut self, document: ContentDocument) -> Fingerprint {
        self.document = document;
        self.dirty = false;
        self.persist();
        self.fingerprint()
    }

    /// Replace the whole document with a polled remote copy.
    pub fn replace_document(&mut self, document: ContentDocument) -> Fingerprint {
        self.hydrate(document)
    }

    /// Shallow-merge into a section and mark the document dirty.
    pub fn patch_section(&mut self, name: &str, partial: Value) -> Fingerprint {
        self.document.patch_section(name, partial);
        self.dirty = true;
        self.persist();
        self.fingerprint()
    }

    pub fn replace_section(&mut self, name: &str, value: Value) -> Fingerprint {
        self.document.set_section(name, value);
        self.dirty = true;
        self.persist();
        self.fingerprint()
    }

    fn persist(&mut self) {
        if let Err(e) = self.cache.store(&self.document) {
            self.cache_failures += 1;
            log::warn!("Local cache write failed: {e}");
        }
    }
}
