//! Mapping raw owner tokens to canonical account identities.

use std::collections::HashMap;

/// Resolves the email-like strings written in OWNERS files to the host's
/// preferred identity for that account. `*` is never passed in.
pub trait IdentityResolver {
    fn resolve(&self, raw: &str) -> Option<String>;
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for &T {
    fn resolve(&self, raw: &str) -> Option<String> {
        (**self).resolve(raw)
    }
}

/// Treats every token as its own identity, case-folded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl IdentityResolver for Verbatim {
    fn resolve(&self, raw: &str) -> Option<String> {
        Some(raw.to_lowercase())
    }
}

/// A fixed table of raw token to canonical identity. Tokens missing from the
/// table are unresolved.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    identities: HashMap<String, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, raw: &str, canonical: &str) -> Self {
        self.insert(raw, canonical);
        self
    }

    pub fn insert(&mut self, raw: &str, canonical: &str) {
        self.identities.insert(raw.to_owned(), canonical.to_owned());
    }
}

impl IdentityResolver for IdentityMap {
    fn resolve(&self, raw: &str) -> Option<String> {
        self.identities.get(raw).cloned()
    }
}
