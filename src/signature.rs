//! Observability signatures.
//!
//! A signature summarizes the distinguishable outcomes a particle has
//! encountered: observable values and decision branches. Particles with
//! equal signatures share an evidentiary branch and are resampled against
//! one another. Signatures are produced by the model engine and are
//! read-only to the filter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::OutcomeValue;

/// Canonical, totally ordered key for a particle's evidentiary history.
///
/// Entries are kept sorted by term, so two signatures built from the same
/// outcomes in any order compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservabilitySignature {
    entries: Vec<(String, OutcomeValue)>,
}

/// Stable 32-byte digest of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureDigest([u8; 32]);

impl SignatureDigest {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SignatureDigest {
    // Short prefix, enough to tell branches apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl ObservabilitySignature {
    /// The signature of a particle that has observed nothing distinguishable.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new signature with `term` recorded as `value`.
    ///
    /// Recording an existing term replaces its value.
    #[must_use]
    pub fn with(mut self, term: impl Into<String>, value: OutcomeValue) -> Self {
        self.record(term, value);
        self
    }

    fn record(&mut self, term: impl Into<String>, value: OutcomeValue) {
        let term = term.into();
        match self.entries.binary_search_by(|(t, _)| t.as_str().cmp(&term)) {
            Ok(idx) => self.entries[idx].1 = value,
            Err(idx) => self.entries.insert(idx, (term, value)),
        }
    }

    #[must_use]
    pub fn get(&self, term: &str) -> Option<&OutcomeValue> {
        self.entries
            .binary_search_by(|(t, _)| t.as_str().cmp(term))
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutcomeValue)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v))
    }

    /// Stable digest, independent of process and platform.
    #[must_use]
    pub fn digest(&self) -> SignatureDigest {
        let mut hasher = blake3::Hasher::new();
        for (term, value) in &self.entries {
            hasher.update(term.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.type_name().as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[0xff]);
        }
        SignatureDigest(*hasher.finalize().as_bytes())
    }
}

impl FromIterator<(String, OutcomeValue)> for ObservabilitySignature {
    fn from_iter<I: IntoIterator<Item = (String, OutcomeValue)>>(iter: I) -> Self {
        let mut signature = Self::empty();
        for (term, value) in iter {
            signature.record(term, value);
        }
        signature
    }
}

impl fmt::Display for ObservabilitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (term, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}={value}")?;
        }
        write!(f, "}}")
    }
}
