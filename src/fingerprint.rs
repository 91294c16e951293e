//! Request fingerprinting.
//!
//! A [`Fingerprint`] is the sole identity used for deduplication: two requests
//! whose [`CanonicalInput`]s are byte-identical share a fingerprint, and no
//! further normalization (URL canonicalization, keyword case-folding, list
//! sorting) is applied. Callers that want "AI" and "ai" to share results must
//! normalize before building the input.
//!
//! Canonical inputs are encoded as a JSON array whose first element names the
//! view that produced the request. JSON string escaping keeps list items, list
//! boundaries and trailing parameters apart, so `["a", "b"]` and `["a\nb"]`
//! can never collide the way a newline-joined blob would.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::models::{Document, Filters, TimeWindow};

/// Number of digest bytes kept; rendered as 32 hex characters.
pub const FINGERPRINT_LEN: usize = 16;

/// Fixed-length digest identifying a semantic request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Lowercase hex form, as stored in the `input_hash` column.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Digest an arbitrary canonical string.
///
/// Pure and deterministic; the digest is not a secret and carries no salt.
pub fn fingerprint(canonical_input: &str) -> Fingerprint {
    let digest = Sha256::digest(canonical_input.as_bytes());
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    Fingerprint(out)
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::MalformedFingerprint(s.to_string());
        if s.len() != FINGERPRINT_LEN * 2 {
            return Err(malformed());
        }
        let bytes = hex::decode(s).map_err(|_| malformed())?;
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&bytes);
        Ok(Fingerprint(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The exact text a request is fingerprinted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalInput(String);

impl CanonicalInput {
    /// Use a caller-built string as-is.
    pub fn raw(text: impl Into<String>) -> Self {
        CanonicalInput(text.into())
    }

    /// Keyword search with the filters' time window and query refinements.
    ///
    /// Every flag that changes the search query is part of the identity.
    pub fn keyword_watch(keywords: &[String], filters: &Filters) -> Self {
        let window = filters.window();
        let refinements = json!({
            "exclude_ads": filters.exclude_ads,
            "exclude_professional": filters.exclude_professional,
            "target_press": filters.target_press,
            "exclude_jobs": filters.exclude_jobs,
            "exclude_training": filters.exclude_training,
        });
        Self::encode(json!(["keywords", keywords, window.unit.as_str(), window.value, refinements]))
    }

    /// Article suggestions from source pages over a time window.
    pub fn source_watch(sources: &[String], window: TimeWindow) -> Self {
        Self::encode(json!(["sources", sources, window.unit.as_str(), window.value]))
    }

    /// Summaries of explicit article URLs and uploaded documents.
    ///
    /// A document is identified by its name and a digest of its bytes, so a
    /// changed file under the same name is a new request.
    pub fn article_urls(urls: &[String], documents: &[Document]) -> Self {
        Self::encode(json!(["articles", urls, document_ids(documents)]))
    }

    /// Cross-article synthesis of a corpus of URLs and uploaded documents.
    pub fn corpus(urls: &[String], documents: &[Document]) -> Self {
        Self::encode(json!(["corpus", urls, document_ids(documents)]))
    }

    fn encode(value: serde_json::Value) -> Self {
        CanonicalInput(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.0)
    }
}

/// `[name, sha256 hex of the bytes]` per document, in order.
fn document_ids(documents: &[Document]) -> Vec<[String; 2]> {
    documents
        .iter()
        .map(|d| [d.name.clone(), hex::encode(Sha256::digest(&d.data))])
        .collect()
}

impl fmt::Display for CanonicalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
