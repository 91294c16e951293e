//! The closed set of artifact kinds stored in the cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Logical type of a cached artifact.
///
/// Kind and fingerprint together form the cache key, so the same canonical
/// input can hold one entry per kind. The string forms are the `result_key`
/// values already present in existing cache rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// A list of per-article summary records.
    Summaries,
    /// A single cross-article synthesis record.
    Synthesis,
}

impl ResultKind {
    pub const ALL: [ResultKind; 2] = [ResultKind::Summaries, ResultKind::Synthesis];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Summaries => "summaries",
            ResultKind::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summaries" => Ok(ResultKind::Summaries),
            "synthesis" => Ok(ResultKind::Synthesis),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}
