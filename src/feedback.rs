//! Operator feedback on produced summaries and syntheses.
//!
//! Records are append-only: nothing here updates or deletes a vote.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument};

use crate::db::Database;
use crate::error::{DbError, ParseError};
use crate::models::TimeUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Up => "up",
            Vote::Down => "down",
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vote {
    type Err = ParseError;

    /// Accepts `up`/`down` as well as the thumb emojis older clients send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" | "👍" => Ok(Vote::Up),
            "down" | "👎" => Ok(Vote::Down),
            other => Err(ParseError::UnknownVote(other.to_string())),
        }
    }
}

/// One vote on one produced result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Name of the view the result was produced in, e.g. "keywords".
    pub view: String,
    #[serde(default)]
    pub time_unit: Option<TimeUnit>,
    pub title: String,
    pub content: String,
    /// Article URL(s) or another reference to what was rated.
    pub reference: String,
    pub vote: Vote,
}

/// Append-only destination for feedback.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn record(&self, record: &FeedbackRecord) -> Result<(), DbError>;
}

/// Feedback rows in the local SQLite database.
#[derive(Clone)]
pub struct SqliteFeedbackSink {
    db: Database,
}

impl SqliteFeedbackSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All records, oldest first.
    pub async fn all(&self) -> Result<Vec<FeedbackRecord>, DbError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT created_at, view, time_unit, title, content, reference, vote
                     FROM feedback ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, DateTime<Utc>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?;

                let mut records = Vec::new();
                for row in rows {
                    let (timestamp, view, unit, title, content, reference, vote) = row?;
                    records.push(FeedbackRecord {
                        timestamp,
                        view,
                        time_unit: unit.map(|u| u.parse::<TimeUnit>()).transpose()?,
                        title,
                        content,
                        reference,
                        vote: vote.parse::<Vote>()?,
                    });
                }
                Ok(records)
            })
            .await
    }
}

#[async_trait]
impl FeedbackSink for SqliteFeedbackSink {
    #[instrument(level = "info", skip_all, fields(view = %record.view, vote = %record.vote))]
    async fn record(&self, record: &FeedbackRecord) -> Result<(), DbError> {
        let r = record.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feedback (created_at, view, time_unit, title, content, reference, vote)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        r.timestamp,
                        r.view,
                        r.time_unit.map(|u| u.as_str()),
                        r.title,
                        r.content,
                        r.reference,
                        r.vote.as_str()
                    ],
                )?;
                Ok(())
            })
            .await?;
        info!("Feedback recorded");
        Ok(())
    }
}
