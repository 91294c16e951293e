//! Durable `(fingerprint, kind) -> payload` storage.
//!
//! Two backends implement [`CacheStore`]:
//! - [`SqliteCacheStore`]: the `cache` table of the local database
//! - [`HttpCacheStore`]: a client of the `/cache` endpoints served by
//!   `veille serve`, so several front ends can share one cache
//!
//! Both upsert: at most one row exists per key and a write replaces it.
//! Neither keeps an in-memory fallback; a failed write is reported to the
//! caller rather than swallowed.

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{DbError, StoreError};
use crate::fingerprint::Fingerprint;
use crate::kind::ResultKind;
use crate::retry::RetryPolicy;

/// Key-value persistence for cached artifacts.
///
/// Payloads are opaque strings (serialized JSON). Implementations must make
/// each `put` atomic per key; writes to the same key are last-writer-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the payload stored under `(fingerprint, kind)`.
    ///
    /// Returns [`StoreError::NotFound`] on a miss and
    /// [`StoreError::Unavailable`] when the backing store cannot be reached.
    async fn get(&self, fingerprint: Fingerprint, kind: ResultKind) -> Result<String, StoreError>;

    /// Insert or replace the payload stored under `(fingerprint, kind)`.
    async fn put(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        payload: &str,
    ) -> Result<(), StoreError>;
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Cache entries in the local SQLite database.
#[derive(Clone)]
pub struct SqliteCacheStore {
    db: Database,
}

impl SqliteCacheStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of rows stored under `(fingerprint, kind)`; 0 or 1.
    pub async fn entry_count(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
    ) -> Result<u64, StoreError> {
        let hash = fingerprint.to_hex();
        let count = self
            .db
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache WHERE input_hash = ?1 AND result_key = ?2",
                    params![hash, kind.as_str()],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(count as u64)
    }

    /// Total number of cache rows.
    pub async fn len(&self) -> Result<u64, StoreError> {
        let count = self
            .db
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind))]
    async fn get(&self, fingerprint: Fingerprint, kind: ResultKind) -> Result<String, StoreError> {
        let hash = fingerprint.to_hex();
        let row = self
            .db
            .call(move |conn| {
                let data = conn
                    .query_row(
                        "SELECT data FROM cache WHERE input_hash = ?1 AND result_key = ?2",
                        params![hash, kind.as_str()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(data)
            })
            .await?;

        row.ok_or(StoreError::NotFound { fingerprint, kind })
    }

    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind, bytes = payload.len()))]
    async fn put(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        payload: &str,
    ) -> Result<(), StoreError> {
        let hash = fingerprint.to_hex();
        let data = payload.to_string();
        let now = chrono::Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO cache (input_hash, result_key, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(input_hash, result_key) DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                    params![hash, kind.as_str(), data, now],
                )?;
                Ok(())
            })
            .await?;
        debug!("Cache row written");
        Ok(())
    }
}

/// Body of `GET /cache` on a hit.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheData {
    pub data: String,
}

/// Body of `POST /cache`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheItem {
    pub input_hash: String,
    pub result_key: String,
    pub data: String,
}

/// Client of the `/cache` endpoints of a remote `veille serve`.
#[derive(Debug, Clone)]
pub struct HttpCacheStore {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpCacheStore {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }

    async fn get_once(&self, fingerprint: Fingerprint, kind: ResultKind) -> Result<String, StoreError> {
        let resp = self
            .client
            .get(format!("{}/cache", self.base_url))
            .query(&[("input_hash", fingerprint.to_hex().as_str()), ("result_key", kind.as_str())])
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::OK => Ok(resp.json::<CacheData>().await?.data),
            reqwest::StatusCode::NOT_FOUND => Err(StoreError::NotFound { fingerprint, kind }),
            status => Err(StoreError::Unavailable(format!("GET /cache returned {status}"))),
        }
    }

    async fn put_once(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        payload: &str,
    ) -> Result<(), StoreError> {
        let item = CacheItem {
            input_hash: fingerprint.to_hex(),
            result_key: kind.as_str().to_string(),
            data: payload.to_string(),
        };
        let resp = self
            .client
            .post(format!("{}/cache", self.base_url))
            .json(&item)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("POST /cache returned {}", resp.status())))
        }
    }
}

#[async_trait]
impl CacheStore for HttpCacheStore {
    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind, base_url = %self.base_url))]
    async fn get(&self, fingerprint: Fingerprint, kind: ResultKind) -> Result<String, StoreError> {
        self.retry
            .run(
                "cache.get",
                || self.get_once(fingerprint, kind),
                |e: &StoreError| !e.is_not_found(),
            )
            .await
    }

    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind, base_url = %self.base_url))]
    async fn put(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        payload: &str,
    ) -> Result<(), StoreError> {
        // Upserts are idempotent, so retrying a write is safe.
        self.retry
            .run(
                "cache.put",
                || self.put_once(fingerprint, kind, payload),
                |_| true,
            )
            .await
    }
}
