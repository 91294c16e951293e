//! The cache gateway: "has this input been processed for this result kind?"
//!
//! [`CacheGateway::resolve_or_compute`] fingerprints a canonical input, serves
//! a stored payload when one exists, and otherwise runs the caller's
//! computation and writes its result back. Cache trouble never blocks the
//! computation: an unreachable store, an undecodable payload or a failed write
//! all degrade to "recompute" or "not persisted", reported as
//! [`CacheWarning`]s on the result. Only the computation's own error is
//! returned as `Err`.
//!
//! # Single-flight
//!
//! By default concurrent callers with the same `(fingerprint, kind)` are
//! serialized on a per-key async mutex: the first computes and stores, the
//! others wait and then find the stored result. The registry entry is removed
//! when the last holder leaves. If the first computation fails or cannot be
//! persisted, the next waiter computes in turn.
//! [`CacheGateway::without_single_flight`] restores the plain behaviour where
//! concurrent misses all compute and the last write wins.

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::fingerprint::{CanonicalInput, Fingerprint};
use crate::kind::ResultKind;
use crate::store::CacheStore;

/// A non-fatal cache problem encountered while resolving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWarning {
    /// The store could not be read; the result was recomputed.
    StoreUnavailable(String),
    /// A stored payload could not be decoded; the result was recomputed.
    CorruptPayload(String),
    /// The fresh result could not be serialized or written.
    NotPersisted(String),
}

impl std::fmt::Display for CacheWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheWarning::StoreUnavailable(e) => write!(f, "cache unavailable, recomputed: {e}"),
            CacheWarning::CorruptPayload(e) => write!(f, "cached payload unreadable, recomputed: {e}"),
            CacheWarning::NotPersisted(e) => write!(f, "result not cached: {e}"),
        }
    }
}

/// The outcome of a cache probe.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    /// The probe failed; callers should treat it as a miss.
    Degraded(CacheWarning),
}

/// A value produced by [`CacheGateway::resolve_or_compute`].
#[derive(Debug)]
pub struct Resolved<T> {
    pub value: T,
    /// `true` when `value` came from the store and nothing was computed.
    pub was_cached: bool,
    pub fingerprint: Fingerprint,
    pub warnings: Vec<CacheWarning>,
}

type FlightKey = (Fingerprint, ResultKind);
type FlightRegistry = Arc<Mutex<HashMap<FlightKey, Arc<AsyncMutex<()>>>>>;

/// Boundary between the workflows and the [`CacheStore`].
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    in_flight: Option<FlightRegistry>,
}

impl CacheGateway {
    /// Gateway with single-flight deduplication of concurrent misses.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Gateway where concurrent misses on the same key all compute.
    pub fn without_single_flight(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: None,
        }
    }

    /// Probe the store and decode the payload, without computing anything.
    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind))]
    pub async fn lookup<T: DeserializeOwned>(&self, fingerprint: Fingerprint, kind: ResultKind) -> Lookup<T> {
        match self.store.get(fingerprint, kind).await {
            Ok(payload) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    info!(%fingerprint, %kind, "Cache hit");
                    Lookup::Hit(value)
                }
                Err(e) => {
                    warn!(%fingerprint, %kind, error = %e, "Cached payload does not decode; ignoring it");
                    Lookup::Degraded(CacheWarning::CorruptPayload(e.to_string()))
                }
            },
            Err(StoreError::NotFound { .. }) => {
                debug!(%fingerprint, %kind, "Cache miss");
                Lookup::Miss
            }
            Err(StoreError::Unavailable(e)) => {
                warn!(%fingerprint, %kind, error = %e, "Cache store unavailable; treating as miss");
                Lookup::Degraded(CacheWarning::StoreUnavailable(e))
            }
        }
    }

    /// Serialize `value` and upsert it under `(fingerprint, kind)`.
    #[instrument(level = "debug", skip_all, fields(%fingerprint, %kind))]
    pub async fn store<T: Serialize>(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        value: &T,
    ) -> Result<(), CacheWarning> {
        let payload = serde_json::to_string(value).map_err(|e| {
            warn!(%fingerprint, %kind, error = %e, "Result does not serialize; not caching");
            CacheWarning::NotPersisted(e.to_string())
        })?;

        self.store.put(fingerprint, kind, &payload).await.map_err(|e| {
            warn!(%fingerprint, %kind, error = %e, "Cache write failed");
            CacheWarning::NotPersisted(e.to_string())
        })?;

        info!(%fingerprint, %kind, bytes = payload.len(), "Result cached");
        Ok(())
    }

    /// Return the stored result for `input`, or compute, store and return it.
    pub async fn resolve_or_compute<T, E, F, Fut>(
        &self,
        input: &CanonicalInput,
        kind: ResultKind,
        compute: F,
    ) -> Result<Resolved<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fingerprint = input.fingerprint();
        let mut warnings = Vec::new();

        if let Some(value) = self.probe(fingerprint, kind, &mut warnings).await {
            return Ok(cached(value, fingerprint, warnings));
        }

        let _flight = match &self.in_flight {
            Some(registry) => {
                let flight = Flight::join(registry, (fingerprint, kind)).await;
                // Someone may have finished the same work since the first probe.
                if let Some(value) = self.probe(fingerprint, kind, &mut warnings).await {
                    return Ok(cached(value, fingerprint, warnings));
                }
                Some(flight)
            }
            None => None,
        };

        self.compute_and_save(fingerprint, kind, compute, warnings).await
    }

    /// Always compute and overwrite the stored entry, e.g. for a manual re-run.
    pub async fn refresh<T, E, F, Fut>(
        &self,
        input: &CanonicalInput,
        kind: ResultKind,
        compute: F,
    ) -> Result<Resolved<T>, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fingerprint = input.fingerprint();
        info!(%fingerprint, %kind, "Refreshing cached result");
        self.compute_and_save(fingerprint, kind, compute, Vec::new()).await
    }

    async fn probe<T: DeserializeOwned>(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        warnings: &mut Vec<CacheWarning>,
    ) -> Option<T> {
        match self.lookup(fingerprint, kind).await {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
            Lookup::Degraded(warning) => {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
                None
            }
        }
    }

    async fn compute_and_save<T, E, F, Fut>(
        &self,
        fingerprint: Fingerprint,
        kind: ResultKind,
        compute: F,
        mut warnings: Vec<CacheWarning>,
    ) -> Result<Resolved<T>, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = compute().await?;
        if let Err(warning) = self.store(fingerprint, kind, &value).await {
            warnings.push(warning);
        }
        Ok(Resolved {
            value,
            was_cached: false,
            fingerprint,
            warnings,
        })
    }
}

fn cached<T>(value: T, fingerprint: Fingerprint, warnings: Vec<CacheWarning>) -> Resolved<T> {
    Resolved {
        value,
        was_cached: true,
        fingerprint,
        warnings,
    }
}

/// Exclusive hold on one key of the in-flight registry.
struct Flight {
    registry: FlightRegistry,
    key: FlightKey,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Flight {
    async fn join(registry: &FlightRegistry, key: FlightKey) -> Self {
        let slot = {
            let mut map = registry.lock();
            Arc::clone(map.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };

        let guard = match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(fingerprint = %key.0, kind = %key.1, "Waiting for in-flight computation");
                Arc::clone(&slot).lock_owned().await
            }
        };

        Self {
            registry: Arc::clone(registry),
            key,
            slot,
            guard: Some(guard),
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.registry.lock();
        // Only the registry and this flight still reference the slot.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Filters, TimeUnit};
    use crate::store::SqliteCacheStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sqlite_store() -> SqliteCacheStore {
        SqliteCacheStore::new(Database::open_in_memory().unwrap())
    }

    fn gateway(store: &SqliteCacheStore) -> CacheGateway {
        CacheGateway::new(Arc::new(store.clone()))
    }

    fn scenario_input() -> CanonicalInput {
        let keywords = vec!["ai".to_string(), "finance".to_string()];
        let filters = Filters {
            time_unit: TimeUnit::Months,
            time_value: 3,
            ..Filters::default()
        };
        CanonicalInput::keyword_watch(&keywords, &filters)
    }

    /// Store whose reads and/or writes fail as if the backend were down.
    struct BrokenStore {
        reads_fail: bool,
    }

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, fingerprint: Fingerprint, kind: ResultKind) -> Result<String, StoreError> {
            if self.reads_fail {
                Err(StoreError::Unavailable("connection refused".to_string()))
            } else {
                Err(StoreError::NotFound { fingerprint, kind })
            }
        }

        async fn put(&self, _: Fingerprint, _: ResultKind, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let calls = AtomicUsize::new(0);
        let input = scenario_input();

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(vec!["summary one".to_string(), "summary two".to_string()])
        };

        let first = gateway.resolve_or_compute(&input, ResultKind::Summaries, compute).await.unwrap();
        assert!(!first.was_cached);
        assert!(first.warnings.is_empty());

        let second: Resolved<Vec<String>> = gateway
            .resolve_or_compute(&input, ResultKind::Summaries, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(vec!["different".to_string()])
            })
            .await
            .unwrap();
        assert!(second.was_cached);
        assert_eq!(second.value, first.value);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_input_different_kind_computes_separately() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let input = CanonicalInput::corpus(&["https://a.example".to_string()], &[]);

        gateway
            .resolve_or_compute(&input, ResultKind::Summaries, || async { Ok::<_, String>("A".to_string()) })
            .await
            .unwrap();
        let synthesis = gateway
            .resolve_or_compute(&input, ResultKind::Synthesis, || async { Ok::<_, String>("B".to_string()) })
            .await
            .unwrap();
        assert!(!synthesis.was_cached);

        let summaries: Lookup<String> = gateway.lookup(input.fingerprint(), ResultKind::Summaries).await;
        assert!(matches!(summaries, Lookup::Hit(ref v) if v == "A"));
    }

    #[tokio::test]
    async fn test_compute_error_is_returned_and_nothing_cached() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let input = CanonicalInput::raw("failing");

        let result: Result<Resolved<String>, String> = gateway
            .resolve_or_compute(&input, ResultKind::Summaries, || async { Err("scrape failed".to_string()) })
            .await;
        assert_eq!(result.unwrap_err(), "scrape failed");
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_still_computes() {
        let gateway = CacheGateway::new(Arc::new(BrokenStore { reads_fail: true }));
        let input = CanonicalInput::raw("offline");

        let resolved = gateway
            .resolve_or_compute(&input, ResultKind::Summaries, || async { Ok::<_, String>(42u32) })
            .await
            .unwrap();

        assert_eq!(resolved.value, 42);
        assert!(!resolved.was_cached);
        assert!(matches!(resolved.warnings[0], CacheWarning::StoreUnavailable(_)));
        assert!(matches!(resolved.warnings[1], CacheWarning::NotPersisted(_)));
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_not_swallowed() {
        let gateway = CacheGateway::new(Arc::new(BrokenStore { reads_fail: false }));
        let resolved = gateway
            .resolve_or_compute(&CanonicalInput::raw("x"), ResultKind::Synthesis, || async {
                Ok::<_, String>("fresh".to_string())
            })
            .await
            .unwrap();

        assert_eq!(resolved.value, "fresh");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(matches!(resolved.warnings[0], CacheWarning::NotPersisted(_)));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_recomputed_and_overwritten() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let input = CanonicalInput::raw("corrupt");
        store
            .put(input.fingerprint(), ResultKind::Summaries, "{not json")
            .await
            .unwrap();

        let resolved = gateway
            .resolve_or_compute(&input, ResultKind::Summaries, || async { Ok::<_, String>(vec![1, 2]) })
            .await
            .unwrap();
        assert!(!resolved.was_cached);
        assert!(matches!(resolved.warnings[0], CacheWarning::CorruptPayload(_)));
        assert_eq!(
            store.get(input.fingerprint(), ResultKind::Summaries).await.unwrap(),
            "[1,2]"
        );
    }

    #[tokio::test]
    async fn test_refresh_overwrites_existing_entry() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let input = CanonicalInput::raw("rerun");

        gateway
            .resolve_or_compute(&input, ResultKind::Synthesis, || async { Ok::<_, String>("old".to_string()) })
            .await
            .unwrap();
        let refreshed = gateway
            .refresh(&input, ResultKind::Synthesis, || async { Ok::<_, String>("new".to_string()) })
            .await
            .unwrap();
        assert!(!refreshed.was_cached);

        let stored = store.get(input.fingerprint(), ResultKind::Synthesis).await.unwrap();
        assert_eq!(stored, "\"new\"");
        assert_eq!(store.entry_count(input.fingerprint(), ResultKind::Synthesis).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_computes_once_for_concurrent_callers() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let calls = AtomicUsize::new(0);
        let input = scenario_input();

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>("result".to_string())
        };

        let (a, b) = tokio::join!(
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute),
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.value, b.value);
        assert!(a.was_cached != b.was_cached);
        assert!(gateway.in_flight.as_ref().unwrap().lock().is_empty());
    }

    #[tokio::test]
    async fn test_without_single_flight_both_compute_and_one_wins() {
        let store = sqlite_store();
        let gateway = CacheGateway::without_single_flight(Arc::new(store.clone()));
        let calls = AtomicUsize::new(0);
        let input = scenario_input();

        let compute = |label: &'static str| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(vec![label.repeat(1000)])
            }
        };

        let (a, b) = tokio::join!(
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute("a")),
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute("b"))
        );
        assert!(!a.unwrap().was_cached);
        assert!(!b.unwrap().was_cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stored: Lookup<Vec<String>> = gateway.lookup(input.fingerprint(), ResultKind::Summaries).await;
        match stored {
            Lookup::Hit(v) => assert!(v == vec!["a".repeat(1000)] || v == vec!["b".repeat(1000)]),
            other => panic!("expected a hit, got {other:?}"),
        }
        assert_eq!(store.entry_count(input.fingerprint(), ResultKind::Summaries).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_waiter_recomputes_after_leader_fails() {
        let store = sqlite_store();
        let gateway = gateway(&store);
        let calls = AtomicUsize::new(0);
        let input = CanonicalInput::raw("flaky");

        let compute = || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            if n == 0 { Err("first attempt failed".to_string()) } else { Ok(n) }
        };

        let (a, b) = tokio::join!(
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute),
            gateway.resolve_or_compute(&input, ResultKind::Summaries, compute)
        );
        let (failed, won) = if a.is_err() { (a, b) } else { (b, a) };
        assert_eq!(failed.unwrap_err(), "first attempt failed");
        let won = won.unwrap();
        assert!(!won.was_cached);
        assert_eq!(won.value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
