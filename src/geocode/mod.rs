pub mod cache;
pub mod client;
pub mod pacer;

use crate::domain::{normalize_address, GeocodeStatus, GeocodedAddress};
use crate::error::{PipelineError, Result};
use self::cache::GeocodeRepository;
use self::client::{GeocodeOutcome, GeocodeService};
use self::pacer::Pacer;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Batch resolver: deduplicates addresses against the durable cache and
/// walks the misses through the rate-limited service strictly sequentially.
pub struct GeocodeBatch<'a> {
    repo: &'a mut dyn GeocodeRepository,
    service: &'a dyn GeocodeService,
    pacer: Pacer,
    max_retries: u32,
    backoff_base: Duration,
    progress_every: usize,
    retry_failed: bool,
}

impl<'a> GeocodeBatch<'a> {
    pub fn new(repo: &'a mut dyn GeocodeRepository, service: &'a dyn GeocodeService) -> Self {
        Self {
            repo,
            service,
            pacer: Pacer::none(),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            progress_every: 100,
            retry_failed: false,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_progress_every(mut self, progress_every: usize) -> Self {
        self.progress_every = progress_every.max(1);
        self
    }

    /// Also re-attempt addresses the cache remembers as failed.
    pub fn retry_failed(mut self) -> Self {
        self.retry_failed = true;
        self
    }

    /// Resolves every address, returning a mapping keyed by normalized
    /// address text. Individual failures are recorded and do not abort the
    /// batch; only an authentication failure propagates.
    pub async fn resolve(
        &mut self,
        addresses: impl IntoIterator<Item = String>,
    ) -> Result<BTreeMap<String, GeocodedAddress>> {
        let wanted: BTreeSet<String> =
            addresses.into_iter().map(|a| normalize_address(&a)).collect();

        let mut pending: Vec<String> = Vec::new();
        for key in &wanted {
            match self.repo.get(key) {
                Some(entry) if entry.status == GeocodeStatus::Failed && self.retry_failed => {
                    pending.push(key.clone());
                }
                Some(_) => {}
                None => pending.push(key.clone()),
            }
        }
        info!(
            total = wanted.len(),
            cached = wanted.len() - pending.len(),
            to_resolve = pending.len(),
            "geocode batch starting"
        );

        let total_pending = pending.len();
        for (i, key) in pending.iter().enumerate() {
            self.pacer.pause().await;
            let entry = self.lookup_one(key).await?;
            self.repo.put(entry)?;
            if (i + 1) % self.progress_every == 0 {
                info!(done = i + 1, total = total_pending, "geocode batch progress");
            }
        }
        self.repo.flush()?;

        let mut out = BTreeMap::new();
        for key in wanted {
            if let Some(entry) = self.repo.get(&key) {
                out.insert(key, entry.clone());
            }
        }
        Ok(out)
    }

    /// One address through the retry ladder. Transient errors back off and
    /// retry up to the bound, then degrade to a failed cache entry.
    async fn lookup_one(&self, key: &str) -> Result<GeocodedAddress> {
        let mut attempt = 0u32;
        loop {
            match self.service.lookup(key).await {
                Ok(GeocodeOutcome::Found { latitude, longitude, postal_code }) => {
                    debug!(address = %key, "geocoded");
                    return Ok(GeocodedAddress {
                        normalized_address: key.to_string(),
                        latitude: Some(latitude),
                        longitude: Some(longitude),
                        postal_code,
                        resolved_at: Utc::now(),
                        status: GeocodeStatus::Resolved,
                    });
                }
                Ok(GeocodeOutcome::NotFound) => {
                    warn!(address = %key, "address not found, marking failed");
                    return Ok(GeocodedAddress::failed(key.to_string()));
                }
                Err(e @ PipelineError::Auth(_)) => return Err(e),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff_base * 2u32.saturating_pow(attempt);
                    debug!(address = %key, attempt, error = %e, "transient failure, backing off");
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    // Retries exhausted or a non-retryable service answer;
                    // either way the failure stays with this one address.
                    warn!(address = %key, error = %e, "geocode failed permanently");
                    return Ok(GeocodedAddress::failed(key.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cache::InMemoryGeocodeRepository;
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted service: each address maps to a queue of canned responses.
    #[derive(Default)]
    struct ScriptedService {
        script: Mutex<BTreeMap<String, Vec<Result<GeocodeOutcome>>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedService {
        fn on(self, address: &str, responses: Vec<Result<GeocodeOutcome>>) -> Self {
            self.script.lock().unwrap().insert(address.to_string(), responses);
            self
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    fn found(lat: f64, lon: f64, postal: &str) -> Result<GeocodeOutcome> {
        Ok(GeocodeOutcome::Found {
            latitude: lat,
            longitude: lon,
            postal_code: Some(postal.to_string()),
        })
    }

    #[async_trait]
    impl GeocodeService for ScriptedService {
        async fn lookup(&self, address: &str) -> Result<GeocodeOutcome> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            match script.get_mut(address) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Ok(GeocodeOutcome::NotFound),
            }
        }
    }

    #[tokio::test]
    async fn cached_addresses_never_reach_the_service() {
        let mut repo = InMemoryGeocodeRepository::new();
        let service = ScriptedService::default().on("1 MARINA BLVD", vec![found(1.28, 103.85, "018989")]);

        let mut batch = GeocodeBatch::new(&mut repo, &service);
        batch.resolve(vec!["1 Marina Blvd".to_string()]).await.unwrap();
        assert_eq!(service.call_count(), 1);

        // Same address again, differently cased: served from cache.
        let mut batch = GeocodeBatch::new(&mut repo, &service);
        let out = batch.resolve(vec!["1  marina blvd".to_string()]).await.unwrap();
        assert_eq!(service.call_count(), 1);
        assert_eq!(out["1 MARINA BLVD"].status, GeocodeStatus::Resolved);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let mut repo = InMemoryGeocodeRepository::new();
        let service = ScriptedService::default().on(
            "1 MARINA BLVD",
            vec![
                Err(PipelineError::TransientNetwork("timeout".into())),
                Err(PipelineError::TransientNetwork("502".into())),
                found(1.28, 103.85, "018989"),
            ],
        );

        let mut batch = GeocodeBatch::new(&mut repo, &service)
            .with_retries(3, Duration::ZERO);
        let out = batch.resolve(vec!["1 Marina Blvd".to_string()]).await.unwrap();
        assert_eq!(out["1 MARINA BLVD"].status, GeocodeStatus::Resolved);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_failed_entry() {
        let mut repo = InMemoryGeocodeRepository::new();
        let service = ScriptedService::default().on(
            "1 MARINA BLVD",
            vec![
                Err(PipelineError::TransientNetwork("timeout".into())),
                Err(PipelineError::TransientNetwork("timeout".into())),
                Err(PipelineError::TransientNetwork("timeout".into())),
            ],
        );

        let mut batch = GeocodeBatch::new(&mut repo, &service)
            .with_retries(2, Duration::ZERO);
        let out = batch.resolve(vec!["1 Marina Blvd".to_string()]).await.unwrap();
        assert_eq!(out["1 MARINA BLVD"].status, GeocodeStatus::Failed);
    }

    #[tokio::test]
    async fn one_permanent_failure_in_a_batch_of_100() {
        let mut repo = InMemoryGeocodeRepository::new();
        let mut service = ScriptedService::default();
        for i in 0..100 {
            let addr = format!("BLOCK {} EXAMPLE AVE", i);
            if i == 42 {
                // Address #42 is unknown to the service.
                service = service.on(&addr, vec![Ok(GeocodeOutcome::NotFound)]);
            } else {
                service = service.on(&addr, vec![found(1.3 + i as f64 * 1e-4, 103.8, "640000")]);
            }
        }

        let addresses: Vec<String> = (0..100).map(|i| format!("Block {} Example Ave", i)).collect();
        let mut batch = GeocodeBatch::new(&mut repo, &service);
        let out = batch.resolve(addresses).await.unwrap();

        assert_eq!(out.len(), 100);
        assert_eq!(repo.resolved_count(), 99);
        let failed: Vec<_> =
            out.values().filter(|e| e.status == GeocodeStatus::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].normalized_address, "BLOCK 42 EXAMPLE AVE");
    }

    #[tokio::test]
    async fn failed_entries_are_skipped_unless_retry_requested() {
        let mut repo = InMemoryGeocodeRepository::new();
        repo.put(GeocodedAddress::failed("NOWHERE ST".to_string())).unwrap();
        let service = ScriptedService::default().on("NOWHERE ST", vec![found(1.3, 103.8, "111111")]);

        let mut batch = GeocodeBatch::new(&mut repo, &service);
        let out = batch.resolve(vec!["Nowhere St".to_string()]).await.unwrap();
        assert_eq!(out["NOWHERE ST"].status, GeocodeStatus::Failed);
        assert_eq!(service.call_count(), 0);

        let mut batch = GeocodeBatch::new(&mut repo, &service).retry_failed();
        let out = batch.resolve(vec!["Nowhere St".to_string()]).await.unwrap();
        assert_eq!(out["NOWHERE ST"].status, GeocodeStatus::Resolved);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_batch() {
        let mut repo = InMemoryGeocodeRepository::new();
        let service = ScriptedService::default()
            .on("1 MARINA BLVD", vec![Err(PipelineError::Auth("401".into()))]);

        let mut batch = GeocodeBatch::new(&mut repo, &service);
        let err = batch.resolve(vec!["1 Marina Blvd".to_string()]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }
}
