//! Stage orchestration: fetch -> geocode -> features -> unify -> impute.
//!
//! Every stage writes its artifact atomically before the next begins, so a
//! rerun resumes from the last completed stage and, within geocoding, from
//! the last persisted cache entry. State on disk is single-writer; a second
//! concurrent run is unsupported.

use crate::config::Config;
use crate::constants::{
    AMENITY_DATASET_PREFIX, EC_TX_DATASET, HDB_RENTAL_DATASET, HDB_RESALE_DATASET,
    PRIVATE_TX_DATASET,
};
use crate::domain::{
    normalize_address, AmenityFeatureRow, AmenityRecord, AmenityType, CommonTransaction,
    GeocodeStatus, SourceKind,
};
use crate::error::{PipelineError, Result};
use crate::features::{compute_features, PropertyPoint};
use crate::fetch::{DatasetSpec, Downloader, FetchOrchestrator, FetchReport};
use crate::geocode::cache::{FileGeocodeRepository, GeocodeRepository};
use crate::geocode::client::GeocodeService;
use crate::geocode::pacer::Pacer;
use crate::geocode::GeocodeBatch;
use crate::impute::{derive_observed_yields, impute_rental_yield, yield_universe};
use crate::storage::write_json_atomic;
use crate::unify::adapters::{adapt_all, SourceTable};
use crate::unify::{schema, unify, UnifiedDataset};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Counts from one geocoding stage run, covering every address the stage
/// touched whether freshly looked up or already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeocodeReport {
    pub resolved: usize,
    pub failed: usize,
}

impl GeocodeReport {
    pub fn total(&self) -> usize {
        self.resolved + self.failed
    }
}

pub struct PipelineContext {
    pub config: Config,
}

impl PipelineContext {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn raw_path(&self, dataset_id: &str) -> PathBuf {
        self.config.data_root.join("raw").join(format!("{}.json", dataset_id))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config.data_root.join("cache").join("geocode_cache.ndjson")
    }

    fn out_path(&self, name: &str) -> PathBuf {
        self.config.data_root.join("out").join(name)
    }

    /// Reads a downloaded dataset as a JSON array of rows; a missing
    /// artifact contributes nothing rather than failing the stage.
    fn load_rows(&self, dataset_id: &str) -> Result<Vec<Value>> {
        let path = self.raw_path(dataset_id);
        if !path.exists() {
            warn!(dataset = dataset_id, "raw artifact missing, treating as empty");
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&path)?;
        let value: Value = serde_json::from_slice(&bytes)?;
        match value {
            Value::Array(rows) => Ok(rows),
            _ => Err(PipelineError::SchemaMismatch(format!(
                "dataset {} artifact is not a JSON array",
                dataset_id
            ))),
        }
    }

    fn dataset_specs(&self) -> Vec<DatasetSpec> {
        self.config.datasets.iter().map(DatasetSpec::from_config).collect()
    }

    /// Stage 2: refresh external datasets, honoring per-dataset thresholds.
    pub async fn run_fetch(
        &self,
        downloader: Box<dyn Downloader>,
        force: bool,
        dry_run: bool,
        only: Option<&[String]>,
    ) -> FetchReport {
        let mut orchestrator = FetchOrchestrator::new(&self.config.data_root, downloader);
        if dry_run {
            orchestrator = orchestrator.dry_run();
        }
        let specs: Vec<DatasetSpec> = self
            .dataset_specs()
            .into_iter()
            .filter(|s| only.map_or(true, |ids| ids.iter().any(|id| *id == s.id)))
            .collect();
        orchestrator.refresh_all(&specs, force).await
    }

    /// Addresses needing coordinates: public-housing rows compose
    /// "<block> <street_name>"; private/EC rows already carry postal codes
    /// and skip geocoding entirely.
    fn collect_addresses(&self) -> Result<BTreeSet<String>> {
        let mut addresses = BTreeSet::new();
        for dataset_id in [HDB_RESALE_DATASET, HDB_RENTAL_DATASET] {
            for row in self.load_rows(dataset_id)? {
                let block = row.get("block").and_then(Value::as_str);
                let street = row.get("street_name").and_then(Value::as_str);
                if let (Some(block), Some(street)) = (block, street) {
                    addresses.insert(format!("{} {}", block, street));
                }
            }
        }
        Ok(addresses)
    }

    /// Stage 3: resolve every unique address through the cache + service.
    pub async fn run_geocode(
        &self,
        service: &dyn GeocodeService,
        retry_failed: bool,
    ) -> Result<GeocodeReport> {
        let addresses = self.collect_addresses()?;
        let mut repo = FileGeocodeRepository::open(&self.cache_path())?;
        let mut batch = GeocodeBatch::new(&mut repo, service)
            .with_pacer(Pacer::from_millis(self.config.geocode.delay_ms))
            .with_retries(self.config.geocode.max_retries, Duration::from_millis(500))
            .with_progress_every(self.config.geocode.progress_every);
        if retry_failed {
            batch = batch.retry_failed();
        }
        let entries = batch.resolve(addresses).await?;
        let resolved =
            entries.values().filter(|e| e.status == GeocodeStatus::Resolved).count();
        Ok(GeocodeReport { resolved, failed: entries.len() - resolved })
    }

    fn load_amenities(&self) -> Result<BTreeMap<AmenityType, Vec<AmenityRecord>>> {
        let mut amenities: BTreeMap<AmenityType, Vec<AmenityRecord>> = BTreeMap::new();
        for dataset in &self.config.datasets {
            let Some(tag) = dataset.id.strip_prefix(AMENITY_DATASET_PREFIX) else {
                continue;
            };
            let Some(amenity_type) = AmenityType::from_str_tag(tag) else {
                warn!(dataset = %dataset.id, "unknown amenity category, skipping");
                continue;
            };
            for row in self.load_rows(&dataset.id)? {
                let name = row.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let latitude = row.get("latitude").and_then(Value::as_f64);
                let longitude = row.get("longitude").and_then(Value::as_f64);
                if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
                    amenities.entry(amenity_type).or_default().push(AmenityRecord {
                        amenity_type,
                        name,
                        latitude,
                        longitude,
                    });
                }
            }
        }
        Ok(amenities)
    }

    /// Stage 4: amenity proximity features for every geocoded property.
    /// Writes both the structured artifact and the legacy flat rendition.
    pub fn run_features(&self) -> Result<usize> {
        let repo = FileGeocodeRepository::open(&self.cache_path())?;
        let properties: Vec<PropertyPoint> = repo
            .snapshot()
            .into_iter()
            .filter(|e| e.status == GeocodeStatus::Resolved)
            .filter_map(|e| {
                Some(PropertyPoint {
                    postal_code: e.postal_code?,
                    latitude: e.latitude?,
                    longitude: e.longitude?,
                })
            })
            .collect();

        let amenities = self.load_amenities()?;
        let rows = compute_features(&properties, &amenities);

        let flat: Vec<serde_json::Map<String, Value>> = rows.values().map(schema::to_flat).collect();
        write_json_atomic(&self.out_path("features.json"), &rows)?;
        write_json_atomic(&self.out_path("features_flat.json"), &flat)?;
        Ok(rows.len())
    }

    fn load_features(&self) -> Result<BTreeMap<String, AmenityFeatureRow>> {
        let path = self.out_path("features.json");
        if !path.exists() {
            warn!("feature artifact missing, merging without amenity features");
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn postal_lookup(&self) -> Result<BTreeMap<String, String>> {
        let repo = FileGeocodeRepository::open(&self.cache_path())?;
        Ok(repo
            .snapshot()
            .into_iter()
            .filter(|e| e.status == GeocodeStatus::Resolved)
            .filter_map(|e| Some((normalize_address(&e.normalized_address), e.postal_code?)))
            .collect())
    }

    fn source_tables(&self) -> Result<Vec<SourceTable>> {
        let pairs = [
            (HDB_RESALE_DATASET, SourceKind::HdbResale),
            (PRIVATE_TX_DATASET, SourceKind::PrivateTransaction),
            (EC_TX_DATASET, SourceKind::EcTransaction),
            (HDB_RENTAL_DATASET, SourceKind::HdbRental),
        ];
        let mut tables = Vec::new();
        for (dataset_id, source) in pairs {
            tables.push(SourceTable { source, rows: self.load_rows(dataset_id)? });
        }
        Ok(tables)
    }

    /// Stage 5: adapt every source and merge on postal code.
    pub fn run_unify(&self) -> Result<UnifiedDataset> {
        let postal_lookup = self.postal_lookup()?;
        let tables = self.source_tables()?;
        let transactions = adapt_all(&tables, &postal_lookup);
        let features = self.load_features()?;

        let dataset = unify(transactions.clone(), &features);
        write_json_atomic(&self.out_path("transactions.json"), &transactions)?;
        write_json_atomic(&self.out_path("unified.json"), &dataset)?;
        Ok(dataset)
    }

    /// Stage 6: rental-yield imputation over the transaction universe.
    pub fn run_impute(&self) -> Result<usize> {
        let path = self.out_path("transactions.json");
        if !path.exists() {
            return Err(PipelineError::Config(
                "transactions artifact missing; run the unify stage first".to_string(),
            ));
        }
        let bytes = std::fs::read(&path)?;
        let transactions: Vec<CommonTransaction> = serde_json::from_slice(&bytes)?;

        let observed = derive_observed_yields(&transactions);
        let universe = yield_universe(&transactions);
        let records = impute_rental_yield(&observed, &universe)?;
        write_json_atomic(&self.out_path("rental_yields.json"), &records)?;
        Ok(records.len())
    }

    /// Stages 2-6 in order. Stage N+1 never starts before stage N's
    /// artifact is fully written.
    pub async fn run_all(
        &self,
        downloader: Box<dyn Downloader>,
        service: &dyn GeocodeService,
        force: bool,
    ) -> Result<()> {
        let _report = self.run_fetch(downloader, force, false, None).await;

        let geocode = self.run_geocode(service, false).await?;
        info!(
            resolved = geocode.resolved,
            failed = geocode.failed,
            "geocoding stage complete"
        );

        let feature_rows = self.run_features()?;
        info!(rows = feature_rows, "feature stage complete");

        let dataset = self.run_unify()?;
        info!(records = dataset.records.len(), "unify stage complete");

        let yields = self.run_impute()?;
        info!(records = yields, "imputation stage complete");
        Ok(())
    }
}
