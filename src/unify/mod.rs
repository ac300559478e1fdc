pub mod adapters;
pub mod schema;

use crate::domain::{
    AmenityFeatureRow, CommonTransaction, FeatureCoverage, UnifiedPropertyRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const AMENITY_GROUP: &str = "amenities";

/// Result of the merge: unified records plus per-feature-group coverage.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnifiedDataset {
    pub records: Vec<UnifiedPropertyRecord>,
    /// Coverage percentage per feature group across all merged records.
    pub coverage_pct: BTreeMap<String, f64>,
}

/// Merges adapted transactions with the amenity feature table, keyed by
/// postal code.
///
/// Properties whose postal code never went through the feature stage get an
/// explicit `Absent` coverage flag — a different statement than a present
/// group holding null values. Coverage below 100% is reported and logged,
/// never fatal.
pub fn unify(
    transactions: Vec<CommonTransaction>,
    features: &BTreeMap<String, AmenityFeatureRow>,
) -> UnifiedDataset {
    let mut grouped: BTreeMap<String, Vec<CommonTransaction>> = BTreeMap::new();
    for tx in transactions {
        grouped.entry(tx.postal_code.clone()).or_default().push(tx);
    }

    let mut records = Vec::with_capacity(grouped.len());
    let mut amenity_present = 0usize;
    for (postal_code, group) in grouped {
        let amenities = features.get(&postal_code).cloned();
        let mut coverage_flags = BTreeMap::new();
        coverage_flags.insert(
            AMENITY_GROUP.to_string(),
            if amenities.is_some() { FeatureCoverage::Present } else { FeatureCoverage::Absent },
        );
        if amenities.is_some() {
            amenity_present += 1;
        }

        let mut sources: Vec<_> = group.iter().map(|t| t.source).collect();
        sources.sort_by_key(|s| s.as_str());
        sources.dedup();

        // Rental rows carry no sale price; averages are over sales only, and
        // a group with no sales at all has no average rather than a zero.
        let sale_prices: Vec<f64> =
            group.iter().filter(|t| t.monthly_rent.is_none()).map(|t| t.price).collect();
        let avg_price = if sale_prices.is_empty() {
            None
        } else {
            Some(sale_prices.iter().sum::<f64>() / sale_prices.len() as f64)
        };
        let latest_period =
            group.iter().map(|t| t.period.clone()).max().unwrap_or_default();

        records.push(UnifiedPropertyRecord {
            postal_code,
            town: group[0].town.clone(),
            property_type: group[0].property_type.clone(),
            sources,
            transaction_count: group.len() as u32,
            latest_period,
            avg_price,
            amenities,
            coverage_flags,
        });
    }

    let mut coverage_pct = BTreeMap::new();
    let pct = if records.is_empty() {
        100.0
    } else {
        amenity_present as f64 * 100.0 / records.len() as f64
    };
    coverage_pct.insert(AMENITY_GROUP.to_string(), pct);

    info!(records = records.len(), amenity_coverage_pct = format!("{:.1}", pct), "merge complete");
    if pct < 100.0 {
        warn!(
            group = AMENITY_GROUP,
            coverage_pct = format!("{:.1}", pct),
            "feature group coverage below 100%"
        );
    }

    UnifiedDataset { records, coverage_pct }
}
