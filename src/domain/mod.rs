use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Origin system of a raw transaction table. Each variant has its own
/// adapter in `unify::adapters`; selection is by this tag, never by
/// sniffing column names at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    HdbResale,
    PrivateTransaction,
    EcTransaction,
    HdbRental,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HdbResale => "hdb_resale",
            SourceKind::PrivateTransaction => "private_transaction",
            SourceKind::EcTransaction => "ec_transaction",
            SourceKind::HdbRental => "hdb_rental",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a geocoding attempt for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    Resolved,
    Failed,
}

/// A cached geocoding result, keyed by normalized address text so repeated
/// addresses across records are resolved once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodedAddress {
    pub normalized_address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    pub resolved_at: DateTime<Utc>,
    pub status: GeocodeStatus,
}

impl GeocodedAddress {
    pub fn failed(normalized_address: String) -> Self {
        Self {
            normalized_address,
            latitude: None,
            longitude: None,
            postal_code: None,
            resolved_at: Utc::now(),
            status: GeocodeStatus::Failed,
        }
    }
}

/// Case- and whitespace-insensitive key for the geocode cache.
pub fn normalize_address(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

/// Point-of-interest category used for proximity features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmenityType {
    TrainExit,
    Grocery,
    Childcare,
    Park,
    Market,
    FoodCourt,
    Mall,
}

impl AmenityType {
    pub const ALL: [AmenityType; 7] = [
        AmenityType::TrainExit,
        AmenityType::Grocery,
        AmenityType::Childcare,
        AmenityType::Park,
        AmenityType::Market,
        AmenityType::FoodCourt,
        AmenityType::Mall,
    ];

    /// Column-name fragment used by the flat output schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            AmenityType::TrainExit => "train_exit",
            AmenityType::Grocery => "grocery",
            AmenityType::Childcare => "childcare",
            AmenityType::Park => "park",
            AmenityType::Market => "market",
            AmenityType::FoodCourt => "food_court",
            AmenityType::Mall => "mall",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for AmenityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only reference point for one amenity instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmenityRecord {
    pub amenity_type: AmenityType,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Proximity metrics for one property and one amenity type.
///
/// `nearest_distance_m` is `None` when zero instances of the type exist,
/// never `0.0`: a missing amenity must not read as an adjacent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeFeatures {
    pub nearest_distance_m: Option<f64>,
    pub count_within_500m: u32,
    pub count_within_1000m: u32,
}

/// All amenity-type metrics for one property, keyed for merging by postal code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmenityFeatureRow {
    pub postal_code: String,
    pub features: BTreeMap<AmenityType, TypeFeatures>,
}

/// Common intermediate transaction shape every source adapter produces.
/// Sources carry incompatible column names and units; nothing downstream of
/// the adapters sees a source-specific field again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonTransaction {
    pub source: SourceKind,
    pub postal_code: String,
    pub address: String,
    pub town: String,
    /// Transaction period as "YYYY-MM".
    pub period: String,
    pub property_type: String,
    pub price: f64,
    pub floor_area_sqm: Option<f64>,
    /// Monthly rent for rental sources, None for sale transactions.
    pub monthly_rent: Option<f64>,
}

/// Whether a feature group was computed for a property at all.
///
/// `Absent` marks sub-populations that were never run through a feature
/// stage (absent by design), which is distinct from a computed-but-null
/// value inside a present group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCoverage {
    Present,
    Absent,
}

/// One merged row of the unified dataset, keyed by postal code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedPropertyRecord {
    pub postal_code: String,
    pub town: String,
    pub property_type: String,
    pub sources: Vec<SourceKind>,
    pub transaction_count: u32,
    pub latest_period: String,
    /// Mean sale price over the group; `None` when every transaction in the
    /// group is a rental.
    pub avg_price: Option<f64>,
    pub amenities: Option<AmenityFeatureRow>,
    pub coverage_flags: BTreeMap<String, FeatureCoverage>,
}

/// Which tier of the fallback hierarchy produced a yield value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldProvenance {
    Observed,
    ImputedByArea,
    ImputedByType,
}

/// Rental yield for one (town, period, property type) combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalYieldRecord {
    pub town: String,
    pub period: String,
    pub property_type: String,
    pub yield_pct: f64,
    pub provenance: YieldProvenance,
    /// Identifies the fallback data that produced an imputed value; always
    /// set when provenance is not `Observed`.
    pub fallback_source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_address("  123  Bukit   Batok St 21 "), "123 BUKIT BATOK ST 21");
        assert_eq!(normalize_address("123 bukit batok st 21"), "123 BUKIT BATOK ST 21");
    }

    #[test]
    fn amenity_type_tags_round_trip() {
        for t in AmenityType::ALL {
            assert_eq!(AmenityType::from_str_tag(t.as_str()), Some(t));
        }
        assert_eq!(AmenityType::from_str_tag("bowling_alley"), None);
    }
}
