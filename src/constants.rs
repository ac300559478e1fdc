/// Dataset identifiers used by the fetch orchestrator and CLI.
pub const HDB_RESALE_DATASET: &str = "hdb_resale";
pub const HDB_RENTAL_DATASET: &str = "hdb_rental";
pub const PRIVATE_TX_DATASET: &str = "private_transactions";
pub const EC_TX_DATASET: &str = "ec_transactions";
pub const AMENITY_DATASET_PREFIX: &str = "amenity_";

/// OneMap endpoints.
pub const ONEMAP_TOKEN_URL: &str = "https://www.onemap.gov.sg/api/auth/post/getToken";
pub const ONEMAP_SEARCH_URL: &str = "https://www.onemap.gov.sg/api/common/elastic/search";

/// Radii (metres) for amenity count features.
pub const NEAR_RADIUS_M: f64 = 500.0;
pub const FAR_RADIUS_M: f64 = 1000.0;

/// Refresh a token this many seconds before its nominal expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub fn user_friendly_dataset_name(dataset_id: &str) -> &str {
    match dataset_id {
        HDB_RESALE_DATASET => "HDB resale transactions",
        HDB_RENTAL_DATASET => "HDB rental records",
        PRIVATE_TX_DATASET => "Private market transactions",
        EC_TX_DATASET => "Executive condominium transactions",
        other => other,
    }
}
