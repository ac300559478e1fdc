pub mod projection;

use crate::constants::{FAR_RADIUS_M, NEAR_RADIUS_M};
use crate::domain::{AmenityFeatureRow, AmenityRecord, AmenityType, TypeFeatures};
use self::projection::{LocalProjection, PlanarPoint};
use std::collections::BTreeMap;
use tracing::info;

/// A geocoded property awaiting feature computation.
#[derive(Debug, Clone)]
pub struct PropertyPoint {
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Computes nearest-distance and radius-count features for every property
/// against every amenity category.
///
/// Coordinates are projected onto the local metric plane once per set, and
/// all amenity types are handled in a single pass over each property. A
/// type with zero instances yields `nearest_distance_m = None` so "none
/// exists" never reads as "very close".
pub fn compute_features(
    properties: &[PropertyPoint],
    amenities_by_type: &BTreeMap<AmenityType, Vec<AmenityRecord>>,
) -> BTreeMap<String, AmenityFeatureRow> {
    let proj = LocalProjection::singapore();

    let projected: BTreeMap<AmenityType, Vec<PlanarPoint>> = amenities_by_type
        .iter()
        .map(|(t, records)| {
            (*t, records.iter().map(|a| proj.project(a.latitude, a.longitude)).collect())
        })
        .collect();
    let empty: Vec<PlanarPoint> = Vec::new();

    let mut rows: BTreeMap<String, AmenityFeatureRow> = BTreeMap::new();
    for property in properties {
        // First record wins for a repeated postal code; transactions at the
        // same block share one feature row.
        if rows.contains_key(&property.postal_code) {
            continue;
        }
        let here = proj.project(property.latitude, property.longitude);
        let mut features = BTreeMap::new();
        for amenity_type in AmenityType::ALL {
            let points = projected.get(&amenity_type).unwrap_or(&empty);
            features.insert(amenity_type, scan_type(&here, points));
        }
        rows.insert(
            property.postal_code.clone(),
            AmenityFeatureRow { postal_code: property.postal_code.clone(), features },
        );
    }

    info!(
        properties = rows.len(),
        amenity_types = amenities_by_type.len(),
        "amenity features computed"
    );
    rows
}

fn scan_type(here: &PlanarPoint, points: &[PlanarPoint]) -> TypeFeatures {
    let mut nearest: Option<f64> = None;
    let mut near_count = 0u32;
    let mut far_count = 0u32;
    for p in points {
        let d = here.distance_m(p);
        if nearest.map_or(true, |n| d < n) {
            nearest = Some(d);
        }
        if d <= NEAR_RADIUS_M {
            near_count += 1;
        }
        if d <= FAR_RADIUS_M {
            far_count += 1;
        }
    }
    TypeFeatures {
        nearest_distance_m: nearest,
        count_within_500m: near_count,
        count_within_1000m: far_count,
    }
}
