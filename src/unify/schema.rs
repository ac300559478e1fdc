//! Translation between the legacy flat-column feature schema and the
//! structured per-type schema.
//!
//! Downstream consumers migrated to the structured shape in waves, so both
//! are supported simultaneously; translation is lossless in both directions
//! (a missing nearest distance stays null, never zero).

use crate::domain::{AmenityFeatureRow, AmenityType, TypeFeatures};
use crate::error::{PipelineError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Renders a feature row into the legacy flat columns:
/// `dist_nearest_<type>`, `count_<type>_500m`, `count_<type>_1000m`.
pub fn to_flat(row: &AmenityFeatureRow) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("postal_code".to_string(), Value::String(row.postal_code.clone()));
    for amenity_type in AmenityType::ALL {
        let tag = amenity_type.as_str();
        let features = row.features.get(&amenity_type);
        let dist = features
            .and_then(|f| f.nearest_distance_m)
            .map(|d| Value::from(d))
            .unwrap_or(Value::Null);
        out.insert(format!("dist_nearest_{}", tag), dist);
        out.insert(
            format!("count_{}_500m", tag),
            Value::from(features.map_or(0, |f| f.count_within_500m)),
        );
        out.insert(
            format!("count_{}_1000m", tag),
            Value::from(features.map_or(0, |f| f.count_within_1000m)),
        );
    }
    out
}

/// Parses a legacy flat row back into the structured shape.
pub fn from_flat(flat: &Map<String, Value>) -> Result<AmenityFeatureRow> {
    let postal_code = flat
        .get("postal_code")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PipelineError::SchemaMismatch("flat feature row missing postal_code".to_string())
        })?
        .to_string();

    let mut features = BTreeMap::new();
    for amenity_type in AmenityType::ALL {
        let tag = amenity_type.as_str();
        let nearest_distance_m = match flat.get(format!("dist_nearest_{}", tag).as_str()) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_f64().ok_or_else(|| {
                PipelineError::SchemaMismatch(format!("dist_nearest_{} is not numeric", tag))
            })?),
        };
        let count_within_500m = flat_count(flat, &format!("count_{}_500m", tag))?;
        let count_within_1000m = flat_count(flat, &format!("count_{}_1000m", tag))?;
        features.insert(
            amenity_type,
            TypeFeatures { nearest_distance_m, count_within_500m, count_within_1000m },
        );
    }
    Ok(AmenityFeatureRow { postal_code, features })
}

fn flat_count(flat: &Map<String, Value>, column: &str) -> Result<u32> {
    match flat.get(column) {
        None => Ok(0),
        Some(v) => v
            .as_u64()
            .map(|n| n as u32)
            .ok_or_else(|| PipelineError::SchemaMismatch(format!("{} is not a count", column))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> AmenityFeatureRow {
        let mut features = BTreeMap::new();
        features.insert(
            AmenityType::Mall,
            TypeFeatures {
                nearest_distance_m: Some(667.5),
                count_within_500m: 0,
                count_within_1000m: 2,
            },
        );
        features.insert(
            AmenityType::Park,
            TypeFeatures {
                nearest_distance_m: None,
                count_within_500m: 0,
                count_within_1000m: 0,
            },
        );
        AmenityFeatureRow { postal_code: "650201".to_string(), features }
    }

    #[test]
    fn flat_columns_follow_the_naming_convention() {
        let flat = to_flat(&sample_row());
        assert_eq!(flat["postal_code"], "650201");
        assert_eq!(flat["count_mall_500m"], 0);
        assert_eq!(flat["count_mall_1000m"], 2);
        assert!((flat["dist_nearest_mall"].as_f64().unwrap() - 667.5).abs() < 1e-9);
        // A type with no instances is null, not zero.
        assert_eq!(flat["dist_nearest_park"], Value::Null);
    }

    #[test]
    fn structured_to_flat_to_structured_is_lossless() {
        let original = sample_row();
        let round_tripped = from_flat(&to_flat(&original)).unwrap();
        assert_eq!(round_tripped.postal_code, original.postal_code);
        assert_eq!(
            round_tripped.features[&AmenityType::Mall],
            original.features[&AmenityType::Mall]
        );
        assert_eq!(
            round_tripped.features[&AmenityType::Park].nearest_distance_m,
            None
        );
    }

    #[test]
    fn flat_row_without_key_is_rejected() {
        let mut flat = to_flat(&sample_row());
        flat.remove("postal_code");
        assert!(matches!(from_flat(&flat), Err(PipelineError::SchemaMismatch(_))));
    }
}
