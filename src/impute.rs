use crate::domain::{CommonTransaction, RentalYieldRecord, YieldProvenance};
use crate::error::{PipelineError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A (town, period, property type) combination from the transaction universe.
pub type YieldKey = (String, String, String);

/// A directly observed gross rental yield.
#[derive(Debug, Clone)]
pub struct ObservedYield {
    pub town: String,
    pub period: String,
    pub property_type: String,
    pub yield_pct: f64,
}

/// Derives observed yields where a rental record and a sale record exist for
/// the same (town, period, property type): annualized rent over average price.
pub fn derive_observed_yields(transactions: &[CommonTransaction]) -> Vec<ObservedYield> {
    let mut rents: BTreeMap<YieldKey, Vec<f64>> = BTreeMap::new();
    let mut prices: BTreeMap<YieldKey, Vec<f64>> = BTreeMap::new();
    for tx in transactions {
        let key = (tx.town.clone(), tx.period.clone(), tx.property_type.clone());
        if let Some(rent) = tx.monthly_rent {
            rents.entry(key).or_default().push(rent);
        } else if tx.price > 0.0 {
            prices.entry(key).or_default().push(tx.price);
        }
    }

    let mut observed = Vec::new();
    for (key, rent_values) in rents {
        if let Some(price_values) = prices.get(&key) {
            let avg_rent = rent_values.iter().sum::<f64>() / rent_values.len() as f64;
            let avg_price = price_values.iter().sum::<f64>() / price_values.len() as f64;
            observed.push(ObservedYield {
                town: key.0,
                period: key.1,
                property_type: key.2,
                yield_pct: avg_rent * 12.0 / avg_price * 100.0,
            });
        }
    }
    observed
}

/// The transaction universe: every combination that must receive a yield.
pub fn yield_universe(transactions: &[CommonTransaction]) -> BTreeSet<YieldKey> {
    transactions
        .iter()
        .map(|tx| (tx.town.clone(), tx.period.clone(), tx.property_type.clone()))
        .collect()
}

struct ImputationContext {
    observed: BTreeMap<YieldKey, f64>,
    /// (period, property_type) -> (mean across observed towns, town count).
    area_averages: BTreeMap<(String, String), (f64, usize)>,
    /// property_type -> (median across all periods/areas, observation count).
    type_medians: BTreeMap<String, (f64, usize)>,
}

impl ImputationContext {
    fn build(observed: &[ObservedYield]) -> Self {
        let mut observed_map = BTreeMap::new();
        let mut by_period_type: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
        let mut by_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for o in observed {
            observed_map.insert(
                (o.town.clone(), o.period.clone(), o.property_type.clone()),
                o.yield_pct,
            );
            by_period_type
                .entry((o.period.clone(), o.property_type.clone()))
                .or_default()
                .push(o.yield_pct);
            by_type.entry(o.property_type.clone()).or_default().push(o.yield_pct);
        }

        let area_averages = by_period_type
            .into_iter()
            .map(|(k, v)| {
                let mean = v.iter().sum::<f64>() / v.len() as f64;
                (k, (mean, v.len()))
            })
            .collect();
        let type_medians = by_type
            .into_iter()
            .map(|(k, mut v)| {
                v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let n = v.len();
                let median =
                    if n % 2 == 1 { v[n / 2] } else { (v[n / 2 - 1] + v[n / 2]) / 2.0 };
                (k, (median, n))
            })
            .collect();

        Self { observed: observed_map, area_averages, type_medians }
    }
}

type Strategy = fn(&YieldKey, &ImputationContext) -> Option<RentalYieldRecord>;

fn observed_strategy(key: &YieldKey, ctx: &ImputationContext) -> Option<RentalYieldRecord> {
    ctx.observed.get(key).map(|y| RentalYieldRecord {
        town: key.0.clone(),
        period: key.1.clone(),
        property_type: key.2.clone(),
        yield_pct: *y,
        provenance: YieldProvenance::Observed,
        fallback_source: None,
    })
}

fn area_average_strategy(key: &YieldKey, ctx: &ImputationContext) -> Option<RentalYieldRecord> {
    let (mean, towns) = ctx.area_averages.get(&(key.1.clone(), key.2.clone()))?;
    Some(RentalYieldRecord {
        town: key.0.clone(),
        period: key.1.clone(),
        property_type: key.2.clone(),
        yield_pct: *mean,
        provenance: YieldProvenance::ImputedByArea,
        fallback_source: Some(format!("area_average:{}/{}:{}_towns", key.2, key.1, towns)),
    })
}

fn type_median_strategy(key: &YieldKey, ctx: &ImputationContext) -> Option<RentalYieldRecord> {
    let (median, n) = ctx.type_medians.get(&key.2)?;
    Some(RentalYieldRecord {
        town: key.0.clone(),
        period: key.1.clone(),
        property_type: key.2.clone(),
        yield_pct: *median,
        provenance: YieldProvenance::ImputedByType,
        fallback_source: Some(format!("type_median:{}:{}_observations", key.2, n)),
    })
}

/// Quiet last resort for property types with no observations at all: the
/// median over every observed yield regardless of type.
fn global_median_strategy(key: &YieldKey, ctx: &ImputationContext) -> Option<RentalYieldRecord> {
    let mut all: Vec<f64> = ctx.observed.values().copied().collect();
    if all.is_empty() {
        return None;
    }
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = all.len();
    let median = if n % 2 == 1 { all[n / 2] } else { (all[n / 2 - 1] + all[n / 2]) / 2.0 };
    Some(RentalYieldRecord {
        town: key.0.clone(),
        period: key.1.clone(),
        property_type: key.2.clone(),
        yield_pct: median,
        provenance: YieldProvenance::ImputedByType,
        fallback_source: Some(format!("global_median:{}_observations", n)),
    })
}

/// Ordered fallback hierarchy; the first strategy that produces a value
/// wins, and the winner is recorded as the record's provenance.
const STRATEGIES: [(&str, Strategy); 4] = [
    ("observed", observed_strategy),
    ("area_average", area_average_strategy),
    ("type_median", type_median_strategy),
    ("global_median", global_median_strategy),
];

/// Produces exactly one yield record per universe combination. No row is
/// ever dropped; absence falls through the hierarchy instead.
pub fn impute_rental_yield(
    observed: &[ObservedYield],
    universe: &BTreeSet<YieldKey>,
) -> Result<Vec<RentalYieldRecord>> {
    if universe.is_empty() {
        return Ok(Vec::new());
    }
    if observed.is_empty() {
        return Err(PipelineError::Api {
            message: "cannot impute rental yields without any observed values".to_string(),
        });
    }

    let ctx = ImputationContext::build(observed);
    let mut records = Vec::with_capacity(universe.len());
    for key in universe {
        // With a non-empty observed set the global-median tier always
        // produces, so the unwrap below cannot fire.
        let (name, record) = STRATEGIES
            .iter()
            .find_map(|(name, strategy)| strategy(key, &ctx).map(|r| (*name, r)))
            .expect("fallback hierarchy exhausted");
        debug!(town = %key.0, period = %key.1, property_type = %key.2, strategy = name, "yield assigned");
        records.push(record);
    }

    let imputed = records
        .iter()
        .filter(|r| r.provenance != YieldProvenance::Observed)
        .count();
    info!(total = records.len(), imputed, "rental yield imputation complete");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(town: &str, period: &str, ptype: &str, y: f64) -> ObservedYield {
        ObservedYield {
            town: town.to_string(),
            period: period.to_string(),
            property_type: ptype.to_string(),
            yield_pct: y,
        }
    }

    fn key(town: &str, period: &str, ptype: &str) -> YieldKey {
        (town.to_string(), period.to_string(), ptype.to_string())
    }

    #[test]
    fn every_universe_row_gets_exactly_one_record() {
        let obs = vec![observed("BUKIT BATOK", "2024-06", "HDB", 5.2)];
        let universe: BTreeSet<YieldKey> = [
            key("BUKIT BATOK", "2024-06", "HDB"),
            key("YISHUN", "2024-06", "HDB"),
            key("YISHUN", "2024-07", "HDB"),
        ]
        .into_iter()
        .collect();

        let records = impute_rental_yield(&obs, &universe).unwrap();
        assert_eq!(records.len(), 3);
        let mut keys: Vec<_> = records
            .iter()
            .map(|r| (r.town.clone(), r.period.clone(), r.property_type.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 3);
        for r in &records {
            assert!(r.yield_pct > 0.0);
            if r.provenance != YieldProvenance::Observed {
                assert!(r.fallback_source.is_some());
            }
        }
    }

    #[test]
    fn direct_observation_wins_over_fallbacks() {
        let obs = vec![
            observed("BUKIT BATOK", "2024-06", "HDB", 5.2),
            observed("YISHUN", "2024-06", "HDB", 6.0),
        ];
        let universe: BTreeSet<YieldKey> =
            [key("BUKIT BATOK", "2024-06", "HDB")].into_iter().collect();
        let records = impute_rental_yield(&obs, &universe).unwrap();
        assert_eq!(records[0].provenance, YieldProvenance::Observed);
        assert!((records[0].yield_pct - 5.2).abs() < 1e-9);
        assert!(records[0].fallback_source.is_none());
    }

    #[test]
    fn missing_town_falls_back_to_area_average_with_source() {
        // Town X has no observation for 2024-06 HDB, but other towns do.
        let obs = vec![
            observed("BUKIT BATOK", "2024-06", "HDB", 5.0),
            observed("YISHUN", "2024-06", "HDB", 6.0),
        ];
        let universe: BTreeSet<YieldKey> = [key("X", "2024-06", "HDB")].into_iter().collect();

        let records = impute_rental_yield(&obs, &universe).unwrap();
        let record = &records[0];
        assert_eq!(record.provenance, YieldProvenance::ImputedByArea);
        assert!((record.yield_pct - 5.5).abs() < 1e-9);
        let source = record.fallback_source.as_deref().unwrap();
        assert!(source.starts_with("area_average:"), "got {}", source);
        assert!(source.contains("2_towns"));
    }

    #[test]
    fn missing_period_falls_back_to_type_median() {
        // No observation for 2024-08 in any town: area average unavailable.
        let obs = vec![
            observed("BUKIT BATOK", "2024-05", "HDB", 4.0),
            observed("BUKIT BATOK", "2024-06", "HDB", 5.0),
            observed("YISHUN", "2024-07", "HDB", 6.0),
        ];
        let universe: BTreeSet<YieldKey> = [key("X", "2024-08", "HDB")].into_iter().collect();

        let records = impute_rental_yield(&obs, &universe).unwrap();
        assert_eq!(records[0].provenance, YieldProvenance::ImputedByType);
        assert!((records[0].yield_pct - 5.0).abs() < 1e-9);
        assert!(records[0].fallback_source.as_deref().unwrap().starts_with("type_median:"));
    }

    #[test]
    fn unseen_property_type_uses_global_median() {
        let obs = vec![observed("BUKIT BATOK", "2024-06", "HDB", 5.0)];
        let universe: BTreeSet<YieldKey> =
            [key("ORCHARD", "2024-06", "Condominium")].into_iter().collect();

        let records = impute_rental_yield(&obs, &universe).unwrap();
        assert_eq!(records[0].provenance, YieldProvenance::ImputedByType);
        assert!(records[0].fallback_source.as_deref().unwrap().starts_with("global_median:"));
    }

    #[test]
    fn empty_observations_are_an_error() {
        let universe: BTreeSet<YieldKey> = [key("X", "2024-06", "HDB")].into_iter().collect();
        assert!(impute_rental_yield(&[], &universe).is_err());
    }

    #[test]
    fn observed_yields_derive_from_matched_rent_and_sale() {
        let sale = CommonTransaction {
            source: crate::domain::SourceKind::HdbResale,
            postal_code: "650201".to_string(),
            address: "201 BUKIT BATOK ST 21".to_string(),
            town: "BUKIT BATOK".to_string(),
            period: "2024-06".to_string(),
            property_type: "4 ROOM".to_string(),
            price: 480_000.0,
            floor_area_sqm: Some(93.0),
            monthly_rent: None,
        };
        let mut rental = sale.clone();
        rental.source = crate::domain::SourceKind::HdbRental;
        rental.price = 0.0;
        rental.monthly_rent = Some(3_200.0);

        // A rental in a town with no matching sale produces nothing.
        let mut orphan = rental.clone();
        orphan.town = "YISHUN".to_string();

        let observed = derive_observed_yields(&[sale, rental, orphan]);
        assert_eq!(observed.len(), 1);
        assert!((observed[0].yield_pct - 8.0).abs() < 1e-9);
    }
}
