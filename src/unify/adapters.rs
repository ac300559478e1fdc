use crate::domain::{normalize_address, CommonTransaction, SourceKind};
use crate::error::{PipelineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One raw table as downloaded, rows still in the origin system's shape.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub source: SourceKind,
    pub rows: Vec<Value>,
}

/// Adapts every raw row of `table` into the common intermediate shape.
///
/// Rows that cannot supply the postal-code merge key (no inline postal and
/// no geocoded lookup hit) are dropped with a count; a table whose rows all
/// fail structurally is rejected as a schema mismatch.
pub fn adapt_table(
    table: &SourceTable,
    postal_by_address: &BTreeMap<String, String>,
) -> Result<Vec<CommonTransaction>> {
    let mut adapted = Vec::new();
    let mut structural_errors = 0usize;
    let mut missing_key = 0usize;

    for row in &table.rows {
        let result = match table.source {
            SourceKind::HdbResale => hdb_resale_row(row, postal_by_address),
            SourceKind::PrivateTransaction => private_row(row),
            SourceKind::EcTransaction => ec_row(row),
            SourceKind::HdbRental => hdb_rental_row(row, postal_by_address),
        };
        match result {
            Ok(Some(tx)) => adapted.push(tx),
            Ok(None) => missing_key += 1,
            Err(e) => {
                structural_errors += 1;
                debug!(source = %table.source, error = %e, "row rejected");
            }
        }
    }

    if adapted.is_empty() && !table.rows.is_empty() {
        return Err(PipelineError::SchemaMismatch(format!(
            "source {} produced no adaptable rows ({} structural errors, {} missing merge key)",
            table.source, structural_errors, missing_key
        )));
    }
    if missing_key > 0 || structural_errors > 0 {
        warn!(
            source = %table.source,
            adapted = adapted.len(),
            missing_key,
            structural_errors,
            "rows dropped during adaptation"
        );
    }
    Ok(adapted)
}

/// Adapts every table, isolating schema mismatches to the failing source so
/// the remaining sources still contribute to the merge.
pub fn adapt_all(
    tables: &[SourceTable],
    postal_by_address: &BTreeMap<String, String>,
) -> Vec<CommonTransaction> {
    let mut all = Vec::new();
    for table in tables {
        match adapt_table(table, postal_by_address) {
            Ok(mut rows) => all.append(&mut rows),
            Err(e) => warn!(source = %table.source, error = %e, "source excluded from merge"),
        }
    }
    all
}

fn str_field<'a>(row: &'a Value, name: &str) -> Result<&'a str> {
    row.get(name).and_then(Value::as_str).ok_or_else(|| {
        PipelineError::SchemaMismatch(format!("missing or non-string field '{}'", name))
    })
}

fn num_field(row: &Value, name: &str) -> Result<f64> {
    let value = row
        .get(name)
        .ok_or_else(|| PipelineError::SchemaMismatch(format!("missing field '{}'", name)))?;
    // Numeric columns arrive as strings in the government exports.
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            PipelineError::SchemaMismatch(format!("non-finite number in '{}'", name))
        }),
        Value::String(s) => s.trim().parse().map_err(|_| {
            PipelineError::SchemaMismatch(format!("unparseable number '{}' in '{}'", s, name))
        }),
        _ => Err(PipelineError::SchemaMismatch(format!("field '{}' is not numeric", name))),
    }
}

/// Public-housing resale rows: no postal column, the merge key comes from
/// the geocode cache via the "<block> <street_name>" address.
fn hdb_resale_row(
    row: &Value,
    postal_by_address: &BTreeMap<String, String>,
) -> Result<Option<CommonTransaction>> {
    let block = str_field(row, "block")?;
    let street = str_field(row, "street_name")?;
    let address = format!("{} {}", block, street);
    let postal_code = match postal_by_address.get(&normalize_address(&address)) {
        Some(p) => p.clone(),
        None => return Ok(None),
    };
    Ok(Some(CommonTransaction {
        source: SourceKind::HdbResale,
        postal_code,
        address,
        town: str_field(row, "town")?.to_string(),
        period: str_field(row, "month")?.to_string(),
        property_type: str_field(row, "flat_type")?.to_string(),
        price: num_field(row, "resale_price")?,
        floor_area_sqm: num_field(row, "floor_area_sqm").ok(),
        monthly_rent: None,
    }))
}

/// Private-market rows carry their own postal code; contract dates arrive
/// as "MMYY" and are widened to "YYYY-MM".
fn private_row(row: &Value) -> Result<Option<CommonTransaction>> {
    let postal_code = match row.get("postal_code").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Ok(None),
    };
    let street = str_field(row, "street")?;
    let project = str_field(row, "project")?;
    Ok(Some(CommonTransaction {
        source: SourceKind::PrivateTransaction,
        postal_code,
        address: format!("{} {}", project, street),
        town: str_field(row, "district")?.to_string(),
        period: widen_contract_date(str_field(row, "contract_date")?)?,
        property_type: str_field(row, "property_type")?.to_string(),
        price: num_field(row, "price")?,
        floor_area_sqm: num_field(row, "area_sqm").ok(),
        monthly_rent: None,
    }))
}

/// Executive condominium rows: same population as private but a third
/// naming scheme.
fn ec_row(row: &Value) -> Result<Option<CommonTransaction>> {
    let postal_code = match row.get("postal").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Ok(None),
    };
    Ok(Some(CommonTransaction {
        source: SourceKind::EcTransaction,
        postal_code,
        address: format!("{} {}", str_field(row, "name")?, str_field(row, "road")?),
        town: str_field(row, "planning_area")?.to_string(),
        period: str_field(row, "sale_month")?.to_string(),
        property_type: "Executive Condominium".to_string(),
        price: num_field(row, "transacted_price")?,
        floor_area_sqm: num_field(row, "floor_area").ok(),
        monthly_rent: None,
    }))
}

fn hdb_rental_row(
    row: &Value,
    postal_by_address: &BTreeMap<String, String>,
) -> Result<Option<CommonTransaction>> {
    let block = str_field(row, "block")?;
    let street = str_field(row, "street_name")?;
    let address = format!("{} {}", block, street);
    let postal_code = match postal_by_address.get(&normalize_address(&address)) {
        Some(p) => p.clone(),
        None => return Ok(None),
    };
    let rent = num_field(row, "monthly_rent")?;
    Ok(Some(CommonTransaction {
        source: SourceKind::HdbRental,
        postal_code,
        address,
        town: str_field(row, "town")?.to_string(),
        period: str_field(row, "rent_approval_date")?.to_string(),
        property_type: str_field(row, "flat_type")?.to_string(),
        price: 0.0,
        floor_area_sqm: None,
        monthly_rent: Some(rent),
    }))
}

/// "0624" -> "2024-06". The private source predates 2000 nowhere in the
/// download window, so the century is fixed.
fn widen_contract_date(mmyy: &str) -> Result<String> {
    if mmyy.len() != 4 || !mmyy.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::SchemaMismatch(format!(
            "contract date '{}' is not MMYY",
            mmyy
        )));
    }
    let (mm, yy) = mmyy.split_at(2);
    Ok(format!("20{}-{}", yy, mm))
}
