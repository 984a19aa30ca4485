use std::collections::HashMap;

use common::error::AppError;

/// Fields the remote index declares as filterable. Anything else lives inside
/// the opaque metadata_json payload and cannot be filtered server-side.
const REMOTE_FILTERABLE: [&str; 3] = ["document_id", "source", "chunk_index"];

fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Validation(format!(
            "invalid filter key '{key}': only letters, digits and underscores are allowed"
        )));
    }
    Ok(())
}

fn sorted_pairs(filter: &HashMap<String, String>) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = filter
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_by_key(|(k, _)| *k);
    pairs
}

/// Renders the filter as an OData `$filter` expression with equality clauses
/// joined by `and`. Keys are sorted so the expression is stable for a given
/// filter map.
pub fn to_odata_expression(filter: &HashMap<String, String>) -> Result<Option<String>, AppError> {
    if filter.is_empty() {
        return Ok(None);
    }

    let mut clauses = Vec::with_capacity(filter.len());
    for (key, value) in sorted_pairs(filter) {
        validate_key(key)?;
        if !REMOTE_FILTERABLE.contains(&key) {
            return Err(AppError::Validation(format!(
                "filter key '{key}' is not filterable on the remote index (supported: {})",
                REMOTE_FILTERABLE.join(", ")
            )));
        }
        if key == "chunk_index" {
            let index: i64 = value.parse().map_err(|_| {
                AppError::Validation(format!(
                    "filter value for 'chunk_index' must be an integer, got '{value}'"
                ))
            })?;
            clauses.push(format!("{key} eq {index}"));
        } else {
            // Single quotes are escaped by doubling per OData string literal rules.
            let escaped = value.replace('\'', "''");
            clauses.push(format!("{key} eq '{escaped}'"));
        }
    }

    Ok(Some(clauses.join(" and ")))
}

/// Renders the filter as a SQL predicate over the `chunks` table (aliased `c`)
/// with one positional placeholder per clause. Schema columns are matched
/// directly, everything else goes through `json_extract` on the metadata
/// column. Returns the clause string and the parameter values in clause order.
pub fn to_sql_predicate(
    filter: &HashMap<String, String>,
) -> Result<Option<(String, Vec<String>)>, AppError> {
    if filter.is_empty() {
        return Ok(None);
    }

    let mut clauses = Vec::with_capacity(filter.len());
    let mut params = Vec::with_capacity(filter.len());
    for (key, value) in sorted_pairs(filter) {
        validate_key(key)?;
        match key {
            "document_id" | "source" | "chunk_index" => {
                clauses.push(format!("c.{key} = ?"));
            }
            _ => {
                clauses.push(format!("json_extract(c.metadata, '$.{key}') = ?"));
            }
        }
        params.push(value.to_string());
    }

    Ok(Some((clauses.join(" AND "), params)))
}
