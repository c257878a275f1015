use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;

use crate::record::{ContentRecord, decode_content_records};
use crate::store::{
    CONTENT_TABLE, CUSTOM_TYPES_TABLE, DISABLED_TYPES_TABLE, OrderBy, RecordStoreRead, SelectQuery,
    UNIVERSES_TABLE, VERSIONS_TABLE,
};

#[derive(Debug, Clone, Serialize)]
pub struct UniverseSummary {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomContentType {
    pub name: String,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniverseVersion {
    pub version_number: i64,
    pub commit_message: Option<String>,
    pub is_current: bool,
}

/// The read-only side tables shown with a universe inspection. Pass-through
/// reads; no logic beyond decoding.
#[derive(Debug, Clone, Serialize)]
pub struct UniverseDiagnostics {
    pub custom_types: Vec<CustomContentType>,
    pub disabled_types: Vec<String>,
    pub versions: Vec<UniverseVersion>,
}

/// Look up one universe by its slug.
pub fn find_universe<S: RecordStoreRead>(
    store: &mut S,
    slug: &str,
) -> Result<Option<UniverseSummary>> {
    let rows = store.select(
        UNIVERSES_TABLE,
        &SelectQuery {
            filters: vec![("slug".to_string(), slug.to_string())],
            limit: Some(1),
            ..SelectQuery::default()
        },
    )?;
    rows.first().map(decode_universe).transpose()
}

/// All universes, for the not-found fallback listing.
pub fn list_universes<S: RecordStoreRead>(store: &mut S) -> Result<Vec<UniverseSummary>> {
    let rows = store.select(
        UNIVERSES_TABLE,
        &SelectQuery {
            order: vec![OrderBy::ascending("name")],
            ..SelectQuery::default()
        },
    )?;
    rows.iter().map(decode_universe).collect()
}

/// One universe's content records, ordered the way the renderer expects:
/// parent first, then sibling order.
pub fn fetch_content_records<S: RecordStoreRead>(
    store: &mut S,
    universe_id: &str,
) -> Result<Vec<ContentRecord>> {
    let rows = store.select(
        CONTENT_TABLE,
        &SelectQuery {
            filters: vec![("universe_id".to_string(), universe_id.to_string())],
            order: vec![
                OrderBy::ascending("parent_id"),
                OrderBy::ascending("order_index"),
            ],
            ..SelectQuery::default()
        },
    )?;
    decode_content_records(&rows).context("content_items rows failed schema validation")
}

pub fn universe_diagnostics<S: RecordStoreRead>(
    store: &mut S,
    universe_id: &str,
) -> Result<UniverseDiagnostics> {
    let custom_rows = store.select(
        CUSTOM_TYPES_TABLE,
        &SelectQuery {
            filters: vec![("universe_id".to_string(), universe_id.to_string())],
            ..SelectQuery::default()
        },
    )?;
    let mut custom_types = Vec::new();
    for row in &custom_rows {
        custom_types.push(CustomContentType {
            name: required_text(row, "name", CUSTOM_TYPES_TABLE)?,
            emoji: optional_text(row, "emoji"),
        });
    }

    let disabled_rows = store.select(
        DISABLED_TYPES_TABLE,
        &SelectQuery {
            filters: vec![("universe_id".to_string(), universe_id.to_string())],
            ..SelectQuery::default()
        },
    )?;
    let mut disabled_types = Vec::new();
    for row in &disabled_rows {
        disabled_types.push(required_text(row, "content_type", DISABLED_TYPES_TABLE)?);
    }

    let version_rows = store.select(
        VERSIONS_TABLE,
        &SelectQuery {
            filters: vec![("universe_id".to_string(), universe_id.to_string())],
            order: vec![OrderBy::ascending("version_number")],
            ..SelectQuery::default()
        },
    )?;
    let mut versions = Vec::new();
    for row in &version_rows {
        versions.push(UniverseVersion {
            version_number: row
                .get("version_number")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    anyhow!("{VERSIONS_TABLE} row is missing an integer version_number")
                })?,
            commit_message: optional_text(row, "commit_message"),
            is_current: row
                .get("is_current")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        });
    }

    Ok(UniverseDiagnostics {
        custom_types,
        disabled_types,
        versions,
    })
}

fn decode_universe(row: &Value) -> Result<UniverseSummary> {
    Ok(UniverseSummary {
        id: required_text(row, "id", UNIVERSES_TABLE)?,
        name: required_text(row, "name", UNIVERSES_TABLE)?,
        slug: optional_text(row, "slug"),
        user_id: optional_text(row, "user_id"),
        created_at: optional_text(row, "created_at"),
        description: optional_text(row, "description"),
    })
}

fn required_text(row: &Value, column: &str, table: &str) -> Result<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("{table} row is missing required column '{column}'"))
}

fn optional_text(row: &Value, column: &str) -> Option<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
