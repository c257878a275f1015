use serde_json::Value;
use thiserror::Error;

/// Schema-mismatch errors raised while decoding store rows into typed records.
/// Raised at the read boundary so a drifted remote schema fails fast instead of
/// surfacing as bad slugs or a garbled tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("content row is not a JSON object")]
    NotAnObject,

    #[error("content row is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("content column '{column}' has an unexpected type (expected {expected})")]
    ColumnType {
        column: &'static str,
        expected: &'static str,
    },
}

/// One row of the `content_items` table.
///
/// `slug` is `None` until backfilled; null, empty, and whitespace-only values
/// from the store all normalize to `None` (the store historically held both
/// NULL and '' for unslugged rows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub id: String,
    pub title: String,
    pub universe_id: String,
    pub parent_id: Option<String>,
    pub order_index: i64,
    pub slug: Option<String>,
    pub item_type: String,
    pub description: Option<String>,
}

impl ContentRecord {
    /// Decode a raw store row. `id`, `title`, and `universe_id` are required;
    /// everything else tolerates absence.
    pub fn from_row(row: &Value) -> Result<Self, RecordError> {
        let object = row.as_object().ok_or(RecordError::NotAnObject)?;

        Ok(Self {
            id: required_text(object, "id")?,
            title: required_text(object, "title")?,
            universe_id: required_text(object, "universe_id")?,
            parent_id: optional_text(object, "parent_id")?,
            order_index: optional_integer(object, "order_index")?.unwrap_or(0),
            slug: optional_text(object, "slug")?
                .filter(|value| !value.trim().is_empty()),
            item_type: optional_text(object, "item_type")?
                .unwrap_or_else(|| "unknown".to_string()),
            description: optional_text(object, "description")?,
        })
    }
}

/// Decode a full result set, failing on the first malformed row.
pub fn decode_content_records(rows: &[Value]) -> Result<Vec<ContentRecord>, RecordError> {
    rows.iter().map(ContentRecord::from_row).collect()
}

fn required_text(
    object: &serde_json::Map<String, Value>,
    column: &'static str,
) -> Result<String, RecordError> {
    match object.get(column) {
        None | Some(Value::Null) => Err(RecordError::MissingColumn(column)),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(RecordError::ColumnType {
            column,
            expected: "string",
        }),
    }
}

fn optional_text(
    object: &serde_json::Map<String, Value>,
    column: &'static str,
) -> Result<Option<String>, RecordError> {
    match object.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(RecordError::ColumnType {
            column,
            expected: "string",
        }),
    }
}

fn optional_integer(
    object: &serde_json::Map<String, Value>,
    column: &'static str,
) -> Result<Option<i64>, RecordError> {
    match object.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => value.as_i64().map(Some).ok_or(RecordError::ColumnType {
            column,
            expected: "integer",
        }),
        Some(_) => Err(RecordError::ColumnType {
            column,
            expected: "integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ContentRecord, RecordError, decode_content_records};

    #[test]
    fn decodes_full_row() {
        let row = json!({
            "id": "item-1",
            "title": "The Sound of Drums",
            "universe_id": "u-1",
            "parent_id": "item-0",
            "order_index": 3,
            "slug": "the-sound-of-drums",
            "item_type": "episode",
            "description": "Series three, episode twelve."
        });
        let record = ContentRecord::from_row(&row).expect("decode");
        assert_eq!(record.id, "item-1");
        assert_eq!(record.parent_id.as_deref(), Some("item-0"));
        assert_eq!(record.order_index, 3);
        assert_eq!(record.slug.as_deref(), Some("the-sound-of-drums"));
        assert_eq!(record.item_type, "episode");
    }

    #[test]
    fn decodes_minimal_row_with_defaults() {
        let row = json!({
            "id": "item-1",
            "title": "Untitled",
            "universe_id": "u-1"
        });
        let record = ContentRecord::from_row(&row).expect("decode");
        assert!(record.parent_id.is_none());
        assert_eq!(record.order_index, 0);
        assert!(record.slug.is_none());
        assert_eq!(record.item_type, "unknown");
        assert!(record.description.is_none());
    }

    #[test]
    fn missing_required_column_fails() {
        let row = json!({"title": "No id", "universe_id": "u-1"});
        let error = ContentRecord::from_row(&row).expect_err("must fail");
        assert_eq!(error, RecordError::MissingColumn("id"));
    }

    #[test]
    fn null_required_column_fails() {
        let row = json!({"id": "item-1", "title": null, "universe_id": "u-1"});
        let error = ContentRecord::from_row(&row).expect_err("must fail");
        assert_eq!(error, RecordError::MissingColumn("title"));
    }

    #[test]
    fn wrong_type_fails() {
        let row = json!({"id": "item-1", "title": 42, "universe_id": "u-1"});
        let error = ContentRecord::from_row(&row).expect_err("must fail");
        assert_eq!(
            error,
            RecordError::ColumnType {
                column: "title",
                expected: "string"
            }
        );
    }

    #[test]
    fn empty_and_blank_slugs_normalize_to_none() {
        for slug in [json!(null), json!(""), json!("   ")] {
            let row = json!({
                "id": "item-1",
                "title": "Untitled",
                "universe_id": "u-1",
                "slug": slug
            });
            let record = ContentRecord::from_row(&row).expect("decode");
            assert!(record.slug.is_none());
        }
    }

    #[test]
    fn non_object_row_fails() {
        let error = ContentRecord::from_row(&json!([1, 2, 3])).expect_err("must fail");
        assert_eq!(error, RecordError::NotAnObject);
    }

    #[test]
    fn batch_decode_stops_at_first_bad_row() {
        let rows = vec![
            json!({"id": "a", "title": "A", "universe_id": "u-1"}),
            json!({"id": "b", "universe_id": "u-1"}),
        ];
        let error = decode_content_records(&rows).expect_err("must fail");
        assert_eq!(error, RecordError::MissingColumn("title"));
    }
}
