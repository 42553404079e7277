//! Conversion between application values and storage-safe primitives.
//!
//! Write path: user transformers in declaration order, then the built-in
//! coercion for the column's logical type. Read path: built-in coercion
//! first, then user transformers in reverse order. `Null` passes through both
//! untouched.

use crate::metadata::{ColumnMetadata, ColumnType};
use crate::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Application value → storage value for `column`.
pub fn to_storage(column: Option<&ColumnMetadata>, value: Value) -> Value {
    let Some(column) = column else {
        return value;
    };
    if value.is_null() {
        return value;
    }

    let mut current = value;
    for transformer in column.transformers.iter() {
        current = transformer.to_storage(current);
    }

    match column.column_type {
        ColumnType::Json => match current {
            Value::Text(_) | Value::Null => current,
            Value::Json(json) => Value::Text(json.to_string()),
            other => Value::Text(scalar_to_json(other).to_string()),
        },
        ColumnType::Boolean => match current {
            Value::Bool(b) => Value::Int(i64::from(b)),
            other => other,
        },
        ColumnType::Date | ColumnType::DateTime => match current {
            Value::DateTime(dt) => Value::Text(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
            other => other,
        },
        _ => current,
    }
}

/// Storage value → application value for `column`.
pub fn from_storage(column: Option<&ColumnMetadata>, value: Value) -> Value {
    let Some(column) = column else {
        return value;
    };
    if value.is_null() {
        return value;
    }

    let mut current = match column.column_type {
        ColumnType::Json => match value {
            Value::Text(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(s),
            },
            other => other,
        },
        ColumnType::Boolean => match value {
            Value::Int(i) => Value::Bool(i != 0),
            Value::Float(f) => Value::Bool(f != 0.0),
            Value::Text(s) => parse_bool(&s).map(Value::Bool).unwrap_or(Value::Text(s)),
            other => other,
        },
        ColumnType::Date => match value {
            Value::Text(s) => parse_date(&s).unwrap_or(Value::Text(s)),
            other => other,
        },
        ColumnType::DateTime => match value {
            Value::Text(s) => parse_datetime(&s)
                .map(Value::DateTime)
                .unwrap_or(Value::Text(s)),
            other => other,
        },
        _ => value,
    };

    for transformer in column.transformers.iter().rev() {
        current = transformer.from_storage(current);
    }
    current
}

/// Apply [`to_storage`] to every field of a record, looking columns up by name.
pub fn record_to_storage(columns: &[ColumnMetadata], record: Record) -> Record {
    record
        .into_iter()
        .map(|(name, value)| {
            let column = columns.iter().find(|c| c.name == name);
            let value = to_storage(column, value);
            (name, value)
        })
        .collect()
}

/// Apply [`from_storage`] to every field of a row. Undeclared fields are kept as-is.
pub fn record_from_storage(columns: &[ColumnMetadata], record: Record) -> Record {
    record
        .into_iter()
        .map(|(name, value)| {
            let column = columns.iter().find(|c| c.name == name);
            let value = from_storage(column, value);
            (name, value)
        })
        .collect()
}

fn scalar_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Int(i) => serde_json::Value::from(i),
        Value::Float(f) => serde_json::Value::from(f),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Bytes(b) => serde_json::Value::from(b),
        Value::Json(j) => j,
        Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => {
            serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s == "1" || s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s == "0" || s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_date(s: &str) -> Option<Value> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Value::Date(d));
    }
    parse_datetime(s).map(Value::DateTime)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite's CURRENT_TIMESTAMP format, always UTC
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FnTransformer;
    use chrono::TimeZone;
    use serde_json::json;

    fn col(ty: ColumnType) -> ColumnMetadata {
        ColumnMetadata::new("c", ty)
    }

    fn round_trip(column: &ColumnMetadata, value: Value) -> Value {
        from_storage(Some(column), to_storage(Some(column), value))
    }

    #[test]
    fn test_null_passes_through_without_transformer() {
        let column = col(ColumnType::Json).transformer(FnTransformer::new(
            |_| Value::Text("called".into()),
            |_| Value::Text("called".into()),
        ));
        assert_eq!(to_storage(Some(&column), Value::Null), Value::Null);
        assert_eq!(from_storage(Some(&column), Value::Null), Value::Null);
    }

    #[test]
    fn test_boolean_round_trip() {
        let column = col(ColumnType::Boolean);
        assert_eq!(to_storage(Some(&column), Value::Bool(true)), Value::Int(1));
        assert_eq!(to_storage(Some(&column), Value::Bool(false)), Value::Int(0));
        assert_eq!(round_trip(&column, Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(&column, Value::Bool(false)), Value::Bool(false));
    }

    #[test]
    fn test_boolean_reads_text_forms() {
        let column = col(ColumnType::Boolean);
        for (raw, expected) in [("1", true), ("0", false), ("TRUE", true), ("False", false)] {
            assert_eq!(
                from_storage(Some(&column), Value::Text(raw.into())),
                Value::Bool(expected)
            );
        }
        assert_eq!(
            from_storage(Some(&column), Value::Text("maybe".into())),
            Value::Text("maybe".into())
        );
    }

    #[test]
    fn test_json_round_trip() {
        let column = col(ColumnType::Json);
        let value = Value::Json(json!({"tags": ["a", "b"], "nested": {"n": 1}}));
        let stored = to_storage(Some(&column), value.clone());
        assert!(matches!(stored, Value::Text(_)));
        assert_eq!(from_storage(Some(&column), stored), value);
    }

    #[test]
    fn test_json_string_is_not_double_encoded() {
        let column = col(ColumnType::Json);
        let stored = to_storage(Some(&column), Value::Text("{\"a\":1}".into()));
        assert_eq!(stored, Value::Text("{\"a\":1}".into()));
    }

    #[test]
    fn test_json_parse_failure_returns_original() {
        let column = col(ColumnType::Json);
        assert_eq!(
            from_storage(Some(&column), Value::Text("not json".into())),
            Value::Text("not json".into())
        );
    }

    #[test]
    fn test_datetime_round_trip_by_instant() {
        let column = col(ColumnType::DateTime);
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let stored = to_storage(Some(&column), Value::DateTime(instant));
        assert_eq!(stored, Value::Text("2024-03-01T12:30:00.000Z".into()));
        assert_eq!(from_storage(Some(&column), stored), Value::DateTime(instant));
    }

    #[test]
    fn test_date_round_trip() {
        let column = col(ColumnType::Date);
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(round_trip(&column, Value::Date(day)), Value::Date(day));
    }

    #[test]
    fn test_sqlite_timestamp_is_read_as_utc() {
        let column = col(ColumnType::DateTime);
        let value = from_storage(Some(&column), Value::Text("2026-01-01 00:01:00".into()));
        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(value, Value::DateTime(expected));
    }

    #[test]
    fn test_transformer_chain_order() {
        // to: append "a" then "b"; from must undo "b" before "a"
        let column = col(ColumnType::Text)
            .transformer(FnTransformer::new(
                |v| match v {
                    Value::Text(s) => Value::Text(format!("{s}a")),
                    other => other,
                },
                |v| match v {
                    Value::Text(s) => Value::Text(s.strip_suffix('a').unwrap_or(s.as_str()).to_string()),
                    other => other,
                },
            ))
            .transformer(FnTransformer::new(
                |v| match v {
                    Value::Text(s) => Value::Text(format!("{s}b")),
                    other => other,
                },
                |v| match v {
                    Value::Text(s) => Value::Text(s.strip_suffix('b').unwrap_or(s.as_str()).to_string()),
                    other => other,
                },
            ));
        let stored = to_storage(Some(&column), Value::Text("x".into()));
        assert_eq!(stored, Value::Text("xab".into()));
        assert_eq!(from_storage(Some(&column), stored), Value::Text("x".into()));
    }

    #[test]
    fn test_transformer_runs_before_builtin_coercion() {
        // Transformer maps a string list to JSON, then the json coercion stringifies it.
        let column = col(ColumnType::Json).transformer(FnTransformer::new(
            |v| match v {
                Value::Text(s) => Value::Json(json!(s.split(',').collect::<Vec<_>>())),
                other => other,
            },
            |v| match v {
                Value::Json(serde_json::Value::Array(items)) => Value::Text(
                    items
                        .iter()
                        .filter_map(|i| i.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                other => other,
            },
        ));
        let stored = to_storage(Some(&column), Value::Text("a,b".into()));
        assert_eq!(stored, Value::Text("[\"a\",\"b\"]".into()));
        assert_eq!(from_storage(Some(&column), stored), Value::Text("a,b".into()));
    }

    #[test]
    fn test_unknown_column_is_untouched() {
        assert_eq!(to_storage(None, Value::Bool(true)), Value::Bool(true));
    }
}
