//! Per-column write requirements and the row validator.

use crate::db::value::{Row, Value};
use crate::error::{StoreError, StoreResult};

/// Compile-time default for an optional column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'static str),
}

impl DefaultValue {
    pub fn to_value(&self) -> Value {
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Integer(v) => Value::Integer(*v),
            DefaultValue::Real(v) => Value::Real(*v),
            DefaultValue::Text(s) => Value::Text((*s).to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Requirement {
    Required,
    Optional(DefaultValue),
    /// Maintained by the database (autoincrement ids, timestamps); never checked or set
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub requirement: Requirement,
    /// Always JSON-encode the value, whatever its runtime type
    pub json: bool,
}

impl Column {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            requirement: Requirement::Required,
            json: false,
        }
    }

    pub const fn optional(name: &'static str, default: DefaultValue) -> Self {
        Self {
            name,
            requirement: Requirement::Optional(default),
            json: false,
        }
    }

    pub const fn excluded(name: &'static str) -> Self {
        Self {
            name,
            requirement: Requirement::Excluded,
            json: false,
        }
    }

    pub const fn json(self) -> Self {
        Self { json: true, ..self }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self.requirement, Requirement::Excluded)
    }
}

/// What to do with row columns that are not in the column list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExtra {
    #[default]
    Discard,
    Fail,
    Ignore,
}

fn named(allowed: &[Column], column: &str) -> bool {
    allowed.iter().any(|c| c.name == column)
}

fn unknown_columns(row: &Row, allowed: &[Column]) -> Vec<String> {
    row.keys()
        .filter(|k| !named(allowed, k))
        .cloned()
        .collect()
}

fn inject_defaults(row: &mut Row, allowed: &[Column]) -> Vec<String> {
    let mut missing = Vec::new();
    for column in allowed {
        match column.requirement {
            Requirement::Required => {
                if !row.contains_key(column.name) {
                    missing.push(column.name.to_string());
                }
            }
            Requirement::Optional(default) => {
                row.entry(column.name.to_string())
                    .or_insert_with(|| default.to_value());
            }
            Requirement::Excluded => {}
        }
    }
    missing
}

/// Normalize `row` in place against `allowed`.
///
/// Defaults are injected for every absent optional column regardless of the
/// outcome. Returns false when a required column is missing, or when
/// `on_extra` is `Fail` and the row carries unlisted columns.
pub fn validate_row(row: &mut Row, allowed: &[Column], on_extra: OnExtra) -> bool {
    let missing = inject_defaults(row, allowed);
    let extras_ok = match on_extra {
        OnExtra::Discard => {
            row.retain(|k, _| named(allowed, k));
            true
        }
        OnExtra::Fail => unknown_columns(row, allowed).is_empty(),
        OnExtra::Ignore => true,
    };
    missing.is_empty() && extras_ok
}

/// Same as [`validate_row`], reporting which columns were wrong.
pub fn check_row(
    table: &'static str,
    row: &mut Row,
    allowed: &[Column],
    on_extra: OnExtra,
) -> StoreResult<()> {
    let missing = inject_defaults(row, allowed);
    if !missing.is_empty() {
        return Err(StoreError::MissingColumns {
            table,
            columns: missing,
        });
    }
    match on_extra {
        OnExtra::Discard => row.retain(|k, _| named(allowed, k)),
        OnExtra::Fail => reject_unknown(table, row, allowed)?,
        OnExtra::Ignore => {}
    }
    Ok(())
}

/// Partial rows (updates) must only name known, writable columns.
pub fn reject_unknown(table: &'static str, row: &Row, allowed: &[Column]) -> StoreResult<()> {
    let mut rejected = unknown_columns(row, allowed);
    rejected.extend(
        allowed
            .iter()
            .filter(|c| c.is_excluded() && row.contains_key(c.name))
            .map(|c| c.name.to_string()),
    );
    if rejected.is_empty() {
        Ok(())
    } else {
        Err(StoreError::UnknownColumns {
            table,
            columns: rejected,
        })
    }
}

/// Wrap the value of every JSON-marked column so it is written as JSON text.
pub fn apply_json_columns(row: &mut Row, allowed: &[Column]) {
    for column in allowed.iter().filter(|c| c.json) {
        if let Some(value) = row.get_mut(column.name) {
            if !value.is_null() && !matches!(value, Value::Json(_)) {
                *value = Value::Json(value.to_json());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::value::row;

    const COLUMNS: &[Column] = &[
        Column::optional("a", DefaultValue::Integer(1)),
        Column::required("b"),
    ];

    #[test]
    fn test_defaults_injected_for_valid_row() {
        let mut r = row([("b", 5)]);
        assert!(validate_row(&mut r, COLUMNS, OnExtra::Discard));
        assert_eq!(r, row([("a", 1), ("b", 5)]));
    }

    #[test]
    fn test_defaults_injected_even_when_required_missing() {
        let mut r = Row::new();
        assert!(!validate_row(&mut r, COLUMNS, OnExtra::Discard));
        assert_eq!(r, row([("a", 1)]));
    }

    #[test]
    fn test_extra_columns_policies() {
        let allowed = &[Column::required("a")];

        let mut r = row([("a", 1), ("z", 9)]);
        assert!(validate_row(&mut r, allowed, OnExtra::Discard));
        assert_eq!(r, row([("a", 1)]));

        let mut r = row([("a", 1), ("z", 9)]);
        assert!(!validate_row(&mut r, allowed, OnExtra::Fail));
        assert!(r.contains_key("z"));

        let mut r = row([("a", 1), ("z", 9)]);
        assert!(validate_row(&mut r, allowed, OnExtra::Ignore));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_excluded_columns_are_not_extras() {
        let allowed = &[Column::excluded("id"), Column::required("name")];
        let mut r = row([("id", Value::Integer(3)), ("name", Value::from("x"))]);
        assert!(validate_row(&mut r, allowed, OnExtra::Fail));
        assert!(r.contains_key("id"));
    }

    #[test]
    fn test_check_row_reports_missing_columns() {
        let mut r = Row::new();
        match check_row("things", &mut r, COLUMNS, OnExtra::Discard) {
            Err(StoreError::MissingColumns { table, columns }) => {
                assert_eq!(table, "things");
                assert_eq!(columns, vec!["b".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reject_unknown_flags_excluded_and_unnamed() {
        let allowed = &[Column::excluded("id"), Column::required("name")];
        assert!(reject_unknown("t", &row([("name", "x")]), allowed).is_ok());
        assert!(reject_unknown("t", &row([("id", 1)]), allowed).is_err());
        assert!(reject_unknown("t", &row([("other", 1)]), allowed).is_err());
    }

    #[test]
    fn test_apply_json_columns() {
        let allowed = &[Column::optional("data", DefaultValue::Null).json(), Column::required("n")];
        let mut r = row([("data", Value::from("token")), ("n", Value::Integer(2))]);
        apply_json_columns(&mut r, allowed);
        assert_eq!(r["data"], Value::Json(serde_json::json!("token")));
        assert_eq!(r["n"], Value::Integer(2));

        let mut r = row([("data", Value::Null)]);
        apply_json_columns(&mut r, allowed);
        assert_eq!(r["data"], Value::Null);
    }
}
