//! Per-table specializations over the shared executor.

pub mod people;
pub mod profiles;
pub mod schedules;
pub mod threads;
pub mod timelines;
pub mod tweets;

pub use people::{People, PersonLookup};
pub use profiles::Profiles;
pub use schedules::Schedules;
pub use threads::Threads;
pub use timelines::Timelines;
pub use tweets::{OnOperationalError, Tweets};

use crate::db::clause::{Join, insert_clause, set_clause, where_clause};
use crate::db::columns::{Column, OnExtra, apply_json_columns, check_row, reject_unknown};
use crate::db::store::{ColumnType, Params, Schema, Store};
use crate::db::value::Row;
use crate::error::{StoreError, StoreResult};

/// Schema of `tt_main.db`, shared by people, schedules, timelines and threads.
pub static MAIN_SCHEMA: Schema = Schema {
    init: &[
        people::CREATE_TABLE,
        people::CREATE_INDEXES,
        schedules::CREATE_TABLE,
        schedules::CREATE_INDEXES,
        timelines::CREATE_TABLE,
        threads::CREATE_TABLE,
        threads::CREATE_INDEXES,
    ],
    typed_columns: &[
        ("last_run_at", ColumnType::DateTime),
        ("next_run_at", ColumnType::DateTime),
        ("options", ColumnType::Json),
        ("last_fetched_at", ColumnType::DateTime),
    ],
};

/// Validate a full row and insert it; returns the new rowid.
pub(crate) fn insert_validated(
    store: &Store,
    table: &'static str,
    mut row: Row,
    columns: &[Column],
    auto_commit: bool,
) -> StoreResult<i64> {
    check_row(table, &mut row, columns, OnExtra::Discard)?;
    apply_json_columns(&mut row, columns);
    let clause = insert_clause(&row, "par")?;
    let sql = format!("INSERT INTO `{}` {}", table, clause.sql);
    store.insert_id(&sql, clause.into_params(), auto_commit)
}

/// `UPDATE <table> SET ... WHERE ...` from a partial row; `extra_set` is appended verbatim.
pub(crate) fn update_matching(
    store: &Store,
    table: &'static str,
    changes: &Row,
    columns: &[Column],
    criteria: &Row,
    extra_set: Option<&str>,
    auto_commit: bool,
) -> StoreResult<usize> {
    reject_unknown(table, changes, columns)?;
    let set = set_clause(changes, columns, None, "par")?;
    let filter = where_clause(criteria, false, Join::And, None, "wherepar");
    let mut sql = format!("UPDATE `{}` SET {}", table, set.sql);
    if let Some(extra) = extra_set {
        sql.push(',');
        sql.push_str(extra);
    }
    sql.push_str(&filter.as_where());
    let params = Params::merge(vec![set.into_params(), filter.into_params()])?;
    store.execute(&sql, params, auto_commit)
}

/// Rows of `table` matching every criterion, in `order_by` order.
pub(crate) fn select_matching(
    store: &Store,
    table: &'static str,
    criteria: &Row,
    order_by: &str,
) -> StoreResult<Vec<Row>> {
    let filter = where_clause(criteria, false, Join::And, None, "wherepar");
    let sql = format!("SELECT * FROM `{}`{} ORDER BY {}", table, filter.as_where(), order_by);
    store.dicts(&sql, filter.into_params())
}

pub(crate) fn delete_matching(
    store: &Store,
    table: &'static str,
    criteria: &Row,
    auto_commit: bool,
) -> StoreResult<usize> {
    let filter = where_clause(criteria, false, Join::And, None, "wherepar");
    if filter.is_empty() {
        return Err(StoreError::EmptyClause("WHERE"));
    }
    let sql = format!("DELETE FROM `{}`{}", table, filter.as_where());
    store.execute(&sql, filter.into_params(), auto_commit)
}

/// Deferred-commit batch; any failure rolls the whole batch back.
pub(crate) fn atomic<T, F>(store: &Store, table: &'static str, f: F) -> StoreResult<T>
where
    F: FnOnce(&Store) -> StoreResult<T>,
{
    store.batch(f).map_err(|e| StoreError::batch(table, e))
}

/// A batch step that matched nothing aborts the batch.
pub(crate) fn require_written(table: &'static str, key: impl ToString, affected: usize) -> StoreResult<usize> {
    if affected == 0 {
        Err(StoreError::NothingWritten {
            table,
            key: key.to_string(),
        })
    } else {
        Ok(affected)
    }
}

pub(crate) fn bad_value(column: &str, raw: impl std::fmt::Display) -> StoreError {
    StoreError::Decode {
        column: column.to_string(),
        message: format!("unexpected value {}", raw),
    }
}
