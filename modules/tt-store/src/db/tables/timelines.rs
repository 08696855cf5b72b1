//! Paging cursors per (profile, timeline, owner) (`tt_main.db`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tt_types::{TimelineCursor, TimelineType};

use super::{bad_value, delete_matching, select_matching};
use crate::db::clause::insert_clause;
use crate::db::columns::{Column, DefaultValue, OnExtra, check_row};
use crate::db::store::Store;
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::{StoreError, StoreResult};

const TABLE: &str = "timelines";

pub const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS `timelines` (
    profile_alias TEXT NOT NULL,
    timeline_type INTEGER NOT NULL,
    timeline_owner INTEGER NOT NULL DEFAULT 0,
    since_id INTEGER,
    max_id INTEGER,
    last_fetched_at TEXT,
    PRIMARY KEY (profile_alias, timeline_type, timeline_owner)
)";

pub const COLUMNS: &[Column] = &[
    Column::required("profile_alias"),
    Column::required("timeline_type"),
    Column::optional("timeline_owner", DefaultValue::Integer(0)),
    Column::optional("since_id", DefaultValue::Null),
    Column::optional("max_id", DefaultValue::Null),
    Column::optional("last_fetched_at", DefaultValue::Null),
];

// since_id only grows, max_id only shrinks; NULL never overwrites a known id.
const UPSERT_TAIL: &str = " ON CONFLICT(profile_alias, timeline_type, timeline_owner) DO UPDATE SET
    since_id = MAX(COALESCE(since_id, excluded.since_id), COALESCE(excluded.since_id, since_id)),
    max_id = MIN(COALESCE(max_id, excluded.max_id), COALESCE(excluded.max_id, max_id)),
    last_fetched_at = excluded.last_fetched_at";

pub struct Timelines {
    store: Arc<Store>,
}

impl Timelines {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(
        &self,
        alias: &str,
        timeline_type: TimelineType,
        owner: i64,
    ) -> StoreResult<Option<TimelineCursor>> {
        select_matching(&self.store, TABLE, &key(alias, timeline_type, owner), "profile_alias")?
            .first()
            .map(row_to_cursor)
            .transpose()
    }

    /// Merge one fetch into the cursor: newest and oldest tweet ids seen, and when.
    pub fn record_fetch(
        &self,
        alias: &str,
        timeline_type: TimelineType,
        owner: i64,
        newest_id: Option<i64>,
        oldest_id: Option<i64>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<TimelineCursor> {
        let mut r = key(alias, timeline_type, owner);
        r.insert("since_id".into(), Value::from(newest_id));
        r.insert("max_id".into(), Value::from(oldest_id));
        r.insert("last_fetched_at".into(), Value::from(fetched_at));
        check_row(TABLE, &mut r, COLUMNS, OnExtra::Fail)?;

        let clause = insert_clause(&r, "par")?;
        let sql = format!("INSERT INTO `timelines` {}{}", clause.sql, UPSERT_TAIL);
        self.store.execute(&sql, clause.into_params(), true)?;

        self.get(alias, timeline_type, owner)?.ok_or_else(|| {
            StoreError::InvalidState(format!(
                "timeline cursor for {} vanished after write",
                alias
            ))
        })
    }

    pub fn for_profile(&self, alias: &str) -> StoreResult<Vec<TimelineCursor>> {
        select_matching(
            &self.store,
            TABLE,
            &row([("profile_alias", alias)]),
            "timeline_type, timeline_owner",
        )?
        .iter()
        .map(row_to_cursor)
        .collect()
    }

    pub fn delete_for_profile(&self, alias: &str) -> StoreResult<usize> {
        delete_matching(&self.store, TABLE, &row([("profile_alias", alias)]), true)
    }
}

fn key(alias: &str, timeline_type: TimelineType, owner: i64) -> Row {
    row([
        ("profile_alias", Value::from(alias)),
        ("timeline_type", Value::from(timeline_type.as_i64())),
        ("timeline_owner", Value::from(owner)),
    ])
}

fn row_to_cursor(r: &Row) -> StoreResult<TimelineCursor> {
    let kind = r.int("timeline_type")?;
    Ok(TimelineCursor {
        profile_alias: r.text("profile_alias")?,
        timeline_type: TimelineType::from_i64(kind).ok_or_else(|| bad_value("timeline_type", kind))?,
        timeline_owner: r.int("timeline_owner")?,
        since_id: r.opt_int("since_id")?,
        max_id: r.opt_int("max_id")?,
        last_fetched_at: r.opt_datetime("last_fetched_at")?,
    })
}
