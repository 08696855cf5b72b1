//! Conversation threads: which tweets belong to which thread (`tt_main.db`).

use std::sync::Arc;

use tt_types::ThreadEntry;

use super::{atomic, delete_matching, insert_validated, select_matching};
use crate::db::clause::in_clause;
use crate::db::columns::{Column, DefaultValue};
use crate::db::store::{Params, Store};
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::StoreResult;

const TABLE: &str = "threads";

pub const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS `threads` (
    thread_id INTEGER NOT NULL,
    tweet_id INTEGER NOT NULL,
    in_reply_to INTEGER,
    position INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (thread_id, tweet_id)
)";

pub const CREATE_INDEXES: &str =
    "CREATE INDEX IF NOT EXISTS threads__tweet_id ON threads(tweet_id);";

pub const COLUMNS: &[Column] = &[
    Column::required("thread_id"),
    Column::required("tweet_id"),
    Column::optional("in_reply_to", DefaultValue::Null),
    Column::optional("position", DefaultValue::Integer(0)),
];

pub struct Threads {
    store: Arc<Store>,
}

impl Threads {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert all entries or none.
    pub fn add(&self, entries: &[ThreadEntry]) -> StoreResult<usize> {
        atomic(&self.store, TABLE, |store| {
            for entry in entries {
                insert_validated(store, TABLE, entry_to_row(entry), COLUMNS, false)?;
            }
            Ok(entries.len())
        })
    }

    pub fn tweets_of(&self, thread_id: i64) -> StoreResult<Vec<ThreadEntry>> {
        select_matching(&self.store, TABLE, &row([("thread_id", thread_id)]), "position, tweet_id")?
            .iter()
            .map(row_to_entry)
            .collect()
    }

    /// Lowest thread id the tweet belongs to.
    pub fn thread_of(&self, tweet_id: i64) -> StoreResult<Option<i64>> {
        let found = self.store.scalar(
            "SELECT MIN(thread_id) FROM `threads` WHERE tweet_id = :tweet_id",
            Params::named([("tweet_id", tweet_id)]),
        )?;
        match found {
            Some(Value::Integer(id)) => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    pub fn threads_containing(&self, tweet_ids: &[i64]) -> StoreResult<Vec<i64>> {
        if tweet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Value> = tweet_ids.iter().copied().map(Value::from).collect();
        let filter = in_clause("tweet_id", &values, None, "tid")?;
        let sql = format!(
            "SELECT DISTINCT thread_id FROM `threads` WHERE {} ORDER BY thread_id",
            filter.sql
        );
        self.store
            .dicts(&sql, filter.into_params())?
            .iter()
            .map(|r| r.int("thread_id"))
            .collect()
    }

    pub fn remove(&self, thread_id: i64) -> StoreResult<usize> {
        delete_matching(&self.store, TABLE, &row([("thread_id", thread_id)]), true)
    }
}

fn entry_to_row(entry: &ThreadEntry) -> Row {
    row([
        ("thread_id", Value::from(entry.thread_id)),
        ("tweet_id", Value::from(entry.tweet_id)),
        ("in_reply_to", Value::from(entry.in_reply_to)),
        ("position", Value::from(entry.position)),
    ])
}

fn row_to_entry(r: &Row) -> StoreResult<ThreadEntry> {
    Ok(ThreadEntry {
        thread_id: r.int("thread_id")?,
        tweet_id: r.int("tweet_id")?,
        in_reply_to: r.opt_int("in_reply_to")?,
        position: r.int("position")?,
    })
}
