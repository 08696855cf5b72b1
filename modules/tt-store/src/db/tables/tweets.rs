//! Archived tweets, spread over `tweets/<sha1 prefix>.db` partition files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tt_types::{InsertReport, TimelineType, Tweet};

use super::{bad_value, update_matching};
use crate::db::clause::{Join, in_clause, insert_clause, where_clause};
use crate::db::columns::{Column, DefaultValue, OnExtra, apply_json_columns, check_row};
use crate::db::partition::PartitionedStore;
use crate::db::store::{ColumnType, IsolationLevel, Params, Schema, Store};
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::{StoreError, StoreResult};

const TABLE: &str = "tweets";
const DELETE_CHUNK: usize = 500;

pub static SCHEMA: Schema = Schema {
    init: &[
        "CREATE TABLE IF NOT EXISTS `tweets` (
            tweet_id INTEGER PRIMARY KEY,
            timeline_type INTEGER NOT NULL,
            timeline_owner INTEGER,
            plain_text TEXT NOT NULL,
            html_text TEXT,
            xml_text TEXT,
            coordinates TEXT,
            date TEXT NOT NULL,
            in_reply_to_tweet INTEGER,
            in_reply_to_user INTEGER,
            user INTEGER NOT NULL,
            is_retweet INTEGER NOT NULL DEFAULT 0,
            source TEXT,
            retweeted_count INTEGER NOT NULL DEFAULT 0,
            fav_count INTEGER,
            is_my_fav INTEGER NOT NULL DEFAULT 0,
            captured_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        "CREATE INDEX IF NOT EXISTS tweets__timeline ON tweets(timeline_type, timeline_owner, tweet_id)",
        "CREATE INDEX IF NOT EXISTS tweets__user ON tweets(user)",
    ],
    typed_columns: &[
        ("date", ColumnType::DateTime),
        ("captured_at", ColumnType::DateTime),
        ("coordinates", ColumnType::Json),
    ],
};

pub const COLUMNS: &[Column] = &[
    Column::required("tweet_id"),
    Column::required("timeline_type"),
    Column::optional("timeline_owner", DefaultValue::Null),
    Column::required("plain_text"),
    Column::optional("html_text", DefaultValue::Null),
    Column::optional("xml_text", DefaultValue::Null),
    Column::optional("coordinates", DefaultValue::Null).json(),
    Column::required("date"),
    Column::optional("in_reply_to_tweet", DefaultValue::Null),
    Column::optional("in_reply_to_user", DefaultValue::Null),
    Column::required("user"),
    Column::optional("is_retweet", DefaultValue::Integer(0)),
    Column::optional("source", DefaultValue::Null),
    Column::optional("retweeted_count", DefaultValue::Integer(0)),
    Column::optional("fav_count", DefaultValue::Null),
    Column::optional("is_my_fav", DefaultValue::Integer(0)),
    Column::excluded("captured_at"),
];

/// What a multi-row insert does when a row fails to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnOperationalError {
    /// Leave no row of the batch behind if any row fails
    #[default]
    Fail,
    /// Skip rows that violate a constraint (e.g. already archived)
    Continue,
}

pub struct Tweets {
    parts: PartitionedStore,
}

impl Tweets {
    pub fn new(dir: impl Into<PathBuf>, scale: usize, isolation: IsolationLevel) -> StoreResult<Self> {
        Ok(Self {
            parts: PartitionedStore::new(dir, scale, &SCHEMA, isolation)?,
        })
    }

    pub fn partition_of(&self, tweet_id: i64) -> String {
        self.parts.partition_of(&tweet_id.to_string())
    }

    pub fn partitions(&self) -> StoreResult<Vec<String>> {
        self.parts.partitions()
    }

    pub fn insert(&self, tweet: &Tweet) -> StoreResult<()> {
        let mut r = tweet_to_row(tweet);
        prepare(&mut r)?;
        let store = self.parts.open(&self.partition_of(tweet.tweet_id))?;
        write_row(&store, &r, true)?;
        store.close()
    }

    pub fn insert_many(&self, tweets: &[Tweet], policy: OnOperationalError) -> StoreResult<InsertReport> {
        self.insert_rows(tweets.iter().map(tweet_to_row).collect(), policy)
    }

    /// Validate every row, then write them partition by partition under `policy`.
    pub fn insert_rows(&self, rows: Vec<Row>, policy: OnOperationalError) -> StoreResult<InsertReport> {
        let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
        for mut r in rows {
            prepare(&mut r)?;
            let partition = self.partition_of(r.int("tweet_id")?);
            groups.entry(partition).or_default().push(r);
        }
        match policy {
            OnOperationalError::Fail => self.insert_all_or_nothing(&groups),
            OnOperationalError::Continue => self.insert_skipping_duplicates(&groups),
        }
    }

    /// Commit partitions one at a time; a failure deletes what earlier partitions took.
    fn insert_all_or_nothing(&self, groups: &BTreeMap<String, Vec<Row>>) -> StoreResult<InsertReport> {
        let mut committed: Vec<(&str, &[Row])> = Vec::with_capacity(groups.len());
        let mut inserted = 0;
        for (partition, rows) in groups {
            match self.write_partition(partition, rows) {
                Ok(n) => {
                    inserted += n;
                    committed.push((partition.as_str(), rows.as_slice()));
                }
                Err(e) => {
                    self.undo_committed(&committed);
                    return Err(StoreError::batch(TABLE, e));
                }
            }
        }
        Ok(InsertReport {
            inserted,
            skipped: 0,
        })
    }

    fn write_partition(&self, partition: &str, rows: &[Row]) -> StoreResult<usize> {
        let store = self.parts.open(partition)?;
        let written = store.batch(|store| {
            for r in rows {
                write_row(store, r, false)?;
            }
            Ok(rows.len())
        });
        let closed = store.close();
        let n = written?;
        closed?;
        Ok(n)
    }

    fn undo_committed(&self, committed: &[(&str, &[Row])]) {
        if committed.is_empty() {
            return;
        }
        log::warn!(
            "[TT_STORE] Rolling back tweet batch across {} committed partitions",
            committed.len()
        );
        for (partition, rows) in committed {
            if let Err(e) = self.delete_rows(partition, rows) {
                log::error!("[TT_STORE] Undo failed on partition {}: {}", partition, e);
            }
        }
    }

    /// Remove `rows` (by tweet id) from one partition in a single transaction.
    fn delete_rows(&self, partition: &str, rows: &[Row]) -> StoreResult<usize> {
        let ids: Vec<Value> = rows.iter().map(|r| r.value("tweet_id").clone()).collect();
        let store = self.parts.open(partition)?;
        let removed = store.batch(|store| {
            let mut removed = 0;
            for chunk in ids.chunks(DELETE_CHUNK) {
                let filter = in_clause("tweet_id", chunk, None, "tid")?;
                let sql = format!("DELETE FROM `tweets` WHERE {}", filter.sql);
                removed += store.execute(&sql, filter.into_params(), false)?;
            }
            Ok(removed)
        });
        let closed = store.close();
        let removed = removed?;
        closed?;
        Ok(removed)
    }

    fn insert_skipping_duplicates(
        &self,
        groups: &BTreeMap<String, Vec<Row>>,
    ) -> StoreResult<InsertReport> {
        let mut report = InsertReport::default();
        for (partition, rows) in groups {
            let store = self.parts.open(partition)?;
            let written = store.batch(|store| {
                let mut part = InsertReport::default();
                for r in rows {
                    match write_row(store, r, false) {
                        Ok(()) => part.inserted += 1,
                        Err(e) if e.is_constraint_violation() => {
                            log::warn!(
                                "[TT_STORE] Skipping tweet {} in partition {}: {}",
                                r.value("tweet_id").to_json(),
                                partition,
                                e
                            );
                            part.skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(part)
            });
            store.close()?;
            let part = written.map_err(|e| StoreError::batch(TABLE, e))?;
            report.inserted += part.inserted;
            report.skipped += part.skipped;
        }
        Ok(report)
    }

    /// Look a tweet up in its partition; a partition that was never written holds nothing.
    pub fn get(&self, tweet_id: i64) -> StoreResult<Option<Tweet>> {
        let Some(store) = self.existing(tweet_id)? else {
            return Ok(None);
        };
        let found = store.dict(
            "SELECT * FROM `tweets` WHERE tweet_id = :tweet_id",
            Params::named([("tweet_id", tweet_id)]),
        )?;
        store.close()?;
        found.as_ref().map(row_to_tweet).transpose()
    }

    pub fn update(&self, tweet_id: i64, changes: &Row) -> StoreResult<bool> {
        let Some(store) = self.existing(tweet_id)? else {
            return Ok(false);
        };
        let affected = update_matching(
            &store,
            TABLE,
            changes,
            COLUMNS,
            &row([("tweet_id", tweet_id)]),
            None,
            true,
        )?;
        store.close()?;
        Ok(affected > 0)
    }

    pub fn delete(&self, tweet_id: i64) -> StoreResult<bool> {
        let Some(store) = self.existing(tweet_id)? else {
            return Ok(false);
        };
        let affected = store.execute(
            "DELETE FROM `tweets` WHERE tweet_id = :tweet_id",
            Params::named([("tweet_id", tweet_id)]),
            true,
        )?;
        store.close()?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> StoreResult<i64> {
        let mut total = 0;
        self.parts.for_each_partition(|_, store| {
            if let Some(Value::Integer(n)) = store.scalar("SELECT COUNT(*) FROM `tweets`", Params::None)? {
                total += n;
            }
            Ok(())
        })?;
        Ok(total)
    }

    /// Stream every tweet, partition by partition, in tweet id order within each partition.
    pub fn for_each<F>(&self, mut f: F) -> StoreResult<()>
    where
        F: FnMut(Tweet) -> StoreResult<()>,
    {
        self.parts.for_each_partition(|_, store| {
            store.with_cursor("SELECT * FROM `tweets` ORDER BY tweet_id", Params::None, |cursor| {
                while let Some(r) = cursor.next_dict()? {
                    f(row_to_tweet(&r)?)?;
                }
                Ok(())
            })
        })
    }

    /// Highest archived tweet id for a timeline; `owner == None` matches tweets with no owner.
    pub fn latest_id(&self, timeline_type: TimelineType, owner: Option<i64>) -> StoreResult<Option<i64>> {
        let criteria = row([
            ("timeline_type", Value::from(timeline_type.as_i64())),
            ("timeline_owner", Value::from(owner)),
        ]);
        let filter = where_clause(&criteria, false, Join::And, None, "wherepar");
        let sql = format!("SELECT MAX(tweet_id) FROM `tweets`{}", filter.as_where());
        let mut latest: Option<i64> = None;
        self.parts.for_each_partition(|_, store| {
            if let Some(Value::Integer(id)) = store.scalar(&sql, filter.clone().into_params())? {
                latest = Some(latest.map_or(id, |seen| seen.max(id)));
            }
            Ok(())
        })?;
        Ok(latest)
    }

    fn existing(&self, tweet_id: i64) -> StoreResult<Option<Store>> {
        let partition = self.partition_of(tweet_id);
        if !self.parts.exists(&partition) {
            return Ok(None);
        }
        self.parts.open(&partition).map(Some)
    }
}

fn prepare(r: &mut Row) -> StoreResult<()> {
    check_row(TABLE, r, COLUMNS, OnExtra::Discard)?;
    apply_json_columns(r, COLUMNS);
    Ok(())
}

fn write_row(store: &Store, r: &Row, auto_commit: bool) -> StoreResult<()> {
    let clause = insert_clause(r, "par")?;
    let sql = format!("INSERT INTO `tweets` {}", clause.sql);
    store.execute(&sql, clause.into_params(), auto_commit)?;
    Ok(())
}

fn tweet_to_row(t: &Tweet) -> Row {
    row([
        ("tweet_id", Value::from(t.tweet_id)),
        ("timeline_type", Value::from(t.timeline_type.as_i64())),
        ("timeline_owner", Value::from(t.timeline_owner)),
        ("plain_text", Value::from(t.plain_text.as_str())),
        ("html_text", Value::from(t.html_text.clone())),
        ("xml_text", Value::from(t.xml_text.clone())),
        ("coordinates", t.coordinates.clone().map(Value::Json).unwrap_or(Value::Null)),
        ("date", Value::from(t.date)),
        ("in_reply_to_tweet", Value::from(t.in_reply_to_tweet)),
        ("in_reply_to_user", Value::from(t.in_reply_to_user)),
        ("user", Value::from(t.user)),
        ("is_retweet", Value::from(t.is_retweet)),
        ("source", Value::from(t.source.clone())),
        ("retweeted_count", Value::from(t.retweeted_count)),
        ("fav_count", Value::from(t.fav_count)),
        ("is_my_fav", Value::from(t.is_my_fav)),
    ])
}

fn row_to_tweet(r: &Row) -> StoreResult<Tweet> {
    let kind = r.int("timeline_type")?;
    Ok(Tweet {
        tweet_id: r.int("tweet_id")?,
        timeline_type: TimelineType::from_i64(kind).ok_or_else(|| bad_value("timeline_type", kind))?,
        timeline_owner: r.opt_int("timeline_owner")?,
        plain_text: r.text("plain_text")?,
        html_text: r.opt_text("html_text")?,
        xml_text: r.opt_text("xml_text")?,
        coordinates: r.json("coordinates")?,
        date: r.datetime("date")?,
        in_reply_to_tweet: r.opt_int("in_reply_to_tweet")?,
        in_reply_to_user: r.opt_int("in_reply_to_user")?,
        user: r.int("user")?,
        is_retweet: r.flag("is_retweet")?,
        source: r.opt_text("source")?,
        retweeted_count: r.int("retweeted_count")?,
        fav_count: r.opt_int("fav_count")?,
        is_my_fav: r.flag("is_my_fav")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn tweets(dir: &TempDir) -> Tweets {
        Tweets::new(dir.path().join("tweets"), 2, IsolationLevel::Deferred).unwrap()
    }

    fn tweet(tweet_id: i64) -> Tweet {
        Tweet {
            tweet_id,
            timeline_type: TimelineType::Home,
            timeline_owner: None,
            plain_text: format!("tweet {}", tweet_id),
            html_text: None,
            xml_text: None,
            coordinates: None,
            date: Utc.with_ymd_and_hms(2013, 7, 14, 12, 0, 0).unwrap(),
            in_reply_to_tweet: None,
            in_reply_to_user: None,
            user: 1000,
            is_retweet: false,
            source: None,
            retweeted_count: 0,
            fav_count: None,
            is_my_fav: false,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        let original = Tweet {
            timeline_type: TimelineType::User,
            timeline_owner: Some(55),
            html_text: Some("<b>hi</b>".into()),
            coordinates: Some(serde_json::json!({"type": "Point", "coordinates": [1.5, -2.25]})),
            in_reply_to_tweet: Some(7),
            in_reply_to_user: Some(8),
            is_retweet: true,
            source: Some("web".into()),
            retweeted_count: 4,
            fav_count: Some(2),
            is_my_fav: true,
            ..tweet(123456789)
        };
        t.insert(&original).unwrap();
        assert_eq!(t.get(123456789).unwrap(), Some(original));
        assert_eq!(t.partitions().unwrap(), vec![t.partition_of(123456789)]);
    }

    #[test]
    fn test_missing_partition_reads_create_nothing() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        assert_eq!(t.get(1).unwrap(), None);
        assert!(!t.update(1, &row([("fav_count", 3)])).unwrap());
        assert!(!t.delete(1).unwrap());
        assert!(t.partitions().unwrap().is_empty());
        assert_eq!(t.count().unwrap(), 0);
    }

    #[test]
    fn test_failed_batch_leaves_no_rows() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        let batch = [tweet(1), tweet(2), tweet(3), tweet(2)];
        let err = t.insert_many(&batch, OnOperationalError::Fail).unwrap_err();
        assert!(matches!(err, StoreError::BatchAborted { table: "tweets", .. }));
        assert!(err.is_constraint_violation());
        assert_eq!(t.count().unwrap(), 0);
        assert_eq!(t.get(1).unwrap(), None);
    }

    #[test]
    fn test_continue_skips_duplicates() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        t.insert(&tweet(10)).unwrap();
        let report = t
            .insert_many(&[tweet(10), tweet(11), tweet(12), tweet(11)], OnOperationalError::Continue)
            .unwrap();
        assert_eq!(report, InsertReport { inserted: 2, skipped: 2 });
        assert_eq!(t.count().unwrap(), 3);
    }

    #[test]
    fn test_invalid_row_aborts_before_writing() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        let mut incomplete = tweet_to_row(&tweet(5));
        incomplete.remove("plain_text");
        let rows = vec![tweet_to_row(&tweet(4)), incomplete];
        let err = t.insert_rows(rows, OnOperationalError::Continue).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumns { .. }));
        assert!(t.partitions().unwrap().is_empty());
    }

    #[test]
    fn test_update_delete_and_latest_id() {
        let dir = TempDir::new().unwrap();
        let t = tweets(&dir);
        let mut mention = tweet(900);
        mention.timeline_type = TimelineType::Mentions;
        t.insert_many(&[tweet(100), tweet(350), tweet(200), mention], OnOperationalError::Fail)
            .unwrap();

        assert_eq!(t.latest_id(TimelineType::Home, None).unwrap(), Some(350));
        assert_eq!(t.latest_id(TimelineType::Mentions, None).unwrap(), Some(900));
        assert_eq!(t.latest_id(TimelineType::Home, Some(1)).unwrap(), None);

        assert!(t.update(200, &row([("fav_count", 9)])).unwrap());
        assert_eq!(t.get(200).unwrap().unwrap().fav_count, Some(9));
        assert!(t.update(200, &row([("captured_at", "2000-01-01 00:00:00")])).is_err());

        assert!(t.delete(350).unwrap());
        assert_eq!(t.latest_id(TimelineType::Home, None).unwrap(), Some(200));

        let mut seen = Vec::new();
        t.for_each(|tw| {
            seen.push(tw.tweet_id);
            Ok(())
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec![100, 200, 900]);
    }

    #[test]
    fn test_wide_batch_commits_partition_by_partition() {
        let dir = TempDir::new().unwrap();
        let t = Tweets::new(dir.path().join("tweets"), 3, IsolationLevel::Deferred).unwrap();
        let batch: Vec<Tweet> = (1..=600).map(tweet).collect();
        let report = t.insert_many(&batch, OnOperationalError::Fail).unwrap();
        assert_eq!(report, InsertReport { inserted: 600, skipped: 0 });
        assert!(t.partitions().unwrap().len() > 100);
        assert_eq!(t.count().unwrap(), 600);
    }

    #[test]
    fn test_late_failure_undoes_committed_partitions() {
        let dir = TempDir::new().unwrap();
        let t = Tweets::new(dir.path().join("tweets"), 3, IsolationLevel::Deferred).unwrap();
        let archived: Vec<Tweet> = (1..=200).map(tweet).collect();
        t.insert_many(&archived, OnOperationalError::Fail).unwrap();

        // Groups are written in partition name order, so a duplicate routed to
        // the highest partition fails after every other group has committed.
        let mut batch: Vec<Tweet> = (1000..1300).map(tweet).collect();
        let last = batch
            .iter()
            .chain(archived.iter())
            .map(|tw| t.partition_of(tw.tweet_id))
            .max()
            .unwrap();
        let duplicate = archived
            .iter()
            .find(|tw| t.partition_of(tw.tweet_id) == last)
            .cloned()
            .unwrap_or_else(|| {
                let id = (1000..1300).find(|id| t.partition_of(*id) == last).unwrap();
                tweet(id)
            });
        batch.push(duplicate);

        let err = t.insert_many(&batch, OnOperationalError::Fail).unwrap_err();
        assert!(matches!(err, StoreError::BatchAborted { table: "tweets", .. }));
        assert!(err.is_constraint_violation());
        assert_eq!(t.count().unwrap(), 200);
        assert_eq!(t.get(1000).unwrap(), None);
        assert_eq!(t.get(1299).unwrap(), None);
        assert!(t.get(200).unwrap().is_some());
    }
}
