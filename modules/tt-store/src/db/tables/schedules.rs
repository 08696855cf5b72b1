//! Recurring fetch tasks per profile (`tt_main.db`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tt_types::{NewSchedule, Schedule, ScheduleTask, ScheduleUpdate};

use super::{
    atomic, bad_value, delete_matching, insert_validated, require_written, select_matching,
    update_matching,
};
use crate::db::columns::{Column, DefaultValue};
use crate::db::store::{Params, Store};
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::StoreResult;

const TABLE: &str = "schedules";

pub const DEFAULT_INTERVAL_SECS: i64 = 900;

pub const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS `schedules` (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_alias TEXT NOT NULL,
    task TEXT NOT NULL,
    target TEXT,
    interval_secs INTEGER NOT NULL DEFAULT 900,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    options TEXT
)";

pub const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS schedules__profile ON schedules(profile_alias);
    CREATE INDEX IF NOT EXISTS schedules__due ON schedules(enabled, next_run_at);
";

pub const COLUMNS: &[Column] = &[
    Column::excluded("id"),
    Column::required("profile_alias"),
    Column::required("task"),
    Column::optional("target", DefaultValue::Null),
    Column::optional("interval_secs", DefaultValue::Integer(DEFAULT_INTERVAL_SECS)),
    Column::optional("enabled", DefaultValue::Integer(1)),
    Column::optional("last_run_at", DefaultValue::Null),
    Column::optional("next_run_at", DefaultValue::Null),
    Column::optional("options", DefaultValue::Null).json(),
];

const MARK_RUN_SQL: &str = "UPDATE `schedules`
    SET last_run_at = :ran_at,
        next_run_at = datetime(:ran_at, '+' || interval_secs || ' seconds')
    WHERE id = :id";

pub struct Schedules {
    store: Arc<Store>,
}

impl Schedules {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, schedule: &NewSchedule) -> StoreResult<i64> {
        let mut r = row([
            ("profile_alias", Value::from(schedule.profile_alias.as_str())),
            ("task", Value::from(schedule.task.as_str())),
            ("target", Value::from(schedule.target.clone())),
            ("next_run_at", Value::from(schedule.next_run_at)),
        ]);
        if let Some(interval) = schedule.interval_secs {
            r.insert("interval_secs".into(), Value::from(interval));
        }
        if let Some(options) = &schedule.options {
            r.insert("options".into(), Value::Json(options.clone()));
        }
        let id = insert_validated(&self.store, TABLE, r, COLUMNS, true)?;
        log::debug!(
            "[TT_STORE] Scheduled {} for {} (id {})",
            schedule.task,
            schedule.profile_alias,
            id
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> StoreResult<Option<Schedule>> {
        select_matching(&self.store, TABLE, &row([("id", id)]), "id")?
            .first()
            .map(row_to_schedule)
            .transpose()
    }

    pub fn list(&self) -> StoreResult<Vec<Schedule>> {
        select_matching(&self.store, TABLE, &Row::new(), "id")?
            .iter()
            .map(row_to_schedule)
            .collect()
    }

    pub fn for_profile(&self, alias: &str) -> StoreResult<Vec<Schedule>> {
        select_matching(&self.store, TABLE, &row([("profile_alias", alias)]), "id")?
            .iter()
            .map(row_to_schedule)
            .collect()
    }

    /// Enabled schedules whose next run is unset or not after `now`, soonest first.
    pub fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Schedule>> {
        self.store
            .dicts(
                "SELECT * FROM `schedules`
                 WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= :now)
                 ORDER BY next_run_at IS NOT NULL, next_run_at, id",
                Params::named([("now", now)]),
            )?
            .iter()
            .map(row_to_schedule)
            .collect()
    }

    pub fn update(&self, id: i64, changes: &ScheduleUpdate) -> StoreResult<bool> {
        let mut r = Row::new();
        if let Some(target) = &changes.target {
            r.insert("target".into(), Value::from(target.as_str()));
        }
        if let Some(interval) = changes.interval_secs {
            r.insert("interval_secs".into(), Value::from(interval));
        }
        if let Some(enabled) = changes.enabled {
            r.insert("enabled".into(), Value::from(enabled));
        }
        if let Some(next) = changes.next_run_at {
            r.insert("next_run_at".into(), Value::from(next));
        }
        if let Some(options) = &changes.options {
            r.insert("options".into(), Value::Json(options.clone()));
        }
        if r.is_empty() {
            return Ok(false);
        }
        let affected = update_matching(&self.store, TABLE, &r, COLUMNS, &row([("id", id)]), None, true)?;
        Ok(affected > 0)
    }

    /// Record a run at `ran_at` and push `next_run_at` out by the interval.
    pub fn mark_run(&self, id: i64, ran_at: DateTime<Utc>) -> StoreResult<bool> {
        let affected = self
            .store
            .execute(MARK_RUN_SQL, mark_params(id, ran_at), true)?;
        Ok(affected > 0)
    }

    /// `mark_run` for several schedules at once; an unknown id rolls all of them back.
    pub fn mark_runs(&self, ids: &[i64], ran_at: DateTime<Utc>) -> StoreResult<usize> {
        atomic(&self.store, TABLE, |store| {
            let mut touched = 0;
            for id in ids {
                let affected = store.execute(MARK_RUN_SQL, mark_params(*id, ran_at), false)?;
                touched += require_written(TABLE, id, affected)?;
            }
            Ok(touched)
        })
    }

    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(delete_matching(&self.store, TABLE, &row([("id", id)]), true)? > 0)
    }
}

fn mark_params(id: i64, ran_at: DateTime<Utc>) -> Params {
    Params::named([("id", Value::from(id)), ("ran_at", Value::from(ran_at))])
}

fn row_to_schedule(r: &Row) -> StoreResult<Schedule> {
    let task = r.text("task")?;
    Ok(Schedule {
        id: r.int("id")?,
        profile_alias: r.text("profile_alias")?,
        task: ScheduleTask::from_str(&task).ok_or_else(|| bad_value("task", &task))?,
        target: r.opt_text("target")?,
        interval_secs: r.int("interval_secs")?,
        enabled: r.flag("enabled")?,
        last_run_at: r.opt_datetime("last_run_at")?,
        next_run_at: r.opt_datetime("next_run_at")?,
        options: r.json("options")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tables::MAIN_SCHEMA;
    use crate::error::StoreError;
    use chrono::{Duration, TimeZone};

    fn schedules() -> Schedules {
        Schedules::new(Arc::new(Store::in_memory(&MAIN_SCHEMA)))
    }

    fn new_schedule(alias: &str, task: ScheduleTask) -> NewSchedule {
        NewSchedule {
            profile_alias: alias.to_string(),
            task,
            target: None,
            interval_secs: None,
            next_run_at: None,
            options: None,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_defaults_and_round_trip() {
        let s = schedules();
        let id = s
            .insert(&NewSchedule {
                target: Some("someone".into()),
                options: Some(serde_json::json!({"count": 200})),
                next_run_at: Some(at(3)),
                ..new_schedule("main", ScheduleTask::UserTimeline)
            })
            .unwrap();
        let got = s.get(id).unwrap().unwrap();
        assert_eq!(got.task, ScheduleTask::UserTimeline);
        assert_eq!(got.interval_secs, DEFAULT_INTERVAL_SECS);
        assert!(got.enabled);
        assert_eq!(got.target.as_deref(), Some("someone"));
        assert_eq!(got.options, Some(serde_json::json!({"count": 200})));
        assert_eq!(got.next_run_at, Some(at(3)));
        assert!(s.get(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_due_respects_enabled_and_next_run() {
        let s = schedules();
        let never_run = s.insert(&new_schedule("a", ScheduleTask::HomeTimeline)).unwrap();
        let past = s
            .insert(&NewSchedule {
                next_run_at: Some(at(1)),
                ..new_schedule("a", ScheduleTask::Mentions)
            })
            .unwrap();
        s.insert(&NewSchedule {
            next_run_at: Some(at(9)),
            ..new_schedule("b", ScheduleTask::Followers)
        })
        .unwrap();
        let disabled = s.insert(&new_schedule("b", ScheduleTask::Mentions)).unwrap();
        s.update(
            disabled,
            &ScheduleUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let due: Vec<i64> = s.due(at(5)).unwrap().into_iter().map(|x| x.id).collect();
        assert_eq!(due, vec![never_run, past]);
        assert_eq!(s.for_profile("b").unwrap().len(), 2);
        assert_eq!(s.list().unwrap().len(), 4);
    }

    #[test]
    fn test_mark_run_advances_next_run() {
        let s = schedules();
        let id = s
            .insert(&NewSchedule {
                interval_secs: Some(3600),
                ..new_schedule("a", ScheduleTask::HomeTimeline)
            })
            .unwrap();
        assert!(s.mark_run(id, at(2)).unwrap());
        let got = s.get(id).unwrap().unwrap();
        assert_eq!(got.last_run_at, Some(at(2)));
        assert_eq!(got.next_run_at, Some(at(2) + Duration::hours(1)));
        assert!(!s.mark_run(id + 100, at(2)).unwrap());
    }

    #[test]
    fn test_mark_runs_rolls_back_on_unknown_id() {
        let s = schedules();
        let a = s.insert(&new_schedule("a", ScheduleTask::HomeTimeline)).unwrap();
        let b = s.insert(&new_schedule("a", ScheduleTask::Mentions)).unwrap();

        let err = s.mark_runs(&[a, 999, b], at(4)).unwrap_err();
        assert!(matches!(err, StoreError::BatchAborted { table: "schedules", .. }));
        assert!(s.get(a).unwrap().unwrap().last_run_at.is_none());

        assert_eq!(s.mark_runs(&[a, b], at(4)).unwrap(), 2);
        assert_eq!(s.get(b).unwrap().unwrap().last_run_at, Some(at(4)));
        assert!(s.delete(a).unwrap());
        assert!(s.get(a).unwrap().is_none());
    }
}
