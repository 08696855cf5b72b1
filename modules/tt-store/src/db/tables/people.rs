//! Twitter users grouped into people under a nick name (`tt_main.db`).

use std::collections::BTreeMap;
use std::sync::Arc;

use tt_types::{NewPerson, Person, PersonSummary};

use super::{atomic, delete_matching, insert_validated, require_written, select_matching};
use crate::db::clause::in_clause;
use crate::db::columns::{Column, DefaultValue};
use crate::db::store::{Params, Store};
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::StoreResult;

const TABLE: &str = "people";

pub const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS `people` (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER,
    nick_name TEXT,
    user_name TEXT NOT NULL DEFAULT '',
    user_id INTEGER
)";

pub const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS people__person_id ON people(person_id);
    CREATE INDEX IF NOT EXISTS people__nick_name ON people(nick_name);
    CREATE INDEX IF NOT EXISTS people__user_id ON people(user_id);
";

pub const COLUMNS: &[Column] = &[
    Column::excluded("id"),
    Column::optional("person_id", DefaultValue::Null),
    Column::required("nick_name"),
    Column::optional("user_name", DefaultValue::Text("")),
    Column::required("user_id"),
];

/// How to find the users that make up a person.
#[derive(Debug, Clone, PartialEq)]
pub enum PersonLookup {
    PersonId(i64),
    NickName(String),
}

pub struct People {
    store: Arc<Store>,
}

impl People {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, person: &NewPerson) -> StoreResult<i64> {
        let mut r = row([
            ("nick_name", Value::from(person.nick_name.as_str())),
            ("user_id", Value::from(person.user_id)),
            ("person_id", Value::from(person.person_id)),
        ]);
        if let Some(name) = &person.user_name {
            r.insert("user_name".into(), Value::from(name.as_str()));
        }
        insert_validated(&self.store, TABLE, r, COLUMNS, true)
    }

    pub fn users_of(&self, lookup: &PersonLookup) -> StoreResult<Vec<Person>> {
        let criteria = match lookup {
            PersonLookup::PersonId(id) => row([("person_id", Value::from(*id))]),
            PersonLookup::NickName(nick) => row([("nick_name", Value::from(nick.as_str()))]),
        };
        select_matching(&self.store, TABLE, &criteria, "id ASC")?
            .iter()
            .map(row_to_person)
            .collect()
    }

    /// Distinct (person, nick name) pairs.
    pub fn people(&self) -> StoreResult<Vec<PersonSummary>> {
        self.store
            .dicts(
                "SELECT DISTINCT person_id, nick_name FROM `people` ORDER BY nick_name, person_id",
                Params::None,
            )?
            .iter()
            .map(|r| {
                Ok(PersonSummary {
                    person_id: r.opt_int("person_id")?,
                    nick_name: r.opt_text("nick_name")?,
                })
            })
            .collect()
    }

    /// Rename users (`user_id -> user_name`) in one batch; returns the rows touched.
    pub fn update_user_names(&self, names: &BTreeMap<i64, String>) -> StoreResult<usize> {
        atomic(&self.store, TABLE, |store| {
            let mut touched = 0;
            for (user_id, user_name) in names {
                touched += store.execute(
                    "UPDATE OR IGNORE `people` SET user_name = :user_name WHERE user_id = :user_id",
                    Params::named([
                        ("user_name", Value::from(user_name.as_str())),
                        ("user_id", Value::from(*user_id)),
                    ]),
                    false,
                )?;
            }
            Ok(touched)
        })
    }

    /// Attach every listed user to `person_id`; an unknown user aborts the whole batch.
    pub fn link_person(&self, person_id: i64, user_ids: &[i64]) -> StoreResult<usize> {
        atomic(&self.store, TABLE, |store| {
            let mut touched = 0;
            for user_id in user_ids {
                let affected = store.execute(
                    "UPDATE `people` SET person_id = :person_id WHERE user_id = :user_id",
                    Params::named([("person_id", person_id), ("user_id", *user_id)]),
                    false,
                )?;
                touched += require_written(TABLE, user_id, affected)?;
            }
            Ok(touched)
        })
    }

    pub fn users_by_ids(&self, user_ids: &[i64]) -> StoreResult<Vec<Person>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Value> = user_ids.iter().copied().map(Value::from).collect();
        let filter = in_clause("user_id", &values, None, "uid")?;
        let sql = format!("SELECT * FROM `people` WHERE {} ORDER BY id", filter.sql);
        self.store
            .dicts(&sql, filter.into_params())?
            .iter()
            .map(row_to_person)
            .collect()
    }

    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(delete_matching(&self.store, TABLE, &row([("id", id)]), true)? > 0)
    }

    pub fn count(&self) -> StoreResult<i64> {
        match self.store.scalar("SELECT COUNT(*) FROM `people`", Params::None)? {
            Some(Value::Integer(n)) => Ok(n),
            _ => Ok(0),
        }
    }
}

fn row_to_person(r: &Row) -> StoreResult<Person> {
    Ok(Person {
        id: r.int("id")?,
        person_id: r.opt_int("person_id")?,
        nick_name: r.opt_text("nick_name")?,
        user_name: r.opt_text("user_name")?.unwrap_or_default(),
        user_id: r.opt_int("user_id")?,
    })
}
