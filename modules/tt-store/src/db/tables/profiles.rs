//! Linked accounts and their authorization state (`tt_profiles.db`).

use std::sync::Arc;

use tt_types::{AuthFlag, Profile, ProfileUpdate};

use super::{bad_value, delete_matching, insert_validated, select_matching, update_matching};
use crate::db::columns::{Column, DefaultValue};
use crate::db::store::{ColumnType, Params, Schema, Store};
use crate::db::value::{Row, RowExt, Value, row};
use crate::error::{StoreError, StoreResult};

const TABLE: &str = "profiles";

pub static SCHEMA: Schema = Schema {
    init: &["CREATE TABLE IF NOT EXISTS `profiles` (
        profile_alias TEXT PRIMARY KEY,
        auth_flag INTEGER NOT NULL DEFAULT 0,
        auth_data TEXT,
        user_id INTEGER,
        priority INTEGER NOT NULL DEFAULT 5,
        purpose TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )"],
    typed_columns: &[
        ("auth_data", ColumnType::Json),
        ("created_at", ColumnType::DateTime),
        ("updated_at", ColumnType::DateTime),
    ],
};

pub const COLUMNS: &[Column] = &[
    Column::required("profile_alias"),
    Column::optional("auth_flag", DefaultValue::Integer(0)),
    Column::optional("auth_data", DefaultValue::Null).json(),
    Column::optional("user_id", DefaultValue::Null),
    Column::optional("priority", DefaultValue::Integer(5)),
    Column::optional("purpose", DefaultValue::Text("")),
    Column::excluded("created_at"),
    Column::excluded("updated_at"),
];

const TOUCH_UPDATED: &str = "`updated_at`=datetime('now')";

pub struct Profiles {
    store: Arc<Store>,
}

impl Profiles {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, profile: &Profile) -> StoreResult<()> {
        self.insert_row(profile_to_row(profile))
    }

    /// Insert a raw row; missing optional columns get their defaults, unknown ones are dropped.
    pub fn insert_row(&self, row: Row) -> StoreResult<()> {
        insert_validated(&self.store, TABLE, row, COLUMNS, true)?;
        Ok(())
    }

    /// Apply the set fields of `changes`; false when no profile has that alias.
    pub fn update(&self, alias: &str, changes: &ProfileUpdate) -> StoreResult<bool> {
        let changes = update_to_row(changes);
        if changes.is_empty() {
            return Ok(false);
        }
        Ok(self.update_row(alias, &changes)? > 0)
    }

    pub fn update_row(&self, alias: &str, changes: &Row) -> StoreResult<usize> {
        update_matching(
            &self.store,
            TABLE,
            changes,
            COLUMNS,
            &row([("profile_alias", alias)]),
            Some(TOUCH_UPDATED),
            true,
        )
    }

    pub fn delete(&self, alias: &str) -> StoreResult<bool> {
        let deleted = delete_matching(&self.store, TABLE, &row([("profile_alias", alias)]), true)?;
        Ok(deleted > 0)
    }

    pub fn get(&self, alias: &str) -> StoreResult<Option<Profile>> {
        let found = self.store.dict(
            "SELECT * FROM `profiles` WHERE profile_alias = :alias",
            Params::named([("alias", alias)]),
        )?;
        found.as_ref().map(row_to_profile).transpose()
    }

    /// All profiles, highest priority (lowest number) first.
    pub fn list(&self) -> StoreResult<Vec<Profile>> {
        select_matching(&self.store, TABLE, &Row::new(), "priority ASC, profile_alias ASC")?
            .iter()
            .map(row_to_profile)
            .collect()
    }

    pub fn authenticated(&self) -> StoreResult<Vec<Profile>> {
        let criteria = row([("auth_flag", AuthFlag::Authenticated.as_i64())]);
        select_matching(&self.store, TABLE, &criteria, "priority ASC, profile_alias ASC")?
            .iter()
            .map(row_to_profile)
            .collect()
    }

    /// Create `alias` in the `Requested` state holding the request token.
    pub fn request_auth(&self, alias: &str, request_token: serde_json::Value) -> StoreResult<Profile> {
        let mut profile = Profile::new(alias);
        profile.auth_flag = AuthFlag::Requested;
        profile.auth_data = Some(request_token);
        match self.insert(&profile) {
            Ok(()) => {}
            Err(e) if e.is_constraint_violation() => {
                return Err(StoreError::InvalidState(format!(
                    "profile {} already exists",
                    alias
                )));
            }
            Err(e) => return Err(e),
        }
        log::info!("[TT_STORE] Profile {} awaiting authorization", alias);
        self.fetch(alias)
    }

    /// Move a `Requested` profile to `Authenticated`, replacing the request token.
    pub fn complete_auth(
        &self,
        alias: &str,
        access_token: serde_json::Value,
        user_id: i64,
    ) -> StoreResult<Profile> {
        let current = self.fetch(alias)?;
        if current.auth_flag != AuthFlag::Requested {
            return Err(StoreError::InvalidState(format!(
                "profile {} is {:?}, expected Requested",
                alias, current.auth_flag
            )));
        }
        let changes = ProfileUpdate {
            auth_flag: Some(AuthFlag::Authenticated),
            auth_data: Some(access_token),
            user_id: Some(user_id),
            ..Default::default()
        };
        self.update(alias, &changes)?;
        log::info!("[TT_STORE] Profile {} authenticated as user {}", alias, user_id);
        self.fetch(alias)
    }

    fn fetch(&self, alias: &str) -> StoreResult<Profile> {
        self.get(alias)?
            .ok_or_else(|| StoreError::InvalidState(format!("no profile named {}", alias)))
    }
}

fn profile_to_row(profile: &Profile) -> Row {
    let mut r = row([
        ("profile_alias", Value::from(profile.profile_alias.as_str())),
        ("auth_flag", Value::from(profile.auth_flag.as_i64())),
        ("user_id", Value::from(profile.user_id)),
        ("priority", Value::from(profile.priority)),
        ("purpose", Value::from(profile.purpose.as_str())),
    ]);
    r.insert(
        "auth_data".to_string(),
        profile
            .auth_data
            .clone()
            .map(Value::Json)
            .unwrap_or(Value::Null),
    );
    r
}

fn update_to_row(changes: &ProfileUpdate) -> Row {
    let mut r = Row::new();
    if let Some(flag) = changes.auth_flag {
        r.insert("auth_flag".into(), Value::from(flag.as_i64()));
    }
    if let Some(data) = &changes.auth_data {
        r.insert("auth_data".into(), Value::Json(data.clone()));
    }
    if let Some(user_id) = changes.user_id {
        r.insert("user_id".into(), Value::from(user_id));
    }
    if let Some(priority) = changes.priority {
        r.insert("priority".into(), Value::from(priority));
    }
    if let Some(purpose) = &changes.purpose {
        r.insert("purpose".into(), Value::from(purpose.as_str()));
    }
    r
}

fn row_to_profile(r: &Row) -> StoreResult<Profile> {
    let flag = r.int("auth_flag")?;
    Ok(Profile {
        profile_alias: r.text("profile_alias")?,
        auth_flag: AuthFlag::from_i64(flag).ok_or_else(|| bad_value("auth_flag", flag))?,
        auth_data: r.json("auth_data")?,
        user_id: r.opt_int("user_id")?,
        priority: r.int("priority")?,
        purpose: r.opt_text("purpose")?.unwrap_or_default(),
        created_at: r.opt_datetime("created_at")?,
        updated_at: r.opt_datetime("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> Profiles {
        Profiles::new(Arc::new(Store::in_memory(&SCHEMA)))
    }

    #[test]
    fn test_insert_row_applies_defaults() {
        let p = profiles();
        p.insert_row(row([("profile_alias", Value::from("main")), ("bogus", Value::Integer(1))]))
            .unwrap();
        let got = p.get("main").unwrap().unwrap();
        assert_eq!(got.auth_flag, AuthFlag::None);
        assert_eq!(got.priority, 5);
        assert_eq!(got.purpose, "");
        assert!(got.created_at.is_some());
    }

    #[test]
    fn test_insert_row_requires_alias() {
        let p = profiles();
        let err = p.insert_row(row([("priority", 1)])).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumns { table: "profiles", .. }));
    }

    #[test]
    fn test_round_trip_with_structured_auth_data() {
        let p = profiles();
        let mut profile = Profile::new("work");
        profile.auth_data = Some(serde_json::json!({"key": "k", "secret": "s"}));
        profile.user_id = Some(42);
        profile.priority = 2;
        profile.purpose = "mentions".to_string();
        p.insert(&profile).unwrap();

        let got = p.get("work").unwrap().unwrap();
        assert_eq!(got.auth_data, profile.auth_data);
        assert_eq!(got.user_id, Some(42));
        assert_eq!(got.priority, 2);
        assert_eq!(got.purpose, "mentions");
        assert!(p.get("other").unwrap().is_none());
    }

    #[test]
    fn test_list_orders_by_priority() {
        let p = profiles();
        for (alias, priority) in [("low", 9), ("high", 1), ("mid", 5)] {
            let mut profile = Profile::new(alias);
            profile.priority = priority;
            p.insert(&profile).unwrap();
        }
        let aliases: Vec<String> = p.list().unwrap().into_iter().map(|p| p.profile_alias).collect();
        assert_eq!(aliases, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_update_and_delete() {
        let p = profiles();
        p.insert(&Profile::new("a")).unwrap();
        let changes = ProfileUpdate {
            priority: Some(1),
            ..Default::default()
        };
        assert!(p.update("a", &changes).unwrap());
        assert!(!p.update("missing", &changes).unwrap());
        assert!(!p.update("a", &ProfileUpdate::default()).unwrap());
        assert_eq!(p.get("a").unwrap().unwrap().priority, 1);

        let err = p.update_row("a", &row([("created_at", "2020-01-01 00:00:00")])).unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumns { .. }));

        assert!(p.delete("a").unwrap());
        assert!(!p.delete("a").unwrap());
    }

    #[test]
    fn test_auth_flow() {
        let p = profiles();
        let requested = p.request_auth("me", serde_json::json!("request-token")).unwrap();
        assert_eq!(requested.auth_flag, AuthFlag::Requested);
        assert_eq!(requested.auth_flag.status_label(), "Need PIN");
        assert_eq!(requested.auth_data, Some(serde_json::json!("request-token")));
        assert!(matches!(
            p.request_auth("me", serde_json::json!("again")),
            Err(StoreError::InvalidState(_))
        ));
        assert!(p.authenticated().unwrap().is_empty());

        let done = p
            .complete_auth("me", serde_json::json!({"token": "t", "secret": "s"}), 77)
            .unwrap();
        assert_eq!(done.auth_flag, AuthFlag::Authenticated);
        assert_eq!(done.auth_flag.status_label(), "OK");
        assert_eq!(done.user_id, Some(77));
        assert_eq!(p.authenticated().unwrap().len(), 1);

        assert!(matches!(
            p.complete_auth("me", serde_json::json!("x"), 77),
            Err(StoreError::InvalidState(_))
        ));
        assert!(matches!(
            p.complete_auth("nobody", serde_json::json!("x"), 1),
            Err(StoreError::InvalidState(_))
        ));
    }
}
