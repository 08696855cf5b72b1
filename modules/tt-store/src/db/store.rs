//! Query executor: one lazily opened SQLite connection per store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{Connection, Statement};
use serde::{Deserialize, Serialize};

use crate::db::value::{Row, Value, parse_datetime};
use crate::error::{StoreError, StoreResult};

const MEMORY_PATH: &str = ":memory:";

static DATETIME_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}$").expect("valid regex"));
static JSON_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*(\{.*\}|\[.*\])\s*$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl IsolationLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deferred" => Some(IsolationLevel::Deferred),
            "immediate" => Some(IsolationLevel::Immediate),
            "exclusive" => Some(IsolationLevel::Exclusive),
            _ => None,
        }
    }

    fn begin_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "BEGIN DEFERRED",
            IsolationLevel::Immediate => "BEGIN IMMEDIATE",
            IsolationLevel::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Columns the dict read path decodes from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    DateTime,
    Json,
}

/// DDL run on every connection open, plus the typed-column declarations.
#[derive(Debug)]
pub struct Schema {
    pub init: &'static [&'static str],
    pub typed_columns: &'static [(&'static str, ColumnType)],
}

impl Schema {
    fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.typed_columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, ty)| *ty)
    }

    /// Decode a text value of a declared column; anything else passes through.
    pub fn decode(&self, column: &str, value: Value) -> Value {
        let Value::Text(text) = &value else {
            return value;
        };
        match self.column_type(column) {
            Some(ColumnType::DateTime) if DATETIME_TEXT.is_match(text) => {
                parse_datetime(text).map(Value::DateTime).unwrap_or(value)
            }
            Some(ColumnType::Json) if JSON_TEXT.is_match(text) => {
                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(parsed) => Value::Json(parsed),
                    Err(_) => value,
                }
            }
            _ => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Named(BTreeMap<String, Value>),
    Positional(Vec<Value>),
}

impl Params {
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn positional<V: Into<Value>, I: IntoIterator<Item = V>>(values: I) -> Self {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Merge named maps left to right (later keys win) or concatenate positional lists.
    pub fn merge(list: Vec<Params>) -> StoreResult<Params> {
        let mut merged = Params::None;
        for item in list {
            merged = match (merged, item) {
                (acc, Params::None) => acc,
                (Params::None, item) => item,
                (Params::Named(mut acc), Params::Named(more)) => {
                    acc.extend(more);
                    Params::Named(acc)
                }
                (Params::Positional(mut acc), Params::Positional(more)) => {
                    acc.extend(more);
                    Params::Positional(acc)
                }
                _ => {
                    return Err(StoreError::Type(
                        "cannot merge named and positional parameters".to_string(),
                    ));
                }
            };
        }
        Ok(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    AllRows,
    OneRow,
    AllDicts,
    OneDict,
    /// At most N rows
    Fetch(usize),
    Scalar,
    LastInsertedId,
    AffectedRowCount,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Vec<Value>>),
    Row(Option<Vec<Value>>),
    Dicts(Vec<Row>),
    Dict(Option<Row>),
    Scalar(Option<Value>),
    LastInsertedId(i64),
    AffectedRows(usize),
}

impl QueryResult {
    pub fn into_rows(self) -> StoreResult<Vec<Vec<Value>>> {
        match self {
            QueryResult::Rows(rows) => Ok(rows),
            other => Err(shape_mismatch("rows", &other)),
        }
    }

    pub fn into_row(self) -> StoreResult<Option<Vec<Value>>> {
        match self {
            QueryResult::Row(row) => Ok(row),
            other => Err(shape_mismatch("row", &other)),
        }
    }

    pub fn into_dicts(self) -> StoreResult<Vec<Row>> {
        match self {
            QueryResult::Dicts(rows) => Ok(rows),
            other => Err(shape_mismatch("dicts", &other)),
        }
    }

    pub fn into_dict(self) -> StoreResult<Option<Row>> {
        match self {
            QueryResult::Dict(row) => Ok(row),
            other => Err(shape_mismatch("dict", &other)),
        }
    }

    pub fn into_scalar(self) -> StoreResult<Option<Value>> {
        match self {
            QueryResult::Scalar(v) => Ok(v),
            other => Err(shape_mismatch("scalar", &other)),
        }
    }

    pub fn into_last_id(self) -> StoreResult<i64> {
        match self {
            QueryResult::LastInsertedId(id) => Ok(id),
            other => Err(shape_mismatch("last inserted id", &other)),
        }
    }

    pub fn into_affected(self) -> StoreResult<usize> {
        match self {
            QueryResult::AffectedRows(n) => Ok(n),
            other => Err(shape_mismatch("affected row count", &other)),
        }
    }
}

fn shape_mismatch(expected: &str, got: &QueryResult) -> StoreError {
    StoreError::Type(format!("expected a {} result, got {:?}", expected, got))
}

/// Live row handle over one executing statement.
pub struct Cursor<'stmt> {
    rows: rusqlite::Rows<'stmt>,
    columns: Vec<String>,
    schema: &'static Schema,
}

impl Cursor<'_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn next_row(&mut self) -> StoreResult<Option<Vec<Value>>> {
        match self.rows.next()? {
            Some(row) => Ok(Some(read_values(row, self.columns.len())?)),
            None => Ok(None),
        }
    }

    pub fn next_dict(&mut self) -> StoreResult<Option<Row>> {
        match self.rows.next()? {
            Some(row) => Ok(Some(read_dict(row, &self.columns, self.schema)?)),
            None => Ok(None),
        }
    }
}

pub struct Store {
    path: PathBuf,
    schema: &'static Schema,
    isolation: IsolationLevel,
    conn: Mutex<Option<Connection>>,
}

impl Store {
    /// Bind a store to `path`; the connection is opened on first use.
    pub fn new(
        path: impl Into<PathBuf>,
        schema: &'static Schema,
        isolation: IsolationLevel,
    ) -> StoreResult<Self> {
        let path = path.into();
        if path.as_os_str() != MEMORY_PATH {
            ensure_parent_dir(&path)?;
        }
        Ok(Self {
            path,
            schema,
            isolation,
            conn: Mutex::new(None),
        })
    }

    pub fn in_memory(schema: &'static Schema) -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            schema,
            isolation: IsolationLevel::Deferred,
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let conn = if self.path.as_os_str() == MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            Connection::open(&self.path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        for statement in self.schema.init {
            conn.execute_batch(statement)?;
        }
        log::debug!(
            "[TT_STORE] Opened {} ({} init statements)",
            self.path.display(),
            self.schema.init.len()
        );
        Ok(conn)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.open_connection()?);
        }
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::InvalidState(format!(
                "connection to {} unavailable",
                self.path.display()
            ))),
        }
    }

    /// Execute one statement and package the result as `shape`.
    pub fn q(
        &self,
        query: &str,
        params: Params,
        shape: ResultShape,
        auto_commit: bool,
    ) -> StoreResult<QueryResult> {
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare(query)?;
            if !auto_commit && !stmt.readonly() && conn.is_autocommit() {
                conn.execute_batch(self.isolation.begin_sql())?;
            }
            bind_params(&mut stmt, &params)?;
            run_statement(conn, &mut stmt, shape, self.schema)
        })?;
        if auto_commit {
            self.commit_or_rollback()?;
        }
        Ok(result)
    }

    /// Run each statement in order without committing, then commit once if asked.
    pub fn q_multiple(
        &self,
        queries: Vec<(&str, Params)>,
        shape: ResultShape,
        auto_commit: bool,
    ) -> StoreResult<Vec<QueryResult>> {
        let mut results = Vec::with_capacity(queries.len());
        for (query, params) in queries {
            results.push(self.q(query, params, shape, false)?);
        }
        if auto_commit {
            self.commit_or_rollback()?;
        }
        Ok(results)
    }

    /// Hand a live cursor to `f`; the statement lives until `f` returns.
    ///
    /// The connection stays locked meanwhile, so `f` must not call back into this store.
    pub fn with_cursor<T, F>(&self, query: &str, params: Params, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Cursor<'_>) -> StoreResult<T>,
    {
        let schema = self.schema;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(query)?;
            bind_params(&mut stmt, &params)?;
            let columns = column_names(&stmt);
            let mut cursor = Cursor {
                rows: stmt.raw_query(),
                columns,
                schema,
            };
            f(&mut cursor)
        })
    }

    pub fn execute(&self, query: &str, params: Params, auto_commit: bool) -> StoreResult<usize> {
        self.q(query, params, ResultShape::AffectedRowCount, auto_commit)?
            .into_affected()
    }

    pub fn insert_id(&self, query: &str, params: Params, auto_commit: bool) -> StoreResult<i64> {
        self.q(query, params, ResultShape::LastInsertedId, auto_commit)?
            .into_last_id()
    }

    pub fn scalar(&self, query: &str, params: Params) -> StoreResult<Option<Value>> {
        self.q(query, params, ResultShape::Scalar, false)?.into_scalar()
    }

    pub fn dict(&self, query: &str, params: Params) -> StoreResult<Option<Row>> {
        self.q(query, params, ResultShape::OneDict, false)?.into_dict()
    }

    pub fn dicts(&self, query: &str, params: Params) -> StoreResult<Vec<Row>> {
        self.q(query, params, ResultShape::AllDicts, false)?.into_dicts()
    }

    pub fn in_transaction(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    pub fn commit(&self) -> StoreResult<()> {
        let guard = self.conn.lock();
        if let Some(conn) = guard.as_ref() {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
        }
        Ok(())
    }

    pub fn rollback(&self) -> StoreResult<()> {
        let guard = self.conn.lock();
        if let Some(conn) = guard.as_ref() {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
        }
        Ok(())
    }

    /// A failed COMMIT leaves the transaction open; roll it back so no later call commits it.
    fn commit_or_rollback(&self) -> StoreResult<()> {
        self.commit().inspect_err(|e| {
            log::warn!("[TT_STORE] Commit failed on {}: {}", self.path.display(), e);
            if let Err(rb) = self.rollback() {
                log::error!("[TT_STORE] Rollback failed on {}: {}", self.path.display(), rb);
            }
        })
    }

    /// Run `f`, committing on success and rolling back on failure.
    pub fn batch<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Self) -> StoreResult<T>,
    {
        match f(self) {
            Ok(value) => {
                self.commit_or_rollback()?;
                Ok(value)
            }
            Err(e) => {
                log::warn!(
                    "[TT_STORE] Rolling back batch on {}: {}",
                    self.path.display(),
                    e
                );
                if let Err(rb) = self.rollback() {
                    log::error!("[TT_STORE] Rollback failed on {}: {}", self.path.display(), rb);
                }
                Err(e)
            }
        }
    }

    /// Drop the connection; a pending transaction is rolled back.
    pub fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            if !conn.is_autocommit() {
                log::warn!(
                    "[TT_STORE] Closing {} with an uncommitted transaction, rolling back",
                    self.path.display()
                );
                conn.execute_batch("ROLLBACK")?;
            }
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            log::debug!("[TT_STORE] Closed {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("[TT_STORE] Error closing {}: {}", self.path.display(), e);
        }
    }
}

fn ensure_parent_dir(path: &Path) -> StoreResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn bind_params(stmt: &mut Statement<'_>, params: &Params) -> StoreResult<()> {
    let expected = stmt.parameter_count();
    match params {
        Params::None => {
            if expected > 0 {
                return Err(StoreError::Type(format!(
                    "statement expects {} parameters, none given",
                    expected
                )));
            }
        }
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(StoreError::Type(format!(
                    "statement expects {} parameters, {} given",
                    expected,
                    values.len()
                )));
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)?;
            }
        }
        Params::Named(map) => {
            for idx in 1..=expected {
                let key = match stmt.parameter_name(idx) {
                    Some(name) => name.trim_start_matches([':', '@', '$']).to_string(),
                    None => {
                        return Err(StoreError::Type(
                            "named parameters given for a positional placeholder".to_string(),
                        ));
                    }
                };
                let value = map
                    .get(&key)
                    .ok_or_else(|| StoreError::MissingParameter(key.clone()))?;
                stmt.raw_bind_parameter(idx, value)?;
            }
        }
    }
    Ok(())
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn read_values(row: &rusqlite::Row<'_>, width: usize) -> StoreResult<Vec<Value>> {
    let mut values = Vec::with_capacity(width);
    for idx in 0..width {
        values.push(Value::from_sql_ref(row.get_ref(idx)?));
    }
    Ok(values)
}

fn read_dict(row: &rusqlite::Row<'_>, columns: &[String], schema: &Schema) -> StoreResult<Row> {
    let mut dict = Row::new();
    for (idx, name) in columns.iter().enumerate() {
        let value = Value::from_sql_ref(row.get_ref(idx)?);
        dict.insert(name.clone(), schema.decode(name, value));
    }
    Ok(dict)
}

fn run_statement(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    shape: ResultShape,
    schema: &Schema,
) -> StoreResult<QueryResult> {
    Ok(match shape {
        ResultShape::LastInsertedId => {
            stmt.raw_execute()?;
            QueryResult::LastInsertedId(conn.last_insert_rowid())
        }
        ResultShape::AffectedRowCount => QueryResult::AffectedRows(stmt.raw_execute()?),
        ResultShape::AllRows => QueryResult::Rows(fetch_values(stmt, None)?),
        ResultShape::Fetch(n) => QueryResult::Rows(fetch_values(stmt, Some(n))?),
        ResultShape::OneRow => QueryResult::Row(fetch_values(stmt, Some(1))?.into_iter().next()),
        ResultShape::Scalar => QueryResult::Scalar(
            fetch_values(stmt, Some(1))?
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next()),
        ),
        ResultShape::AllDicts => QueryResult::Dicts(fetch_dicts(stmt, None, schema)?),
        ResultShape::OneDict => {
            QueryResult::Dict(fetch_dicts(stmt, Some(1), schema)?.into_iter().next())
        }
    })
}

fn fetch_values(stmt: &mut Statement<'_>, limit: Option<usize>) -> StoreResult<Vec<Vec<Value>>> {
    let width = stmt.column_count();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while limit.map_or(true, |n| out.len() < n) {
        match rows.next()? {
            Some(row) => out.push(read_values(row, width)?),
            None => break,
        }
    }
    Ok(out)
}

fn fetch_dicts(
    stmt: &mut Statement<'_>,
    limit: Option<usize>,
    schema: &Schema,
) -> StoreResult<Vec<Row>> {
    let columns = column_names(stmt);
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while limit.map_or(true, |n| out.len() < n) {
        match rows.next()? {
            Some(row) => out.push(read_dict(row, &columns, schema)?),
            None => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    static TEST_SCHEMA: Schema = Schema {
        init: &[
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                seen_at TEXT,
                extra TEXT,
                note TEXT
            )",
        ],
        typed_columns: &[("seen_at", ColumnType::DateTime), ("extra", ColumnType::Json)],
    };

    static DEFERRED_FK_SCHEMA: Schema = Schema {
        init: &[
            "CREATE TABLE IF NOT EXISTS parents (id INTEGER PRIMARY KEY)",
            "CREATE TABLE IF NOT EXISTS children (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
            )",
        ],
        typed_columns: &[],
    };

    fn seeded() -> Store {
        let store = Store::in_memory(&TEST_SCHEMA);
        store
            .execute(
                "INSERT INTO items (name) VALUES ('first'), ('second')",
                Params::None,
                true,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_result_shapes() {
        let store = seeded();

        let one = store
            .q("SELECT name FROM items ORDER BY id", Params::None, ResultShape::OneRow, false)
            .unwrap()
            .into_row()
            .unwrap();
        assert_eq!(one, Some(vec![Value::Text("first".into())]));

        let all = store
            .q("SELECT name FROM items ORDER BY id", Params::None, ResultShape::AllRows, false)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(
            all,
            vec![vec![Value::Text("first".into())], vec![Value::Text("second".into())]]
        );

        let count = store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap();
        assert_eq!(count, Some(Value::Integer(2)));

        let fetched = store
            .q("SELECT id FROM items", Params::None, ResultShape::Fetch(1), false)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(fetched.len(), 1);

        let none = store
            .dict("SELECT * FROM items WHERE name = :n", Params::named([("n", "missing")]))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_affected_row_count_and_last_id() {
        let store = seeded();
        let affected = store
            .execute("UPDATE items SET note = 'x' WHERE name = 'nobody'", Params::None, true)
            .unwrap();
        assert_eq!(affected, 0);
        let affected = store
            .execute("UPDATE items SET note = 'x'", Params::None, true)
            .unwrap();
        assert_eq!(affected, 2);

        let id = store
            .insert_id(
                "INSERT INTO items (name) VALUES (?1)",
                Params::positional(["third"]),
                true,
            )
            .unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn test_merge_params() {
        let merged = Params::merge(vec![
            Params::named([("a", 1), ("b", 2)]),
            Params::None,
            Params::named([("b", 3)]),
        ])
        .unwrap();
        assert_eq!(merged, Params::named([("a", 1), ("b", 3)]));

        let merged =
            Params::merge(vec![Params::positional([1]), Params::positional([2, 3])]).unwrap();
        assert_eq!(merged, Params::positional([1, 2, 3]));

        assert!(matches!(
            Params::merge(vec![Params::named([("a", 1)]), Params::positional([1])]),
            Err(StoreError::Type(_))
        ));
    }

    #[test]
    fn test_missing_named_parameter() {
        let store = seeded();
        let err = store
            .dicts("SELECT * FROM items WHERE name = :name", Params::named([("other", "x")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParameter(ref key) if key == "name"));
    }

    #[test]
    fn test_schema_init_is_idempotent_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("items.db");
        let store = Store::new(&path, &TEST_SCHEMA, IsolationLevel::Deferred).unwrap();
        store
            .execute("INSERT INTO items (name) VALUES ('kept')", Params::None, true)
            .unwrap();
        store.close().unwrap();
        assert!(!store.is_open());

        let count = store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap();
        assert_eq!(count, Some(Value::Integer(1)));
        assert!(path.exists());
    }

    #[test]
    fn test_deferred_write_needs_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.db");
        let store = Store::new(&path, &TEST_SCHEMA, IsolationLevel::Immediate).unwrap();

        store
            .execute("INSERT INTO items (name) VALUES ('a')", Params::None, false)
            .unwrap();
        assert!(store.in_transaction());
        store.rollback().unwrap();
        assert_eq!(
            store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap(),
            Some(Value::Integer(0))
        );

        store
            .execute("INSERT INTO items (name) VALUES ('b')", Params::None, false)
            .unwrap();
        store.commit().unwrap();
        assert!(!store.in_transaction());
        store.close().unwrap();
        assert_eq!(
            store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap(),
            Some(Value::Integer(1))
        );
    }

    #[test]
    fn test_close_rolls_back_pending_writes() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("items.db"), &TEST_SCHEMA, IsolationLevel::Deferred)
            .unwrap();
        store
            .execute("INSERT INTO items (name) VALUES ('lost')", Params::None, false)
            .unwrap();
        store.close().unwrap();
        assert_eq!(
            store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap(),
            Some(Value::Integer(0))
        );
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let store = seeded();
        let result = store.batch(|s| {
            s.execute("INSERT INTO items (name) VALUES ('new')", Params::None, false)?;
            s.execute("INSERT INTO items (name) VALUES ('first')", Params::None, false)
        });
        assert!(result.unwrap_err().is_constraint_violation());
        assert_eq!(
            store.scalar("SELECT COUNT(*) FROM items", Params::None).unwrap(),
            Some(Value::Integer(2))
        );
    }

    #[test]
    fn test_q_multiple_commits_once() {
        let store = Store::in_memory(&TEST_SCHEMA);
        let results = store
            .q_multiple(
                vec![
                    ("INSERT INTO items (name) VALUES (:n)", Params::named([("n", "x")])),
                    ("INSERT INTO items (name) VALUES (:n)", Params::named([("n", "y")])),
                ],
                ResultShape::AffectedRowCount,
                true,
            )
            .unwrap();
        assert_eq!(results, vec![QueryResult::AffectedRows(1), QueryResult::AffectedRows(1)]);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_cursor_streams_rows() {
        let store = seeded();
        let names = store
            .with_cursor("SELECT name FROM items ORDER BY id", Params::None, |cursor| {
                assert_eq!(cursor.columns(), ["name".to_string()]);
                let mut names = Vec::new();
                while let Some(row) = cursor.next_dict()? {
                    names.push(row["name"].clone());
                }
                Ok(names)
            })
            .unwrap();
        assert_eq!(names, vec![Value::from("first"), Value::from("second")]);
    }

    #[test]
    fn test_dict_decodes_declared_columns_only() {
        let store = Store::in_memory(&TEST_SCHEMA);
        store
            .execute(
                "INSERT INTO items (name, seen_at, extra, note) VALUES (:name, :seen, :extra, :note)",
                Params::named([
                    ("name", Value::from("x")),
                    ("seen", Value::from("2015-06-01 10:20:30")),
                    ("extra", Value::from(r#"{"k":[1,2]}"#)),
                    ("note", Value::from("[not, json]")),
                ]),
                true,
            )
            .unwrap();
        let row = store
            .dict("SELECT * FROM items", Params::None)
            .unwrap()
            .unwrap();
        assert_eq!(
            row["seen_at"],
            Value::DateTime(Utc.with_ymd_and_hms(2015, 6, 1, 10, 20, 30).unwrap())
        );
        assert_eq!(row["extra"], Value::Json(serde_json::json!({"k": [1, 2]})));
        assert_eq!(row["note"], Value::Text("[not, json]".into()));
        assert_eq!(row["name"], Value::Text("x".into()));
    }

    #[test]
    fn test_failed_commit_rolls_back_the_batch() {
        let store = Store::in_memory(&DEFERRED_FK_SCHEMA);
        let err = store
            .batch(|s| {
                s.execute(
                    "INSERT INTO children (id, parent_id) VALUES (1, 99)",
                    Params::None,
                    false,
                )
            })
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(!store.in_transaction());

        store
            .execute("INSERT INTO parents (id) VALUES (99)", Params::None, true)
            .unwrap();
        assert_eq!(
            store.scalar("SELECT COUNT(*) FROM children", Params::None).unwrap(),
            Some(Value::Integer(0))
        );
    }

    #[test]
    fn test_parameter_shape_mismatches_are_type_errors() {
        let store = seeded();

        let short = store.dict(
            "SELECT * FROM items WHERE id = ? AND name = ?",
            Params::positional([1]),
        );
        assert!(matches!(short, Err(StoreError::Type(_))));

        let unbound = store.dict("SELECT * FROM items WHERE id = :id", Params::None);
        assert!(matches!(unbound, Err(StoreError::Type(_))));

        let named = store.dict(
            "SELECT * FROM items WHERE id = ?",
            Params::named([("id", 1)]),
        );
        assert!(matches!(named, Err(StoreError::Type(_))));

        assert!(!store.in_transaction());
    }
}
