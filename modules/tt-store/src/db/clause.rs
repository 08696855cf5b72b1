//! SQL fragment builders that keep values out of the statement text.

use std::collections::BTreeMap;

use crate::db::columns::Column;
use crate::db::store::Params;
use crate::db::value::{Row, Value};
use crate::error::{StoreError, StoreResult};

/// A SQL fragment and the named parameters it references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clause {
    pub sql: String,
    pub params: BTreeMap<String, Value>,
}

impl Clause {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn into_params(self) -> Params {
        Params::Named(self.params)
    }

    /// `WHERE <sql>`, or nothing for an empty clause.
    pub fn as_where(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    #[default]
    And,
    Or,
}

impl Join {
    fn as_sql(&self) -> &'static str {
        match self {
            Join::And => " AND ",
            Join::Or => " OR ",
        }
    }
}

fn qualify(column: &str, table_prefix: Option<&str>) -> String {
    match table_prefix {
        Some(prefix) => format!("`{}`.`{}`", prefix, column),
        None => format!("`{}`", column),
    }
}

/// Hands out `<prefix>_0`, `<prefix>_1`, ... and collects their values.
struct Binder<'a> {
    prefix: &'a str,
    params: BTreeMap<String, Value>,
}

impl<'a> Binder<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            prefix,
            params: BTreeMap::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        let name = format!("{}_{}", self.prefix, self.params.len());
        let placeholder = format!(":{}", name);
        self.params.insert(name, value);
        placeholder
    }

    fn finish(self, sql: String) -> Clause {
        Clause {
            sql,
            params: self.params,
        }
    }
}

/// `` `a`=:par_0,`b`=:par_1 `` for the listed columns present in `row`, in list order.
pub fn set_clause(
    row: &Row,
    allowed: &[Column],
    table_prefix: Option<&str>,
    param_prefix: &str,
) -> StoreResult<Clause> {
    let mut binder = Binder::new(param_prefix);
    let mut parts = Vec::new();
    for column in allowed.iter().filter(|c| !c.is_excluded()) {
        let Some(value) = row.get(column.name) else {
            continue;
        };
        let value = if column.json && !value.is_null() {
            Value::Json(value.to_json())
        } else {
            value.clone()
        };
        let placeholder = binder.bind(value);
        parts.push(format!("{}={}", qualify(column.name, table_prefix), placeholder));
    }
    if parts.is_empty() {
        return Err(StoreError::EmptyClause("SET"));
    }
    Ok(binder.finish(parts.join(",")))
}

/// `` (`a`,`b`) VALUES (:par_0,:par_1) `` over every key of `row`.
pub fn insert_clause(row: &Row, param_prefix: &str) -> StoreResult<Clause> {
    if row.is_empty() {
        return Err(StoreError::EmptyClause("INSERT"));
    }
    let mut binder = Binder::new(param_prefix);
    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (column, value) in row {
        columns.push(qualify(column, None));
        placeholders.push(binder.bind(value.stored()));
    }
    let sql = format!("({}) VALUES ({})", columns.join(","), placeholders.join(","));
    Ok(binder.finish(sql))
}

/// Equality predicates joined by `join`; null criteria become `IS NULL` unless omitted.
pub fn where_clause(
    criteria: &Row,
    omit_if_null: bool,
    join: Join,
    table_prefix: Option<&str>,
    param_prefix: &str,
) -> Clause {
    let mut binder = Binder::new(param_prefix);
    let mut parts = Vec::new();
    for (column, value) in criteria {
        let column = qualify(column, table_prefix);
        if value.is_null() {
            if !omit_if_null {
                parts.push(format!("{} IS NULL", column));
            }
        } else {
            let placeholder = binder.bind(value.stored());
            parts.push(format!("{}={}", column, placeholder));
        }
    }
    binder.finish(parts.join(join.as_sql()))
}

/// `` `col` IN (:p_0,:p_1,...) ``.
pub fn in_clause(
    column: &str,
    values: &[Value],
    table_prefix: Option<&str>,
    param_prefix: &str,
) -> StoreResult<Clause> {
    if values.is_empty() {
        return Err(StoreError::EmptyClause("IN"));
    }
    let mut binder = Binder::new(param_prefix);
    let placeholders: Vec<String> = values.iter().map(|v| binder.bind(v.stored())).collect();
    let sql = format!("{} IN ({})", qualify(column, table_prefix), placeholders.join(","));
    Ok(binder.finish(sql))
}
