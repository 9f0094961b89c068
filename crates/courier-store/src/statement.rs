//! The ORM-like statement model accepted by the storage client.
//!
//! Statements carry a logical table name, columns, and bound values; the
//! router rewrites the table to its physical shard before the SQL text is
//! rendered. Only conjunctive equality/comparison predicates are modelled,
//! which is all the sharding layer needs to see.

use crate::shard::ShardKey;
use crate::{Error, Result};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Interpret this value as a sharding key.
    pub(crate) fn as_shard_key(&self) -> Result<ShardKey> {
        match self {
            Value::Int(v) => Ok(ShardKey::Int(*v)),
            Value::Uint(v) => Ok(ShardKey::Uint(*v)),
            Value::Str(s) => Ok(ShardKey::Str(s.clone())),
            other => Err(Error::UnsupportedShardKeyType {
                type_name: other.type_name(),
            }),
        }
    }

    pub(crate) fn bind_to<'q>(
        &self,
        query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    ) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
        match self {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Uint(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Str(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v.into())
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Comparison operator in a WHERE predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Op {
    fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filters: Vec<Cond>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    pub fn filter_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filters: Vec<Cond>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    pub fn filter_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Cond>,
    pub order_by: Option<(String, bool)>, // (column, descending)
    pub limit: Option<u64>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    pub fn filter_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Cond {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some((column.into(), descending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Select(Select),
}

impl From<Insert> for Statement {
    fn from(v: Insert) -> Self {
        Statement::Insert(v)
    }
}
impl From<Update> for Statement {
    fn from(v: Update) -> Self {
        Statement::Update(v)
    }
}
impl From<Delete> for Statement {
    fn from(v: Delete) -> Self {
        Statement::Delete(v)
    }
}
impl From<Select> for Statement {
    fn from(v: Select) -> Self {
        Statement::Select(v)
    }
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
            Statement::Select(s) => &s.table,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }

    /// The bound value of `column`: from the column list for INSERT, from an
    /// equality predicate for everything else.
    pub(crate) fn shard_value(&self, column: &str) -> Option<&Value> {
        fn from_filters<'a>(filters: &'a [Cond], column: &str) -> Option<&'a Value> {
            filters
                .iter()
                .find(|cond| cond.op == Op::Eq && cond.column == column)
                .map(|cond| &cond.value)
        }

        match self {
            Statement::Insert(insert) => insert
                .columns
                .iter()
                .position(|c| c == column)
                .map(|i| &insert.values[i]),
            Statement::Update(update) => from_filters(&update.filters, column),
            Statement::Delete(delete) => from_filters(&delete.filters, column),
            Statement::Select(select) => from_filters(&select.filters, column),
        }
    }

    /// Render SQL against `physical` and collect bind parameters in
    /// placeholder order.
    pub(crate) fn render(&self, physical: &str) -> (String, Vec<Value>) {
        match self {
            Statement::Insert(insert) => {
                let columns = insert
                    .columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let placeholders = vec!["?"; insert.values.len()].join(", ");
                (
                    format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        quote_ident(physical),
                        columns,
                        placeholders
                    ),
                    insert.values.clone(),
                )
            }
            Statement::Update(update) => {
                let mut params = Vec::with_capacity(update.assignments.len() + update.filters.len());
                let assignments = update
                    .assignments
                    .iter()
                    .map(|(column, value)| {
                        params.push(value.clone());
                        format!("{} = ?", quote_ident(column))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!("UPDATE {} SET {}", quote_ident(physical), assignments);
                render_where(&mut sql, &update.filters, &mut params);
                (sql, params)
            }
            Statement::Delete(delete) => {
                let mut params = Vec::with_capacity(delete.filters.len());
                let mut sql = format!("DELETE FROM {}", quote_ident(physical));
                render_where(&mut sql, &delete.filters, &mut params);
                (sql, params)
            }
            Statement::Select(select) => {
                let columns = if select.columns.is_empty() {
                    "*".to_string()
                } else {
                    select
                        .columns
                        .iter()
                        .map(|c| quote_ident(c))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let mut params = Vec::with_capacity(select.filters.len());
                let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(physical));
                render_where(&mut sql, &select.filters, &mut params);
                if let Some((column, descending)) = &select.order_by {
                    sql.push_str(&format!(
                        " ORDER BY {} {}",
                        quote_ident(column),
                        if *descending { "DESC" } else { "ASC" }
                    ));
                }
                if let Some(limit) = select.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                (sql, params)
            }
        }
    }
}

fn render_where(sql: &mut String, filters: &[Cond], params: &mut Vec<Value>) {
    if filters.is_empty() {
        return;
    }
    let rendered = filters
        .iter()
        .map(|cond| {
            params.push(cond.value.clone());
            format!("{} {} ?", quote_ident(&cond.column), cond.op.as_sql())
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    sql.push_str(" WHERE ");
    sql.push_str(&rendered);
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_renders_with_placeholders() {
        let statement: Statement = Insert::into("users")
            .value("user_id", 12345i64)
            .value("name", "ada")
            .into();
        let (sql, params) = statement.render("users_09");
        assert_eq!(sql, "INSERT INTO `users_09` (`user_id`, `name`) VALUES (?, ?)");
        assert_eq!(params, vec![Value::Int(12345), Value::Str("ada".to_string())]);
    }

    #[test]
    fn update_renders_assignments_then_filters() {
        let statement: Statement = Update::table("users")
            .set("name", "grace")
            .filter("user_id", 7i64)
            .into();
        let (sql, params) = statement.render("users_07");
        assert_eq!(sql, "UPDATE `users_07` SET `name` = ? WHERE `user_id` = ?");
        assert_eq!(params, vec![Value::Str("grace".to_string()), Value::Int(7)]);
    }

    #[test]
    fn delete_and_select_render_filters() {
        let statement: Statement = Delete::from("users").filter("user_id", 7i64).into();
        let (sql, _) = statement.render("users_07");
        assert_eq!(sql, "DELETE FROM `users_07` WHERE `user_id` = ?");

        let statement: Statement = Select::from("users")
            .columns(["user_id", "name"])
            .filter("user_id", 7i64)
            .filter_op("age", Op::Ge, 18i64)
            .order_by("name", false)
            .limit(10)
            .into();
        let (sql, params) = statement.render("users_07");
        assert_eq!(
            sql,
            "SELECT `user_id`, `name` FROM `users_07` WHERE `user_id` = ? AND `age` >= ? \
             ORDER BY `name` ASC LIMIT 10"
        );
        assert_eq!(params, vec![Value::Int(7), Value::Int(18)]);
    }

    #[test]
    fn shard_value_extraction() {
        let insert: Statement = Insert::into("users").value("user_id", 5i64).into();
        assert_eq!(insert.shard_value("user_id"), Some(&Value::Int(5)));
        assert_eq!(insert.shard_value("other"), None);

        let update: Statement = Update::table("users")
            .set("user_id", 9i64) // assignments don't count
            .filter_op("user_id", Op::Gt, 5i64) // non-equality doesn't count
            .into();
        assert_eq!(update.shard_value("user_id"), None);

        let select: Statement = Select::from("users").filter("user_id", "42").into();
        assert_eq!(
            select.shard_value("user_id"),
            Some(&Value::Str("42".to_string()))
        );
    }

    #[test]
    fn unsupported_shard_key_types_error() {
        for value in [Value::Null, Value::Bool(true), Value::Float(1.5), Value::Bytes(vec![1])] {
            assert!(matches!(
                value.as_shard_key(),
                Err(crate::Error::UnsupportedShardKeyType { .. })
            ));
        }
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote_ident("na`me"), "`na``me`");
    }
}
