//! Column values, filters, and query shapes for the generic CRUD layer.

use super::resource::Collection;
use super::types::DatabaseError;

/// A single SQLite value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Bind a sequence of [`Value`]s onto any sqlx query type in order.
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::storage::Value::Null => query.bind(None::<i64>),
                $crate::storage::Value::Integer(v) => query.bind(*v),
                $crate::storage::Value::Text(v) => query.bind(v.clone()),
                $crate::storage::Value::Blob(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

/// Column assignments for an insert or update, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    entries: Vec<(&'static str, Value)>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing any earlier assignment of the same column.
    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.put(column, value);
        self
    }

    pub fn put(&mut self, column: &'static str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some_and(|v| *v != Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(c, _)| *c)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.entries.iter().map(|(_, v)| v)
    }

    pub(crate) fn validate(&self, collection: Collection) -> Result<(), DatabaseError> {
        self.columns()
            .try_for_each(|column| collection.check_column(column))
    }
}

/// A SQL predicate fragment with positional `?` arguments.
///
/// Clauses are written by this crate, never taken from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clause: String,
    args: Vec<Value>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(clause: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            clause: clause.into(),
            args,
        }
    }

    /// `column = value`
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self::new(format!("{} = ?", column), vec![value.into()])
    }

    /// `column IN (...)`; an empty id list matches nothing.
    pub fn any_of(column: &'static str, ids: impl IntoIterator<Item = i64>) -> Self {
        let args: Vec<Value> = ids.into_iter().map(Value::Integer).collect();
        if args.is_empty() {
            return Self::new("0", Vec::new());
        }
        let placeholders = vec!["?"; args.len()].join(", ");
        Self::new(format!("{} IN ({})", column, placeholders), args)
    }

    /// Conjunction of two filters.
    pub fn and(mut self, other: Filter) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        self.clause = format!("({}) AND ({})", self.clause, other.clause);
        self.args.extend(other.args);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clause.trim().is_empty()
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Filter, ordering and limit for a `query` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Columns to select; empty selects the whole row.
    pub columns: Vec<&'static str>,
    pub filter: Filter,
    pub order_by: Vec<(&'static str, Direction)>,
    pub limit: Option<i64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &[&'static str]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order_by.push((column, direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn select_clause(&self, collection: Collection) -> Result<String, DatabaseError> {
        if self.columns.is_empty() {
            return Ok(collection.columns().join(", "));
        }
        for column in &self.columns {
            collection.check_column(column)?;
        }
        Ok(self.columns.join(", "))
    }

    pub(crate) fn order_clause(&self, collection: Collection) -> Result<String, DatabaseError> {
        let mut parts = Vec::with_capacity(self.order_by.len());
        for (column, direction) in &self.order_by {
            collection.check_column(column)?;
            parts.push(format!("{} {}", column, direction.sql()));
        }
        Ok(parts.join(", "))
    }
}
