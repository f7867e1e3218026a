/// Handler Abstraction Module
///
/// Driver-neutral traits for talking to a relational database. A concrete
/// client (see `sqlite.rs`) and test doubles implement the same capability
/// set, so repository code never names the client it runs against.

use crate::core::{RepoError, Result};

/// A single statement argument or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

// SQLite integers are signed 64-bit; ids above i64::MAX cannot exist there.
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Real(v as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
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
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a column value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> std::result::Result<Self, String>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Integer(i) => Ok(*i),
            other => Err(format!("expected INTEGER, found {}", other.type_name())),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let i = i64::from_value(value)?;
        u64::try_from(i).map_err(|_| format!("negative value {} for unsigned column", i))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(format!("expected TEXT, found {}", other.type_name())),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One scanned row: the column values in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    /// Converts the column at `index`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| RepoError::Column {
            index,
            reason: format!("out of range ({} columns)", self.values.len()),
        })?;
        T::from_value(value).map_err(|reason| RepoError::Column { index, reason })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

/// Outcome of a write statement.
pub trait ExecResult {
    /// Identifier generated by the last insert.
    fn last_insert_id(&self) -> Result<i64>;
    /// Number of rows the statement changed.
    fn rows_affected(&self) -> Result<i64>;
}

/// Forward-only, single-pass cursor over a result set.
///
/// Must be closed once consumed, whether or not reading succeeded.
pub trait Rows {
    /// Advances to the next row. Returns false when exhausted or closed.
    fn next(&mut self) -> bool;
    /// Reads the row the cursor currently points at.
    fn scan(&self) -> Result<Record>;
    /// Releases the cursor.
    fn close(&mut self) -> Result<()>;
}

/// Cursor over at most one row. Consumed by `scan`, so it scans once.
///
/// Errors from running the statement are deferred until `scan`.
pub trait Row {
    fn scan(self: Box<Self>) -> Result<Record>;
}

/// A begun transaction, bound to one connection.
///
/// Ends through exactly one of `commit` or `rollback`; any call after that
/// returns `RepoError::TransactionFinished`.
pub trait Transaction {
    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Database connection abstraction.
///
/// Every failure is handed back verbatim; handlers never retry.
pub trait Handler {
    fn execute(&self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>>;
    fn query(&self, statement: &str, args: &[Value]) -> Result<Box<dyn Rows + '_>>;
    fn query_row(&self, statement: &str, args: &[Value]) -> Box<dyn Row + '_>;
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// Lifecycle of a `Transaction` handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_open(self) -> bool {
        self == TransactionState::Open
    }

    /// Fails unless the transaction is still open.
    pub fn ensure_open(self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RepoError::TransactionFinished)
        }
    }
}
