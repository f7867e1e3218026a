/// SQLite Driver Module
///
/// The production `Handler`, backed by a single `rusqlite::Connection`.

use crate::config::DatabaseConfig;
use crate::core::db::handler::{
    ExecResult, Handler, Record, Row, Rows, Transaction, TransactionState, Value,
};
use crate::core::{RepoError, Result};
use crate::schema;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(*i),
            Value::Real(f) => SqlValue::Real(*f),
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Blob(b) => SqlValue::Blob(b.clone()),
        }
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }
}

fn bind(args: &[Value]) -> Vec<SqlValue> {
    args.iter().map(SqlValue::from).collect()
}

/// Write outcome captured right after the statement ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteResult {
    last_insert_id: i64,
    rows_affected: usize,
}

impl ExecResult for SqliteResult {
    fn last_insert_id(&self) -> Result<i64> {
        Ok(self.last_insert_id)
    }

    fn rows_affected(&self) -> Result<i64> {
        i64::try_from(self.rows_affected)
            .map_err(|_| RepoError::driver(format!("row count {} overflows", self.rows_affected)))
    }
}

fn execute_on(conn: &Connection, statement: &str, args: &[Value]) -> Result<SqliteResult> {
    debug!(statement, args = args.len(), "execute");
    let rows_affected = conn.execute(statement, params_from_iter(bind(args)))?;
    Ok(SqliteResult {
        last_insert_id: conn.last_insert_rowid(),
        rows_affected,
    })
}

fn fetch_all(conn: &Connection, statement: &str, args: &[Value]) -> Result<VecDeque<Record>> {
    let mut stmt = conn.prepare(statement)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(bind(args)))?;

    let mut records = VecDeque::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(Value::from(row.get::<_, SqlValue>(i)?));
        }
        records.push_back(Record::new(values));
    }
    Ok(records)
}

/// Buffered forward-only cursor.
///
/// rusqlite row iterators borrow their statement, so the result set is
/// read when the query runs and handed out one row at a time.
#[derive(Debug, Default)]
pub struct SqliteRows {
    pending: VecDeque<Record>,
    current: Option<Record>,
    closed: bool,
}

impl SqliteRows {
    fn new(records: VecDeque<Record>) -> Self {
        SqliteRows {
            pending: records,
            current: None,
            closed: false,
        }
    }
}

impl Rows for SqliteRows {
    fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.current = self.pending.pop_front();
        self.current.is_some()
    }

    fn scan(&self) -> Result<Record> {
        if self.closed {
            return Err(RepoError::driver("cursor is closed"));
        }
        self.current
            .clone()
            .ok_or_else(|| RepoError::driver("scan called without a current row"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}

/// Single-row cursor holding either the first row or the deferred error.
#[derive(Debug)]
pub struct SqliteRow {
    outcome: Result<Option<Record>>,
}

impl Row for SqliteRow {
    fn scan(self: Box<Self>) -> Result<Record> {
        self.outcome?.ok_or(RepoError::NoRows)
    }
}

/// Transaction on the handler's connection.
///
/// Dropping it while still open rolls back.
pub struct SqliteTransaction<'conn> {
    tx: Option<rusqlite::Transaction<'conn>>,
    state: TransactionState,
}

impl<'conn> SqliteTransaction<'conn> {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn take(&mut self) -> Result<rusqlite::Transaction<'conn>> {
        self.state.ensure_open()?;
        self.tx.take().ok_or(RepoError::TransactionFinished)
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        self.state.ensure_open()?;
        let tx = self.tx.as_ref().ok_or(RepoError::TransactionFinished)?;
        Ok(Box::new(execute_on(tx, statement, args)?))
    }

    fn commit(&mut self) -> Result<()> {
        let tx = self.take()?;
        debug!("commit");
        // a failed COMMIT drops `tx`, which rolls it back
        match tx.commit() {
            Ok(()) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::RolledBack;
                Err(err.into())
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        let tx = self.take()?;
        self.state = TransactionState::RolledBack;
        debug!("rollback");
        tx.rollback()?;
        Ok(())
    }
}

/// `Handler` over one SQLite connection.
#[derive(Debug)]
pub struct SqliteHandler {
    conn: Connection,
}

impl SqliteHandler {
    /// Opens the database described by `config`.
    ///
    /// `path` may be ":memory:" for a private in-memory database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        info!("Opening database at {}", config.path);
        let conn = if config.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))?;
        }

        let handler = SqliteHandler::from_connection(conn);
        if config.create_schema {
            handler.create_schema()?;
        }
        Ok(handler)
    }

    /// Wraps an already opened connection.
    pub fn from_connection(conn: Connection) -> Self {
        SqliteHandler { conn }
    }

    /// Creates the `users` table if it does not exist yet.
    pub fn create_schema(&self) -> Result<()> {
        debug!("Ensuring users schema");
        self.conn.execute_batch(schema::USERS_TABLE_SQL)?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begins a transaction, keeping the concrete type.
    pub fn transaction(&self) -> Result<SqliteTransaction<'_>> {
        debug!("begin");
        let tx = self.conn.unchecked_transaction()?;
        Ok(SqliteTransaction {
            tx: Some(tx),
            state: TransactionState::Open,
        })
    }
}

impl Handler for SqliteHandler {
    fn execute(&self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        Ok(Box::new(execute_on(&self.conn, statement, args)?))
    }

    fn query(&self, statement: &str, args: &[Value]) -> Result<Box<dyn Rows + '_>> {
        debug!(statement, args = args.len(), "query");
        let records = fetch_all(&self.conn, statement, args)?;
        Ok(Box::new(SqliteRows::new(records)))
    }

    fn query_row(&self, statement: &str, args: &[Value]) -> Box<dyn Row + '_> {
        debug!(statement, args = args.len(), "query_row");
        let outcome = fetch_all(&self.conn, statement, args).map(|mut records| records.pop_front());
        Box::new(SqliteRow { outcome })
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(self.transaction()?))
    }
}
