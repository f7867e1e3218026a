/// # Test Utilities Module
///
/// Test doubles and fixtures for code written against `Handler`.
///
/// This module provides:
/// - `MockHandler`, a scripted handler with per-cursor state and a call log
/// - `RowCountOverride`, a wrapper that misreports transactional row counts
/// - `DatabaseFixture`, an in-memory SQLite database with the users schema
/// - assertion macros for `RepoError` variants

use crate::config::DatabaseConfig;
use crate::core::db::{
    ExecResult, Handler, Record, Row, Rows, SqliteHandler, Transaction, TransactionState, Value,
};
use crate::core::{RepoError, Result};
use crate::repository::SqlRepository;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Failure a `MockHandler` can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Query,
    /// `next` reports no rows at all
    Next,
    Scan,
    Close,
    Execute,
    LastInsertId,
    RowsAffected,
    Begin,
    Commit,
    Rollback,
    QueryRow,
}

impl Fault {
    fn error(self) -> RepoError {
        let message = match self {
            Fault::Query => "error query",
            Fault::Next => "error next",
            Fault::Scan => "error scan",
            Fault::Close => "error close",
            Fault::Execute => "error execute",
            Fault::LastInsertId => "error last insert id",
            Fault::RowsAffected => "error row affected",
            Fault::Begin => "error begin",
            Fault::Commit => "error commit",
            Fault::Rollback => "error rollback",
            Fault::QueryRow => "error query row",
        };
        RepoError::driver(message)
    }
}

/// Operation recorded by a `MockHandler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Query,
    QueryRow,
    Next,
    Scan,
    Close,
    Execute,
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct CallLog {
    calls: Vec<Call>,
    executed: Vec<(String, Vec<Value>)>,
}

type SharedLog = Rc<RefCell<CallLog>>;

/// Scripted `Handler` for unit tests.
///
/// Queries serve `records` in order; writes report `last_insert_id` and
/// `rows_affected`. Each cursor keeps its own position.
#[derive(Debug, Clone)]
pub struct MockHandler {
    records: Vec<Record>,
    faults: HashSet<Fault>,
    last_insert_id: i64,
    rows_affected: i64,
    log: SharedLog,
}

impl Default for MockHandler {
    fn default() -> Self {
        MockHandler {
            records: Vec::new(),
            faults: HashSet::new(),
            last_insert_id: 1,
            rows_affected: 1,
            log: SharedLog::default(),
        }
    }
}

impl MockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = id;
        self
    }

    pub fn with_rows_affected(mut self, n: i64) -> Self {
        self.rows_affected = n;
        self
    }

    /// Makes the given operation fail.
    pub fn fail(mut self, fault: Fault) -> Self {
        self.faults.insert(fault);
        self
    }

    /// How many times `call` was observed.
    pub fn calls_of(&self, call: Call) -> usize {
        self.log.borrow().calls.iter().filter(|c| **c == call).count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().calls.clone()
    }

    /// Statements passed to `execute`, with their arguments.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.log.borrow().executed.clone()
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().calls.push(call);
    }

    fn check(&self, fault: Fault) -> Result<()> {
        if self.faults.contains(&fault) {
            Err(fault.error())
        } else {
            Ok(())
        }
    }

    fn run_execute(&self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        self.record(Call::Execute);
        self.log
            .borrow_mut()
            .executed
            .push((statement.to_string(), args.to_vec()));
        self.check(Fault::Execute)?;
        Ok(Box::new(MockResult {
            last_insert_id: self.last_insert_id,
            rows_affected: self.rows_affected,
            fail_last_insert_id: self.faults.contains(&Fault::LastInsertId),
            fail_rows_affected: self.faults.contains(&Fault::RowsAffected),
        }))
    }
}

impl Handler for MockHandler {
    fn execute(&self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        self.run_execute(statement, args)
    }

    fn query(&self, _statement: &str, _args: &[Value]) -> Result<Box<dyn Rows + '_>> {
        self.record(Call::Query);
        self.check(Fault::Query)?;
        Ok(Box::new(MockRows {
            handler: self,
            position: 0,
            closed: false,
        }))
    }

    fn query_row(&self, _statement: &str, _args: &[Value]) -> Box<dyn Row + '_> {
        self.record(Call::QueryRow);
        let outcome = self
            .check(Fault::QueryRow)
            .map(|_| self.records.first().cloned());
        Box::new(MockRow { outcome })
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        self.record(Call::Begin);
        self.check(Fault::Begin)?;
        Ok(Box::new(MockTransaction {
            handler: self,
            state: TransactionState::Open,
        }))
    }
}

#[derive(Debug)]
struct MockResult {
    last_insert_id: i64,
    rows_affected: i64,
    fail_last_insert_id: bool,
    fail_rows_affected: bool,
}

impl ExecResult for MockResult {
    fn last_insert_id(&self) -> Result<i64> {
        if self.fail_last_insert_id {
            return Err(Fault::LastInsertId.error());
        }
        Ok(self.last_insert_id)
    }

    fn rows_affected(&self) -> Result<i64> {
        if self.fail_rows_affected {
            return Err(Fault::RowsAffected.error());
        }
        Ok(self.rows_affected)
    }
}

struct MockRows<'a> {
    handler: &'a MockHandler,
    // 0 is before the first row
    position: usize,
    closed: bool,
}

impl Rows for MockRows<'_> {
    fn next(&mut self) -> bool {
        self.handler.record(Call::Next);
        if self.closed || self.handler.faults.contains(&Fault::Next) {
            return false;
        }
        if self.position < self.handler.records.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn scan(&self) -> Result<Record> {
        self.handler.record(Call::Scan);
        self.handler.check(Fault::Scan)?;
        if self.closed || self.position == 0 {
            return Err(RepoError::driver("scan called without a current row"));
        }
        self.handler
            .records
            .get(self.position - 1)
            .cloned()
            .ok_or_else(|| RepoError::driver("scan called without a current row"))
    }

    fn close(&mut self) -> Result<()> {
        self.handler.record(Call::Close);
        self.closed = true;
        self.handler.check(Fault::Close)
    }
}

struct MockRow {
    outcome: Result<Option<Record>>,
}

impl Row for MockRow {
    fn scan(self: Box<Self>) -> Result<Record> {
        self.outcome?.ok_or(RepoError::NoRows)
    }
}

struct MockTransaction<'a> {
    handler: &'a MockHandler,
    state: TransactionState,
}

impl Transaction for MockTransaction<'_> {
    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        self.state.ensure_open()?;
        self.handler.run_execute(statement, args)
    }

    fn commit(&mut self) -> Result<()> {
        self.state.ensure_open()?;
        self.handler.record(Call::Commit);
        self.state = TransactionState::Committed;
        self.handler.check(Fault::Commit)
    }

    fn rollback(&mut self) -> Result<()> {
        self.state.ensure_open()?;
        self.handler.record(Call::Rollback);
        self.state = TransactionState::RolledBack;
        self.handler.check(Fault::Rollback)
    }
}

/// Wraps a handler so results of transactional writes report a fixed
/// affected-row count. Everything else is delegated unchanged.
pub struct RowCountOverride<H> {
    inner: H,
    rows_affected: i64,
}

impl<H: Handler> RowCountOverride<H> {
    pub fn new(inner: H, rows_affected: i64) -> Self {
        RowCountOverride {
            inner,
            rows_affected,
        }
    }
}

impl<H: Handler> Handler for RowCountOverride<H> {
    fn execute(&self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        self.inner.execute(statement, args)
    }

    fn query(&self, statement: &str, args: &[Value]) -> Result<Box<dyn Rows + '_>> {
        self.inner.query(statement, args)
    }

    fn query_row(&self, statement: &str, args: &[Value]) -> Box<dyn Row + '_> {
        self.inner.query_row(statement, args)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(OverrideTransaction {
            inner: self.inner.begin()?,
            rows_affected: self.rows_affected,
        }))
    }
}

struct OverrideTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
    rows_affected: i64,
}

impl Transaction for OverrideTransaction<'_> {
    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Box<dyn ExecResult>> {
        let inner = self.inner.execute(statement, args)?;
        Ok(Box::new(OverrideResult {
            inner,
            rows_affected: self.rows_affected,
        }))
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }
}

struct OverrideResult {
    inner: Box<dyn ExecResult>,
    rows_affected: i64,
}

impl ExecResult for OverrideResult {
    fn last_insert_id(&self) -> Result<i64> {
        self.inner.last_insert_id()
    }

    fn rows_affected(&self) -> Result<i64> {
        Ok(self.rows_affected)
    }
}

/// Isolated in-memory SQLite database with the users schema
pub struct DatabaseFixture {
    pub handler: SqliteHandler,
}

impl DatabaseFixture {
    /// Create an empty users table
    pub fn new() -> Result<Self> {
        let handler = SqliteHandler::open(&DatabaseConfig::default())?;
        Ok(DatabaseFixture { handler })
    }

    /// Create fixture with the given emails inserted in order
    pub fn with_users(emails: &[&str]) -> Result<Self> {
        let fixture = Self::new()?;
        for email in emails {
            fixture
                .handler
                .execute("INSERT INTO users (email) VALUES (?)", &[(*email).into()])?;
        }
        Ok(fixture)
    }

    pub fn into_repository(self) -> SqlRepository<SqliteHandler> {
        SqlRepository::new(self.handler)
    }
}

/// Asserts that an expression fails with the given `RepoError` pattern
#[macro_export]
macro_rules! assert_repo_error {
    ($result:expr, $pattern:pat, $context:expr) => {
        match $result {
            Err($pattern) => {}
            Ok(_) => panic!("Expected {} but got Ok in {}", stringify!($pattern), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($pattern),
                other,
                $context
            ),
        }
    };
}
