//! User repository over a `Handler`.
//!
//! Translates user operations into SQL statements and scanned records back
//! into `User` values. Works the same against SQLite or a test double.

use crate::core::db::{Handler, Record, Rows, Transaction};
use crate::core::{RepoError, Result};
use serde::Serialize;
use tracing::{debug, warn};

const FIND_USER_BY_ID_SQL: &str = "SELECT id, email FROM users WHERE id = ?";
const FIND_USERS_SQL: &str = "SELECT id, email FROM users";
const INSERT_USER_SQL: &str = "INSERT INTO users (email) VALUES (?)";
const COUNT_USERS_SQL: &str = "SELECT COUNT(*) FROM users";

/// A stored user. `id` is assigned by the database on insert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct User {
    pub id: u64,
    pub email: String,
}

impl User {
    /// A user not yet inserted.
    pub fn new(email: impl Into<String>) -> Self {
        User {
            id: 0,
            email: email.into(),
        }
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(User {
            id: record.get(0)?,
            email: record.get(1)?,
        })
    }
}

/// User-centric data operations.
pub trait UserRepository {
    fn find_user_by_id(&self, id: u64) -> Result<User>;
    fn find_users(&self) -> Result<Vec<User>>;
    fn insert_user(&self, user: &User) -> Result<u64>;
    fn insert_user_with_tx(&self, user: &User) -> Result<u64>;
    fn count_users(&self) -> Result<u64>;
}

/// `UserRepository` backed by any `Handler`.
#[derive(Debug)]
pub struct SqlRepository<H> {
    handler: H,
}

impl<H: Handler> SqlRepository<H> {
    pub fn new(handler: H) -> Self {
        SqlRepository { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

fn generated_id(id: i64) -> Result<u64> {
    u64::try_from(id).map_err(|_| RepoError::InvalidId(id))
}

/// Runs `read` against an open cursor and closes it afterwards, whatever
/// `read` returned. A read error takes precedence over a close error.
fn with_rows<T>(
    mut rows: Box<dyn Rows + '_>,
    read: impl FnOnce(&mut dyn Rows) -> Result<T>,
) -> Result<T> {
    let outcome = read(rows.as_mut());
    let closed = rows.close();
    let value = outcome?;
    closed?;
    Ok(value)
}

/// Rolls back after `err`, keeping `err` as the reported failure.
fn abort(tx: &mut dyn Transaction, err: RepoError) -> RepoError {
    if let Err(rollback_err) = tx.rollback() {
        warn!(error = %rollback_err, "rollback failed, keeping original error");
    }
    err
}

impl<H: Handler> UserRepository for SqlRepository<H> {
    fn find_user_by_id(&self, id: u64) -> Result<User> {
        debug!(id, "find_user_by_id");
        let rows = self.handler.query(FIND_USER_BY_ID_SQL, &[id.into()])?;
        with_rows(rows, |rows| {
            if !rows.next() {
                return Err(RepoError::NotFound(id));
            }
            User::from_record(&rows.scan()?)
        })
    }

    fn find_users(&self) -> Result<Vec<User>> {
        let rows = self.handler.query(FIND_USERS_SQL, &[])?;
        let users = with_rows(rows, |rows| {
            let mut users = Vec::new();
            while rows.next() {
                users.push(User::from_record(&rows.scan()?)?);
            }
            Ok(users)
        })?;
        debug!(count = users.len(), "find_users");
        Ok(users)
    }

    fn insert_user(&self, user: &User) -> Result<u64> {
        let res = self
            .handler
            .execute(INSERT_USER_SQL, &[user.email.as_str().into()])?;
        let id = generated_id(res.last_insert_id()?)?;
        debug!(id, "insert_user");
        Ok(id)
    }

    fn insert_user_with_tx(&self, user: &User) -> Result<u64> {
        let mut tx = self.handler.begin()?;

        let res = match tx.execute(INSERT_USER_SQL, &[user.email.as_str().into()]) {
            Ok(res) => res,
            Err(err) => return Err(abort(tx.as_mut(), err)),
        };
        let id = match res.last_insert_id().and_then(generated_id) {
            Ok(id) => id,
            Err(err) => return Err(abort(tx.as_mut(), err)),
        };
        match res.rows_affected() {
            Ok(1) => {}
            Ok(n) => return Err(abort(tx.as_mut(), RepoError::UnexpectedRowsAffected(n))),
            Err(err) => return Err(abort(tx.as_mut(), err)),
        }

        tx.commit()?;
        debug!(id, "insert_user_with_tx");
        Ok(id)
    }

    fn count_users(&self) -> Result<u64> {
        let record = self.handler.query_row(COUNT_USERS_SQL, &[]).scan()?;
        record.get(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, Fault, MockHandler};

    fn stored_user() -> Record {
        Record::from(vec![2i64.into(), "test string".into()])
    }

    #[test]
    fn test_find_user_by_id_scans_first_row() {
        let repo = SqlRepository::new(MockHandler::new().with_records(vec![stored_user()]));
        let user = repo.find_user_by_id(1).unwrap();
        assert_eq!(
            user,
            User {
                id: 2,
                email: "test string".to_string()
            }
        );
        assert_eq!(repo.handler().calls_of(Call::Close), 1);
    }

    #[test]
    fn test_find_user_by_id_errors() {
        let cases = vec![
            (Fault::Query, "error query"),
            (Fault::Scan, "error scan"),
            (Fault::Close, "error close"),
        ];
        for (fault, expected) in cases {
            let handler = MockHandler::new()
                .with_records(vec![stored_user()])
                .fail(fault);
            let repo = SqlRepository::new(handler);
            let err = repo.find_user_by_id(1).unwrap_err();
            assert_eq!(err.to_string(), expected, "fault {:?}", fault);
        }
    }

    #[test]
    fn test_find_user_by_id_not_found_closes_cursor() {
        let repo = SqlRepository::new(MockHandler::new().fail(Fault::Next));
        let err = repo.find_user_by_id(999).unwrap_err();
        assert!(matches!(err, RepoError::NotFound(999)));
        assert_eq!(repo.handler().calls_of(Call::Close), 1);
    }

    #[test]
    fn test_find_user_by_id_closes_cursor_after_scan_error() {
        let handler = MockHandler::new()
            .with_records(vec![stored_user()])
            .fail(Fault::Scan)
            .fail(Fault::Close);
        let repo = SqlRepository::new(handler);
        let err = repo.find_user_by_id(1).unwrap_err();
        assert_eq!(err.to_string(), "error scan");
        assert_eq!(repo.handler().calls_of(Call::Close), 1);
    }

    #[test]
    fn test_find_user_by_id_rejects_malformed_record() {
        let handler = MockHandler::new().with_records(vec![Record::from(vec!["x".into()])]);
        let repo = SqlRepository::new(handler);
        assert!(matches!(
            repo.find_user_by_id(1),
            Err(RepoError::Column { index: 0, .. })
        ));
    }

    #[test]
    fn test_find_users_collects_every_row() {
        let records = vec![
            Record::from(vec![1i64.into(), "a@example.com".into()]),
            Record::from(vec![2i64.into(), "b@example.com".into()]),
        ];
        let repo = SqlRepository::new(MockHandler::new().with_records(records));
        let users = repo.find_users().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email, "a@example.com");
        assert_eq!(users[1].id, 2);
    }

    #[test]
    fn test_find_users_empty() {
        let repo = SqlRepository::new(MockHandler::new());
        assert!(repo.find_users().unwrap().is_empty());
    }

    #[test]
    fn test_find_users_errors() {
        let cases = vec![
            (Fault::Query, "error query", 0),
            (Fault::Scan, "error scan", 1),
            (Fault::Close, "error close", 1),
        ];
        for (fault, expected, closes) in cases {
            let handler = MockHandler::new()
                .with_records(vec![stored_user(), stored_user()])
                .fail(fault);
            let repo = SqlRepository::new(handler);
            let err = repo.find_users().unwrap_err();
            assert_eq!(err.to_string(), expected, "fault {:?}", fault);
            assert_eq!(repo.handler().calls_of(Call::Close), closes, "fault {:?}", fault);
        }
    }

    #[test]
    fn test_insert_user() {
        let repo = SqlRepository::new(MockHandler::new());
        assert_eq!(repo.insert_user(&User::new("a@example.com")).unwrap(), 1);
        assert_eq!(
            repo.handler().executed(),
            vec![(INSERT_USER_SQL.to_string(), vec!["a@example.com".into()])]
        );
    }

    #[test]
    fn test_insert_user_errors() {
        for (fault, expected) in [
            (Fault::Execute, "error execute"),
            (Fault::LastInsertId, "error last insert id"),
        ] {
            let repo = SqlRepository::new(MockHandler::new().fail(fault));
            let err = repo.insert_user(&User::default()).unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_insert_user_rejects_negative_id() {
        let repo = SqlRepository::new(MockHandler::new().with_last_insert_id(-1));
        assert!(matches!(
            repo.insert_user(&User::default()),
            Err(RepoError::InvalidId(-1))
        ));
    }

    #[test]
    fn test_insert_user_with_tx_commits() {
        let repo = SqlRepository::new(MockHandler::new());
        assert_eq!(repo.insert_user_with_tx(&User::default()).unwrap(), 1);
        assert_eq!(repo.handler().calls_of(Call::Commit), 1);
        assert_eq!(repo.handler().calls_of(Call::Rollback), 0);
    }

    #[test]
    fn test_insert_user_with_tx_errors_roll_back() {
        for (fault, expected) in [
            (Fault::Execute, "error execute"),
            (Fault::LastInsertId, "error last insert id"),
            (Fault::RowsAffected, "error row affected"),
        ] {
            let repo = SqlRepository::new(MockHandler::new().fail(fault));
            let err = repo.insert_user_with_tx(&User::default()).unwrap_err();
            assert_eq!(err.to_string(), expected);
            assert!(err.is_driver());
            assert_eq!(repo.handler().calls_of(Call::Commit), 0, "fault {:?}", fault);
            assert_eq!(repo.handler().calls_of(Call::Rollback), 1, "fault {:?}", fault);
        }
    }

    #[test]
    fn test_insert_user_with_tx_negative_id_rolls_back() {
        let repo = SqlRepository::new(MockHandler::new().with_last_insert_id(-1));
        assert!(matches!(
            repo.insert_user_with_tx(&User::default()),
            Err(RepoError::InvalidId(-1))
        ));
        assert_eq!(repo.handler().calls_of(Call::Commit), 0);
        assert_eq!(repo.handler().calls_of(Call::Rollback), 1);
    }

    #[test]
    fn test_insert_user_with_tx_begin_and_commit_errors() {
        let repo = SqlRepository::new(MockHandler::new().fail(Fault::Begin));
        assert_eq!(
            repo.insert_user_with_tx(&User::default()).unwrap_err().to_string(),
            "error begin"
        );
        assert_eq!(repo.handler().calls_of(Call::Execute), 0);

        let repo = SqlRepository::new(MockHandler::new().fail(Fault::Commit));
        assert_eq!(
            repo.insert_user_with_tx(&User::default()).unwrap_err().to_string(),
            "error commit"
        );
        assert_eq!(repo.handler().calls_of(Call::Rollback), 0);
    }

    #[test]
    fn test_insert_user_with_tx_unexpected_row_count() {
        for affected in [0, 2] {
            let repo = SqlRepository::new(MockHandler::new().with_rows_affected(affected));
            let err = repo.insert_user_with_tx(&User::default()).unwrap_err();
            assert!(matches!(err, RepoError::UnexpectedRowsAffected(n) if n == affected));
            assert_eq!(repo.handler().calls_of(Call::Commit), 0);
            assert_eq!(repo.handler().calls_of(Call::Rollback), 1);
        }
    }

    #[test]
    fn test_rollback_failure_keeps_original_error() {
        let handler = MockHandler::new().fail(Fault::Execute).fail(Fault::Rollback);
        let repo = SqlRepository::new(handler);
        let err = repo.insert_user_with_tx(&User::default()).unwrap_err();
        assert_eq!(err.to_string(), "error execute");
        assert_eq!(repo.handler().calls_of(Call::Rollback), 1);
    }

    #[test]
    fn test_count_users() {
        let handler = MockHandler::new().with_records(vec![Record::from(vec![3i64.into()])]);
        assert_eq!(SqlRepository::new(handler).count_users().unwrap(), 3);

        let repo = SqlRepository::new(MockHandler::new().fail(Fault::QueryRow));
        assert_eq!(repo.count_users().unwrap_err().to_string(), "error query row");
    }
}
