/// Database Module
///
/// ## Architecture
///
/// - **Handler abstraction** (`handler.rs`): the `Handler`, `Transaction`,
///   `ExecResult`, `Rows` and `Row` traits plus driver-neutral values
/// - **SQLite driver** (`sqlite.rs`): the production implementation over rusqlite
///
/// Test doubles implementing the same traits live in `crate::test_utils`.
pub mod handler;
pub mod sqlite;

pub use handler::*;
pub use sqlite::*;
