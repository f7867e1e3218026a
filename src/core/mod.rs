/// Core Module for userstore
///
/// Shared infrastructure: the error type and the database abstractions
/// the repository is written against.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DriverError, RepoError, Result};
