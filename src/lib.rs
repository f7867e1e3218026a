// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod config;
pub mod repository;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::core::{RepoError, Result};
pub use crate::repository::{SqlRepository, User, UserRepository};
