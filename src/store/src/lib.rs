//! Row/column access layer of Bigbucket.
//!
//! Tables, rows and columns are encoded as blob paths by [`keyspace`];
//! deletions of whole tables and columns are recorded in [`tombstone`] lists
//! and carried out later by the cleaner. Operations touching several objects
//! fan out through a per-invocation [`pool::JobPool`].

pub mod access;
pub mod error;
pub mod keyspace;
pub mod pool;
pub mod tombstone;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{Row, RowQuery, RowSelector, Rows, Store};
pub use error::{Result, StoreError};
