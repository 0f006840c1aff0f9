//! Test doubles for the blob store.
//!
//! Only available with the `testing` feature or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! store = { path = "../store", features = ["testing"] }
//! ```
//!
//! ```rust,ignore
//! use store::testing::{FaultyBucket, Operation};
//!
//! let bucket = FaultyBucket::new(inner)
//!     .fail(Operation::Write, "/col2")
//!     .rate_limited();
//! ```

mod faulty_bucket;

pub use faulty_bucket::{FaultyBucket, Operation};
