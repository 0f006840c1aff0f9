//! Garbage collector of Bigbucket.
//!
//! Deleting a table or column only marks it in a tombstone list. The
//! [`Cleaner`] later erases the underlying objects and clears the marks once a
//! pass finds nothing left to delete. Sweeps are triggered once, on an
//! interval, or by `POST /` on a small HTTP listener (see [`service`]).

pub mod error;
pub mod service;
pub mod sweep;

pub use error::{CleanerError, Result};
pub use service::Trigger;
pub use sweep::{Cleaner, SweepReport};
