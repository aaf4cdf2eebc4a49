//! CLI subcommands.
//!
//! Each command loads a universe file into a fresh [`Framework`](crate::framework::Framework)
//! and reports on it.

mod affected;
mod packages;
mod resolve;
pub mod universe;

pub use affected::affected;
pub use packages::packages;
pub use resolve::resolve;
pub use universe::Universe;
