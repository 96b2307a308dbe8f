//! Leased blob copies.
//!
//! The core is [`monitor::LeasedCopyMonitor`]: it copies an object while
//! holding a lease on the source, renews the lease while the server-side
//! copy is pending and removes the source once the copy has succeeded.
//! [`fanout`] and [`job`] build the chunk-and-move workflow on top of it.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fanout;
pub mod job;
pub mod leases;
pub mod monitor;
pub mod prelude;
pub mod store;
pub mod util;

mod cli;
pub use cli::{Cli, Commands};

pub use error::{Error, Result};
