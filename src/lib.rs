//! Lifecycle store for a pool of leasable sandbox accounts.
//!
//! Accounts and leases live in two key-value tables behind [`TableClient`].
//! [`Store`] enforces every status change with a conditional write, so
//! concurrent callers racing on the same record see exactly one winner and a
//! [`StatusTransitionError`] for everyone else. [`Engine`] composes those
//! writes into the onboard, ready, lease and end lifecycle.

pub mod config;
pub mod csv_utils;
pub mod dto;
pub mod engine;
mod error;
pub mod events;
pub mod expression;
mod runner;
pub mod stores;
pub mod table;

pub use config::StoreConfig;
pub use dto::{AccountRow, Command, CommandType};
pub use engine::{Engine, EngineError};
pub use error::{Error, Result, StatusTransitionError};
pub use events::{Eventer, LoggingEventer};
pub use runner::run;
pub use stores::{
    Account, AccountStatus, Lease, LeaseStatus, LeaseStatusReason, LeaseStore, Store,
};
pub use table::{MemoryTables, TableClient, TableError};
