//! Errors surfaced by the lifecycle store.
//!
//! Every failure the store can produce maps to one variant:
//! - exactly-one lookups that match nothing or too much
//!   ([`Error::LeaseNotFound`], [`Error::AmbiguousLease`])
//! - records rejected before any write ([`Error::Validation`])
//! - a conditional write whose guard did not hold ([`Error::StatusTransition`])
//! - the backing table itself failing ([`Error::Backend`])
//!
//! Backing-store error codes are translated into these variants once, in the
//! store's write path. Nothing here is retried; callers pick their own policy.

use thiserror::Error;

use crate::stores::{AccountStatus, LeaseStatus};
use crate::table::TableError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No lease matched an id that must resolve to exactly one record.
    #[error("no lease found with id: {lease_id}")]
    LeaseNotFound { lease_id: String },

    /// The lease id index returned more than one record.
    #[error("found more than one lease with id: {lease_id} ({count} records)")]
    AmbiguousLease { lease_id: String, count: usize },

    /// The lease failed required-field checks; nothing was written.
    #[error("failed to create lease for {principal_id}/{account_id}: {reason}")]
    Validation {
        principal_id: String,
        account_id: String,
        reason: &'static str,
    },

    /// The stored status did not match the expected source status.
    #[error(transparent)]
    StatusTransition(#[from] StatusTransitionError),

    /// The table client failed. `context` names the record being touched.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: TableError,
    },

    /// A record could not be mapped to or from its stored attributes.
    #[error("failed to map {context}: {source}")]
    Mapping {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// An update expression was requested with an invalid field selection.
    #[error("unable to build update expression: {reason}")]
    Expression { reason: String },

    /// Environment configuration could not be extracted.
    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl Error {
    /// True when a conditional write lost against the stored status. These
    /// are benign races that a caller may choose to retry.
    pub fn is_transition_conflict(&self) -> bool {
        matches!(self, Error::StatusTransition(_))
    }

    pub(crate) fn backend(context: impl Into<String>, source: TableError) -> Self {
        Error::Backend {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn mapping(context: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Mapping {
            context: context.into(),
            source,
        }
    }
}

/// The guard of a status transition failed: no record with the given key
/// currently holds the expected source status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error(
        "unable to update account status from \"{from}\" to \"{to}\" for account {account_id}: \
         no account exists with Status=\"{from}\""
    )]
    Account {
        account_id: String,
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error(
        "unable to update lease status from \"{from}\" to \"{to}\" for {account_id}/{principal_id}: \
         no lease exists with Status=\"{from}\""
    )]
    Lease {
        account_id: String,
        principal_id: String,
        from: LeaseStatus,
        to: LeaseStatus,
    },
}
