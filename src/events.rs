//! Notifications published after an account transition has been persisted.
//!
//! An [`Eventer`] is invoked by the caller once a write succeeded. A failing
//! notification is reported back but never undoes the write.

use std::error::Error;

use tracing::info;

use crate::stores::Account;

pub type EventError = Box<dyn Error + Send + Sync>;

pub trait Eventer: Send + Sync {
    fn account_create(&self, account: &Account) -> Result<(), EventError>;

    fn account_update(&self, account: &Account) -> Result<(), EventError>;

    fn account_delete(&self, account: &Account) -> Result<(), EventError>;

    fn account_reset(&self, account: &Account) -> Result<(), EventError>;
}

/// Publishes every event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventer;

impl LoggingEventer {
    fn publish(&self, event: &str, account: &Account) -> Result<(), EventError> {
        info!(event, account_id = %account.id, status = %account.status, "account event");
        Ok(())
    }
}

impl Eventer for LoggingEventer {
    fn account_create(&self, account: &Account) -> Result<(), EventError> {
        self.publish("AccountCreate", account)
    }

    fn account_update(&self, account: &Account) -> Result<(), EventError> {
        self.publish("AccountUpdate", account)
    }

    fn account_delete(&self, account: &Account) -> Result<(), EventError> {
        self.publish("AccountDelete", account)
    }

    fn account_reset(&self, account: &Account) -> Result<(), EventError> {
        self.publish("AccountReset", account)
    }
}
