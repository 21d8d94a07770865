//! Lifecycle of a pooled account: onboarding, readiness, leasing and
//! reclamation.
//!
//! Every step is a guarded store transition followed by a notification.
//! Notifications run only after the write succeeded and their failures are
//! logged without undoing anything.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::dto::{Command, CommandType};
use crate::events::{EventError, Eventer};
use crate::stores::{
    now, Account, AccountStatus, Lease, LeaseStatus, LeaseStatusReason, LeaseStore,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("account {account_id} is not in the pool")]
    AccountNotFound { account_id: String },

    #[error("account {account_id} is already onboarded")]
    AccountAlreadyOnboarded { account_id: String },

    #[error("{command} command for account {account_id} is missing {field}")]
    MissingField {
        command: CommandType,
        account_id: String,
        field: &'static str,
    },

    #[error(transparent)]
    Store(#[from] crate::Error),
}

#[derive(Debug)]
enum Operation {
    Onboard {
        account: String,
    },
    Ready {
        account: String,
    },
    Lease {
        account: String,
        principal: String,
        lease: String,
        expires_on: Option<i64>,
    },
    End {
        account: String,
        principal: String,
        reason: Option<LeaseStatusReason>,
    },
}

pub struct Engine<S, E> {
    store: S,
    eventer: E,
    config: StoreConfig,
}

impl<S: LeaseStore, E: Eventer> Engine<S, E> {
    pub fn new(store: S, eventer: E, config: StoreConfig) -> Self {
        Self {
            store,
            eventer,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn parse_command(command: Command) -> Result<Operation, EngineError> {
        let Command {
            cmd_type,
            account,
            principal,
            lease,
            expires_on,
            reason,
        } = command;
        let required = |value: Option<String>, field| {
            value.ok_or_else(|| EngineError::MissingField {
                command: cmd_type,
                account_id: account.clone(),
                field,
            })
        };

        match cmd_type {
            CommandType::Onboard => Ok(Operation::Onboard { account }),
            CommandType::Ready => Ok(Operation::Ready { account }),
            CommandType::Lease => {
                let principal = required(principal, "principal")?;
                let lease = required(lease, "lease")?;
                Ok(Operation::Lease {
                    account,
                    principal,
                    lease,
                    expires_on,
                })
            }
            CommandType::End => {
                let principal = required(principal, "principal")?;
                Ok(Operation::End {
                    account,
                    principal,
                    reason: reason.as_deref().map(LeaseStatusReason::from),
                })
            }
        }
    }

    /// Applies one lifecycle command.
    pub async fn process(&self, command: Command) -> Result<(), EngineError> {
        match Self::parse_command(command)? {
            Operation::Onboard { account } => self.onboard(&account).await.map(drop),
            Operation::Ready { account } => self.ready(&account).await.map(drop),
            Operation::Lease {
                account,
                principal,
                lease,
                expires_on,
            } => self
                .lease(&account, &principal, &lease, expires_on)
                .await
                .map(drop),
            Operation::End {
                account,
                principal,
                reason,
            } => self.end(&account, &principal, reason).await.map(drop),
        }
    }

    /// Adds an account to the pool as `NotReady`.
    pub async fn onboard(&self, account_id: &str) -> Result<Account, EngineError> {
        if self.store.get_account(account_id).await?.is_some() {
            return Err(EngineError::AccountAlreadyOnboarded {
                account_id: account_id.to_string(),
            });
        }

        let now = now();
        let mut account = Account::new(account_id, AccountStatus::NotReady);
        account.created_on = now;
        account.last_modified_on = now;
        let account = self.store.put_account(account).await?;

        info!(account_id, "account onboarded");
        self.notify("AccountCreate", self.eventer.account_create(&account));
        Ok(account)
    }

    /// Marks a reset account as available for leasing.
    pub async fn ready(&self, account_id: &str) -> Result<Account, EngineError> {
        let account = match self
            .store
            .transition_account_status(account_id, AccountStatus::NotReady, AccountStatus::Ready)
            .await
        {
            Ok(account) => account,
            Err(e) => return Err(self.explain(account_id, e).await),
        };

        info!(account_id, "account ready");
        self.notify("AccountUpdate", self.eventer.account_update(&account));
        Ok(account)
    }

    /// Leases a `Ready` account to the principal. Without an explicit expiry
    /// the lease runs for the configured default length.
    ///
    /// If the lease cannot be written the account is returned to `Ready`.
    pub async fn lease(
        &self,
        account_id: &str,
        principal_id: &str,
        lease_id: &str,
        expires_on: Option<i64>,
    ) -> Result<Lease, EngineError> {
        let account = match self
            .store
            .transition_account_status(account_id, AccountStatus::Ready, AccountStatus::Leased)
            .await
        {
            Ok(account) => account,
            Err(e) => return Err(self.explain(account_id, e).await),
        };

        let now = now();
        let expires_on = expires_on.unwrap_or_else(|| self.config.default_expires_on(now));
        let mut lease = Lease::new(account_id, principal_id, lease_id, expires_on);
        lease.created_on = now;
        lease.last_modified_on = now;
        lease.lease_status_modified_on = now;

        let lease = match self.store.upsert_lease(lease).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(account_id, principal_id, error = %e, "lease not written, returning account to Ready");
                if let Err(rollback) = self
                    .store
                    .transition_account_status(
                        account_id,
                        AccountStatus::Leased,
                        AccountStatus::Ready,
                    )
                    .await
                {
                    warn!(account_id, error = %rollback, "failed to return account to Ready");
                }
                return Err(e.into());
            }
        };

        info!(account_id, principal_id, lease_id, expires_on, "account leased");
        self.notify("AccountUpdate", self.eventer.account_update(&account));
        Ok(lease)
    }

    /// Ends the principal's active lease and sends the account back for
    /// reset. The lease is marked `Expired` unless another reason is given.
    ///
    /// If the account cannot be moved to `NotReady` the lease is made
    /// `Active` again, so the same command can be replayed.
    pub async fn end(
        &self,
        account_id: &str,
        principal_id: &str,
        reason: Option<LeaseStatusReason>,
    ) -> Result<Account, EngineError> {
        let reason = reason.unwrap_or(LeaseStatusReason::Expired);
        let lease = self
            .store
            .transition_lease_status(
                account_id,
                principal_id,
                LeaseStatus::Active,
                LeaseStatus::Inactive,
                reason,
            )
            .await?;

        let account = match self
            .store
            .transition_account_status(account_id, AccountStatus::Leased, AccountStatus::NotReady)
            .await
        {
            Ok(account) => account,
            Err(e) => {
                warn!(account_id, principal_id, error = %e, "account not reset, reactivating lease");
                if let Err(rollback) = self
                    .store
                    .transition_lease_status(
                        account_id,
                        principal_id,
                        LeaseStatus::Inactive,
                        LeaseStatus::Active,
                        LeaseStatusReason::Active,
                    )
                    .await
                {
                    warn!(account_id, principal_id, error = %rollback, "failed to reactivate lease");
                }
                return Err(self.explain(account_id, e).await);
            }
        };

        info!(
            account_id,
            principal_id,
            reason = %lease.lease_status_reason,
            "lease ended"
        );
        self.notify("AccountReset", self.eventer.account_reset(&account));
        Ok(account)
    }

    /// A guard failure on an account nobody onboarded is reported as such.
    async fn explain(&self, account_id: &str, err: crate::Error) -> EngineError {
        if err.is_transition_conflict() {
            match self.store.get_account(account_id).await {
                Ok(None) => {
                    return EngineError::AccountNotFound {
                        account_id: account_id.to_string(),
                    }
                }
                Ok(Some(_)) => {}
                Err(lookup) => debug!(account_id, error = %lookup, "account lookup failed"),
            }
        }
        EngineError::Store(err)
    }

    fn notify(&self, event: &str, result: Result<(), EventError>) {
        if let Err(e) = result {
            warn!(event, error = %e, "failed to publish account event");
        }
    }
}
