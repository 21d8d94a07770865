use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{decode, now, Store, LEASE_ID_INDEX, PRINCIPAL_ID_INDEX};
use crate::error::StatusTransitionError;
use crate::expression::{Attributes, Field, UpdateExpression};
use crate::table::{key, Condition, Query, TableError, UpdateItem};
use crate::{Error, Result};

pub(super) const ACCOUNT_ID: &str = "AccountId";
pub(super) const PRINCIPAL_ID: &str = "PrincipalId";
pub(super) const ID: &str = "Id";
const LEASE_STATUS: &str = "LeaseStatus";
const LEASE_STATUS_REASON: &str = "LeaseStatusReason";
const LAST_MODIFIED_ON: &str = "LastModifiedOn";
const LEASE_STATUS_MODIFIED_ON: &str = "LeaseStatusModifiedOn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseStatus {
    Active,
    Inactive,
    /// Locked while the leased account is being reset.
    ResetLock,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "Active",
            LeaseStatus::Inactive => "Inactive",
            LeaseStatus::ResetLock => "ResetLock",
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a lease holds its current status. Unknown reasons read from the table
/// are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseStatusReason {
    #[default]
    Active,
    Expired,
    OverBudget,
    OverPrincipalBudget,
    Destroyed,
    Rollback,
    /// A reason outside the known set. Never holds the name of a known
    /// reason; build values with `From<&str>` to keep it that way.
    #[serde(untagged)]
    Other(String),
}

impl LeaseStatusReason {
    pub fn as_str(&self) -> &str {
        match self {
            LeaseStatusReason::Active => "Active",
            LeaseStatusReason::Expired => "Expired",
            LeaseStatusReason::OverBudget => "OverBudget",
            LeaseStatusReason::OverPrincipalBudget => "OverPrincipalBudget",
            LeaseStatusReason::Destroyed => "Destroyed",
            LeaseStatusReason::Rollback => "Rollback",
            LeaseStatusReason::Other(reason) => reason,
        }
    }
}

impl fmt::Display for LeaseStatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LeaseStatusReason {
    fn from(reason: &str) -> Self {
        match reason {
            "Active" => LeaseStatusReason::Active,
            "Expired" => LeaseStatusReason::Expired,
            "OverBudget" => LeaseStatusReason::OverBudget,
            "OverPrincipalBudget" => LeaseStatusReason::OverPrincipalBudget,
            "Destroyed" => LeaseStatusReason::Destroyed,
            "Rollback" => LeaseStatusReason::Rollback,
            other => LeaseStatusReason::Other(other.to_string()),
        }
    }
}

/// A time-bounded grant of an account to a principal, keyed by
/// `(account_id, principal_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Lease {
    pub account_id: String,
    pub principal_id: String,
    /// Globally unique handle onto the same record.
    #[serde(default)]
    pub id: String,
    pub lease_status: LeaseStatus,
    #[serde(default)]
    pub lease_status_reason: LeaseStatusReason,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub last_modified_on: i64,
    #[serde(default)]
    pub lease_status_modified_on: i64,
    /// Unix seconds; must be set before the lease is written.
    #[serde(default)]
    pub expires_on: i64,
    #[serde(default)]
    pub budget_amount: Option<Decimal>,
    #[serde(default)]
    pub budget_currency: String,
    #[serde(default)]
    pub budget_notification_emails: Vec<String>,
}

impl Attributes for Lease {
    const FIELDS: &'static [Field] = &[
        Field::new("account_id", ACCOUNT_ID),
        Field::new("principal_id", PRINCIPAL_ID),
        Field::new("id", ID),
        Field::new("lease_status", LEASE_STATUS),
        Field::new("lease_status_reason", LEASE_STATUS_REASON),
        Field::new("created_on", "CreatedOn"),
        Field::new("last_modified_on", LAST_MODIFIED_ON),
        Field::new("lease_status_modified_on", LEASE_STATUS_MODIFIED_ON),
        Field::new("expires_on", "ExpiresOn"),
        Field::new("budget_amount", "BudgetAmount"),
        Field::new("budget_currency", "BudgetCurrency"),
        Field::new("budget_notification_emails", "BudgetNotificationEmails"),
    ];
}

impl Lease {
    /// An active lease with every audit timestamp unset.
    pub fn new(account_id: &str, principal_id: &str, id: &str, expires_on: i64) -> Self {
        Self {
            account_id: account_id.to_string(),
            principal_id: principal_id.to_string(),
            id: id.to_string(),
            lease_status: LeaseStatus::Active,
            lease_status_reason: LeaseStatusReason::Active,
            created_on: 0,
            last_modified_on: 0,
            lease_status_modified_on: 0,
            expires_on,
            budget_amount: None,
            budget_currency: String::new(),
            budget_notification_emails: Vec::new(),
        }
    }
}

impl Store {
    /// Resolves a lease id to its single record.
    pub async fn get_lease_by_id(&self, lease_id: &str) -> Result<Lease> {
        let table = &self.config.lease_table;
        debug!(table = %table, lease_id, "get lease by id");
        let mut items = self
            .client
            .query(table, Query::new(LEASE_ID_INDEX, ID, lease_id))
            .await
            .map_err(|e| Error::backend(format!("failed to query lease {lease_id}"), e))?;

        match items.len() {
            0 => Err(Error::LeaseNotFound {
                lease_id: lease_id.to_string(),
            }),
            1 => decode(items.remove(0), || format!("lease {lease_id}")),
            count => Err(Error::AmbiguousLease {
                lease_id: lease_id.to_string(),
                count,
            }),
        }
    }

    /// Every lease held by the principal, in account order. Empty when none.
    pub async fn find_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>> {
        let table = &self.config.lease_table;
        debug!(table = %table, principal_id, "find leases by principal");
        let items = self
            .client
            .query(table, Query::new(PRINCIPAL_ID_INDEX, PRINCIPAL_ID, principal_id))
            .await
            .map_err(|e| {
                Error::backend(format!("failed to query leases for principal {principal_id}"), e)
            })?;

        items
            .into_iter()
            .map(|item| decode(item, || format!("lease for principal {principal_id}")))
            .collect()
    }

    /// Creates or updates the lease stored under `(account_id, principal_id)`
    /// and returns the record as stored afterwards.
    ///
    /// Every field but the key is written; the lease must carry an id and an
    /// expiry.
    pub async fn upsert_lease(&self, lease: Lease) -> Result<Lease> {
        let validation = |reason| Error::Validation {
            principal_id: lease.principal_id.clone(),
            account_id: lease.account_id.clone(),
            reason,
        };
        if lease.id.is_empty() {
            return Err(validation("missing ID"));
        }
        if lease.expires_on == 0 {
            return Err(validation("missing ExpiresOn"));
        }

        let context = || {
            format!(
                "failed to update lease {}/{}",
                lease.principal_id, lease.account_id
            )
        };
        let expression = UpdateExpression::builder(&lease)
            .exclude(["account_id", "principal_id"])
            .build()?;

        let table = &self.config.lease_table;
        debug!(table = %table, lease_id = %lease.id, %expression, "upsert lease");
        let item = self
            .client
            .update_item(
                table,
                UpdateItem {
                    key: key([
                        (ACCOUNT_ID, lease.account_id.as_str()),
                        (PRINCIPAL_ID, lease.principal_id.as_str()),
                    ]),
                    expression,
                    condition: None,
                },
            )
            .await
            .map_err(|e| Error::backend(context(), e))?;

        decode(item, context)
    }

    /// Moves the lease from `prev` to `next`, recording `reason` and
    /// refreshing both modification timestamps, only if its stored status is
    /// still `prev`. Returns the updated record.
    pub async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        prev: LeaseStatus,
        next: LeaseStatus,
        reason: LeaseStatusReason,
    ) -> Result<Lease> {
        let table = &self.config.lease_table;
        let now = now();
        let update = UpdateItem {
            key: key([(ACCOUNT_ID, account_id), (PRINCIPAL_ID, principal_id)]),
            expression: UpdateExpression::new()
                .set(LEASE_STATUS, next.as_str())
                .set(LEASE_STATUS_REASON, reason.as_str())
                .set(LAST_MODIFIED_ON, now)
                .set(LEASE_STATUS_MODIFIED_ON, now),
            condition: Some(Condition::equals(LEASE_STATUS, prev.as_str())),
        };
        debug!(
            table = %table,
            account_id,
            principal_id,
            expression = %update.expression,
            "transition lease {prev} -> {next} ({reason})"
        );

        match self.client.update_item(table, update).await {
            Ok(item) => decode(item, || format!("lease {account_id}/{principal_id}")),
            Err(TableError::ConditionalCheckFailed) => {
                debug!(account_id, principal_id, "lease is no longer {prev}");
                Err(StatusTransitionError::Lease {
                    account_id: account_id.to_string(),
                    principal_id: principal_id.to_string(),
                    from: prev,
                    to: next,
                }
                .into())
            }
            Err(e) => Err(Error::backend(
                format!(
                    "failed to update lease {account_id}/{principal_id} from {prev} to {next}"
                ),
                e,
            )),
        }
    }
}
