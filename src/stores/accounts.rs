use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{decode, encode, now, Store, ACCOUNT_STATUS_INDEX};
use crate::error::StatusTransitionError;
use crate::expression::UpdateExpression;
use crate::table::{key, Condition, Query, TableError, UpdateItem};
use crate::{Error, Result};

pub(super) const ID: &str = "Id";
pub(super) const ACCOUNT_STATUS: &str = "AccountStatus";
const LAST_MODIFIED_ON: &str = "LastModifiedOn";

/// Pool state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    NotReady,
    Ready,
    Leased,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 3] = [
        AccountStatus::NotReady,
        AccountStatus::Ready,
        AccountStatus::Leased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::NotReady => "NotReady",
            AccountStatus::Ready => "Ready",
            AccountStatus::Leased => "Leased",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pooled cloud account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "AccountStatus")]
    pub status: AccountStatus,
    #[serde(default)]
    pub admin_role_arn: String,
    #[serde(default)]
    pub principal_role_arn: String,
    /// Hash of the principal policy version last deployed to the account.
    #[serde(default)]
    pub principal_policy_hash: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub last_modified_on: i64,
}

/// Stored items may carry `"Metadata": null` for an account without metadata.
fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BTreeMap<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Account {
    pub fn new(id: &str, status: AccountStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            admin_role_arn: String::new(),
            principal_role_arn: String::new(),
            principal_policy_hash: String::new(),
            metadata: BTreeMap::new(),
            created_on: 0,
            last_modified_on: 0,
        }
    }
}

impl Store {
    /// Point lookup by account id. A missing account is `Ok(None)`.
    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let table = &self.config.account_table;
        debug!(table = %table, account_id, "get account");
        let item = self
            .client
            .get_item(table, key([(ID, account_id)]), self.config.consistent_read)
            .await
            .map_err(|e| Error::backend(format!("failed to get account {account_id}"), e))?;

        item.map(|item| decode(item, || format!("account {account_id}")))
            .transpose()
    }

    /// All accounts currently in `status`. Empty when none match.
    pub async fn find_accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        let table = &self.config.account_table;
        debug!(table = %table, %status, "find accounts by status");
        let items = self
            .client
            .query(
                table,
                Query::new(ACCOUNT_STATUS_INDEX, ACCOUNT_STATUS, status.as_str()),
            )
            .await
            .map_err(|e| {
                Error::backend(format!("failed to query accounts with status {status}"), e)
            })?;

        items
            .into_iter()
            .map(|item| decode(item, || format!("account with status {status}")))
            .collect()
    }

    /// Writes the whole account, replacing any stored record with the same id.
    pub async fn put_account(&self, account: Account) -> Result<Account> {
        let table = &self.config.account_table;
        debug!(table = %table, account_id = %account.id, "put account");
        let item = encode(&account, || format!("account {}", account.id))?;
        self.client
            .put_item(table, item)
            .await
            .map_err(|e| Error::backend(format!("failed to put account {}", account.id), e))?;
        Ok(account)
    }

    /// Moves the account from `prev` to `next` and refreshes `LastModifiedOn`,
    /// only if its stored status is still `prev`. Returns the updated record.
    pub async fn transition_account_status(
        &self,
        account_id: &str,
        prev: AccountStatus,
        next: AccountStatus,
    ) -> Result<Account> {
        let table = &self.config.account_table;
        let update = UpdateItem {
            key: key([(ID, account_id)]),
            expression: UpdateExpression::new()
                .set(ACCOUNT_STATUS, next.as_str())
                .set(LAST_MODIFIED_ON, now()),
            condition: Some(Condition::equals(ACCOUNT_STATUS, prev.as_str())),
        };
        debug!(table = %table, account_id, expression = %update.expression, "transition account {prev} -> {next}");

        match self.client.update_item(table, update).await {
            Ok(item) => decode(item, || format!("account {account_id}")),
            Err(TableError::ConditionalCheckFailed) => {
                debug!(account_id, "account is no longer {prev}");
                Err(StatusTransitionError::Account {
                    account_id: account_id.to_string(),
                    from: prev,
                    to: next,
                }
                .into())
            }
            Err(e) => Err(Error::backend(
                format!("failed to update account {account_id} from {prev} to {next}"),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::stores::testing::{config, failing_store, memory_store, recording_store};
    use crate::table::TableClient;
    use serde_json::json;

    async fn seed(store: &Store, id: &str, status: AccountStatus) -> Account {
        let mut account = Account::new(id, status);
        account.created_on = 1_573_592_058;
        account.last_modified_on = 1_573_592_058;
        store.put_account(account).await.unwrap()
    }

    #[tokio::test]
    async fn test_point_reads_follow_consistent_read_setting() {
        for consistent_read in [true, false] {
            let mut settings = config();
            settings.consistent_read = consistent_read;
            let (store, reads) = recording_store(settings);

            store.get_account("111").await.unwrap();
            seed(&store, "111", AccountStatus::Ready).await;
            store.get_account("111").await.unwrap();

            assert_eq!(*reads.flags.lock().unwrap(), vec![consistent_read; 2]);
        }
    }

    #[tokio::test]
    async fn test_null_metadata_reads_as_empty() {
        let (store, tables) = memory_store();
        let mut item = key([("Id", "111")]);
        item.insert("AccountStatus".to_string(), json!("Ready"));
        item.insert("Metadata".to_string(), Value::Null);
        tables.put_item("Accounts", item).await.unwrap();

        let account = store.get_account("111").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Ready);
        assert!(account.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_account_is_none() {
        let (store, _) = memory_store();
        assert_eq!(store.get_account("abc123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_then_get_account() {
        let (store, _) = memory_store();
        let mut account = Account::new("abc123", AccountStatus::Ready);
        account.admin_role_arn = "arn:aws:iam::abc123:role/admin".to_string();
        account.metadata.insert("key".to_string(), json!("value"));
        account.metadata.insert("nested".to_string(), json!({ "a": [1, 2] }));

        let written = store.put_account(account.clone()).await.unwrap();
        assert_eq!(written, account);
        assert_eq!(store.get_account("abc123").await.unwrap(), Some(account));
    }

    #[tokio::test]
    async fn test_account_attribute_names() {
        let (store, tables) = memory_store();
        seed(&store, "abc123", AccountStatus::Ready).await;

        let item = tables
            .get_item("Accounts", key([("Id", "abc123")]), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.get("Id"), Some(&json!("abc123")));
        assert_eq!(item.get("AccountStatus"), Some(&json!("Ready")));
        assert_eq!(item.get("LastModifiedOn"), Some(&json!(1_573_592_058)));
        assert!(item.contains_key("AdminRoleArn"));
        assert!(item.contains_key("PrincipalPolicyHash"));
        assert!(item.contains_key("Metadata"));
    }

    #[tokio::test]
    async fn test_find_accounts_by_status() {
        let (store, _) = memory_store();
        seed(&store, "1", AccountStatus::Ready).await;
        seed(&store, "2", AccountStatus::Leased).await;
        seed(&store, "3", AccountStatus::Ready).await;

        let ready = store
            .find_accounts_by_status(AccountStatus::Ready)
            .await
            .unwrap();
        let ids: Vec<_> = ready.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let not_ready = store
            .find_accounts_by_status(AccountStatus::NotReady)
            .await
            .unwrap();
        assert!(not_ready.is_empty());
    }

    #[tokio::test]
    async fn test_transition_account_status() {
        let (store, _) = memory_store();
        seed(&store, "111", AccountStatus::Ready).await;

        let updated = store
            .transition_account_status("111", AccountStatus::Ready, AccountStatus::Leased)
            .await
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Leased);
        assert!(updated.last_modified_on > 1_573_592_058);
        assert_eq!(updated.created_on, 1_573_592_058);

        let again = store
            .transition_account_status("111", AccountStatus::Ready, AccountStatus::Leased)
            .await;
        assert!(matches!(
            again,
            Err(Error::StatusTransition(StatusTransitionError::Account { ref account_id, .. }))
                if account_id == "111"
        ));

        let stored = store.get_account("111").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Leased);
    }

    #[tokio::test]
    async fn test_transition_from_wrong_status_always_conflicts() {
        let (store, _) = memory_store();
        seed(&store, "111", AccountStatus::NotReady).await;

        for next in AccountStatus::ALL {
            let result = store
                .transition_account_status("111", AccountStatus::Ready, next)
                .await;
            assert!(result.unwrap_err().is_transition_conflict());
        }

        let stored = store.get_account("111").await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::NotReady);
        assert_eq!(stored.last_modified_on, 1_573_592_058);
    }

    #[tokio::test]
    async fn test_transition_missing_account_conflicts() {
        let (store, tables) = memory_store();
        let result = store
            .transition_account_status("404", AccountStatus::Ready, AccountStatus::Leased)
            .await;
        assert!(result.unwrap_err().is_transition_conflict());
        assert_eq!(tables.item_count("Accounts").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_have_one_winner() {
        let (store, _) = memory_store();
        seed(&store, "111", AccountStatus::Ready).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .transition_account_status("111", AccountStatus::Ready, AccountStatus::Leased)
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(account) => {
                    assert_eq!(account.status, AccountStatus::Leased);
                    winners += 1;
                }
                Err(e) => {
                    assert!(e.is_transition_conflict(), "unexpected error: {e}");
                    conflicts += 1;
                }
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_on_distinct_accounts() {
        let (store, _) = memory_store();
        let ids: Vec<String> = (0..8).map(|i| format!("acct-{i}")).collect();
        for id in &ids {
            seed(&store, id, AccountStatus::NotReady).await;
        }

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .transition_account_status(&id, AccountStatus::NotReady, AccountStatus::Ready)
                        .await
                })
            })
            .collect();
        let mut updated = HashSet::new();
        for handle in handles {
            updated.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(updated.len(), ids.len());

        let ready = store
            .find_accounts_by_status(AccountStatus::Ready)
            .await
            .unwrap();
        assert_eq!(ready.len(), ids.len());
    }

    #[tokio::test]
    async fn test_backend_errors_are_wrapped_with_identity() {
        let store = failing_store(TableError::Throttled);

        let err = store.get_account("111").await.unwrap_err();
        assert!(matches!(err, Error::Backend { source: TableError::Throttled, .. }));
        assert_eq!(err.to_string(), "failed to get account 111: request was throttled");

        let err = store
            .find_accounts_by_status(AccountStatus::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));

        let err = store
            .transition_account_status("111", AccountStatus::Ready, AccountStatus::Leased)
            .await
            .unwrap_err();
        assert!(!err.is_transition_conflict());
        assert!(err.to_string().contains("account 111"));

        let err = store
            .put_account(Account::new("111", AccountStatus::Ready))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_account_is_mapping_error() {
        let (store, tables) = memory_store();
        let mut item = key([("Id", "111")]);
        item.insert("AccountStatus".to_string(), json!("Exploded"));
        tables.put_item("Accounts", item).await.unwrap();

        let err = store.get_account("111").await.unwrap_err();
        assert!(matches!(err, Error::Mapping { .. }));
    }
}
