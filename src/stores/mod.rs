//! Persistence of pooled accounts and their leases. Provides:
//! - Account lookups, status queries and guarded status transitions
//!   ([`accounts`])
//! - Lease lookups, upserts and guarded status transitions ([`leases`])
//!
//! Every operation is exactly one round trip to the backing table. The
//! [`Store`] keeps no state besides its table client and configuration, so
//! clones can be shared freely between tasks; concurrent transitions are
//! arbitrated by the table's conditional writes alone.

mod accounts;
mod leases;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::table::{Item, TableClient, TableSchema};
use crate::{Error, Result};

pub use accounts::{Account, AccountStatus};
pub use leases::{Lease, LeaseStatus, LeaseStatusReason};

/// Secondary index of the account table keyed on `AccountStatus`.
pub const ACCOUNT_STATUS_INDEX: &str = "AccountStatus";
/// Secondary index of the lease table keyed on the lease `Id`.
pub const LEASE_ID_INDEX: &str = "LeaseId";
/// Secondary index of the lease table keyed on `PrincipalId`.
pub const PRINCIPAL_ID_INDEX: &str = "PrincipalId";

/// The account and lease operations of the pool.
///
/// Implementations never retry. A guard failure comes back as
/// [`Error::StatusTransition`] and the caller decides whether to retry,
/// escalate or give up.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>>;

    async fn find_accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>>;

    async fn put_account(&self, account: Account) -> Result<Account>;

    async fn get_lease_by_id(&self, lease_id: &str) -> Result<Lease>;

    async fn find_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>>;

    async fn upsert_lease(&self, lease: Lease) -> Result<Lease>;

    async fn transition_account_status(
        &self,
        account_id: &str,
        prev: AccountStatus,
        next: AccountStatus,
    ) -> Result<Account>;

    async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        prev: LeaseStatus,
        next: LeaseStatus,
        reason: LeaseStatusReason,
    ) -> Result<Lease>;
}

#[derive(Clone)]
pub struct Store {
    client: Arc<dyn TableClient>,
    config: StoreConfig,
}

impl Store {
    pub fn new(client: Arc<dyn TableClient>, config: StoreConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Table layouts the store expects, for provisioning in-memory tables.
pub fn table_schemas(config: &StoreConfig) -> [TableSchema; 2] {
    [
        TableSchema::new(&config.account_table, &[accounts::ID])
            .with_index(ACCOUNT_STATUS_INDEX, accounts::ACCOUNT_STATUS),
        TableSchema::new(&config.lease_table, &[leases::ACCOUNT_ID, leases::PRINCIPAL_ID])
            .with_index(LEASE_ID_INDEX, leases::ID)
            .with_index(PRINCIPAL_ID_INDEX, leases::PRINCIPAL_ID),
    ]
}

#[async_trait]
impl LeaseStore for Store {
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        Store::get_account(self, account_id).await
    }

    async fn find_accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        Store::find_accounts_by_status(self, status).await
    }

    async fn put_account(&self, account: Account) -> Result<Account> {
        Store::put_account(self, account).await
    }

    async fn get_lease_by_id(&self, lease_id: &str) -> Result<Lease> {
        Store::get_lease_by_id(self, lease_id).await
    }

    async fn find_leases_by_principal(&self, principal_id: &str) -> Result<Vec<Lease>> {
        Store::find_leases_by_principal(self, principal_id).await
    }

    async fn upsert_lease(&self, lease: Lease) -> Result<Lease> {
        Store::upsert_lease(self, lease).await
    }

    async fn transition_account_status(
        &self,
        account_id: &str,
        prev: AccountStatus,
        next: AccountStatus,
    ) -> Result<Account> {
        Store::transition_account_status(self, account_id, prev, next).await
    }

    async fn transition_lease_status(
        &self,
        account_id: &str,
        principal_id: &str,
        prev: LeaseStatus,
        next: LeaseStatus,
        reason: LeaseStatusReason,
    ) -> Result<Lease> {
        Store::transition_lease_status(self, account_id, principal_id, prev, next, reason).await
    }
}

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

fn decode<T: DeserializeOwned>(item: Item, context: impl FnOnce() -> String) -> Result<T> {
    serde_json::from_value(Value::Object(item)).map_err(|e| Error::mapping(context(), e))
}

fn encode<T: Serialize>(record: &T, context: impl FnOnce() -> String) -> Result<Item> {
    match serde_json::to_value(record) {
        Ok(Value::Object(item)) => Ok(item),
        Ok(_) => Err(Error::mapping(
            context(),
            serde::ser::Error::custom("record does not serialize to an attribute map"),
        )),
        Err(e) => Err(Error::mapping(context(), e)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::table::{MemoryTables, Query, TableError, UpdateItem};

    pub fn config() -> StoreConfig {
        StoreConfig::new("Accounts", "Leases")
    }

    pub fn memory_store() -> (Store, Arc<MemoryTables>) {
        let config = config();
        let tables = Arc::new(MemoryTables::new(table_schemas(&config)));
        (Store::new(tables.clone(), config), tables)
    }

    /// Table client whose every call fails with the same error.
    pub struct FailingTable(pub TableError);

    #[async_trait]
    impl TableClient for FailingTable {
        async fn get_item(
            &self,
            _table: &str,
            _key: Item,
            _consistent_read: bool,
        ) -> Result<Option<Item>, TableError> {
            Err(self.0.clone())
        }

        async fn query(&self, _table: &str, _query: Query) -> Result<Vec<Item>, TableError> {
            Err(self.0.clone())
        }

        async fn update_item(&self, _table: &str, _update: UpdateItem) -> Result<Item, TableError> {
            Err(self.0.clone())
        }

        async fn put_item(&self, _table: &str, _item: Item) -> Result<Option<Item>, TableError> {
            Err(self.0.clone())
        }
    }

    pub fn failing_store(error: TableError) -> Store {
        Store::new(Arc::new(FailingTable(error)), config())
    }

    /// Memory tables whose next `update_item` calls on one table are
    /// throttled, as many times as [`FlakyTable::fail_updates`] asks for.
    pub struct FlakyTable {
        pub inner: Arc<MemoryTables>,
        table: String,
        failures: AtomicUsize,
    }

    impl FlakyTable {
        pub fn new(inner: Arc<MemoryTables>, table: &str) -> Self {
            Self {
                inner,
                table: table.to_string(),
                failures: AtomicUsize::new(0),
            }
        }

        pub fn fail_updates(&self, count: usize) {
            self.failures.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TableClient for FlakyTable {
        async fn get_item(
            &self,
            table: &str,
            key: Item,
            consistent_read: bool,
        ) -> Result<Option<Item>, TableError> {
            self.inner.get_item(table, key, consistent_read).await
        }

        async fn query(&self, table: &str, query: Query) -> Result<Vec<Item>, TableError> {
            self.inner.query(table, query).await
        }

        async fn update_item(&self, table: &str, update: UpdateItem) -> Result<Item, TableError> {
            let throttled = table == self.table
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if throttled {
                return Err(TableError::Throttled);
            }
            self.inner.update_item(table, update).await
        }

        async fn put_item(&self, table: &str, item: Item) -> Result<Option<Item>, TableError> {
            self.inner.put_item(table, item).await
        }
    }

    /// Memory store over a [`FlakyTable`] wrapping `table`.
    pub fn flaky_store(table: &str) -> (Store, Arc<FlakyTable>) {
        let config = config();
        let tables = Arc::new(MemoryTables::new(table_schemas(&config)));
        let flaky = Arc::new(FlakyTable::new(tables, table));
        (Store::new(flaky.clone(), config), flaky)
    }

    /// Memory tables that remember the consistent-read flag of every point
    /// read.
    pub struct RecordingReads {
        pub inner: MemoryTables,
        pub flags: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl TableClient for RecordingReads {
        async fn get_item(
            &self,
            table: &str,
            key: Item,
            consistent_read: bool,
        ) -> Result<Option<Item>, TableError> {
            self.flags.lock().unwrap().push(consistent_read);
            self.inner.get_item(table, key, consistent_read).await
        }

        async fn query(&self, table: &str, query: Query) -> Result<Vec<Item>, TableError> {
            self.inner.query(table, query).await
        }

        async fn update_item(&self, table: &str, update: UpdateItem) -> Result<Item, TableError> {
            self.inner.update_item(table, update).await
        }

        async fn put_item(&self, table: &str, item: Item) -> Result<Option<Item>, TableError> {
            self.inner.put_item(table, item).await
        }
    }

    /// Memory store whose point reads are recorded, built from `config`.
    pub fn recording_store(config: StoreConfig) -> (Store, Arc<RecordingReads>) {
        let reads = Arc::new(RecordingReads {
            inner: MemoryTables::new(table_schemas(&config)),
            flags: Mutex::new(Vec::new()),
        });
        (Store::new(reads.clone(), config), reads)
    }
}
