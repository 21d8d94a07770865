//! Store configuration.
//!
//! [`StoreConfig`] is handed to [`crate::Store::new`] explicitly. It can be
//! extracted from the process environment:
//!
//! | variable | default |
//! |---|---|
//! | `AWS_CURRENT_REGION` | `us-east-1` |
//! | `ACCOUNT_DB` | required |
//! | `LEASE_DB` | required |
//! | `DEFAULT_LEASE_LENGTH_IN_DAYS` | `7` |
//! | `CONSISTENT_READ` | `false` |

use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const ENV_KEYS: [&str; 5] = [
    "AWS_CURRENT_REGION",
    "ACCOUNT_DB",
    "LEASE_DB",
    "DEFAULT_LEASE_LENGTH_IN_DAYS",
    "CONSISTENT_READ",
];

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "aws_current_region", default = "default_region")]
    pub region: String,
    #[serde(rename = "account_db")]
    pub account_table: String,
    #[serde(rename = "lease_db")]
    pub lease_table: String,
    /// Length of a new lease when the caller does not choose an expiry.
    #[serde(
        rename = "default_lease_length_in_days",
        default = "default_lease_length_days"
    )]
    pub default_lease_length_days: u32,
    /// Request strongly consistent point reads.
    #[serde(default)]
    pub consistent_read: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_lease_length_days() -> u32 {
    7
}

impl StoreConfig {
    pub fn new(account_table: &str, lease_table: &str) -> Self {
        Self {
            region: default_region(),
            account_table: account_table.to_string(),
            lease_table: lease_table.to_string(),
            default_lease_length_days: default_lease_length_days(),
            consistent_read: false,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_figment(Figment::from(Env::raw().only(&ENV_KEYS)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| Error::Config(Box::new(e)))
    }

    /// Expiry of a lease starting at `now` that runs for the default length.
    pub fn default_expires_on(&self, now: i64) -> i64 {
        now + i64::from(self.default_lease_length_days) * SECONDS_PER_DAY
    }
}
