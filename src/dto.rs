use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stores::{Account, AccountStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Onboard,
    Ready,
    Lease,
    End,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandType::Onboard => "onboard",
            CommandType::Ready => "ready",
            CommandType::Lease => "lease",
            CommandType::End => "end",
        })
    }
}

/// One row of the command input. Columns a command does not use are left
/// empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    #[serde(rename = "type")]
    pub cmd_type: CommandType,
    pub account: String,
    pub principal: Option<String>,
    pub lease: Option<String>,
    pub expires_on: Option<i64>,
    pub reason: Option<String>,
}

/// One row of the pool report.
#[derive(Debug, Serialize, PartialEq)]
pub struct AccountRow {
    pub account: String,
    pub status: AccountStatus,
}

impl From<Account> for AccountRow {
    fn from(account: Account) -> Self {
        Self {
            account: account.id,
            status: account.status,
        }
    }
}
