//! Account registry.
//!
//! Maps a phone number onto the location of its backend state and keeps an
//! advisory view of the account's registration lifecycle. Statuses only move
//! when a backend call reports success; the registry never guesses ahead.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GatewayError;

/// Registration lifecycle of an account, as last observed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Unregistered,
    /// `register` succeeded, `verify` has not yet.
    RegistrationPending,
    Registered,
    /// Linked as a secondary device.
    Linked,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Unregistered => "unregistered",
            AccountStatus::RegistrationPending => "registration_pending",
            AccountStatus::Registered => "registered",
            AccountStatus::Linked => "linked",
        };
        f.write_str(s)
    }
}

/// Where an account's backend state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHandle {
    /// Phone number as supplied by the caller.
    pub number: String,
    /// Backend configuration root shared by all accounts.
    pub config_dir: PathBuf,
    /// Per-account state inside the configuration root.
    pub state_path: PathBuf,
}

impl AccountHandle {
    /// Key used for per-account locking.
    pub fn key(&self) -> &str {
        &self.number
    }
}

/// Resolves numbers to account handles and tracks their status.
#[derive(Clone)]
pub struct AccountRegistry {
    config_dir: PathBuf,
    statuses: Arc<DashMap<String, AccountStatus>>,
}

impl AccountRegistry {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            statuses: Arc::new(DashMap::new()),
        }
    }

    /// Backend configuration root.
    pub fn config_dir(&self) -> &std::path::Path {
        &self.config_dir
    }

    /// Derive the handle for `number`.
    ///
    /// Only empty numbers and numbers the backend would read as an option
    /// are rejected; everything else is passed through for the backend to
    /// judge. Does not touch the filesystem.
    pub fn resolve(&self, number: &str) -> Result<AccountHandle, GatewayError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(GatewayError::bad_request("number must not be empty"));
        }
        reject_option_like("number", number)?;
        Ok(AccountHandle {
            number: number.to_string(),
            config_dir: self.config_dir.clone(),
            state_path: self.config_dir.join("data").join(number),
        })
    }

    /// Last known status of `number`.
    ///
    /// Falls back to checking for backend state on disk for accounts the
    /// gateway has not seen this process lifetime (e.g. registered before a
    /// restart).
    pub async fn current_status(&self, number: &str) -> AccountStatus {
        if let Some(status) = self.statuses.get(number) {
            return *status;
        }
        let data_dir = self.config_dir.join("data");
        if let Ok(true) = tokio::fs::try_exists(data_dir.join(number)).await {
            return AccountStatus::Registered;
        }
        if listed_in_accounts_file(&data_dir, number).await {
            return AccountStatus::Registered;
        }
        AccountStatus::Unregistered
    }

    /// Record a status reported by a successful backend call.
    pub fn record(&self, number: &str, status: AccountStatus) {
        debug!(number = %number, status = %status, "Account status changed");
        self.statuses.insert(number.to_string(), status);
    }
}

/// Newer signal-cli releases index accounts in `data/accounts.json`.
#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountsFileEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountsFileEntry {
    number: Option<String>,
}

async fn listed_in_accounts_file(data_dir: &std::path::Path, number: &str) -> bool {
    let Ok(raw) = tokio::fs::read(data_dir.join("accounts.json")).await else {
        return false;
    };
    match serde_json::from_slice::<AccountsFile>(&raw) {
        Ok(file) => file
            .accounts
            .iter()
            .any(|entry| entry.number.as_deref() == Some(number)),
        Err(e) => {
            debug!(error = %e, "Ignoring unreadable accounts.json");
            false
        }
    }
}

/// Values starting with `-` would be parsed as options by the backend.
pub fn reject_option_like(what: &str, value: &str) -> Result<(), GatewayError> {
    if value.starts_with('-') {
        return Err(GatewayError::bad_request(format!(
            "{what} must not start with '-'"
        )));
    }
    Ok(())
}
