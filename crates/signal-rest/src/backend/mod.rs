//! Messaging backend capability interface.
//!
//! [`SignalBackend`] has one method per logical account operation. The
//! gateway only talks to this trait; [`SignalCli`] binds it to the
//! `signal-cli` executable, and tests substitute their own doubles.
//!
//! Implementations translate each call into the backend's invocation syntax
//! and normalize the reply. They never persist anything themselves: state
//! changes are a side effect of the backend call.

mod error;
mod group_id;
mod parse;
mod signal_cli;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use signal_rest_types::{GroupEntry, IdentityEntry};
use tokio::sync::oneshot;

use crate::account::AccountHandle;

pub use error::{BackendError, BackendErrorKind};
pub use group_id::{api_group_id, internal_group_id};
pub use signal_cli::SignalCli;

pub type BackendResult<T> = Result<T, BackendError>;

// ============================================================================
// Payload types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    pub use_voice: bool,
    pub captcha: Option<String>,
}

/// Addressee of one send invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// One or more phone numbers, delivered in a single call.
    Numbers(Vec<String>),
    /// A group, by backend (internal) id.
    Group(String),
}

/// Addressee of a reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Number(String),
    /// Backend (internal) group id.
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub recipient: Recipient,
    pub emoji: String,
    pub target_author: String,
    pub target_timestamp: u64,
    pub remove: bool,
}

/// An in-progress device link.
pub struct LinkRequest {
    /// Provisioning URI to show as a QR code.
    pub uri: String,
    /// Resolves with the linked number once the primary device has scanned
    /// the code, or with the failure that ended the attempt.
    pub completion: oneshot::Receiver<BackendResult<String>>,
}

// ============================================================================
// SignalBackend
// ============================================================================

#[async_trait]
pub trait SignalBackend: Send + Sync {
    async fn register(&self, account: &AccountHandle, options: &RegisterOptions)
    -> BackendResult<()>;

    async fn verify(
        &self,
        account: &AccountHandle,
        token: &str,
        pin: Option<&str>,
    ) -> BackendResult<()>;

    /// Deliver `message` to `target`. Returns the message timestamp when the
    /// backend reports one.
    async fn send(
        &self,
        account: &AccountHandle,
        target: &SendTarget,
        message: &str,
        attachments: &[PathBuf],
    ) -> BackendResult<Option<String>>;

    /// Pull pending messages, one JSON document per message.
    async fn receive(
        &self,
        account: &AccountHandle,
        timeout: Duration,
    ) -> BackendResult<Vec<serde_json::Value>>;

    /// Create a group and return its internal id.
    async fn create_group(
        &self,
        account: &AccountHandle,
        name: &str,
        members: &[String],
    ) -> BackendResult<String>;

    async fn list_groups(&self, account: &AccountHandle) -> BackendResult<Vec<GroupEntry>>;

    /// Leave the group and drop its local data.
    async fn delete_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()>;

    async fn block_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()>;

    async fn join_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()>;

    async fn quit_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()>;

    /// Start linking this host as a secondary device.
    async fn link(&self, device_name: &str) -> BackendResult<LinkRequest>;

    async fn update_profile(
        &self,
        account: &AccountHandle,
        name: &str,
        avatar: Option<&Path>,
    ) -> BackendResult<()>;

    async fn list_identities(&self, account: &AccountHandle) -> BackendResult<Vec<IdentityEntry>>;

    /// Trust `number`'s identity; without a safety number, trust all known
    /// keys.
    async fn trust_identity(
        &self,
        account: &AccountHandle,
        number: &str,
        verified_safety_number: Option<&str>,
    ) -> BackendResult<()>;

    async fn send_reaction(&self, account: &AccountHandle, reaction: &Reaction)
    -> BackendResult<()>;
}
