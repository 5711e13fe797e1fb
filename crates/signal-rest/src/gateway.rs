//! Request routing and per-account concurrency control.
//!
//! Every account operation goes through [`Gateway`]: it validates input,
//! stages uploads, acquires the account lock in the operation's mode and
//! then runs the backend call on its own task. The lock and the staged
//! files travel with that task, so a caller that disconnects (or a request
//! timeout that drops the handler future) never releases the lock while the
//! backend is still working on the account's state.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use signal_rest_types::{
    CreateGroupResponse, GROUP_PREFIX, GroupEntry, IdentityEntry, ReactionRequest, SendResponse,
    SendResult,
};
use tracing::{debug, info, warn};

use crate::account::{AccountHandle, AccountRegistry, AccountStatus, reject_option_like};
use crate::backend::{
    BackendError, Reaction, Recipient, RegisterOptions, SendTarget, SignalBackend, api_group_id,
    internal_group_id,
};
use crate::config::Config;
use crate::error::GatewayError;
use crate::send::{OutgoingMessage, Upload, decode_upload};
use crate::store::{AttachmentFile, AttachmentStore, StagedFile, StagingArea, release_all};
use crate::sync::{AccountLocks, LockMode};

// ============================================================================
// Operation
// ============================================================================

/// Account-scoped operations and how they hold the account lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Verify,
    Send,
    Receive,
    CreateGroup,
    ListGroups,
    GetGroup,
    DeleteGroup,
    BlockGroup,
    JoinGroup,
    QuitGroup,
    UpdateProfile,
    ListIdentities,
    TrustIdentity,
    SendReaction,
}

impl Operation {
    pub fn lock_mode(self) -> LockMode {
        match self {
            // `receive` does write the account's store, but signal-cli holds an
            // exclusive file lock on the account while it runs, so two shared
            // receivers queue inside the backend instead of interleaving.
            Operation::Receive
            | Operation::ListGroups
            | Operation::GetGroup
            | Operation::ListIdentities => LockMode::Shared,
            _ => LockMode::Exclusive,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Verify => "verify",
            Operation::Send => "send",
            Operation::Receive => "receive",
            Operation::CreateGroup => "create_group",
            Operation::ListGroups => "list_groups",
            Operation::GetGroup => "get_group",
            Operation::DeleteGroup => "delete_group",
            Operation::BlockGroup => "block_group",
            Operation::JoinGroup => "join_group",
            Operation::QuitGroup => "quit_group",
            Operation::UpdateProfile => "update_profile",
            Operation::ListIdentities => "list_identities",
            Operation::TrustIdentity => "trust_identity",
            Operation::SendReaction => "send_reaction",
        }
    }
}

/// Membership changes addressed by group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Delete,
    Block,
    Join,
    Quit,
}

impl GroupAction {
    fn operation(self) -> Operation {
        match self {
            GroupAction::Delete => Operation::DeleteGroup,
            GroupAction::Block => Operation::BlockGroup,
            GroupAction::Join => Operation::JoinGroup,
            GroupAction::Quit => Operation::QuitGroup,
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct Gateway {
    accounts: AccountRegistry,
    locks: AccountLocks,
    attachment_staging: StagingArea,
    avatar_staging: StagingArea,
    attachments: AttachmentStore,
    backend: Arc<dyn SignalBackend>,
    operation_timeout: Option<Duration>,
    receive_timeout: Duration,
}

impl Gateway {
    pub fn new(
        backend: Arc<dyn SignalBackend>,
        config_dir: impl Into<PathBuf>,
        attachment_tmp_dir: impl Into<PathBuf>,
        avatar_tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        let config_dir = config_dir.into();
        Self {
            attachments: AttachmentStore::new(config_dir.join("attachments")),
            accounts: AccountRegistry::new(config_dir),
            locks: AccountLocks::new(None),
            attachment_staging: StagingArea::new(attachment_tmp_dir),
            avatar_staging: StagingArea::new(avatar_tmp_dir),
            backend,
            operation_timeout: None,
            receive_timeout: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config, backend: Arc<dyn SignalBackend>) -> Self {
        Self::new(
            backend,
            &config.signal_cli.config_dir,
            &config.attachment_tmp_dir,
            &config.avatar_tmp_dir,
        )
        .with_acquire_timeout(config.locks.acquire_timeout())
        .with_operation_timeout(config.locks.operation_timeout())
        .with_receive_timeout(Duration::from_secs(
            config.signal_cli.receive_timeout_seconds,
        ))
    }

    /// Give up waiting for an account lock after `limit` (`Busy`).
    pub fn with_acquire_timeout(mut self, limit: Option<Duration>) -> Self {
        self.locks = AccountLocks::new(limit);
        self
    }

    /// Stop waiting for a backend call after `limit` (`Timeout`). The call
    /// itself keeps running and keeps the account locked until it returns.
    pub fn with_operation_timeout(mut self, limit: Option<Duration>) -> Self {
        self.operation_timeout = limit;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn attachment_staging(&self) -> &StagingArea {
        &self.attachment_staging
    }

    pub fn avatar_staging(&self) -> &StagingArea {
        &self.avatar_staging
    }

    /// Run `call` under the account lock.
    ///
    /// `staged` files are released once `call` finishes, whatever its
    /// outcome. If the lock cannot be acquired they are released right away
    /// and the backend is never invoked.
    async fn run<T, F, Fut>(
        &self,
        operation: Operation,
        account: AccountHandle,
        staged: Vec<StagedFile>,
        call: F,
    ) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn SignalBackend>, AccountHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let guard = self
            .locks
            .acquire(account.key(), operation.lock_mode())
            .await?;

        let backend = Arc::clone(&self.backend);
        let number = account.number.clone();
        let task = tokio::spawn(async move {
            let result = call(backend, account).await;
            release_all(staged).await;
            drop(guard);
            result
        });

        let joined = match self.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        account = %number,
                        operation = operation.name(),
                        "Operation timed out; it keeps running in the background"
                    );
                    return Err(GatewayError::Timeout(limit));
                }
            },
            None => task.await,
        };

        let result = joined.map_err(|e| {
            GatewayError::internal(format!("{} task failed: {e}", operation.name()))
        })?;
        debug!(
            account = %number,
            operation = operation.name(),
            ok = result.is_ok(),
            "Operation finished"
        );
        result
    }

    async fn stage_uploads(
        area: &StagingArea,
        uploads: &[Upload],
    ) -> Result<Vec<StagedFile>, GatewayError> {
        let mut staged = Vec::with_capacity(uploads.len());
        for upload in uploads {
            // Anything staged so far is dropped (and deleted) on error.
            staged.push(
                area.stage(&upload.bytes, upload.suggested_name.as_deref())
                    .await?,
            );
        }
        Ok(staged)
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub async fn register(
        &self,
        number: &str,
        options: RegisterOptions,
    ) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(number)?;
        let accounts = self.accounts.clone();
        self.run(
            Operation::Register,
            account,
            Vec::new(),
            move |backend, account| async move {
                backend.register(&account, &options).await?;
                accounts.record(&account.number, AccountStatus::RegistrationPending);
                info!(account = %account.number, "Registration started");
                Ok(())
            },
        )
        .await
    }

    /// Complete a registration with the code the account received.
    ///
    /// Accounts that never started registering are rejected with
    /// `Conflict` without calling the backend. The check runs once the
    /// account lock is held.
    pub async fn verify(
        &self,
        number: &str,
        token: &str,
        pin: Option<String>,
    ) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(number)?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(GatewayError::bad_request("verification code must not be empty"));
        }
        let pin = pin.filter(|p| !p.trim().is_empty());

        let accounts = self.accounts.clone();
        self.run(
            Operation::Verify,
            account,
            Vec::new(),
            move |backend, account| async move {
                // Checked under the lock so a register queued ahead of us counts.
                if accounts.current_status(&account.number).await == AccountStatus::Unregistered {
                    return Err(GatewayError::Conflict(format!(
                        "account {} has no pending registration",
                        account.number
                    )));
                }
                backend.verify(&account, &token, pin.as_deref()).await?;
                accounts.record(&account.number, AccountStatus::Registered);
                info!(account = %account.number, "Account verified");
                Ok(())
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Deliver a reconciled message.
    ///
    /// All numbers go out in one backend call, each group in its own. The
    /// response carries a per-target result; the request only fails when
    /// every target failed, with the first failure.
    pub async fn send(&self, message: OutgoingMessage) -> Result<SendResponse, GatewayError> {
        let account = self.accounts.resolve(&message.sender)?;
        if message.recipients.is_empty() {
            return Err(GatewayError::bad_request(
                "at least one recipient number or group is required",
            ));
        }

        let mut targets = Vec::new();
        if !message.recipients.numbers.is_empty() {
            let numbers: Vec<String> = message.recipients.numbers.iter().cloned().collect();
            targets.push((numbers.join(","), SendTarget::Numbers(numbers)));
        }
        for group in &message.recipients.groups {
            let internal = internal_group_id(group)
                .ok_or_else(|| GatewayError::bad_request(format!("invalid group id '{group}'")))?;
            targets.push((group.clone(), SendTarget::Group(internal)));
        }

        let staged = Self::stage_uploads(&self.attachment_staging, &message.attachments).await?;
        let paths: Vec<PathBuf> = staged.iter().map(|f| f.path().to_path_buf()).collect();
        let body = message.body;

        self.run(
            Operation::Send,
            account,
            staged,
            move |backend, account| async move {
                let mut results = Vec::with_capacity(targets.len());
                let mut first_error: Option<BackendError> = None;
                for (recipient, target) in &targets {
                    match backend.send(&account, target, &body, &paths).await {
                        Ok(timestamp) => results.push(SendResult {
                            recipient: recipient.clone(),
                            timestamp,
                            error: None,
                        }),
                        Err(e) => {
                            warn!(
                                account = %account.number,
                                recipient = %recipient,
                                kind = %e.kind,
                                "Send failed"
                            );
                            results.push(SendResult {
                                recipient: recipient.clone(),
                                timestamp: None,
                                error: Some(e.to_string()),
                            });
                            first_error.get_or_insert(e);
                        }
                    }
                }

                if results.iter().all(|r| r.error.is_some())
                    && let Some(e) = first_error
                {
                    return Err(e.into());
                }
                let timestamp = results.iter().find_map(|r| r.timestamp.clone());
                Ok(SendResponse { timestamp, results })
            },
        )
        .await
    }

    /// Pull pending messages. `timeout` overrides the configured wait.
    pub async fn receive(
        &self,
        number: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let account = self.accounts.resolve(number)?;
        let timeout = timeout.unwrap_or(self.receive_timeout);
        self.run(
            Operation::Receive,
            account,
            Vec::new(),
            move |backend, account| async move { Ok(backend.receive(&account, timeout).await?) },
        )
        .await
    }

    pub async fn send_reaction(&self, req: ReactionRequest) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(&req.number)?;
        let recipient = req.recipient.trim();
        if recipient.is_empty() {
            return Err(GatewayError::bad_request("recipient must not be empty"));
        }
        if req.reaction.is_empty() {
            return Err(GatewayError::bad_request("reaction must not be empty"));
        }
        if req.target_author.trim().is_empty() {
            return Err(GatewayError::bad_request("target_author must not be empty"));
        }
        if req.timestamp == 0 {
            return Err(GatewayError::bad_request("timestamp must be set"));
        }

        let recipient = if recipient.starts_with(GROUP_PREFIX) {
            Recipient::Group(parse_group_id(recipient)?)
        } else {
            Recipient::Number(recipient.to_string())
        };
        let reaction = Reaction {
            recipient,
            emoji: req.reaction,
            target_author: req.target_author.trim().to_string(),
            target_timestamp: req.timestamp,
            remove: req.remove,
        };

        self.run(
            Operation::SendReaction,
            account,
            Vec::new(),
            move |backend, account| async move {
                Ok(backend.send_reaction(&account, &reaction).await?)
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------------

    pub async fn create_group(
        &self,
        number: &str,
        name: &str,
        members: Vec<String>,
    ) -> Result<CreateGroupResponse, GatewayError> {
        let account = self.accounts.resolve(number)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(GatewayError::bad_request("group name must not be empty"));
        }
        let members: Vec<String> = members
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        for member in &members {
            reject_option_like("member", member)?;
        }

        self.run(
            Operation::CreateGroup,
            account,
            Vec::new(),
            move |backend, account| async move {
                let internal = backend.create_group(&account, &name, &members).await?;
                Ok(CreateGroupResponse {
                    id: api_group_id(&internal),
                })
            },
        )
        .await
    }

    pub async fn list_groups(&self, number: &str) -> Result<Vec<GroupEntry>, GatewayError> {
        let account = self.accounts.resolve(number)?;
        self.run(
            Operation::ListGroups,
            account,
            Vec::new(),
            move |backend, account| async move { Ok(backend.list_groups(&account).await?) },
        )
        .await
    }

    pub async fn get_group(&self, number: &str, group_id: &str) -> Result<GroupEntry, GatewayError> {
        let account = self.accounts.resolve(number)?;
        let internal = parse_group_id(group_id)?;
        let group_id = group_id.trim().to_string();
        self.run(
            Operation::GetGroup,
            account,
            Vec::new(),
            move |backend, account| async move {
                backend
                    .list_groups(&account)
                    .await?
                    .into_iter()
                    .find(|g| g.internal_id == internal)
                    .ok_or_else(|| GatewayError::not_found(format!("group '{group_id}' not found")))
            },
        )
        .await
    }

    pub async fn group_action(
        &self,
        number: &str,
        group_id: &str,
        action: GroupAction,
    ) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(number)?;
        let internal = parse_group_id(group_id)?;
        self.run(
            action.operation(),
            account,
            Vec::new(),
            move |backend, account| async move {
                match action {
                    GroupAction::Delete => backend.delete_group(&account, &internal).await?,
                    GroupAction::Block => backend.block_group(&account, &internal).await?,
                    GroupAction::Join => backend.join_group(&account, &internal).await?,
                    GroupAction::Quit => backend.quit_group(&account, &internal).await?,
                }
                Ok(())
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Profiles and identities
    // ------------------------------------------------------------------------

    /// Set the display name, and the avatar if one is given. Without an
    /// avatar the current one is removed.
    pub async fn update_profile(
        &self,
        number: &str,
        name: &str,
        base64_avatar: Option<&str>,
    ) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(number)?;
        let name = name.to_string();
        let avatar = base64_avatar
            .filter(|a| !a.trim().is_empty())
            .map(decode_upload)
            .transpose()?;

        let staged = match &avatar {
            Some(upload) => Self::stage_uploads(&self.avatar_staging, std::slice::from_ref(upload))
                .await?,
            None => Vec::new(),
        };
        let avatar_path = staged.first().map(|f| f.path().to_path_buf());

        self.run(
            Operation::UpdateProfile,
            account,
            staged,
            move |backend, account| async move {
                Ok(backend
                    .update_profile(&account, &name, avatar_path.as_deref())
                    .await?)
            },
        )
        .await
    }

    pub async fn list_identities(&self, number: &str) -> Result<Vec<IdentityEntry>, GatewayError> {
        let account = self.accounts.resolve(number)?;
        self.run(
            Operation::ListIdentities,
            account,
            Vec::new(),
            move |backend, account| async move { Ok(backend.list_identities(&account).await?) },
        )
        .await
    }

    pub async fn trust_identity(
        &self,
        number: &str,
        number_to_trust: &str,
        verified_safety_number: Option<String>,
    ) -> Result<(), GatewayError> {
        let account = self.accounts.resolve(number)?;
        let number_to_trust = number_to_trust.trim().to_string();
        if number_to_trust.is_empty() {
            return Err(GatewayError::bad_request("number to trust must not be empty"));
        }
        let safety_number = verified_safety_number.filter(|s| !s.trim().is_empty());

        self.run(
            Operation::TrustIdentity,
            account,
            Vec::new(),
            move |backend, account| async move {
                Ok(backend
                    .trust_identity(&account, &number_to_trust, safety_number.as_deref())
                    .await?)
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Device linking
    // ------------------------------------------------------------------------

    /// Start linking a new device and return its provisioning URI.
    ///
    /// The linked number is unknown until the primary device accepts, so no
    /// account lock is taken. Completion is awaited in the background and
    /// recorded in the account registry.
    pub async fn link(&self, device_name: &str) -> Result<String, GatewayError> {
        let device_name = device_name.trim();
        if device_name.is_empty() {
            return Err(GatewayError::bad_request("device_name must not be empty"));
        }

        let request = self.backend.link(device_name).await?;
        let accounts = self.accounts.clone();
        let device = device_name.to_string();
        tokio::spawn(async move {
            match request.completion.await {
                Ok(Ok(number)) => {
                    info!(account = %number, device = %device, "Device linked");
                    accounts.record(&number, AccountStatus::Linked);
                }
                Ok(Err(e)) => {
                    warn!(device = %device, kind = %e.kind, detail = ?e.detail, "Device link failed")
                }
                Err(_) => warn!(device = %device, "Device link abandoned"),
            }
        });
        Ok(request.uri)
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    pub async fn list_attachments(&self) -> Result<Vec<String>, GatewayError> {
        Ok(self.attachments.list().await?)
    }

    pub async fn read_attachment(&self, name: &str) -> Result<AttachmentFile, GatewayError> {
        Ok(self.attachments.read(name).await?)
    }

    pub async fn delete_attachment(&self, name: &str) -> Result<(), GatewayError> {
        self.attachments.delete(name).await?;
        info!(attachment = %name, "Attachment deleted");
        Ok(())
    }
}

fn parse_group_id(group_id: &str) -> Result<String, GatewayError> {
    internal_group_id(group_id.trim())
        .ok_or_else(|| GatewayError::bad_request(format!("invalid group id '{group_id}'")))
}
