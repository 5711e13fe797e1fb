//! Shared test double for the messaging backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signal_rest::account::AccountHandle;
use signal_rest::backend::{
    BackendError, BackendErrorKind, BackendResult, LinkRequest, Reaction, RegisterOptions,
    SendTarget, SignalBackend, api_group_id,
};
use signal_rest::gateway::Gateway;
use signal_rest_types::{GroupEntry, IdentityEntry};
use tempfile::TempDir;
use tokio::sync::{Semaphore, oneshot};

pub const ACCOUNT: &str = "+15550000001";
pub const OTHER_ACCOUNT: &str = "+15550000002";
pub const LINKED_NUMBER: &str = "+15550000009";
pub const LINK_URI: &str = "tsdevice:/?uuid=test&pub_key=key";

/// One observed backend call.
#[derive(Debug, Clone)]
pub struct Call {
    pub op: &'static str,
    pub account: String,
    pub detail: String,
}

#[derive(Default)]
struct Active {
    shared: usize,
    exclusive: usize,
}

#[derive(Default)]
struct StubState {
    active: HashMap<String, Active>,
    calls: Vec<Call>,
    violations: Vec<String>,
    failures: HashMap<String, BackendErrorKind>,
    groups: Vec<GroupEntry>,
    /// Attachment paths handed to `send`, and whether they existed then.
    attachments: Vec<(PathBuf, bool)>,
}

/// Backend double that records every call and flags any overlap that
/// per-account locking should have prevented.
pub struct StubBackend {
    delay: Duration,
    state: Mutex<StubState>,
    gated: AtomicBool,
    gate: Semaphore,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(StubState::default()),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make `key` fail with `kind`. Keys are operation names, or
    /// `send:numbers` / `send:<internal group id>` for individual send targets.
    pub fn fail(&self, key: &str, kind: BackendErrorKind) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(key.to_string(), kind);
    }

    pub fn add_group(&self, internal_id: &str, name: &str) {
        self.state.lock().unwrap().groups.push(GroupEntry {
            name: name.to_string(),
            id: api_group_id(internal_id),
            internal_id: internal_id.to_string(),
            members: vec![OTHER_ACCOUNT.to_string()],
            blocked: false,
            pending_invites: Vec::new(),
            pending_requests: Vec::new(),
            invite_link: None,
        });
    }

    /// Hold every call open until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn attachments(&self) -> Vec<(PathBuf, bool)> {
        self.state.lock().unwrap().attachments.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn call<T>(
        &self,
        op: &'static str,
        account: &str,
        exclusive: bool,
        detail: String,
        failure_key: &str,
        complete: impl FnOnce(&mut StubState) -> T,
    ) -> BackendResult<T> {
        {
            let mut state = self.state.lock().unwrap();
            let active = state.active.entry(account.to_string()).or_default();
            let overlaps = if exclusive {
                active.shared + active.exclusive > 0
            } else {
                active.exclusive > 0
            };
            if exclusive {
                active.exclusive += 1;
            } else {
                active.shared += 1;
            }
            if overlaps {
                state
                    .violations
                    .push(format!("{op} overlapped another call on {account}"));
            }
            state.calls.push(Call {
                op,
                account: account.to_string(),
                detail,
            });
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.gated.load(Ordering::SeqCst)
            && let Ok(permit) = self.gate.acquire().await
        {
            permit.forget();
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(active) = state.active.get_mut(account) {
            if exclusive {
                active.exclusive -= 1;
            } else {
                active.shared -= 1;
            }
        }
        if let Some(kind) = state.failures.get(failure_key).copied() {
            return Err(BackendError::new(kind, format!("{failure_key} failed")));
        }
        Ok(complete(&mut state))
    }
}

#[async_trait]
impl SignalBackend for StubBackend {
    async fn register(
        &self,
        account: &AccountHandle,
        options: &RegisterOptions,
    ) -> BackendResult<()> {
        let detail = format!("voice={}", options.use_voice);
        self.call("register", &account.number, true, detail, "register", |_| ())
            .await
    }

    async fn verify(
        &self,
        account: &AccountHandle,
        token: &str,
        _pin: Option<&str>,
    ) -> BackendResult<()> {
        self.call("verify", &account.number, true, token.to_string(), "verify", |_| ())
            .await
    }

    async fn send(
        &self,
        account: &AccountHandle,
        target: &SendTarget,
        message: &str,
        attachments: &[PathBuf],
    ) -> BackendResult<Option<String>> {
        let key = match target {
            SendTarget::Numbers(_) => "send:numbers".to_string(),
            SendTarget::Group(id) => format!("send:{id}"),
        };
        let seen: Vec<(PathBuf, bool)> = attachments
            .iter()
            .map(|p| (p.clone(), p.exists()))
            .collect();
        self.call("send", &account.number, true, message.to_string(), &key, |state| {
            state.attachments.extend(seen);
            Some("1700000000000".to_string())
        })
        .await
    }

    async fn receive(
        &self,
        account: &AccountHandle,
        timeout: Duration,
    ) -> BackendResult<Vec<serde_json::Value>> {
        let detail = timeout.as_secs().to_string();
        let source = account.number.clone();
        self.call("receive", &account.number, false, detail, "receive", |_| {
            vec![serde_json::json!({"envelope": {"source": source}})]
        })
        .await
    }

    async fn create_group(
        &self,
        account: &AccountHandle,
        name: &str,
        _members: &[String],
    ) -> BackendResult<String> {
        let name = name.to_string();
        self.call("create_group", &account.number, true, name.clone(), "create_group", |state| {
            let internal_id = format!("id-{}", state.groups.len());
            state.groups.push(GroupEntry {
                name,
                id: api_group_id(&internal_id),
                internal_id: internal_id.clone(),
                members: Vec::new(),
                blocked: false,
                pending_invites: Vec::new(),
                pending_requests: Vec::new(),
                invite_link: None,
            });
            internal_id
        })
        .await
    }

    async fn list_groups(&self, account: &AccountHandle) -> BackendResult<Vec<GroupEntry>> {
        self.call("list_groups", &account.number, false, String::new(), "list_groups", |state| {
            state.groups.clone()
        })
        .await
    }

    async fn delete_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        let id = internal_id.to_string();
        self.call("delete_group", &account.number, true, id.clone(), "delete_group", |state| {
            state.groups.retain(|g| g.internal_id != id);
        })
        .await
    }

    async fn block_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.call("block_group", &account.number, true, internal_id.to_string(), "block_group", |_| ())
            .await
    }

    async fn join_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.call("join_group", &account.number, true, internal_id.to_string(), "join_group", |_| ())
            .await
    }

    async fn quit_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.call("quit_group", &account.number, true, internal_id.to_string(), "quit_group", |_| ())
            .await
    }

    async fn link(&self, device_name: &str) -> BackendResult<LinkRequest> {
        let (tx, completion) = oneshot::channel();
        self.call("link", "", false, device_name.to_string(), "link", |_| ())
            .await?;
        let _ = tx.send(Ok(LINKED_NUMBER.to_string()));
        Ok(LinkRequest {
            uri: LINK_URI.to_string(),
            completion,
        })
    }

    async fn update_profile(
        &self,
        account: &AccountHandle,
        name: &str,
        avatar: Option<&Path>,
    ) -> BackendResult<()> {
        let seen = avatar.map(|p| (p.to_path_buf(), p.exists()));
        self.call("update_profile", &account.number, true, name.to_string(), "update_profile", |state| {
            state.attachments.extend(seen);
        })
        .await
    }

    async fn list_identities(&self, account: &AccountHandle) -> BackendResult<Vec<IdentityEntry>> {
        self.call("list_identities", &account.number, false, String::new(), "list_identities", |_| {
            vec![IdentityEntry {
                number: OTHER_ACCOUNT.to_string(),
                status: "TRUSTED_UNVERIFIED".to_string(),
                added: "today".to_string(),
                fingerprint: "05 a2".to_string(),
                safety_number: "12345".to_string(),
            }]
        })
        .await
    }

    async fn trust_identity(
        &self,
        account: &AccountHandle,
        number: &str,
        verified_safety_number: Option<&str>,
    ) -> BackendResult<()> {
        let detail = format!("{number}:{}", verified_safety_number.unwrap_or("all"));
        self.call("trust_identity", &account.number, true, detail, "trust_identity", |_| ())
            .await
    }

    async fn send_reaction(&self, account: &AccountHandle, reaction: &Reaction) -> BackendResult<()> {
        self.call("send_reaction", &account.number, true, reaction.emoji.clone(), "send_reaction", |_| ())
            .await
    }
}

/// Temporary directories backing one gateway.
pub struct Dirs {
    pub config: TempDir,
    pub attachments: TempDir,
    pub avatars: TempDir,
}

impl Dirs {
    pub fn new() -> Self {
        Self {
            config: TempDir::new().unwrap(),
            attachments: TempDir::new().unwrap(),
            avatars: TempDir::new().unwrap(),
        }
    }

    pub fn gateway(&self, backend: Arc<StubBackend>) -> Gateway {
        Gateway::new(
            backend,
            self.config.path(),
            self.attachments.path(),
            self.avatars.path(),
        )
    }

    /// Files left in a staging directory.
    pub fn leftovers(dir: &TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}
