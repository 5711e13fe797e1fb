//! `signal-cli` binding of [`SignalBackend`].
//!
//! Every operation shells out via `tokio::process::Command`. Children are not
//! killed when the awaiting future is dropped: an invocation that has started
//! runs to completion. The one exception is `link` before it has printed its
//! provisioning URI, since nobody can use that process any more.
//!
//! Caller-supplied option values are always passed as `--option=value` and
//! caller-supplied positionals follow a `--`, so no input is ever read as an
//! option by signal-cli's parser.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use signal_rest_types::{GroupEntry, IdentityEntry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::parse;
use super::{
    BackendError, BackendResult, LinkRequest, Reaction, Recipient, RegisterOptions, SendTarget,
    SignalBackend,
};
use crate::account::AccountHandle;

/// Runs `signal-cli` against a shared configuration directory.
#[derive(Debug, Clone)]
pub struct SignalCli {
    binary: String,
    config_dir: PathBuf,
}

impl SignalCli {
    pub fn new(binary: impl Into<String>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_dir: config_dir.into(),
        }
    }

    /// Base command: global options plus the account selector, if any.
    fn command(&self, account: Option<&AccountHandle>) -> Command {
        let mut cmd = Command::new(&self.binary);
        match account {
            Some(account) => {
                cmd.arg("--config").arg(&account.config_dir);
                // Option-like numbers never get this far; `resolve` refuses them.
                cmd.args(["-u", account.number.as_str()]);
            }
            None => {
                cmd.arg("--config").arg(&self.config_dir);
            }
        }
        cmd.stdin(Stdio::null());

        // SAFETY: runs in the forked child before exec and only calls prctl,
        // which is async-signal-safe. The child gets SIGTERM if the gateway
        // dies, so no signal-cli process outlives it.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd
    }

    /// Run one invocation to completion and return its stdout.
    async fn run(&self, account: Option<&AccountHandle>, args: Vec<String>) -> BackendResult<String> {
        let mut cmd = self.command(account);
        cmd.args(&args);

        debug!(
            number = account.map(|a| a.number.as_str()).unwrap_or("-"),
            command = args.first().map(String::as_str).unwrap_or(""),
            "Invoking signal-cli"
        );

        let output = cmd
            .output()
            .await
            .map_err(|e| BackendError::unavailable(format!("failed to run {}: {e}", self.binary)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic: &str = if stderr.trim().is_empty() {
            &stdout
        } else {
            &stderr
        };
        debug!(status = ?output.status.code(), "signal-cli reported failure");
        Err(BackendError::classify(diagnostic))
    }

    async fn run_account(&self, account: &AccountHandle, args: Vec<String>) -> BackendResult<String> {
        self.run(Some(account), args).await
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `--name=value`, a single argv entry whatever `value` starts with.
fn opt(name: &str, value: &str) -> String {
    format!("--{name}={value}")
}

// ============================================================================
// Command lines
// ============================================================================

fn register_args(options: &RegisterOptions) -> Vec<String> {
    let mut cmd = args(["register"]);
    if options.use_voice {
        cmd.push("--voice".to_string());
    }
    if let Some(ref captcha) = options.captcha {
        cmd.push(opt("captcha", captcha));
    }
    cmd
}

fn verify_args(token: &str, pin: Option<&str>) -> Vec<String> {
    let mut cmd = args(["verify"]);
    if let Some(pin) = pin {
        cmd.push(opt("pin", pin));
    }
    cmd.extend(args(["--", token]));
    cmd
}

fn send_args(target: &SendTarget, message: &str, attachments: &[PathBuf]) -> Vec<String> {
    let mut cmd = vec!["send".to_string(), opt("message", message)];
    if let SendTarget::Group(internal_id) = target {
        cmd.push(opt("group-id", internal_id));
    }
    if !attachments.is_empty() {
        cmd.push("--attachment".to_string());
        cmd.extend(attachments.iter().map(|p| path_arg(p)));
    }
    if let SendTarget::Numbers(numbers) = target {
        cmd.push("--".to_string());
        cmd.extend(numbers.iter().cloned());
    }
    cmd
}

/// Members are option values too; the gateway refuses ones starting with `-`.
fn create_group_args(name: &str, members: &[String]) -> Vec<String> {
    let mut cmd = vec!["updateGroup".to_string(), opt("name", name)];
    if !members.is_empty() {
        cmd.push("--member".to_string());
        cmd.extend(members.iter().cloned());
    }
    cmd
}

fn update_profile_args(name: &str, avatar: Option<&Path>) -> Vec<String> {
    let mut cmd = vec!["updateProfile".to_string(), opt("name", name)];
    match avatar {
        Some(path) => cmd.push(opt("avatar", &path_arg(path))),
        None => cmd.push("--remove-avatar".to_string()),
    }
    cmd
}

fn trust_args(number: &str, verified_safety_number: Option<&str>) -> Vec<String> {
    let mut cmd = args(["trust"]);
    match verified_safety_number {
        Some(safety_number) => cmd.push(opt("verified-safety-number", safety_number)),
        None => cmd.push("--trust-all-known-keys".to_string()),
    }
    cmd.extend(args(["--", number]));
    cmd
}

fn reaction_args(reaction: &Reaction) -> Vec<String> {
    let mut cmd = vec![
        "sendReaction".to_string(),
        opt("emoji", &reaction.emoji),
        opt("target-author", &reaction.target_author),
        opt("target-timestamp", &reaction.target_timestamp.to_string()),
    ];
    if reaction.remove {
        cmd.push("--remove".to_string());
    }
    match &reaction.recipient {
        Recipient::Number(number) => cmd.extend(args(["--", number.as_str()])),
        Recipient::Group(internal_id) => cmd.push(opt("group-id", internal_id)),
    }
    cmd
}

fn group_args(command: &str, internal_id: &str) -> Vec<String> {
    vec![command.to_string(), opt("group-id", internal_id)]
}

#[async_trait]
impl SignalBackend for SignalCli {
    async fn register(
        &self,
        account: &AccountHandle,
        options: &RegisterOptions,
    ) -> BackendResult<()> {
        self.run_account(account, register_args(options)).await?;
        Ok(())
    }

    async fn verify(
        &self,
        account: &AccountHandle,
        token: &str,
        pin: Option<&str>,
    ) -> BackendResult<()> {
        self.run_account(account, verify_args(token, pin)).await?;
        Ok(())
    }

    async fn send(
        &self,
        account: &AccountHandle,
        target: &SendTarget,
        message: &str,
        attachments: &[PathBuf],
    ) -> BackendResult<Option<String>> {
        let output = self
            .run_account(account, send_args(target, message, attachments))
            .await?;
        Ok(parse::parse_timestamp(&output))
    }

    async fn receive(
        &self,
        account: &AccountHandle,
        timeout: Duration,
    ) -> BackendResult<Vec<serde_json::Value>> {
        let seconds = timeout.as_secs().max(1).to_string();
        let cmd = vec![
            "receive".to_string(),
            opt("timeout", &seconds),
            "--json".to_string(),
        ];
        let output = self.run_account(account, cmd).await?;
        Ok(parse::parse_received(&output))
    }

    async fn create_group(
        &self,
        account: &AccountHandle,
        name: &str,
        members: &[String],
    ) -> BackendResult<String> {
        let output = self
            .run_account(account, create_group_args(name, members))
            .await?;
        parse::parse_created_group_id(&output)
            .ok_or_else(|| BackendError::invalid_output(output))
    }

    async fn list_groups(&self, account: &AccountHandle) -> BackendResult<Vec<GroupEntry>> {
        let output = self
            .run_account(account, args(["listGroups", "-d"]))
            .await?;
        Ok(parse::parse_groups(&output))
    }

    async fn delete_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        let mut cmd = group_args("quitGroup", internal_id);
        cmd.push("--delete".to_string());
        self.run_account(account, cmd).await?;
        Ok(())
    }

    async fn block_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.run_account(account, group_args("block", internal_id))
            .await?;
        Ok(())
    }

    async fn join_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.run_account(account, group_args("updateGroup", internal_id))
            .await?;
        Ok(())
    }

    async fn quit_group(&self, account: &AccountHandle, internal_id: &str) -> BackendResult<()> {
        self.run_account(account, group_args("quitGroup", internal_id))
            .await?;
        Ok(())
    }

    async fn link(&self, device_name: &str) -> BackendResult<LinkRequest> {
        let mut cmd = self.command(None);
        cmd.arg("link").arg(opt("name", device_name));
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping this future before the URI arrives kills the child. Once the
        // completion task owns it, it is only dropped after it has exited.
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::unavailable(format!("failed to run {}: {e}", self.binary)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::unavailable("link stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        let first = lines
            .next_line()
            .await
            .map_err(|e| BackendError::invalid_output(e.to_string()))?;
        let Some(uri) = first.as_deref().and_then(parse::parse_link_uri) else {
            // No URI means the process is failing; collect its diagnostics.
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| BackendError::unavailable(e.to_string()))?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostic = if stderr.trim().is_empty() {
                first.unwrap_or_default()
            } else {
                stderr.into_owned()
            };
            return Err(BackendError::classify(&diagnostic));
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let scan = async {
                let mut associated = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(number) = parse::parse_associated_number(&line) {
                        associated = Some(number);
                    }
                }
                associated
            };
            let (associated, output) = tokio::join!(scan, child.wait_with_output());

            let result = match (associated, output) {
                (Some(number), Ok(output)) if output.status.success() => {
                    info!(number = %number, "Device linked");
                    Ok(number)
                }
                (_, Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(status = ?output.status.code(), "Device link did not complete");
                    Err(BackendError::classify(&stderr))
                }
                (_, Err(e)) => Err(BackendError::unavailable(e.to_string())),
            };
            let _ = tx.send(result);
        });

        Ok(LinkRequest {
            uri,
            completion: rx,
        })
    }

    async fn update_profile(
        &self,
        account: &AccountHandle,
        name: &str,
        avatar: Option<&Path>,
    ) -> BackendResult<()> {
        self.run_account(account, update_profile_args(name, avatar))
            .await?;
        Ok(())
    }

    async fn list_identities(&self, account: &AccountHandle) -> BackendResult<Vec<IdentityEntry>> {
        let output = self
            .run_account(account, args(["listIdentities"]))
            .await?;
        Ok(parse::parse_identities(&output))
    }

    async fn trust_identity(
        &self,
        account: &AccountHandle,
        number: &str,
        verified_safety_number: Option<&str>,
    ) -> BackendResult<()> {
        self.run_account(account, trust_args(number, verified_safety_number))
            .await?;
        Ok(())
    }

    async fn send_reaction(&self, account: &AccountHandle, reaction: &Reaction) -> BackendResult<()> {
        self.run_account(account, reaction_args(reaction)).await?;
        Ok(())
    }
}
