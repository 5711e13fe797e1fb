//! Backend error classification.

use std::fmt;

use thiserror::Error;

/// Classified failure of a backend invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The backend could not be started.
    Unavailable,
    NotRegistered,
    VerificationFailed,
    CaptchaRequired,
    RateLimited,
    UnknownGroup,
    UntrustedIdentity,
    /// The backend succeeded but its reply could not be understood.
    InvalidOutput,
    Failed,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::Unavailable => "unavailable",
            BackendErrorKind::NotRegistered => "not_registered",
            BackendErrorKind::VerificationFailed => "verification_failed",
            BackendErrorKind::CaptchaRequired => "captcha_required",
            BackendErrorKind::RateLimited => "rate_limited",
            BackendErrorKind::UnknownGroup => "unknown_group",
            BackendErrorKind::UntrustedIdentity => "untrusted_identity",
            BackendErrorKind::InvalidOutput => "invalid_output",
            BackendErrorKind::Failed => "failed",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            BackendErrorKind::Unavailable => "messaging backend is unavailable",
            BackendErrorKind::NotRegistered => "account is not registered",
            BackendErrorKind::VerificationFailed => "verification failed",
            BackendErrorKind::CaptchaRequired => "registration requires a captcha",
            BackendErrorKind::RateLimited => "rate limited by the messaging service",
            BackendErrorKind::UnknownGroup => "group is unknown to the account",
            BackendErrorKind::UntrustedIdentity => "recipient identity is not trusted",
            BackendErrorKind::InvalidOutput => "messaging backend returned an unexpected reply",
            BackendErrorKind::Failed => "messaging backend operation failed",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed backend call.
///
/// The message is derived from `kind` only; raw backend output is kept in
/// `detail` for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", kind.describe())]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub detail: Option<String>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind,
            detail: (!detail.trim().is_empty()).then(|| detail.trim().to_string()),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, detail)
    }

    pub fn invalid_output(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidOutput, detail)
    }

    /// Classify a failed invocation from its diagnostic output.
    pub fn classify(output: &str) -> Self {
        let lower = output.to_lowercase();
        let kind = if lower.contains("not registered") || lower.contains("user is not registered")
        {
            BackendErrorKind::NotRegistered
        } else if lower.contains("captcha") {
            BackendErrorKind::CaptchaRequired
        } else if lower.contains("rate limit") || lower.contains("413") || lower.contains("429") {
            BackendErrorKind::RateLimited
        } else if lower.contains("verif") && (lower.contains("code") || lower.contains("fail")) {
            BackendErrorKind::VerificationFailed
        } else if lower.contains("group not found")
            || lower.contains("unknown group")
            || lower.contains("invalid group id")
        {
            BackendErrorKind::UnknownGroup
        } else if lower.contains("untrusted") {
            BackendErrorKind::UntrustedIdentity
        } else {
            BackendErrorKind::Failed
        };
        Self::new(kind, output)
    }
}
