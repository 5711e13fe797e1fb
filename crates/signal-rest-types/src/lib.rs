//! Wire types of the signal-rest HTTP API.
//!
//! These types describe the JSON bodies exchanged with clients. They carry no
//! server logic so that clients can depend on this crate alone.

use serde::{Deserialize, Serialize};

/// Prefix that marks an API group identifier.
pub const GROUP_PREFIX: &str = "group.";

// ============================================================================
// General
// ============================================================================

/// GET /v1/about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutResponse {
    /// Supported API generations.
    pub versions: Vec<String>,
    /// Build number of the API surface.
    pub build: u32,
}

/// Body of GET/POST /v1/configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub logging: LoggingConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfiguration {
    #[serde(default)]
    pub level: String,
}

/// Error envelope returned on every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind, e.g. `bad_request` or `backend_error`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Classified backend failure, only for `backend_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_kind: Option<String>,
    /// Diagnostic text reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ============================================================================
// Registration
// ============================================================================

/// POST /v1/register/{number}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub use_voice: bool,
    #[serde(default)]
    pub captcha: Option<String>,
}

/// POST /v1/register/{number}/verify/{token}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

// ============================================================================
// Messages
// ============================================================================

/// POST /v1/send (legacy, single target)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageV1 {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub base64_attachment: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

/// POST /v2/send (multiple numbers and/or groups)
///
/// `recipients` is the older v2 spelling: entries carrying the `group.`
/// prefix address groups, everything else addresses numbers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageV2 {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub numbers: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub base64_attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Timestamp of the first successful delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// One entry per backend invocation.
    #[serde(default)]
    pub results: Vec<SendResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// A number list joined by `,`, or a single group id.
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /v1/react
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionRequest {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub reaction: String,
    #[serde(default)]
    pub target_author: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub remove: bool,
}

// ============================================================================
// Groups
// ============================================================================

/// POST /v1/groups/{number}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroupResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    /// API identifier (`group.` + base64 of the internal id).
    pub id: String,
    /// Identifier as known to the backend.
    pub internal_id: String,
    pub members: Vec<String>,
    pub blocked: bool,
    pub pending_invites: Vec<String>,
    pub pending_requests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
}

// ============================================================================
// Profiles & identities
// ============================================================================

/// PUT /v1/profiles/{number}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base64_avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub number: String,
    pub status: String,
    pub added: String,
    pub fingerprint: String,
    pub safety_number: String,
}

/// PUT /v1/identities/{number}/trust/{numbertotrust}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustIdentityRequest {
    #[serde(default)]
    pub verified_safety_number: Option<String>,
}
