//! Send contract reconciliation.
//!
//! The legacy (`/v1/send`) and current (`/v2/send`) request bodies are both
//! normalized into one [`OutgoingMessage`] before anything else happens, so
//! the rest of the gateway only knows a single send operation.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use signal_rest_types::{GROUP_PREFIX, SendMessageV1, SendMessageV2};

use crate::backend::api_group_id;
use crate::error::GatewayError;

/// Addressees of a send: numbers and API group ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub numbers: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl Recipients {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && self.groups.is_empty()
    }
}

/// Decoded upload that still has to be staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub suggested_name: Option<String>,
}

/// The one internal send representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sender: String,
    pub recipients: Recipients,
    pub body: String,
    pub attachments: Vec<Upload>,
}

impl OutgoingMessage {
    /// Legacy contract: exactly one number, or one group when `is_group`.
    pub fn from_v1(req: SendMessageV1) -> Result<Self, GatewayError> {
        let sender = require_sender(&req.number)?;
        let [recipient] = <[String; 1]>::try_from(req.recipients).map_err(|recipients| {
            GatewayError::bad_request(format!(
                "exactly one recipient is required, got {}",
                recipients.len()
            ))
        })?;
        let recipient = recipient.trim().to_string();
        if recipient.is_empty() {
            return Err(GatewayError::bad_request("recipient must not be empty"));
        }

        let mut recipients = Recipients::default();
        if req.is_group {
            // Legacy clients pass the backend's own group id.
            let group = if recipient.starts_with(GROUP_PREFIX) {
                recipient
            } else {
                api_group_id(&recipient)
            };
            recipients.groups.insert(group);
        } else {
            recipients.numbers.insert(recipient);
        }

        let attachments = req
            .base64_attachment
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(decode_upload)
            .transpose()?
            .into_iter()
            .collect();

        Ok(Self {
            sender,
            recipients,
            body: req.message,
            attachments,
        })
    }

    /// Current contract: any mix of numbers and groups, at least one.
    pub fn from_v2(req: SendMessageV2) -> Result<Self, GatewayError> {
        let sender = require_sender(&req.number)?;

        let mut recipients = Recipients::default();
        for number in req.numbers {
            push_nonempty(&mut recipients.numbers, number);
        }
        for group in req.groups {
            push_nonempty(&mut recipients.groups, group);
        }
        for recipient in req.recipients {
            if recipient.trim().starts_with(GROUP_PREFIX) {
                push_nonempty(&mut recipients.groups, recipient);
            } else {
                push_nonempty(&mut recipients.numbers, recipient);
            }
        }
        if recipients.is_empty() {
            return Err(GatewayError::bad_request(
                "at least one recipient number or group is required",
            ));
        }

        let attachments = req
            .base64_attachments
            .iter()
            .map(|a| decode_upload(a))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sender,
            recipients,
            body: req.message,
            attachments,
        })
    }
}

fn require_sender(number: &str) -> Result<String, GatewayError> {
    let number = number.trim();
    if number.is_empty() {
        return Err(GatewayError::bad_request("number must not be empty"));
    }
    Ok(number.to_string())
}

fn push_nonempty(set: &mut BTreeSet<String>, value: String) {
    let value = value.trim();
    if !value.is_empty() {
        set.insert(value.to_string());
    }
}

/// Decode an upload given as plain base64 or as a data URI
/// (`data:<mime>[;filename=<name>];base64,<data>`).
///
/// For data URIs the file name is taken from the `filename` parameter, or
/// derived from the mime type's usual extension.
pub fn decode_upload(encoded: &str) -> Result<Upload, GatewayError> {
    let encoded = encoded.trim();
    let (data, suggested_name) = match encoded.strip_prefix("data:") {
        Some(uri) => {
            let (meta, data) = uri
                .split_once(',')
                .ok_or_else(|| GatewayError::bad_request("malformed data URI attachment"))?;
            let mut params = meta.split(';');
            let mime = params.next().unwrap_or_default();
            let mut file_name = None;
            let mut is_base64 = false;
            for param in params {
                if param == "base64" {
                    is_base64 = true;
                } else if let Some(name) = param.strip_prefix("filename=") {
                    file_name = Some(name.to_string());
                }
            }
            if !is_base64 {
                return Err(GatewayError::bad_request(
                    "data URI attachments must be base64 encoded",
                ));
            }
            let name = file_name.or_else(|| {
                mime_guess::get_mime_extensions_str(mime)
                    .and_then(|exts| exts.first())
                    .map(|ext| format!("attachment.{ext}"))
            });
            (data, name)
        }
        None => (encoded, None),
    };

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| GatewayError::bad_request(format!("invalid base64 attachment: {e}")))?;
    Ok(Upload {
        bytes,
        suggested_name,
    })
}
