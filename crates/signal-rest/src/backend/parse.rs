//! Parsers for signal-cli's textual replies.

use signal_rest_types::{GroupEntry, IdentityEntry};
use tracing::warn;

use super::group_id::api_group_id;

const GROUP_MARKERS: [&str; 7] = [
    " Name: ",
    " Active: ",
    " Blocked: ",
    " Members: ",
    " Pending members: ",
    " Requesting members: ",
    " Link: ",
];

const IDENTITY_MARKERS: [&str; 3] = [" Added: ", " Fingerprint: ", " Safety Number: "];

/// Split `line` at the given markers, in order.
///
/// Returns the text before the first marker and, per marker, the text up to
/// the next marker that was found. Missing markers yield `None`.
fn split_fields<'a, const N: usize>(
    line: &'a str,
    markers: &[&str; N],
) -> (&'a str, [Option<&'a str>; N]) {
    let mut positions: [Option<(usize, usize)>; N] = [None; N];
    let mut cursor = 0;
    for (i, marker) in markers.iter().enumerate() {
        if let Some(offset) = line[cursor..].find(marker) {
            let start = cursor + offset;
            let value_start = start + marker.len();
            positions[i] = Some((start, value_start));
            cursor = value_start;
        }
    }

    let found: Vec<(usize, usize)> = positions.iter().flatten().copied().collect();
    let head_end = found.first().map(|(start, _)| *start).unwrap_or(line.len());

    let mut values: [Option<&'a str>; N] = [None; N];
    for (i, position) in positions.iter().enumerate() {
        if let Some((_, value_start)) = position {
            let end = found
                .iter()
                .map(|(start, _)| *start)
                .find(|start| start > value_start)
                .unwrap_or(line.len());
            values[i] = Some(line[*value_start..end].trim());
        }
    }

    (line[..head_end].trim(), values)
}

/// `[+111, +222]` -> `["+111", "+222"]`
fn parse_list(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(String::from)
        .collect()
}

/// Parse the output of `listGroups -d`.
pub fn parse_groups(output: &str) -> Vec<GroupEntry> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Id: "))
        .map(|rest| {
            let (internal_id, [name, _active, blocked, members, pending, requesting, link]) =
                split_fields(rest, &GROUP_MARKERS);
            GroupEntry {
                name: name.unwrap_or_default().to_string(),
                id: api_group_id(internal_id),
                internal_id: internal_id.to_string(),
                members: parse_list(members),
                blocked: blocked.is_some_and(|b| b.eq_ignore_ascii_case("true")),
                pending_invites: parse_list(pending),
                pending_requests: parse_list(requesting),
                invite_link: link.filter(|l| !l.is_empty()).map(String::from),
            }
        })
        .collect()
}

/// Parse the output of `listIdentities`.
pub fn parse_identities(output: &str) -> Vec<IdentityEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (number, rest) = line.trim().split_once(": ")?;
            let (status, [added, fingerprint, safety_number]) =
                split_fields(rest, &IDENTITY_MARKERS);
            Some(IdentityEntry {
                number: number.to_string(),
                status: status.to_string(),
                added: added.unwrap_or_default().to_string(),
                fingerprint: fingerprint.unwrap_or_default().to_string(),
                safety_number: safety_number.unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Extract the group id from `Creating new group "<id>" …`.
pub fn parse_created_group_id(output: &str) -> Option<String> {
    let start = output.find('"')? + 1;
    let len = output[start..].find('"')?;
    let id = &output[start..start + len];
    (!id.is_empty()).then(|| id.to_string())
}

/// The message timestamp printed by `send`, if any.
pub fn parse_timestamp(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .filter(|line| line.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
}

/// Provisioning URI printed first by `link`.
pub fn parse_link_uri(line: &str) -> Option<String> {
    let line = line.trim();
    (line.starts_with("tsdevice:") || line.starts_with("sgnl://")).then(|| line.to_string())
}

/// Number reported by `link` once the primary device has accepted.
pub fn parse_associated_number(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("Associated with: ")?;
    let number = rest.split_whitespace().next()?;
    Some(number.to_string())
}

/// Parse `receive --json` output: one JSON document per line.
///
/// Messages are already consumed once the backend prints them, so lines that
/// do not parse are kept verbatim as JSON strings instead of being dropped.
pub fn parse_received(output: &str) -> Vec<serde_json::Value> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable line in receive output");
                serde_json::Value::String(line.to_string())
            }
        })
        .collect()
}
