// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response classification: which outcomes are valid, which are worth a
//! retry, and how to extract a structured server error from a body.

use http::StatusCode;
use serde::Deserialize;

use crate::config::RequestConfig;
use crate::error::ServerError;

/// A response is valid when it is 2xx or its status is on the call's
/// allow-list of known acceptable errors.
#[must_use]
pub fn is_valid(status: StatusCode, config: &RequestConfig) -> bool {
    status.is_success() || config.allowed_status_codes.contains(&status.as_u16())
}

/// Statuses where a different node may well succeed.
#[must_use]
pub fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: ErrorField,
    status: Option<u16>,
}

// Nodes report either a flat message string or a typed error object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Message(String),
    Detail {
        #[serde(rename = "type")]
        kind: String,
        reason: Option<String>,
    },
}

/// Extract a structured server error from an invalid response's body.
///
/// Returns `None` when the body is empty or not a recognizable error
/// payload; an unparsable body never masks the status-code invalidity,
/// the response simply carries no structured detail.
#[must_use]
pub fn parse_server_error(status: Option<StatusCode>, body: &[u8]) -> Option<ServerError> {
    if body.is_empty() {
        return None;
    }
    let payload: ErrorPayload = serde_json::from_slice(body).ok()?;
    let reason = match payload.error {
        ErrorField::Message(message) => message,
        ErrorField::Detail { kind, reason } => reason.unwrap_or(kind),
    };
    let status = payload
        .status
        .or_else(|| status.map(|s| s.as_u16()))
        .unwrap_or(0);
    Some(ServerError { status, reason })
}
