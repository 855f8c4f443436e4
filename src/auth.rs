// SPDX-License-Identifier: MIT OR Apache-2.0

//! API key authorization, shared by the HTTP and WebSocket adapters.

use axum::http::{HeaderMap, StatusCode};

use crate::limiter::LimitError;
use crate::state::JsonRpcState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Check the `X-API-KEY` header against the configured keys and debit the
/// key's request bucket. Returns the accepted key, or `None` when
/// enforcement is off; rejections carry the HTTP status to answer with.
pub fn authorize<S>(
    state: &JsonRpcState<S>,
    headers: &HeaderMap,
) -> Result<Option<String>, (StatusCode, String)> {
    if !state.settings.features.enforce_api_key {
        return Ok(None);
    }

    let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "missing X-API-KEY header".to_string(),
        ));
    };

    match state.limiter.check_limits(key) {
        Ok(()) => Ok(Some(key.to_string())),
        Err(LimitError::UnknownKey) => {
            Err((StatusCode::FORBIDDEN, "unknown API key".to_string()))
        }
        Err(e) => Err((StatusCode::TOO_MANY_REQUESTS, e.to_string())),
    }
}

/// Append the API key to the params of methods that charge hbar budgets,
/// so the handler can debit the right bucket.
pub fn maybe_add_api_key(request: &mut serde_json::Value, api_key: &Option<String>) {
    let Some(api_key) = api_key else { return };

    let is_charged = match request.get("method") {
        Some(serde_json::Value::String(method)) => crate::apis::is_charged_method(method),
        _ => false,
    };
    if !is_charged {
        return;
    }

    if let Some(serde_json::Value::Array(params)) = request.get_mut("params") {
        params.push(serde_json::Value::String(api_key.clone()));
    }
}
