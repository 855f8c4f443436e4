// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use futures::StreamExt;
use jsonrpc_v2::{RequestObject, ResponseObjects};
use serde_json::json;

use crate::consensus::SdkClient;
use crate::error::ErrorCode;
use crate::{apis, auth, AppState};

type ResponseHeaders = [(&'static str, &'static str); 1];

const RESPONSE_HEADERS: ResponseHeaders = [("content-type", "application/json-rpc;charset=utf-8")];

/// Upper bound on the worker pool a batch request fans out to.
const MAX_BATCH_WORKERS: usize = 10;

/// Wall-clock budget for a whole batch.
const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

type HttpResponse = (StatusCode, ResponseHeaders, String);

/// Handle JSON-RPC calls: a single `{}` request or a `[{}, ...]` batch.
pub async fn handle<S: SdkClient>(
    headers: HeaderMap,
    axum::extract::State(state): axum::extract::State<AppState<S>>,
    body: String,
) -> HttpResponse {
    let api_key = match auth::authorize(&state.rpc_state, &headers) {
        Ok(api_key) => api_key,
        Err((status, message)) => return (status, RESPONSE_HEADERS, message),
    };

    let request: serde_json::Value = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return respond(
                StatusCode::BAD_REQUEST,
                error_envelope(ErrorCode::ParseError, format!("malformed JSON: {e}")),
            )
        }
    };

    match request {
        serde_json::Value::Array(requests) => handle_batch(&state, requests, api_key).await,
        request @ serde_json::Value::Object(_) => handle_single(&state, request, api_key).await,
        _ => respond(
            StatusCode::BAD_REQUEST,
            error_envelope(ErrorCode::InvalidRequest, "expected an object or an array"),
        ),
    }
}

async fn handle_single<S: SdkClient>(
    state: &AppState<S>,
    request: serde_json::Value,
    api_key: Option<String>,
) -> HttpResponse {
    let request = match prepare_request(request, &api_key) {
        Ok(request) => request,
        Err(envelope) => return respond(StatusCode::BAD_REQUEST, envelope),
    };

    let response = state.rpc_server.handle(request).await;
    debug_response(&response);
    match response {
        ResponseObjects::Empty => (StatusCode::OK, RESPONSE_HEADERS, String::new()),
        response => json_response(&response),
    }
}

/// Dispatch a batch to a bounded worker pool. Responses are collected in
/// input order; notifications contribute nothing; blowing the deadline
/// yields a single top-level timeout error.
async fn handle_batch<S: SdkClient>(
    state: &AppState<S>,
    requests: Vec<serde_json::Value>,
    api_key: Option<String>,
) -> HttpResponse {
    if requests.len() > 1 && !state.rpc_state.settings.features.enable_batch_requests {
        return respond(
            StatusCode::BAD_REQUEST,
            error_envelope(ErrorCode::InvalidRequest, "batch requests are disabled"),
        );
    }

    let workers = requests.len().clamp(1, MAX_BATCH_WORKERS);
    let prepared: Vec<_> = requests
        .into_iter()
        .map(|r| prepare_request(r, &api_key))
        .collect();

    let run = futures::stream::iter(prepared)
        .map(|request| {
            let server = state.rpc_server.clone();
            async move {
                match request {
                    Err(envelope) => Some(envelope),
                    Ok(request) => match server.handle(request).await {
                        ResponseObjects::Empty => None,
                        ResponseObjects::One(response) => serde_json::to_value(response).ok(),
                        // Single requests never produce multiple responses.
                        ResponseObjects::Many(_) => None,
                    },
                }
            }
        })
        .buffered(workers)
        .collect::<Vec<_>>();

    match tokio::time::timeout(BATCH_TIMEOUT, run).await {
        Ok(responses) => {
            let responses: Vec<serde_json::Value> = responses.into_iter().flatten().collect();
            if responses.is_empty() {
                // Nothing but notifications.
                (StatusCode::OK, RESPONSE_HEADERS, String::new())
            } else {
                match serde_json::to_string(&responses) {
                    Ok(body) => (StatusCode::OK, RESPONSE_HEADERS, body),
                    Err(e) => server_error(e),
                }
            }
        }
        Err(_) => respond(
            StatusCode::REQUEST_TIMEOUT,
            error_envelope(ErrorCode::InternalError, "batch request timed out"),
        ),
    }
}

/// Check the request, let the authorization layer tag it, and parse it.
///
/// `RequestObject` can only be parsed with `from_str`, not `from_value`,
/// hence the serialize round-trip after the parameters were amended.
fn prepare_request(
    mut request: serde_json::Value,
    api_key: &Option<String>,
) -> Result<RequestObject, serde_json::Value> {
    if let Some(serde_json::Value::String(method)) = request.get("method") {
        if apis::is_streaming_method(method) {
            return Err(error_envelope(
                ErrorCode::InvalidRequest,
                format!("'{method}' is only available through WebSocket"),
            ));
        }
    }

    auth::maybe_add_api_key(&mut request, api_key);

    let text = serde_json::to_string(&request)
        .map_err(|e| error_envelope(ErrorCode::InvalidRequest, e.to_string()))?;
    serde_json::from_str::<RequestObject>(&text).map_err(|e| {
        tracing::debug!(error = %e, "failed to parse JSON-RPC request");
        error_envelope(ErrorCode::InvalidRequest, "invalid JSON-RPC request")
    })
}

fn error_envelope(code: ErrorCode, message: impl ToString) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code.value(), "message": message.to_string() },
        "id": null,
    })
}

fn respond(status: StatusCode, envelope: serde_json::Value) -> HttpResponse {
    (status, RESPONSE_HEADERS, envelope.to_string())
}

fn debug_response(response: &ResponseObjects) {
    let debug = |r| {
        tracing::debug!(
            response = serde_json::to_string(r).unwrap_or_else(|e| e.to_string()),
            "RPC response"
        );
    };
    match response {
        ResponseObjects::Empty => {}
        ResponseObjects::One(r) => debug(r),
        ResponseObjects::Many(rs) => {
            for r in rs {
                debug(r);
            }
        }
    }
}

fn json_response(response: &ResponseObjects) -> HttpResponse {
    match serde_json::to_string(response) {
        Ok(json) => (StatusCode::OK, RESPONSE_HEADERS, json),
        Err(e) => server_error(e),
    }
}

fn server_error(e: serde_json::Error) -> HttpResponse {
    let msg = e.to_string();
    tracing::error!(error = msg, "RPC to JSON failure");
    (StatusCode::INTERNAL_SERVER_ERROR, RESPONSE_HEADERS, msg)
}
