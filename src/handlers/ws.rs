// SPDX-License-Identifier: MIT OR Apache-2.0

use axum::{
    extract::{
        ws::{Message, WebSocket},
        WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use jsonrpc_v2::{RequestObject, ResponseObject, ResponseObjects, V2};
use serde_json::json;

use crate::consensus::SdkClient;
use crate::state::WebSocketId;
use crate::{apis, auth, subs, AppState, JsonRpcServer};

/// The payload of an `eth_subscription` frame.
#[derive(Debug)]
pub struct Notification {
    pub subscription: String,
    pub result: serde_json::Value,
}

#[derive(Debug)]
pub struct MethodNotification {
    // There is only one streaming method at the moment, but let's not hardcode it here.
    pub method: String,
    pub notification: Notification,
}

pub async fn handle<S: SdkClient>(
    headers: HeaderMap,
    axum::extract::State(state): axum::extract::State<AppState<S>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let api_key = match auth::authorize(&state.rpc_state, &headers) {
        Ok(api_key) => api_key,
        Err((status, message)) => return (status, message).into_response(),
    };
    ws.on_upgrade(move |socket| async { rpc_ws_handler_inner(state, socket, api_key).await })
        .into_response()
}

/// Handle requests in a loop, interpreting each message as a JSON-RPC
/// request, while forwarding subscription notifications to the socket.
async fn rpc_ws_handler_inner<S: SdkClient>(
    state: AppState<S>,
    socket: WebSocket,
    api_key: Option<String>,
) {
    tracing::debug!("accepted WS connection");
    let (mut sender, mut receiver) = socket.split();

    // Create a channel over which the application can send messages to this socket.
    let (notif_tx, mut notif_rx) = tokio::sync::mpsc::unbounded_channel();

    let web_socket_id = state.rpc_state.add_web_socket(notif_tx).await;

    loop {
        let keep = tokio::select! {
            Some(Ok(message)) = receiver.next() => {
                handle_incoming(&web_socket_id, &api_key, &state.rpc_server, &mut sender, message).await
            },
            Some(notif) = notif_rx.recv() => {
                handle_outgoing(&web_socket_id, &mut sender, notif).await
            },
            else => break,
        };

        if !keep {
            break;
        }
    }

    // Clean up whatever the connection left behind.
    tracing::debug!(%web_socket_id, "removing WS connection");
    subs::unsubscribe_connection(&state.rpc_state, &web_socket_id).await;
    state.rpc_state.remove_web_socket(&web_socket_id).await;
}

/// Handle an incoming request.
async fn handle_incoming(
    web_socket_id: &WebSocketId,
    api_key: &Option<String>,
    rpc_server: &JsonRpcServer,
    sender: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> bool {
    if let Message::Text(mut request_text) = message {
        if !request_text.is_empty() {
            tracing::debug!(%web_socket_id, request = %request_text, "WS request received");

            // We have to deserialize-amend-reserialize because `RequestObject`
            // can only be parsed with `from_str`, not `from_value`.
            request_text = amend_request(request_text, web_socket_id, api_key);

            match serde_json::from_str::<RequestObject>(&request_text) {
                Ok(req) => {
                    return send_call_result(web_socket_id, rpc_server, sender, req).await;
                }
                Err(e) => {
                    deserialization_error("RequestObject", e);
                }
            }
        }
    }
    true
}

fn deserialization_error(what: &str, e: serde_json::Error) {
    // Not responding to the websocket because it requires valid responses, which need to have
    // the `id` field present, which we'd only get if we managed to parse the request.
    // Using `debug!` so someone sending junk cannot flood the log with warnings.
    tracing::debug!("error deserializing WS payload as {what}: {e}");
}

/// Append the WebSocket id to streaming methods and the API key to charged
/// methods, so the handlers can find the connection and the budget.
///
/// This is best effort. If it fails, just let the JSON-RPC server handle
/// the problem.
fn amend_request(
    request_text: String,
    web_socket_id: &WebSocketId,
    api_key: &Option<String>,
) -> String {
    match serde_json::from_str::<serde_json::Value>(&request_text) {
        Ok(mut json) => {
            let is_streaming = match json.get("method") {
                Some(serde_json::Value::String(method)) => apis::is_streaming_method(method),
                _ => false,
            };

            if is_streaming {
                match json.get_mut("params") {
                    Some(serde_json::Value::Array(ref mut params)) => {
                        params.push(serde_json::Value::String(web_socket_id.clone()));
                    }
                    _ => {
                        tracing::debug!("JSON-RPC streaming request has no or unexpected params");
                        return request_text;
                    }
                }
            }

            auth::maybe_add_api_key(&mut json, api_key);

            serde_json::to_string(&json).unwrap_or(request_text)
        }
        Err(e) => {
            deserialization_error("JSON", e);
            request_text
        }
    }
}

/// Send a message from the application, result of an async subscription.
///
/// Returns `false` if the socket has been closed, otherwise `true` to keep working.
async fn handle_outgoing(
    web_socket_id: &WebSocketId,
    sender: &mut SplitSink<WebSocket, Message>,
    notif: MethodNotification,
) -> bool {
    let message = json!({
        "jsonrpc": V2,
        "method": notif.method,
        "params": {
            "subscription": notif.notification.subscription,
            "result": notif.notification.result
        }
    });

    match serde_json::to_string(&message) {
        Err(e) => {
            tracing::error!(error = ?e, "failed to serialize notification to JSON");
        }
        Ok(json) => {
            tracing::debug!(%web_socket_id, json = %json, "sending notification to WS");
            if let Err(e) = sender.send(Message::Text(json)).await {
                tracing::warn!(%web_socket_id, error = ?e, "failed to send notification to WS");
                if is_closed_connection(e) {
                    return false;
                }
            }
        }
    }
    true
}

/// Call the RPC method and respond through the WebSocket.
async fn send_call_result(
    web_socket_id: &WebSocketId,
    server: &JsonRpcServer,
    sender: &mut SplitSink<WebSocket, Message>,
    request: RequestObject,
) -> bool {
    let method = request.method_ref();

    tracing::debug!("RPC WS called method: {}", method);

    match server.handle(request).await {
        ResponseObjects::Empty => true,
        ResponseObjects::One(response) => send_response(web_socket_id, sender, response).await,
        ResponseObjects::Many(responses) => {
            for response in responses {
                if !send_response(web_socket_id, sender, response).await {
                    return false;
                }
            }
            true
        }
    }
}

async fn send_response(
    web_socket_id: &WebSocketId,
    sender: &mut SplitSink<WebSocket, Message>,
    response: ResponseObject,
) -> bool {
    let response = serde_json::to_string(&response);

    match response {
        Err(e) => {
            tracing::error!(error = ?e, "failed to serialize response to JSON");
        }
        Ok(json) => {
            tracing::debug!(%web_socket_id, json = %json, "sending response to WS");
            if let Err(e) = sender.send(Message::Text(json)).await {
                tracing::warn!(%web_socket_id, error = ?e, "failed to send response to WS");
                if is_closed_connection(e) {
                    return false;
                }
            }
        }
    }
    true
}

fn is_closed_connection(e: axum::Error) -> bool {
    e.to_string().contains("closed connection")
}

#[cfg(test)]
mod tests {
    use super::amend_request;

    #[test]
    fn subscribe_requests_get_the_socket_id() {
        let text = r#"{"id":0,"jsonrpc":"2.0","method":"eth_subscribe","params":["newHeads"]}"#;
        let amended = amend_request(text.to_string(), &"0xws1".to_string(), &None);
        let json: serde_json::Value = serde_json::from_str(&amended).unwrap();
        assert_eq!(json["params"], serde_json::json!(["newHeads", "0xws1"]));
    }

    #[test]
    fn other_requests_pass_through() {
        let text = r#"{"id":0,"jsonrpc":"2.0","method":"eth_blockNumber","params":[]}"#;
        let amended = amend_request(text.to_string(), &"0xws1".to_string(), &None);
        let json: serde_json::Value = serde_json::from_str(&amended).unwrap();
        assert_eq!(json["params"], serde_json::json!([]));
    }
}
