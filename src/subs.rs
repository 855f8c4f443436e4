// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket subscriptions (`newHeads`, `logs`) driven by a single polling
//! loop. One poll exists per distinct tag no matter how many subscribers
//! share it; the loop stops when the last poll is removed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ethers_core::types::{self as et};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::consensus::SdkClient;
use crate::conv::from_mirror::to_eth_block;
use crate::conv::trim_hash;
use crate::handlers::ws::{MethodNotification, Notification};
use crate::state::{JsonRpcState, WebSocketId, WebSocketSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubKind {
    #[serde(rename = "newHeads")]
    NewHeads,
    #[serde(rename = "logs")]
    Logs,
}

#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub kind: SubKind,
    pub tag: String,
    pub connection: WebSocketId,
    pub sender: WebSocketSender,
}

/// One poll per tag; many subscriptions may share it.
struct Poll {
    kind: SubKind,
    filter: Option<et::Filter>,
    last_polled: u64,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: RwLock<HashMap<String, Subscription>>,
    by_tag: RwLock<HashMap<String, HashSet<String>>>,
    /// At most one subscription exists per connection.
    by_conn: RwLock<HashMap<WebSocketId, String>>,
    polls: Mutex<HashMap<String, Poll>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of live polls; at most one per distinct tag.
    pub fn poll_count(&self) -> usize {
        self.polls.lock().expect("polls poisoned").len()
    }
}

/// The canonical JSON identity of a subscription; `serde_json` orders the
/// keys, so equal queries produce equal tags.
fn subscription_tag(kind: SubKind, filter: Option<&et::Filter>) -> String {
    let (address, topics) = match filter {
        Some(filter) => (
            serde_json::to_value(&filter.address).unwrap_or_default(),
            serde_json::to_value(&filter.topics).unwrap_or_default(),
        ),
        None => (serde_json::Value::Null, serde_json::Value::Null),
    };
    serde_json::json!({
        "event": kind,
        "address": address,
        "topics": topics,
        "includeTransactions": false,
    })
    .to_string()
}

/// Register a subscription for a connection.
///
/// A connection holds at most one subscription: repeating the same kind
/// returns the existing id, a different kind is an error the caller maps to
/// invalid params.
pub async fn subscribe<S: SdkClient>(
    state: Arc<JsonRpcState<S>>,
    connection: WebSocketId,
    sender: WebSocketSender,
    kind: SubKind,
    filter: Option<et::Filter>,
) -> Result<String, ExistingSubscription> {
    let registry = &state.subscriptions;

    {
        let by_conn = registry.by_conn.read().await;
        if let Some(existing_id) = by_conn.get(&connection) {
            let subs = registry.subs.read().await;
            if let Some(existing) = subs.get(existing_id) {
                if existing.kind == kind {
                    return Ok(existing.id.clone());
                }
                return Err(ExistingSubscription(existing.kind));
            }
        }
    }

    let tag = subscription_tag(kind, filter.as_ref());
    let id = crate::state::fresh_id();

    let sub = Subscription {
        id: id.clone(),
        kind,
        tag: tag.clone(),
        connection: connection.clone(),
        sender,
    };

    registry.subs.write().await.insert(id.clone(), sub);
    registry
        .by_tag
        .write()
        .await
        .entry(tag.clone())
        .or_default()
        .insert(id.clone());
    registry.by_conn.write().await.insert(connection, id.clone());

    let latest = state.latest_block_number().await.unwrap_or_default();
    let start_poller = {
        let mut polls = registry.polls.lock().expect("polls poisoned");
        let fresh = !polls.contains_key(&tag);
        if fresh {
            polls.insert(
                tag,
                Poll {
                    kind,
                    filter,
                    last_polled: latest,
                },
            );
        }
        fresh && polls.len() == 1
    };

    if start_poller {
        let mut poller = registry.poller.lock().expect("poller poisoned");
        if poller.is_none() {
            let state = state.clone();
            *poller = Some(tokio::spawn(async move { poll_loop(state).await }));
            tracing::debug!("started the subscription poller");
        }
    }

    Ok(id)
}

/// The connection already holds a subscription of another kind.
#[derive(Debug, Clone, Copy)]
pub struct ExistingSubscription(pub SubKind);

/// Remove a subscription; drops its poll with the last subscriber, and the
/// polling loop with the last poll.
pub async fn unsubscribe<S>(state: &JsonRpcState<S>, id: &str) -> bool {
    let registry = &state.subscriptions;

    let Some(sub) = registry.subs.write().await.remove(id) else {
        return false;
    };
    registry.by_conn.write().await.remove(&sub.connection);

    let mut by_tag = registry.by_tag.write().await;
    let drop_poll = match by_tag.get_mut(&sub.tag) {
        Some(ids) => {
            ids.remove(id);
            ids.is_empty()
        }
        None => false,
    };
    if drop_poll {
        by_tag.remove(&sub.tag);
        let stop = {
            let mut polls = registry.polls.lock().expect("polls poisoned");
            polls.remove(&sub.tag);
            polls.is_empty()
        };
        if stop {
            if let Some(handle) = registry.poller.lock().expect("poller poisoned").take() {
                handle.abort();
                tracing::debug!("stopped the subscription poller");
            }
        }
    }
    true
}

/// Drop every subscription of a disconnecting WebSocket.
pub async fn unsubscribe_connection<S>(state: &JsonRpcState<S>, connection: &WebSocketId) {
    let id = state.subscriptions.by_conn.read().await.get(connection).cloned();
    if let Some(id) = id {
        unsubscribe(state, &id).await;
    }
}

/// The background loop: each tick, every poll whose cursor is behind the
/// latest block gets a task that queries its events and fans them out.
async fn poll_loop<S: SdkClient>(state: Arc<JsonRpcState<S>>) {
    let mut ticker = tokio::time::interval(state.settings.subscriptions.poll_interval);
    loop {
        ticker.tick().await;

        let latest = match state.latest_block_number().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(error = %e, "poller failed to fetch the latest block");
                continue;
            }
        };

        let due: Vec<(String, SubKind, Option<et::Filter>, u64)> = {
            let polls = state.subscriptions.polls.lock().expect("polls poisoned");
            polls
                .iter()
                .filter(|(_, p)| p.last_polled != latest)
                .map(|(tag, p)| (tag.clone(), p.kind, p.filter.clone(), p.last_polled))
                .collect()
        };

        for (tag, kind, filter, last_polled) in due {
            let state = state.clone();
            tokio::spawn(async move {
                let result = match kind {
                    SubKind::NewHeads => {
                        poll_new_heads(&state, &tag, last_polled).await
                    }
                    SubKind::Logs => poll_logs(&state, &tag, filter, last_polled, latest).await,
                };
                match result {
                    Ok(()) => {
                        let mut polls = state.subscriptions.polls.lock().expect("polls poisoned");
                        if let Some(poll) = polls.get_mut(&tag) {
                            poll.last_polled = latest;
                        }
                    }
                    Err(e) => tracing::warn!(tag, error = %e, "subscription poll failed"),
                }
            });
        }
    }
}

async fn poll_new_heads<S: SdkClient>(
    state: &JsonRpcState<S>,
    tag: &str,
    last_polled: u64,
) -> anyhow::Result<()> {
    let base_fee = state.gas_price().await.unwrap_or_default();
    for block in state.mirror.blocks_after(last_polled).await? {
        let head = to_eth_block(&block, Vec::new(), base_fee)?;
        let payload = serde_json::to_value(&head)?;
        let dedup = format!(
            "block_notification:{tag}:{}|{}",
            trim_hash(&block.hash),
            block.number
        );
        notify_subscribers(state, tag, payload, Some(dedup)).await;
    }
    Ok(())
}

async fn poll_logs<S: SdkClient>(
    state: &JsonRpcState<S>,
    tag: &str,
    filter: Option<et::Filter>,
    last_polled: u64,
    latest: u64,
) -> anyhow::Result<()> {
    let filter = filter
        .unwrap_or_default()
        .from_block(last_polled + 1)
        .to_block(latest);
    let logs = state
        .get_logs(&filter)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    for log in logs {
        let payload = serde_json::to_value(&log)?;
        notify_subscribers(state, tag, payload, None).await;
    }
    Ok(())
}

/// Fan out one event to every subscriber of a tag, at most once per second
/// for identical payloads even when poll ticks overlap.
pub async fn notify_subscribers<S>(
    state: &JsonRpcState<S>,
    tag: &str,
    data: serde_json::Value,
    dedup_key: Option<String>,
) {
    let key = dedup_key.unwrap_or_else(|| {
        let digest = Sha256::digest(data.to_string().as_bytes());
        format!("notification:{tag}:{}", hex::encode(digest))
    });

    if !state.caches.dedup.insert_if_absent(key, ()) {
        return;
    }

    let ids = match state.subscriptions.by_tag.read().await.get(tag) {
        Some(ids) => ids.iter().cloned().collect::<Vec<_>>(),
        None => return,
    };

    let subs = state.subscriptions.subs.read().await;
    for id in ids {
        if let Some(sub) = subs.get(&id) {
            let msg = MethodNotification {
                method: "eth_subscription".to_string(),
                notification: Notification {
                    subscription: sub.id.clone(),
                    result: data.clone(),
                },
            };
            if sub.sender.send(msg).is_err() {
                tracing::debug!(id, "subscriber web socket no longer listening");
            }
        }
    }
}
