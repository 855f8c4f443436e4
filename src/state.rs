// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared state and Mirror Node helper methods for the implementation of
//! the APIs.

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use ethers_core::types::{self as et, BlockNumber, U256};
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

use crate::cache::RelayCaches;
use crate::consensus::{ConsensusClient, SdkClient};
use crate::conv::from_mirror::to_eth_log;
use crate::conv::{tinybars_to_weibars, Timestamp};
use crate::error::{error, ErrorCode};
use crate::filters::FilterStore;
use crate::handlers::ws::MethodNotification;
use crate::limiter::RateLimiter;
use crate::mirror::types::MirrorBlock;
use crate::mirror::MirrorClient;
use crate::precheck::Precheck;
use crate::settings::Settings;
use crate::subs::SubscriptionRegistry;
use crate::JsonRpcResult;

/// Maximum age of the 7-day log query window, in seconds.
const MAX_TIMESTAMP_WINDOW_SECS: i64 = 604_800;

/// Widest block range a multi-address log query may span.
const MAX_BLOCK_RANGE: u64 = 1_000;

pub type WebSocketId = String;
pub type WebSocketSender = UnboundedSender<MethodNotification>;

/// A fresh 32-byte hex identifier, used for filters, subscriptions and
/// WebSocket connections. Unpredictable, so one client cannot clear out
/// another's filters.
pub fn fresh_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// A validated block range with the matching Mirror Node timestamp window.
#[derive(Debug, Clone)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
    /// `timestamp=gte:..&timestamp=lte:..` fragment for Mirror queries.
    pub timestamp_query: String,
}

// Made generic in the SDK client type so API methods can be tested with a
// mock consensus backend without spinning up a server.
pub struct JsonRpcState<S> {
    pub mirror: MirrorClient,
    pub consensus: ConsensusClient<S>,
    pub caches: RelayCaches,
    pub limiter: RateLimiter,
    pub precheck: Precheck,
    pub settings: Settings,
    pub filters: FilterStore,
    pub subscriptions: SubscriptionRegistry,
    web_sockets: RwLock<HashMap<WebSocketId, WebSocketSender>>,
}

impl<S: SdkClient> JsonRpcState<S> {
    pub fn new(settings: Settings, mirror: MirrorClient, sdk: S) -> Self {
        let caches = RelayCaches::new(settings.cache.default_expiration);
        Self {
            mirror,
            consensus: ConsensusClient::new(sdk),
            caches: caches.clone(),
            limiter: RateLimiter::new(&settings),
            precheck: Precheck::new(settings.hedera.chain_id),
            filters: FilterStore::new(settings.cache.default_expiration),
            subscriptions: SubscriptionRegistry::new(),
            web_sockets: Default::default(),
            settings,
        }
    }
}

impl<S> JsonRpcState<S> {
    /// Register the sender of a web socket.
    pub async fn add_web_socket(&self, tx: WebSocketSender) -> WebSocketId {
        let id = fresh_id();
        let mut guard = self.web_sockets.write().await;
        guard.insert(id.clone(), tx);
        id
    }

    /// Remove the sender of a web socket.
    pub async fn remove_web_socket(&self, id: &WebSocketId) {
        let mut guard = self.web_sockets.write().await;
        guard.remove(id);
    }

    /// Get the sender of a web socket.
    pub async fn get_web_socket(&self, id: &WebSocketId) -> anyhow::Result<WebSocketSender> {
        let guard = self.web_sockets.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("web socket not found"))
    }
}

impl<S: SdkClient> JsonRpcState<S> {
    /// The number of the most recent block, cached for a second.
    pub async fn latest_block_number(&self) -> JsonRpcResult<u64> {
        if let Some(number) = self.caches.block_number.get(&()) {
            return Ok(number);
        }
        let block = self.mirror.latest_block().await?;
        self.caches.block_number.insert((), block.number);
        Ok(block.number)
    }

    /// Resolve a block tag to a concrete number.
    pub async fn block_number_by_tag(&self, tag: BlockNumber) -> JsonRpcResult<u64> {
        match tag {
            BlockNumber::Latest
            | BlockNumber::Pending
            | BlockNumber::Safe
            | BlockNumber::Finalized => self.latest_block_number().await,
            BlockNumber::Earliest => Ok(0),
            BlockNumber::Number(n) => Ok(n.as_u64()),
        }
    }

    /// Fetch the Mirror block a tag refers to.
    pub async fn block_by_tag(&self, tag: BlockNumber) -> JsonRpcResult<Option<MirrorBlock>> {
        match tag {
            BlockNumber::Latest
            | BlockNumber::Pending
            | BlockNumber::Safe
            | BlockNumber::Finalized => Ok(Some(self.mirror.latest_block().await?)),
            BlockNumber::Earliest => Ok(self.mirror.block("0").await?),
            BlockNumber::Number(n) => Ok(self.mirror.block(&n.as_u64().to_string()).await?),
        }
    }

    /// Fetch a Mirror block by its Ethereum (32-byte) hash.
    pub async fn block_by_hash(&self, hash: et::H256) -> JsonRpcResult<Option<MirrorBlock>> {
        Ok(self.mirror.block(&format!("{hash:#x}")).await?)
    }

    /// The consensus timestamp at which queries against the state of the
    /// tagged block should be evaluated; `None` means the present.
    pub async fn query_timestamp(&self, tag: BlockNumber) -> JsonRpcResult<Option<String>> {
        match tag {
            BlockNumber::Latest | BlockNumber::Pending => Ok(None),
            tag => match self.block_by_tag(tag).await? {
                Some(block) => Ok(Some(format!("lte:{}", block.timestamp.to))),
                None => error(ErrorCode::ServerError, format!("block {tag:?} not found")),
            },
        }
    }

    /// Validate a log query range and derive its timestamp window.
    ///
    /// The upper bound is clamped to the latest block so clients can query
    /// by fixed ranges; a numeric upper bound below the latest requires an
    /// explicit lower bound.
    pub async fn validate_block_range(
        &self,
        from_block: Option<BlockNumber>,
        to_block: Option<BlockNumber>,
        multiple_addresses: bool,
    ) -> JsonRpcResult<BlockRange> {
        let latest = self.latest_block_number().await?;

        let to = match to_block {
            None
            | Some(BlockNumber::Latest)
            | Some(BlockNumber::Pending)
            | Some(BlockNumber::Safe)
            | Some(BlockNumber::Finalized) => latest,
            Some(tag) => {
                // The explicit bound decides whether fromBlock is required,
                // before it is clamped to the head.
                let resolved = self.block_number_by_tag(tag).await?;
                if resolved != latest && from_block.is_none() {
                    return error(
                        ErrorCode::MissingFromBlockParam,
                        "fromBlock is required when toBlock is not the latest block",
                    );
                }
                resolved.min(latest)
            }
        };

        let from = match from_block {
            None | Some(BlockNumber::Latest) => latest,
            Some(tag) => self.block_number_by_tag(tag).await?,
        };

        if from > to {
            return error(
                ErrorCode::InvalidBlockRange,
                format!("fromBlock {from} is above toBlock {to}"),
            );
        }

        if multiple_addresses && to - from > MAX_BLOCK_RANGE {
            return error(
                ErrorCode::ServerError,
                format!("block range {} exceeds the maximum of {MAX_BLOCK_RANGE}", to - from),
            );
        }

        let from_block = self.fetch_block(from).await?;
        let to_block = self.fetch_block(to).await?;

        let window_start = Timestamp::parse(&from_block.timestamp.from)
            .context("failed to parse the lower block timestamp")?;
        let window_end = Timestamp::parse(&to_block.timestamp.to)
            .context("failed to parse the upper block timestamp")?;

        if window_end.seconds_since(&window_start) > MAX_TIMESTAMP_WINDOW_SECS {
            return error(
                ErrorCode::InvalidTimestampRange,
                format!(
                    "timestamp range {window_start} to {window_end} exceeds 7 days"
                ),
            );
        }

        Ok(BlockRange {
            from,
            to,
            timestamp_query: format!(
                "timestamp=gte:{}&timestamp=lte:{}",
                from_block.timestamp.from, to_block.timestamp.to
            ),
        })
    }

    async fn fetch_block(&self, number: u64) -> JsonRpcResult<MirrorBlock> {
        match self.mirror.block(&number.to_string()).await? {
            Some(block) => Ok(block),
            None => error(ErrorCode::ServerError, format!("block {number} not found")),
        }
    }

    /// Retrieve logs for a filter: either the single block named by hash or
    /// a validated range, one Mirror query per address (or one global one).
    pub async fn get_logs(&self, filter: &et::Filter) -> JsonRpcResult<Vec<et::Log>> {
        let timestamp_query = match filter.block_option {
            et::FilterBlockOption::AtBlockHash(block_hash) => {
                match self.block_by_hash(block_hash).await? {
                    None => return Ok(Vec::new()),
                    Some(block) => format!(
                        "timestamp=gte:{}&timestamp=lte:{}",
                        block.timestamp.from, block.timestamp.to
                    ),
                }
            }
            et::FilterBlockOption::Range {
                from_block,
                to_block,
            } => {
                let addresses = filter_addresses(filter);
                let range = self
                    .validate_block_range(from_block, to_block, addresses.len() > 1)
                    .await?;
                range.timestamp_query
            }
        };

        let mut query = timestamp_query;
        for (i, topic) in filter_topics(filter).into_iter().enumerate() {
            if let Some(topic) = topic {
                query.push_str(&format!("&topic{i}={topic:#x}"));
            }
        }

        let addresses = filter_addresses(filter);
        let mut logs = Vec::new();
        if addresses.is_empty() {
            for log in self.mirror.logs(&query).await? {
                logs.push(to_eth_log(&log)?);
            }
        } else {
            for address in addresses {
                for log in self
                    .mirror
                    .logs_by_address(&format!("{address:#x}"), &query)
                    .await?
                {
                    logs.push(to_eth_log(&log)?);
                }
            }
        }
        Ok(logs)
    }

    /// The network gas price in weibars, cached with the default TTL.
    pub async fn gas_price(&self) -> JsonRpcResult<U256> {
        if let Some(price) = self.caches.gas_price.get(&()) {
            return Ok(price);
        }
        let fees = self.mirror.network_fees(None).await?;
        let tinybars = fees
            .ethereum_transaction_gas()
            .ok_or_else(|| anyhow!("the fee schedule has no EthereumTransaction entry"))?;
        let price = tinybars_to_weibars(tinybars);
        self.caches.gas_price.insert((), price);
        Ok(price)
    }

    /// Resolve the canonical EVM address of an account, contract or token.
    ///
    /// The three lookups race; the first to answer wins. Addresses that
    /// resolve to nothing are returned unchanged.
    pub async fn resolve_evm_address(&self, address: et::H160) -> et::H160 {
        if let Some(resolved) = self.caches.evm_address.get(&address) {
            return resolved;
        }

        let contract = async {
            let contract = self
                .mirror
                .contract(&format!("{address:#x}"))
                .await?
                .ok_or_else(|| anyhow!("no contract"))?;
            contract
                .evm_address
                .as_deref()
                .ok_or_else(|| anyhow!("contract has no EVM address"))?
                .parse::<et::H160>()
                .context("invalid contract EVM address")
        };

        let account = async {
            let account = self
                .mirror
                .account(&format!("{address:#x}"), None)
                .await?
                .ok_or_else(|| anyhow!("no account"))?;
            account
                .evm_address
                .as_deref()
                .ok_or_else(|| anyhow!("account has no EVM address"))?
                .parse::<et::H160>()
                .context("invalid account EVM address")
        };

        // Only long-zero addresses can denote tokens.
        let token = async {
            let id = long_zero_entity_num(&address).ok_or_else(|| anyhow!("not long-zero"))?;
            self.mirror
                .token(&format!("0.0.{id}"))
                .await?
                .ok_or_else(|| anyhow!("no token"))?;
            Ok(address)
        };

        let resolved = futures::future::select_ok([
            Box::pin(contract) as futures::future::BoxFuture<'_, anyhow::Result<et::H160>>,
            Box::pin(account),
            Box::pin(token),
        ])
        .await
        .map(|(addr, _)| addr)
        .unwrap_or(address);

        self.caches.evm_address.insert(address, resolved);
        resolved
    }
}

/// The entity number of a long-zero address (twelve zero bytes followed by
/// the entity number).
pub fn long_zero_entity_num(address: &et::H160) -> Option<u64> {
    let bytes = address.as_bytes();
    if bytes[..12].iter().all(|b| *b == 0) {
        Some(u64::from_be_bytes(bytes[12..].try_into().ok()?))
    } else {
        None
    }
}

/// The addresses named by a filter, zero or more.
pub fn filter_addresses(filter: &et::Filter) -> Vec<et::H160> {
    match &filter.address {
        None => Vec::new(),
        Some(et::ValueOrArray::Value(addr)) => vec![*addr],
        Some(et::ValueOrArray::Array(addrs)) => addrs.clone(),
    }
}

/// The first topic of each position, if any. The Mirror Node matches one
/// value per position, so OR-lists collapse to their first entry.
pub fn filter_topics(filter: &et::Filter) -> [Option<et::H256>; 4] {
    let mut topics = [None; 4];
    for (i, topic) in filter.topics.iter().enumerate() {
        topics[i] = match topic {
            Some(et::ValueOrArray::Value(Some(t))) => Some(*t),
            Some(et::ValueOrArray::Array(ts)) => ts.iter().flatten().next().copied(),
            _ => None,
        };
    }
    topics
}
