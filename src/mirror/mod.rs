// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed client for the Mirror Node REST API.

use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::settings::MirrorNodeSettings;

pub mod types;

use types::*;

/// Page size for paginated queries.
const PAGE_LIMIT: u32 = 100;

/// Upper bound on followed `links.next` pages per query.
const MAX_PAGES: u32 = 10;

/// A simulated call failure, carrying any revert data the Mirror Node
/// returned. Surfaced through `anyhow` and recovered by downcasting.
#[derive(Debug, Clone)]
pub struct MirrorCallFailure {
    pub message: String,
    pub detail: Option<String>,
    pub data: Option<String>,
}

impl std::fmt::Display for MirrorCallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) if !detail.is_empty() => write!(f, "{}: {}", self.message, detail),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for MirrorCallFailure {}

#[derive(Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    base_url: Url,
    web3_url: Url,
}

impl MirrorClient {
    pub fn new(settings: &MirrorNodeSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build the Mirror Node HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            web3_url: settings.web3_url.clone(),
        })
    }

    fn endpoint(&self, base: &Url, path_and_query: &str) -> anyhow::Result<Url> {
        base.join(path_and_query)
            .with_context(|| format!("invalid Mirror Node path {path_and_query}"))
    }

    /// GET a REST resource; `None` on 404.
    async fn get_opt<T: DeserializeOwned>(&self, path_and_query: &str) -> anyhow::Result<Option<T>> {
        let url = self.endpoint(&self.base_url, path_and_query)?;
        tracing::debug!(%url, "mirror node request");

        let response = self.http.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Mirror Node responded with {} for {url}",
                response.status()
            ));
        }
        let value = response
            .json()
            .await
            .with_context(|| format!("failed to decode Mirror Node response from {url}"))?;
        Ok(Some(value))
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> anyhow::Result<T> {
        self.get_opt(path_and_query)
            .await?
            .ok_or_else(|| anyhow!("Mirror Node has no data at {path_and_query}"))
    }

    /// Follow `links.next` pages, accumulating items with `extract`, up to
    /// [MAX_PAGES] pages.
    async fn get_paged<R, T, F>(&self, first: String, extract: F) -> anyhow::Result<Vec<T>>
    where
        R: DeserializeOwned,
        F: Fn(R) -> (Vec<T>, Option<String>),
    {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(path) = next {
            if pages == MAX_PAGES {
                tracing::warn!(path, "truncating paginated Mirror Node query");
                break;
            }
            pages += 1;
            let page: R = self.get(&path).await?;
            let (mut batch, link) = extract(page);
            items.append(&mut batch);
            next = link;
        }
        Ok(items)
    }

    /// The most recent block known to the Mirror Node.
    pub async fn latest_block(&self) -> anyhow::Result<MirrorBlock> {
        let mut response: BlocksResponse = self.get("api/v1/blocks?limit=1&order=desc").await?;
        response
            .blocks
            .pop()
            .ok_or_else(|| anyhow!("Mirror Node has no blocks"))
    }

    /// Fetch a block by number or by its 32-byte (or padded 48-byte) hash.
    pub async fn block(&self, number_or_hash: &str) -> anyhow::Result<Option<MirrorBlock>> {
        self.get_opt(&format!("api/v1/blocks/{number_or_hash}")).await
    }

    /// Blocks with a number strictly greater than `number`, oldest first.
    pub async fn blocks_after(&self, number: u64) -> anyhow::Result<Vec<MirrorBlock>> {
        self.get_paged(
            format!("api/v1/blocks?block.number=gt:{number}&order=asc&limit={PAGE_LIMIT}"),
            |r: BlocksResponse| (r.blocks, r.links.next),
        )
        .await
    }

    /// A contract result by Ethereum transaction hash or transaction id
    /// (in Mirror Node `shard.realm.num-sec-nanos` form).
    pub async fn contract_result(&self, id: &str) -> anyhow::Result<Option<ContractResult>> {
        self.get_opt(&format!("api/v1/contracts/results/{id}")).await
    }

    /// Fetch a contract result, retrying while the record is immature.
    /// Returns whatever was last seen once the attempts are exhausted.
    pub async fn contract_result_with_retry(
        &self,
        id: &str,
        attempts: u32,
        delay: Duration,
    ) -> anyhow::Result<Option<ContractResult>> {
        let mut last = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match self.contract_result(id).await? {
                Some(res) if !res.is_immature() => return Ok(Some(res)),
                other => {
                    tracing::debug!(id, attempt, "contract result not indexed yet; retrying");
                    last = other;
                }
            }
        }
        Ok(last)
    }

    /// All contract results within a timestamp window, oldest first.
    /// `timestamp_query` is a `timestamp=gte:..&timestamp=lte:..` fragment.
    pub async fn contract_results(
        &self,
        timestamp_query: &str,
    ) -> anyhow::Result<Vec<ContractResult>> {
        self.get_paged(
            format!("api/v1/contracts/results?{timestamp_query}&limit={PAGE_LIMIT}&order=asc"),
            |r: ContractResultsResponse| (r.results, r.links.next),
        )
        .await
    }

    /// Logs across all contracts matching the query fragment.
    pub async fn logs(&self, query: &str) -> anyhow::Result<Vec<MirrorLog>> {
        self.get_paged(
            format!("api/v1/contracts/results/logs?{query}&limit={PAGE_LIMIT}&order=asc"),
            |r: LogsResponse| (r.logs, r.links.next),
        )
        .await
    }

    /// Logs emitted by one contract, matching the query fragment.
    pub async fn logs_by_address(
        &self,
        address: &str,
        query: &str,
    ) -> anyhow::Result<Vec<MirrorLog>> {
        self.get_paged(
            format!("api/v1/contracts/{address}/results/logs?{query}&limit={PAGE_LIMIT}&order=asc"),
            |r: LogsResponse| (r.logs, r.links.next),
        )
        .await
    }

    /// An account by EVM address, alias or `shard.realm.num` id; with a
    /// timestamp the balance is as of that consensus time.
    pub async fn account(
        &self,
        id: &str,
        timestamp: Option<&str>,
    ) -> anyhow::Result<Option<MirrorAccount>> {
        let mut path = format!("api/v1/accounts/{id}?limit=1");
        if let Some(ts) = timestamp {
            path.push_str(&format!("&timestamp={ts}"));
        }
        self.get_opt(&path).await
    }

    /// The account's most recent ETHEREUMTRANSACTION at or before the
    /// given consensus timestamp.
    pub async fn account_latest_ethereum_transaction(
        &self,
        id: &str,
        timestamp: &str,
    ) -> anyhow::Result<Option<MirrorAccount>> {
        self.get_opt(&format!(
            "api/v1/accounts/{id}?transactiontype=ethereumtransaction&timestamp=lte:{timestamp}&limit=1&order=desc"
        ))
        .await
    }

    pub async fn contract(&self, id: &str) -> anyhow::Result<Option<MirrorContract>> {
        self.get_opt(&format!("api/v1/contracts/{id}")).await
    }

    pub async fn token(&self, id: &str) -> anyhow::Result<Option<MirrorToken>> {
        self.get_opt(&format!("api/v1/tokens/{id}")).await
    }

    /// The value of one storage slot, as of the given consensus timestamp.
    pub async fn contract_state(
        &self,
        address: &str,
        slot: &str,
        timestamp: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        let mut path = format!("api/v1/contracts/{address}/state?slot={slot}&limit=1");
        if let Some(ts) = timestamp {
            path.push_str(&format!("&timestamp={ts}"));
        }
        let response: Option<ContractStateResponse> = self.get_opt(&path).await?;
        Ok(response.and_then(|r| r.state.into_iter().next().map(|s| s.value)))
    }

    /// Current network fee schedule; with a timestamp, the schedule in force
    /// at that consensus time.
    pub async fn network_fees(
        &self,
        timestamp: Option<&str>,
    ) -> anyhow::Result<NetworkFeesResponse> {
        let mut path = "api/v1/network/fees".to_string();
        if let Some(ts) = timestamp {
            path.push_str(&format!("?timestamp=lte:{ts}"));
        }
        self.get(&path).await
    }

    /// The call hierarchy of an executed transaction.
    pub async fn contract_actions(&self, id: &str) -> anyhow::Result<Vec<ContractAction>> {
        self.get_paged(
            format!("api/v1/contracts/results/{id}/actions?limit={PAGE_LIMIT}&order=asc"),
            |r: ContractActionsResponse| (r.actions, r.links.next),
        )
        .await
    }

    /// A re-executed opcode trace of a transaction.
    pub async fn contract_opcodes(
        &self,
        id: &str,
        memory: bool,
        stack: bool,
        storage: bool,
    ) -> anyhow::Result<Option<OpcodesResponse>> {
        self.get_opt(&format!(
            "api/v1/contracts/results/{id}/opcodes?memory={memory}&stack={stack}&storage={storage}"
        ))
        .await
    }

    /// POST to the simulation endpoint; either the raw call result or a
    /// [MirrorCallFailure] carrying the revert details.
    pub async fn contract_call(
        &self,
        request: &ContractCallRequest,
    ) -> anyhow::Result<ContractCallResponse> {
        let url = self.endpoint(&self.web3_url, "api/v1/contracts/call")?;
        tracing::debug!(%url, estimate = request.estimate, "mirror node simulated call");

        let response = self.http.post(url.clone()).json(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .with_context(|| format!("failed to decode call response from {url}"));
        }

        // Failures come wrapped in a `_status` envelope; pull out the first
        // message so revert data survives the trip.
        let body = response.text().await.unwrap_or_default();
        let failure = serde_json::from_str::<ErrorStatus>(&body)
            .ok()
            .and_then(|e| e.status.messages.into_iter().next())
            .map(|m| MirrorCallFailure {
                message: m.message,
                detail: m.detail,
                data: m.data,
            })
            .unwrap_or_else(|| MirrorCallFailure {
                message: format!("Mirror Node responded with {status}"),
                detail: None,
                data: None,
            });

        Err(anyhow::Error::new(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::types::ErrorStatus;

    #[test]
    fn parses_error_envelope() {
        let body = r#"{"_status":{"messages":[
            {"message":"CONTRACT_REVERT_EXECUTED",
             "detail":"execution reverted",
             "data":"0x08c379a0"}]}}"#;
        let status: ErrorStatus = serde_json::from_str(body).unwrap();
        let msg = &status.status.messages[0];
        assert_eq!(msg.message, "CONTRACT_REVERT_EXECUTED");
        assert_eq!(msg.data.as_deref(), Some("0x08c379a0"));
    }
}
