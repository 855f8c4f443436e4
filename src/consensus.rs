// SPDX-License-Identifier: MIT OR Apache-2.0

//! Submission of signed Ethereum payloads to a consensus node.
//!
//! The relay is generic in the SDK transport, the way the facade it is
//! modelled on is generic in its backend client, so the API methods can be
//! tested with mocks. [SdkClient] is the seam: the embedding application
//! plugs in the real gRPC-backed SDK; this module owns everything above it,
//! notably the chunked file upload for oversized call data.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use ethers_core::types::H160;
use lazy_static::lazy_static;
use regex::Regex;

/// Call data up to this size is embedded directly in the submission;
/// anything larger goes through a file, in chunks of this size.
pub const FILE_CHUNK_SIZE: usize = 5120;

/// Upper bound on file chunks, giving a 100 KiB file at most.
pub const MAX_FILE_CHUNKS: usize = 20;

/// Gas ceiling used to derive the maximum transaction fee from the gas price.
pub const MAX_TRANSACTION_FEE_GAS: u64 = 15_000_000;

/// A file on the consensus network, `shard.realm.num`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId(pub String);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

lazy_static! {
    static ref TRANSACTION_ID_RE: Regex =
        Regex::new(r"^(\d\.\d\.\d{1,10})@(\d{1,10})\.(\d{1,9})$").expect("regex parses");
}

/// A native transaction id, `shard.realm.num@seconds.nanos`.
///
/// Seconds and nanos stay as the SDK printed them; the Mirror Node matches
/// the id textually, zero padding included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionId {
    pub account: String,
    pub seconds: String,
    pub nanos: String,
}

impl TransactionId {
    /// Parse and validate an id string returned by the SDK.
    pub fn parse(id: &str) -> anyhow::Result<Self> {
        let caps = TRANSACTION_ID_RE
            .captures(id)
            .ok_or_else(|| anyhow!("invalid transaction id: {id}"))?;
        let _: u64 = caps[2].parse().context("invalid transaction id seconds")?;
        let _: u32 = caps[3].parse().context("invalid transaction id nanos")?;
        Ok(Self {
            account: caps[1].to_string(),
            seconds: caps[2].to_string(),
            nanos: caps[3].to_string(),
        })
    }

    /// The form the Mirror Node REST API uses in paths,
    /// `shard.realm.num-seconds-nanos`.
    pub fn to_mirror_format(&self) -> String {
        format!("{}-{}-{}", self.account, self.seconds, self.nanos)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}.{}", self.account, self.seconds, self.nanos)
    }
}

/// An `EthereumTransaction` submission. When `call_data_file` is set the
/// payload lives in that file and `ethereum_data` carries the rest.
#[derive(Debug, Clone)]
pub struct EthereumSubmission {
    pub ethereum_data: Vec<u8>,
    pub call_data_file: Option<FileId>,
    /// Fee ceiling in tinybars.
    pub max_transaction_fee: u64,
}

/// The operations the relay needs from the consensus node SDK.
///
/// Implementations are expected to sign with the operator key and to be
/// shareable across tasks.
#[async_trait]
pub trait SdkClient: Send + Sync + 'static {
    /// Submit a signed Ethereum payload; returns the native transaction id.
    async fn submit_ethereum_transaction(
        &self,
        submission: EthereumSubmission,
    ) -> anyhow::Result<String>;

    /// Create a file holding the first chunk of oversized call data.
    async fn create_file(&self, contents: Vec<u8>) -> anyhow::Result<FileId>;

    /// Append a further chunk to a previously created file.
    async fn append_file(&self, file: &FileId, contents: Vec<u8>) -> anyhow::Result<()>;

    /// Delete a file, used to clean up after failed submissions.
    async fn delete_file(&self, file: &FileId) -> anyhow::Result<()>;

    /// The runtime bytecode of a contract, queried from the consensus node.
    async fn contract_bytecode(&self, address: H160) -> anyhow::Result<Vec<u8>>;
}

/// The submission pipeline on top of an [SdkClient].
#[derive(Clone)]
pub struct ConsensusClient<S> {
    sdk: S,
}

impl<S: SdkClient> ConsensusClient<S> {
    pub fn new(sdk: S) -> Self {
        Self { sdk }
    }

    /// Submit raw transaction bytes. Payloads above [FILE_CHUNK_SIZE] are
    /// uploaded as a chunked file which the submission then references;
    /// a partially created file is deleted on a best-effort basis if any
    /// later step fails.
    pub async fn send_raw_transaction(
        &self,
        data: &[u8],
        gas_price_tinybars: u64,
    ) -> anyhow::Result<TransactionId> {
        let max_transaction_fee = gas_price_tinybars.saturating_mul(MAX_TRANSACTION_FEE_GAS);

        let submission = if data.len() <= FILE_CHUNK_SIZE {
            EthereumSubmission {
                ethereum_data: data.to_vec(),
                call_data_file: None,
                max_transaction_fee,
            }
        } else {
            let file = self.upload_call_data(data).await?;
            let submission = EthereumSubmission {
                ethereum_data: Vec::new(),
                call_data_file: Some(file.clone()),
                max_transaction_fee,
            };
            match self.sdk.submit_ethereum_transaction(submission).await {
                Ok(id) => return self.validate_id(id),
                Err(e) => {
                    self.cleanup_file(&file).await;
                    return Err(e).context("failed to submit file-backed transaction");
                }
            }
        };

        let id = self
            .sdk
            .submit_ethereum_transaction(submission)
            .await
            .context("failed to submit transaction")?;
        self.validate_id(id)
    }

    pub async fn get_bytecode(&self, address: H160) -> anyhow::Result<Vec<u8>> {
        self.sdk.contract_bytecode(address).await
    }

    fn validate_id(&self, id: String) -> anyhow::Result<TransactionId> {
        let id = TransactionId::parse(&id)?;
        tracing::debug!(%id, "transaction submitted");
        Ok(id)
    }

    /// Create a file from the first chunk and append the rest. Chunks after
    /// the first are cleaned up with the file if any append fails.
    async fn upload_call_data(&self, data: &[u8]) -> anyhow::Result<FileId> {
        let mut chunks = data.chunks(FILE_CHUNK_SIZE);
        if chunks.len() > MAX_FILE_CHUNKS {
            return Err(anyhow!(
                "call data needs {} chunks, the maximum is {MAX_FILE_CHUNKS}",
                chunks.len()
            ));
        }

        let first = chunks.next().expect("data is larger than one chunk");
        let file = self
            .sdk
            .create_file(first.to_vec())
            .await
            .context("failed to create call data file")?;

        for (i, chunk) in chunks.enumerate() {
            if let Err(e) = self.sdk.append_file(&file, chunk.to_vec()).await {
                self.cleanup_file(&file).await;
                return Err(e).with_context(|| format!("failed to append chunk {}", i + 1));
            }
        }

        tracing::debug!(%file, size = data.len(), "uploaded call data file");
        Ok(file)
    }

    async fn cleanup_file(&self, file: &FileId) {
        if let Err(e) = self.sdk.delete_file(file).await {
            tracing::warn!(%file, error = ?e, "failed to delete call data file");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records SDK calls; `fail_append_at` makes the nth append fail.
    pub struct MockSdk {
        pub submissions: Mutex<Vec<EthereumSubmission>>,
        pub created: Mutex<Vec<Vec<u8>>>,
        pub appended: Mutex<Vec<Vec<u8>>>,
        pub deleted: Mutex<Vec<FileId>>,
        pub fail_append_at: Option<usize>,
        pub transaction_id: String,
    }

    impl Default for MockSdk {
        fn default() -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
                created: Mutex::new(Vec::new()),
                appended: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                fail_append_at: None,
                transaction_id: "0.0.902@1234567890.123456789".to_string(),
            }
        }
    }

    #[async_trait]
    impl SdkClient for std::sync::Arc<MockSdk> {
        async fn submit_ethereum_transaction(
            &self,
            submission: EthereumSubmission,
        ) -> anyhow::Result<String> {
            self.submissions.lock().unwrap().push(submission);
            Ok(self.transaction_id.clone())
        }

        async fn create_file(&self, contents: Vec<u8>) -> anyhow::Result<FileId> {
            self.created.lock().unwrap().push(contents);
            Ok(FileId("0.0.5000".to_string()))
        }

        async fn append_file(&self, _file: &FileId, contents: Vec<u8>) -> anyhow::Result<()> {
            let mut appended = self.appended.lock().unwrap();
            if Some(appended.len()) == self.fail_append_at {
                return Err(anyhow!("append refused"));
            }
            appended.push(contents);
            Ok(())
        }

        async fn delete_file(&self, file: &FileId) -> anyhow::Result<()> {
            self.deleted.lock().unwrap().push(file.clone());
            Ok(())
        }

        async fn contract_bytecode(&self, _address: H160) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0x60, 0x80])
        }
    }

    #[test]
    fn transaction_id_parsing() {
        let id = TransactionId::parse("0.0.902@1234567890.123456789").unwrap();
        assert_eq!(id.account, "0.0.902");
        assert_eq!(id.to_mirror_format(), "0.0.902-1234567890-123456789");
        assert_eq!(id.to_string(), "0.0.902@1234567890.123456789");

        assert!(TransactionId::parse("0.0.902").is_err());
        assert!(TransactionId::parse("a.b.c@1.2").is_err());
        // Nanos are capped at 9 digits.
        assert!(TransactionId::parse("0.0.902@1.1234567890").is_err());
    }

    #[tokio::test]
    async fn small_payload_is_embedded() {
        let sdk = std::sync::Arc::new(MockSdk::default());
        let client = ConsensusClient::new(sdk.clone());

        let id = client.send_raw_transaction(&[1u8; 100], 71).await.unwrap();
        assert_eq!(id.account, "0.0.902");

        let submissions = sdk.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].ethereum_data.len(), 100);
        assert!(submissions[0].call_data_file.is_none());
        assert_eq!(submissions[0].max_transaction_fee, 71 * 15_000_000);
        assert!(sdk.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_payload_goes_through_a_file() {
        let sdk = std::sync::Arc::new(MockSdk::default());
        let client = ConsensusClient::new(sdk.clone());

        // 40 KiB: one create plus seven appends of 5120 bytes each.
        let data = vec![7u8; 40 * 1024];
        client.send_raw_transaction(&data, 71).await.unwrap();

        assert_eq!(sdk.created.lock().unwrap().len(), 1);
        assert_eq!(sdk.created.lock().unwrap()[0].len(), FILE_CHUNK_SIZE);
        assert_eq!(sdk.appended.lock().unwrap().len(), 7);

        let submissions = sdk.submissions.lock().unwrap();
        assert!(submissions[0].ethereum_data.is_empty());
        assert_eq!(
            submissions[0].call_data_file,
            Some(FileId("0.0.5000".to_string()))
        );
    }

    #[tokio::test]
    async fn failed_append_deletes_the_file() {
        let sdk = std::sync::Arc::new(MockSdk {
            fail_append_at: Some(2),
            ..Default::default()
        });
        let client = ConsensusClient::new(sdk.clone());

        let data = vec![7u8; 40 * 1024];
        let err = client.send_raw_transaction(&data, 71).await.unwrap_err();
        assert!(err.to_string().contains("chunk"));

        assert_eq!(sdk.deleted.lock().unwrap().len(), 1);
        assert!(sdk.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let sdk = std::sync::Arc::new(MockSdk::default());
        let client = ConsensusClient::new(sdk.clone());

        // 21 chunks, one over the cap; nothing is created.
        let data = vec![7u8; FILE_CHUNK_SIZE * MAX_FILE_CHUNKS + 1];
        assert!(client.send_raw_transaction(&data, 71).await.is_err());
        assert!(sdk.created.lock().unwrap().is_empty());
    }
}
