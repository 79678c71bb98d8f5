//! RPC provider management and the chain capability consumed by the monitor.
//!
//! The detector core never talks to alloy directly; it consumes the
//! [`ChainRpc`] capability, which supplies the current tip, canonical blocks
//! by height, and the chain id. Production code wires in [`HttpChainRpc`]
//! (alloy HTTP provider); tests substitute a scripted implementation.
//!
//! Retries, backoff, and per-request timeouts are the transport's concern;
//! the detector treats a returned error as terminal for that call.
//!
//! ## Example
//!
//! ```no_run
//! use reorg_monitor::rpc::{ChainRpc, HttpChainRpc};
//! use reorg_monitor::error::MonitorResult;
//!
//! # async fn example() -> MonitorResult<()> {
//! let rpc = HttpChainRpc::connect("https://eth.llamarpc.com")?;
//! let tip = rpc.get_block_latest().await?;
//! println!("tip height: {}", tip.number);
//! # Ok(())
//! # }
//! ```

use crate::error::{MonitorError, MonitorResult};
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::B256;
use alloy::providers::{Provider as AlloyProvider, RootProvider};
use alloy::rpc::types::{Block, BlockTransactionsKind};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

/// Type alias for the HTTP provider.
pub type Provider = RootProvider<Http<Client>>;

/// The block projection consumed by the detector.
///
/// Carries exactly the fields the reorg rules compare: identity hashes, the
/// optional state root, the ordered transaction-hash sequence, and the gas
/// fields surfaced in `BLOCK_RECEIVED` payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    /// Block height
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// State root, if the node reports one
    pub state_root: Option<B256>,

    /// Base fee per gas, absent on pre-EIP-1559 chains
    pub base_fee_per_gas: Option<u64>,

    /// Gas used by the block
    pub gas_used: u64,

    /// Transaction hashes in block order
    pub transactions: Vec<B256>,
}

impl BlockData {
    /// Project an alloy RPC block into the monitor's block shape.
    ///
    /// Expects hash-only transaction bodies; the fingerprint rules compare
    /// transaction identity, not contents.
    #[must_use]
    pub fn from_rpc_block(block: &Block) -> Self {
        Self {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            state_root: Some(block.header.state_root),
            base_fee_per_gas: block.header.base_fee_per_gas,
            gas_used: block.header.gas_used,
            transactions: block
                .transactions
                .as_hashes()
                .map(|hashes| hashes.to_vec())
                .unwrap_or_default(),
        }
    }
}

/// Chain access capability consumed by the detector.
///
/// Implementations must surface a missing height as an error recognized by
/// [`MonitorError::is_block_not_found`]: either the dedicated variant or a
/// message containing the substring `Block not found`.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Fetch the block at the current chain tip.
    async fn get_block_latest(&self) -> MonitorResult<BlockData>;

    /// Fetch the canonical block at the given height.
    ///
    /// Height 0 is the genesis block by convention.
    async fn get_block_by_number(&self, height: u64) -> MonitorResult<BlockData>;

    /// Fetch the chain id.
    async fn get_chain_id(&self) -> MonitorResult<u64>;
}

/// Production [`ChainRpc`] backed by an alloy HTTP provider.
pub struct HttpChainRpc {
    provider: Provider,
}

impl HttpChainRpc {
    /// Connect to an Ethereum JSON-RPC endpoint over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL cannot be parsed.
    #[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
    pub fn connect(rpc_url: &str) -> MonitorResult<Self> {
        let host = redact_rpc_url(rpc_url);
        tracing::Span::current().record("rpc_host", host.as_str());
        info!(rpc_host = %host, "Initializing RPC provider");

        let url = rpc_url.parse().map_err(|e| {
            MonitorError::config(
                format!("Failed to parse RPC URL: '{rpc_url}'"),
                Some(Box::new(e)),
            )
        })?;

        let provider = RootProvider::new_http(url);

        Ok(Self { provider })
    }

    async fn fetch_block(&self, tag: BlockNumberOrTag) -> MonitorResult<BlockData> {
        let block = self
            .provider
            .get_block_by_number(tag, BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| {
                MonitorError::rpc(format!("Failed to fetch block {tag}"), Some(Box::new(e)))
            })?
            .ok_or_else(|| match tag {
                BlockNumberOrTag::Number(n) => MonitorError::block_not_found(n),
                _ => MonitorError::rpc(format!("No block returned for tag {tag}"), None),
            })?;

        debug!(
            height = block.header.number,
            hash = %block.header.hash,
            tx_count = block.transactions.len(),
            "Fetched block"
        );

        Ok(BlockData::from_rpc_block(&block))
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn get_block_latest(&self) -> MonitorResult<BlockData> {
        self.fetch_block(BlockNumberOrTag::Latest).await
    }

    async fn get_block_by_number(&self, height: u64) -> MonitorResult<BlockData> {
        self.fetch_block(BlockNumberOrTag::Number(height)).await
    }

    async fn get_chain_id(&self) -> MonitorResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| MonitorError::rpc("Failed to fetch chain id", Some(Box::new(e))))
    }
}

/// Reduce an RPC URL to scheme + host for logging.
///
/// Provider URLs routinely embed API keys in the path; only the host ever
/// reaches the logs or the `MONITOR_START` event.
#[must_use]
pub fn redact_rpc_url(rpc_url: &str) -> String {
    match rpc_url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{scheme}://{host}")
        }
        None => rpc_url.split('/').next().unwrap_or(rpc_url).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_strips_key_path() {
        assert_eq!(
            redact_rpc_url("https://eth-mainnet.g.alchemy.com/v2/SECRET_KEY"),
            "https://eth-mainnet.g.alchemy.com"
        );
        assert_eq!(
            redact_rpc_url("https://eth.llamarpc.com"),
            "https://eth.llamarpc.com"
        );
        assert_eq!(redact_rpc_url("localhost:8545"), "localhost:8545");
    }

    #[test]
    fn test_connect_invalid_url() {
        let result = HttpChainRpc::connect("not a url");
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires a reachable RPC endpoint in RPC_URL"]
    async fn test_latest_block_integration() {
        let rpc_url =
            std::env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());

        let rpc = HttpChainRpc::connect(&rpc_url).expect("provider should build");
        let tip = rpc.get_block_latest().await.expect("tip should fetch");
        assert!(tip.number > 0);
    }
}
