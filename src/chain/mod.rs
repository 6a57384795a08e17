//! Chain module - destination chain access for settlement
//!
//! This module provides:
//! - The `ChainBridge` contract the settlement pipeline and admin actions consume
//! - An EVM router bridge with multi-RPC failover and a remote MPC signer
//! - A registry of bridges keyed by destination chain ID

pub mod provider;

pub use provider::EvmBridge;

use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};
use crate::state::SwapResultRecord;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Block to evaluate account state at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// Everything needed to build and sign a settlement transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTxArgs {
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub swap_id: String,
    pub log_index: u32,
    pub pair_id: String,
    /// Sending account (the MPC address on the destination chain)
    pub from: String,
    pub token: String,
    pub bind: String,
    pub swap_value: String,
    pub swap_type: u32,
    pub for_native: bool,
    pub for_underlying: bool,
    /// Reuse this nonce instead of allocating one (replacement transactions)
    pub replace_nonce: Option<u64>,
}

impl BuildTxArgs {
    pub fn for_result(result: &SwapResultRecord, from: impl Into<String>) -> Self {
        Self {
            from_chain_id: result.from_chain_id.clone(),
            to_chain_id: result.to_chain_id.clone(),
            swap_id: result.tx_id.clone(),
            log_index: result.log_index,
            pair_id: result.pair_id.clone(),
            from: from.into(),
            token: result.token.clone(),
            bind: result.bind.clone(),
            swap_value: result.value.clone(),
            swap_type: result.swap_type,
            for_native: result.for_native,
            for_underlying: result.for_underlying,
            replace_nonce: None,
        }
    }

    pub fn is_replace(&self) -> bool {
        self.replace_nonce.is_some()
    }
}

/// Unsigned settlement transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub chain_id: String,
    pub to: String,
    pub value: String,
    pub input: Vec<u8>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub tx_hash: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Known to the node but not mined
    Pending,
    Success,
    Reverted,
}

/// A transaction as seen on the destination chain
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionInfo {
    pub hash: String,
    pub block_number: Option<u64>,
    pub block_time: Option<u64>,
    pub outcome: TxOutcome,
}

/// Destination chain access used by the settlement pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainBridge: Send + Sync {
    fn chain_id(&self) -> String;

    /// Account settlement transactions are sent from
    fn mpc_address(&self) -> String;

    /// Blocks required before a settlement is considered stable
    fn confirmations(&self) -> u64;

    async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RelayerResult<RawTransaction>;

    /// Sign through the remote multi-party signer
    async fn sign_transaction(
        &self,
        raw: &RawTransaction,
        args: &BuildTxArgs,
    ) -> RelayerResult<SignedTransaction>;

    async fn send_transaction(&self, signed: &SignedTransaction) -> RelayerResult<String>;

    /// Fails with `TransactionNotFound` when neither chain nor pool know the hash
    async fn get_transaction(&self, tx_hash: &str) -> RelayerResult<TransactionInfo>;

    async fn get_account_nonce(&self, address: &str, tag: BlockTag) -> RelayerResult<u64>;

    async fn latest_block_number(&self) -> RelayerResult<u64>;

    /// Local bookkeeping only, no chain call
    fn increase_nonce(&self, address: &str, delta: u64);
}

/// Registry of destination chain bridges
pub struct ChainManager {
    bridges: DashMap<String, Arc<dyn ChainBridge>>,
}

impl ChainManager {
    /// Connect a bridge for every enabled chain
    pub async fn new(settings: &Settings) -> RelayerResult<Self> {
        let manager = Self::from_bridges(Vec::new());

        for (name, chain_config) in settings.enabled_chains() {
            info!("Initializing chain {} (ID: {})", name, chain_config.chain_id);
            let bridge = EvmBridge::new(chain_config.clone()).await?;
            manager.register(Arc::new(bridge));
            info!("Chain {} initialized successfully", name);
        }

        Ok(manager)
    }

    pub fn from_bridges(bridges: Vec<Arc<dyn ChainBridge>>) -> Self {
        let manager = Self {
            bridges: DashMap::new(),
        };
        for bridge in bridges {
            manager.register(bridge);
        }
        manager
    }

    pub fn register(&self, bridge: Arc<dyn ChainBridge>) {
        if let Some(previous) = self.bridges.insert(bridge.chain_id(), bridge) {
            warn!("Replaced bridge for chain {}", previous.chain_id());
        }
    }

    /// Get bridge for a destination chain
    pub fn get_bridge(&self, chain_id: &str) -> RelayerResult<Arc<dyn ChainBridge>> {
        self.bridges
            .get(chain_id)
            .map(|b| b.clone())
            .ok_or_else(|| RelayerError::ChainNotFound {
                chain_id: chain_id.to_string(),
            })
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<String> {
        let mut chains: Vec<_> = self.bridges.iter().map(|e| e.key().clone()).collect();
        chains.sort();
        chains
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let bridges: Vec<_> = self
            .bridges
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(bridges.len());
        for (chain_id, bridge) in bridges {
            let healthy = match bridge.latest_block_number().await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Health check failed for chain {}: {}", chain_id, e);
                    false
                }
            };
            crate::metrics::record_chain_health(&chain_id, healthy);
            results.push((chain_id, healthy));
        }
        results.sort();
        results
    }
}

#[cfg(test)]
pub mod testing {
    //! Scriptable in-memory bridge for pipeline and admin tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    pub struct FakeBridge {
        pub chain_id: String,
        pub mpc_address: String,
        pub confirmations: u64,
        pub chain_nonce: AtomicU64,
        pub local_nonce: AtomicU64,
        pub block_number: AtomicU64,
        pub transactions: Mutex<HashMap<String, TransactionInfo>>,
        pub sent: Mutex<Vec<String>>,
        /// Whether sent transactions become visible on chain
        pub accept_sends: bool,
    }

    impl FakeBridge {
        pub fn new(chain_id: &str) -> Self {
            Self {
                chain_id: chain_id.to_string(),
                mpc_address: "0xmpc".to_string(),
                confirmations: 3,
                chain_nonce: AtomicU64::new(0),
                local_nonce: AtomicU64::new(0),
                block_number: AtomicU64::new(100),
                transactions: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
                accept_sends: true,
            }
        }

        pub fn with_chain_nonce(self, nonce: u64) -> Self {
            self.chain_nonce.store(nonce, Ordering::SeqCst);
            self
        }

        pub fn dropping_sends(mut self) -> Self {
            self.accept_sends = false;
            self
        }

        pub fn put_transaction(&self, hash: &str, block_number: Option<u64>, outcome: TxOutcome) {
            self.transactions.lock().unwrap().insert(
                hash.to_string(),
                TransactionInfo {
                    hash: hash.to_string(),
                    block_number,
                    block_time: block_number.map(|n| 1_700_000_000 + n),
                    outcome,
                },
            );
        }

        pub fn set_block_number(&self, number: u64) {
            self.block_number.store(number, Ordering::SeqCst);
        }

        pub fn local_nonce(&self) -> u64 {
            self.local_nonce.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainBridge for FakeBridge {
        fn chain_id(&self) -> String {
            self.chain_id.clone()
        }

        fn mpc_address(&self) -> String {
            self.mpc_address.clone()
        }

        fn confirmations(&self) -> u64 {
            self.confirmations
        }

        async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RelayerResult<RawTransaction> {
            let nonce = args.replace_nonce.unwrap_or_else(|| {
                self.local_nonce
                    .load(Ordering::SeqCst)
                    .max(self.chain_nonce.load(Ordering::SeqCst))
            });
            Ok(RawTransaction {
                chain_id: self.chain_id.clone(),
                to: "0xrouter".to_string(),
                value: "0".to_string(),
                input: args.swap_id.as_bytes().to_vec(),
                nonce,
                gas_limit: 90_000,
                gas_price: "1000000000".to_string(),
            })
        }

        async fn sign_transaction(
            &self,
            raw: &RawTransaction,
            args: &BuildTxArgs,
        ) -> RelayerResult<SignedTransaction> {
            // Remote signer round trip
            tokio::task::yield_now().await;
            Ok(SignedTransaction {
                tx_hash: format!("0xsettle-{}-{}", args.swap_id, raw.nonce),
                raw: raw.input.clone(),
            })
        }

        async fn send_transaction(&self, signed: &SignedTransaction) -> RelayerResult<String> {
            self.sent.lock().unwrap().push(signed.tx_hash.clone());
            if self.accept_sends {
                self.put_transaction(&signed.tx_hash, None, TxOutcome::Pending);
            }
            Ok(signed.tx_hash.clone())
        }

        async fn get_transaction(&self, tx_hash: &str) -> RelayerResult<TransactionInfo> {
            self.transactions
                .lock()
                .unwrap()
                .get(tx_hash)
                .cloned()
                .ok_or_else(|| RelayerError::TransactionNotFound {
                    chain_id: self.chain_id.clone(),
                    tx_hash: tx_hash.to_string(),
                })
        }

        async fn get_account_nonce(&self, _address: &str, _tag: BlockTag) -> RelayerResult<u64> {
            Ok(self.chain_nonce.load(Ordering::SeqCst))
        }

        async fn latest_block_number(&self) -> RelayerResult<u64> {
            Ok(self.block_number.load(Ordering::SeqCst))
        }

        fn increase_nonce(&self, _address: &str, delta: u64) {
            let current = self
                .local_nonce
                .load(Ordering::SeqCst)
                .max(self.chain_nonce.load(Ordering::SeqCst));
            self.local_nonce.store(current + delta, Ordering::SeqCst);
        }
    }
}
