//! Swap and swap result records and their composite identity

use crate::error::{RelayerError, RelayerResult};
use crate::status::{SettleStatus, VerifyStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_SEPARATOR: char = ':';

/// Identity of a swap: source chain, source transaction and event index
///
/// `log_index == 0` is reserved for "any index" lookups by callers that only
/// know the source transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapKey {
    pub chain_id: String,
    pub tx_id: String,
    pub log_index: u32,
}

impl SwapKey {
    /// Build a key, rejecting components that would make the rendered form ambiguous
    pub fn new(
        chain_id: impl Into<String>,
        tx_id: impl Into<String>,
        log_index: u32,
    ) -> RelayerResult<Self> {
        let chain_id = chain_id.into();
        let tx_id = tx_id.into();

        for (name, value) in [("chain id", &chain_id), ("tx id", &tx_id)] {
            if value.is_empty() {
                return Err(RelayerError::InvalidKey(format!("empty {}", name)));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(RelayerError::InvalidKey(format!(
                    "{} {:?} contains '{}'",
                    name, value, KEY_SEPARATOR
                )));
            }
        }

        Ok(Self {
            chain_id,
            tx_id,
            log_index,
        })
    }

    /// Primary key string used by every store
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Whether lookups must fall back to matching on chain and tx only
    pub fn is_any_index(&self) -> bool {
        self.log_index == 0
    }
}

impl fmt::Display for SwapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.chain_id,
            self.tx_id,
            self.log_index,
            sep = KEY_SEPARATOR
        )
    }
}

/// Source side verification record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub key: String,
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub tx_id: String,
    pub log_index: u32,
    pub status: VerifyStatus,
    pub timestamp: i64,
    pub memo: String,
}

impl SwapRecord {
    pub fn new(
        key: &SwapKey,
        to_chain_id: impl Into<String>,
        status: VerifyStatus,
        timestamp: i64,
    ) -> Self {
        Self {
            key: key.render(),
            from_chain_id: key.chain_id.clone(),
            to_chain_id: to_chain_id.into(),
            tx_id: key.tx_id.clone(),
            log_index: key.log_index,
            status,
            timestamp,
            memo: String::new(),
        }
    }

    pub fn swap_key(&self) -> SwapKey {
        SwapKey {
            chain_id: self.from_chain_id.clone(),
            tx_id: self.tx_id.clone(),
            log_index: self.log_index,
        }
    }
}

/// Verified deposit facts handed over by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub pair_id: String,
    pub hash: String,
    pub tx_to: String,
    pub height: u64,
    pub timestamp: u64,
    pub from: String,
    pub to: String,
    pub bind: String,
    pub value: String,
    pub for_native: bool,
    pub for_underlying: bool,
    pub token: String,
    pub path: Vec<String>,
    pub amount_out_min: String,
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub log_index: u32,
}

impl SwapInfo {
    pub fn swap_key(&self) -> RelayerResult<SwapKey> {
        SwapKey::new(&self.from_chain_id, &self.hash, self.log_index)
    }
}

/// Destination side settlement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResultRecord {
    pub key: String,
    pub from_chain_id: String,
    pub to_chain_id: String,
    pub tx_id: String,
    pub log_index: u32,
    pub pair_id: String,
    pub tx_to: String,
    pub tx_height: u64,
    pub tx_time: u64,
    pub from: String,
    pub to: String,
    pub bind: String,
    pub value: String,
    pub for_native: bool,
    pub for_underlying: bool,
    pub token: String,
    pub path: Vec<String>,
    pub amount_out_min: String,
    pub swap_tx: String,
    pub old_swap_txs: Vec<String>,
    pub swap_height: u64,
    pub swap_time: u64,
    pub swap_value: String,
    pub swap_type: u32,
    pub swap_nonce: u64,
    pub status: SettleStatus,
    pub timestamp: i64,
    pub memo: String,
}

impl SwapResultRecord {
    /// Fresh result carrying the payload of a verified swap
    pub fn from_swap_info(
        info: &SwapInfo,
        swap_type: u32,
        status: SettleStatus,
        timestamp: i64,
    ) -> RelayerResult<Self> {
        let key = info.swap_key()?;
        Ok(Self {
            key: key.render(),
            from_chain_id: info.from_chain_id.clone(),
            to_chain_id: info.to_chain_id.clone(),
            tx_id: info.hash.clone(),
            log_index: info.log_index,
            pair_id: info.pair_id.clone(),
            tx_to: info.tx_to.clone(),
            tx_height: info.height,
            tx_time: info.timestamp,
            from: info.from.clone(),
            to: info.to.clone(),
            bind: info.bind.clone(),
            value: info.value.clone(),
            for_native: info.for_native,
            for_underlying: info.for_underlying,
            token: info.token.clone(),
            path: info.path.clone(),
            amount_out_min: info.amount_out_min.clone(),
            swap_tx: String::new(),
            old_swap_txs: Vec::new(),
            swap_height: 0,
            swap_time: 0,
            swap_value: "0".to_string(),
            swap_type,
            swap_nonce: 0,
            status,
            timestamp,
            memo: String::new(),
        })
    }

    pub fn swap_key(&self) -> SwapKey {
        SwapKey {
            chain_id: self.from_chain_id.clone(),
            tx_id: self.tx_id.clone(),
            log_index: self.log_index,
        }
    }
}
