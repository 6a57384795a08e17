//! Local nonce tracking for settlement accounts
//!
//! The pool nonce reported by a node lags behind transactions we have just
//! broadcast, so each bridge keeps a local counter per sending account and
//! uses whichever of the two is higher.

use dashmap::DashMap;
use tracing::{debug, warn};

/// Per-account nonce counters for one destination chain
pub struct NonceManager {
    chain_id: String,
    accounts: DashMap<String, u64>,
}

impl NonceManager {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            accounts: DashMap::new(),
        }
    }

    /// Merge the chain's view with the local counter and return the nonce to use
    pub fn reconcile(&self, address: &str, chain_nonce: u64) -> u64 {
        let mut entry = self
            .accounts
            .entry(address.to_lowercase())
            .or_insert(chain_nonce);

        if chain_nonce > *entry {
            if *entry != 0 {
                warn!(
                    chain_id = %self.chain_id,
                    address,
                    local = *entry,
                    chain_nonce,
                    "Local nonce behind chain, resyncing"
                );
            }
            *entry = chain_nonce;
        }

        *entry
    }

    /// Advance the local counter after a broadcast
    pub fn increase(&self, address: &str, delta: u64) {
        let mut entry = self.accounts.entry(address.to_lowercase()).or_insert(0);
        *entry += delta;
        debug!(
            chain_id = %self.chain_id,
            address,
            nonce = *entry,
            "Increased local nonce"
        );
    }

    #[cfg(test)]
    pub fn current(&self, address: &str) -> Option<u64> {
        self.accounts.get(&address.to_lowercase()).map(|n| *n)
    }
}
