//! Hand-over point for swaps verified by the source chain detector

use super::results::{add_initial_swap_result, MISSING_RESULT_MEMO};
use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};
use crate::state::{now, StateManager, SwapInfo, SwapRecord};
use crate::status::{SettleStatus, VerifyStatus};

use ethers::types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Swap type recorded for router settlements
pub const ROUTER_SWAP_TYPE: u32 = 1;

pub struct SwapIntake {
    state: Arc<StateManager>,
    /// Auto-approval limit per destination chain
    thresholds: HashMap<String, U256>,
}

impl SwapIntake {
    pub fn new(state: Arc<StateManager>, settings: &Settings) -> RelayerResult<Self> {
        let mut thresholds = HashMap::new();
        for (_, chain) in settings.enabled_chains() {
            if let Some(threshold) = &chain.big_value_threshold {
                let value = U256::from_dec_str(threshold).map_err(|_| {
                    RelayerError::Config(format!(
                        "chain {} big value threshold {} is not a decimal amount",
                        chain.chain_id, threshold
                    ))
                })?;
                thresholds.insert(chain.chain_id.clone(), value);
            }
        }
        Ok(Self::with_thresholds(state, thresholds))
    }

    pub fn with_thresholds(state: Arc<StateManager>, thresholds: HashMap<String, U256>) -> Self {
        Self { state, thresholds }
    }

    /// Track a verified swap and its settlement record.
    ///
    /// Registering the same swap twice returns the stored status. A swap the
    /// engine parked for a missing result record is re-admitted once the
    /// record exists.
    pub async fn register(&self, info: &SwapInfo) -> RelayerResult<VerifyStatus> {
        let key = info.swap_key()?;
        let value = U256::from_dec_str(&info.value)
            .map_err(|_| RelayerError::InvalidSwap(format!("value {} is not a decimal amount", info.value)))?;

        let mut swap = SwapRecord::new(&key, &info.to_chain_id, VerifyStatus::NotSwapped, now());
        if let Some(threshold) = self.thresholds.get(&info.to_chain_id) {
            if value > *threshold {
                swap.status = VerifyStatus::WithBigValue;
                swap.memo = format!("value {} exceeds threshold {}", value, threshold);
                warn!(%key, %value, %threshold, "swap held for approval");
            }
        }

        let status = match self.state.add_swap(&swap).await {
            Ok(()) => swap.status,
            Err(e) if e.is_duplicate_key() => {
                let existing = self.state.find_swap(&key).await?;
                info!(%key, status = %existing.status, "swap already registered");
                if existing.status == VerifyStatus::SwapFailed && existing.memo == MISSING_RESULT_MEMO {
                    add_initial_swap_result(&self.state, info, ROUTER_SWAP_TYPE, SettleStatus::Empty)
                        .await?;
                    self.state
                        .update_swap_status(&key, swap.status, now(), &swap.memo)
                        .await?;
                    info!(%key, status = %swap.status, "swap re-admitted with its result record");
                    swap.status
                } else {
                    existing.status
                }
            }
            Err(e) => return Err(e),
        };

        add_initial_swap_result(&self.state, info, ROUTER_SWAP_TYPE, SettleStatus::Empty).await?;
        crate::metrics::record_swap_registered(&info.to_chain_id, status.as_str());

        Ok(status)
    }
}
