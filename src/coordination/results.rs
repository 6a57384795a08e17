//! Swap result bookkeeping shared by the workers

use crate::error::RelayerResult;
use crate::state::{now, StateManager, SwapInfo, SwapKey, SwapResultRecord, SwapResultUpdate};
use crate::status::SettleStatus;

use tracing::info;

/// Memo of a swap parked because its result record was never written
pub const MISSING_RESULT_MEMO: &str = "swap result record is missing";

/// Settlement facts observed on the destination chain.
///
/// Zero and empty values mean "not observed" and are never written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchTx {
    pub swap_tx: String,
    pub old_swap_txs: Vec<String>,
    pub swap_height: u64,
    pub swap_time: u64,
    pub swap_value: String,
    pub swap_type: u32,
    pub swap_nonce: u64,
}

impl MatchTx {
    /// Unconfirmed facts before the tx is mined, confirmation facts after
    pub fn into_update(self, timestamp: i64) -> SwapResultUpdate {
        let mut update = SwapResultUpdate::new(SettleStatus::NotStable, timestamp);

        if self.swap_height == 0 {
            if !self.swap_tx.is_empty() {
                update = update.with_swap_tx(self.swap_tx);
            }
            if !self.old_swap_txs.is_empty() {
                update = update.with_old_swap_txs(self.old_swap_txs);
            }
            if !self.swap_value.is_empty() {
                update = update.with_swap_value(self.swap_value);
            }
            if self.swap_type != 0 {
                update = update.with_swap_type(self.swap_type);
            }
            if self.swap_nonce != 0 {
                update = update.with_swap_nonce(self.swap_nonce);
            }
        } else {
            update = update.with_confirmation(self.swap_height, self.swap_time);
            if !self.swap_tx.is_empty() {
                update = update.with_swap_tx(self.swap_tx);
            }
        }

        update
    }
}

/// Create the result record for a verified swap; an existing one is kept
pub async fn add_initial_swap_result(
    state: &StateManager,
    info: &SwapInfo,
    swap_type: u32,
    status: SettleStatus,
) -> RelayerResult<()> {
    let record = SwapResultRecord::from_swap_info(info, swap_type, status, now())?;

    match state.add_swap_result(&record).await {
        Err(e) if e.is_duplicate_key() => {
            info!(key = %record.key, "swap result already exists");
            Ok(())
        }
        other => other,
    }
}

pub async fn update_swap_result_progress(
    state: &StateManager,
    key: &SwapKey,
    mtx: MatchTx,
) -> RelayerResult<()> {
    state.update_swap_result(key, &mtx.into_update(now())).await
}

/// Record a signed settlement before it is broadcast
pub async fn update_swap_tx(
    state: &StateManager,
    key: &SwapKey,
    swap_tx: &str,
    swap_nonce: u64,
    swap_value: &str,
) -> RelayerResult<()> {
    let update = SwapResultUpdate::keep_status(now())
        .with_swap_tx(swap_tx)
        .with_swap_nonce(swap_nonce)
        .with_swap_value(swap_value);
    state.update_swap_result(key, &update).await
}

pub async fn mark_swap_result_stable(state: &StateManager, key: &SwapKey) -> RelayerResult<()> {
    state
        .update_swap_result_status(key, SettleStatus::Stable, now(), "")
        .await
}

pub async fn mark_swap_result_failed(
    state: &StateManager,
    key: &SwapKey,
    memo: &str,
) -> RelayerResult<()> {
    state
        .update_swap_result_status(key, SettleStatus::Failed, now(), memo)
        .await
}
