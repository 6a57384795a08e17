//! Operator recovery actions
//!
//! Both actions check every precondition before writing anything, so a
//! rejected request leaves the stored records untouched.

use crate::chain::{BlockTag, ChainManager, TxOutcome};
use crate::error::{RelayerError, RelayerResult};
use crate::state::{now, StateManager, SwapKey};
use crate::status::{SettleStatus, VerifyStatus};

use std::sync::Arc;
use tracing::{info, warn};

pub struct AdminOps {
    state: Arc<StateManager>,
    chains: Arc<ChainManager>,
}

impl AdminOps {
    pub fn new(state: Arc<StateManager>, chains: Arc<ChainManager>) -> Self {
        Self { state, chains }
    }

    /// Release a swap held for exceeding the auto-approval threshold
    pub async fn approve_big_value(
        &self,
        chain_id: &str,
        tx_id: &str,
        log_index: u32,
    ) -> RelayerResult<()> {
        let result = self.approve_big_value_checked(chain_id, tx_id, log_index).await;
        audit("passbigvalue", chain_id, tx_id, log_index, &result);
        result
    }

    async fn approve_big_value_checked(
        &self,
        chain_id: &str,
        tx_id: &str,
        log_index: u32,
    ) -> RelayerResult<()> {
        let key = SwapKey::new(chain_id, tx_id, log_index)?;
        let swap = self.state.find_swap(&key).await?;

        if swap.status != VerifyStatus::WithBigValue {
            return Err(RelayerError::guard(format!(
                "swap status is {}, not {}",
                swap.status,
                VerifyStatus::WithBigValue
            )));
        }

        self.state
            .update_swap_status(&swap.swap_key(), VerifyStatus::NotSwapped, now(), "")
            .await
    }

    /// Re-admit a failed or abandoned settlement into the pipeline
    pub async fn force_reswap(
        &self,
        chain_id: &str,
        tx_id: &str,
        log_index: u32,
    ) -> RelayerResult<()> {
        let result = self.force_reswap_checked(chain_id, tx_id, log_index).await;
        audit("reswap", chain_id, tx_id, log_index, &result);
        result
    }

    async fn force_reswap_checked(
        &self,
        chain_id: &str,
        tx_id: &str,
        log_index: u32,
    ) -> RelayerResult<()> {
        let key = SwapKey::new(chain_id, tx_id, log_index)?;

        let swap = self.state.find_swap(&key).await?;
        if !swap.status.can_reswap() {
            return Err(RelayerError::guard(format!(
                "swap status is {}, can not reswap",
                swap.status
            )));
        }

        let key = swap.swap_key();
        let res = self.state.find_swap_result(&key).await?;
        if !res.status.can_reswap() {
            return Err(RelayerError::guard(format!(
                "swap result status is {}, can not reswap",
                res.status
            )));
        }
        if res.swap_tx.is_empty() {
            return Err(RelayerError::guard("swap without swaptx, can not reswap"));
        }

        let bridge = self.chains.get_bridge(&res.to_chain_id)?;
        match bridge.get_transaction(&res.swap_tx).await {
            Ok(tx) if res.status != SettleStatus::Failed => {
                return Err(RelayerError::guard(format!(
                    "swaptx {} exists in chain or pool ({:?})",
                    tx.hash, tx.outcome
                )));
            }
            Ok(tx) if tx.outcome != TxOutcome::Reverted => {
                return Err(RelayerError::guard(format!(
                    "failed swaptx {} is still {:?} in chain or pool",
                    tx.hash, tx.outcome
                )));
            }
            Ok(_) => {}
            Err(RelayerError::TransactionNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let nonce = bridge
            .get_account_nonce(&bridge.mpc_address(), BlockTag::Latest)
            .await?;
        if nonce <= res.swap_nonce {
            return Err(RelayerError::guard(format!(
                "can not retry swap with lower nonce (chain {}, swap {})",
                nonce, res.swap_nonce
            )));
        }

        self.state
            .update_swap_result_status(&key, SettleStatus::Empty, now(), "")
            .await?;
        self.state
            .update_swap_status(&key, VerifyStatus::NotSwapped, now(), "")
            .await
    }
}

fn audit(action: &str, chain_id: &str, tx_id: &str, log_index: u32, result: &RelayerResult<()>) {
    crate::metrics::record_admin_action(action, result.is_ok());
    match result {
        Ok(()) => info!(action, chain_id, tx_id, log_index, "admin action accepted"),
        Err(e) => warn!(action, chain_id, tx_id, log_index, "admin action rejected: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeBridge;
    use crate::coordination::results::{add_initial_swap_result, fixtures::swap_info};
    use crate::state::{MemorySwapStore, SwapRecord, SwapResultUpdate};

    struct Harness {
        state: Arc<StateManager>,
        bridge: Arc<FakeBridge>,
        admin: AdminOps,
    }

    fn harness(bridge: FakeBridge) -> Harness {
        let state = Arc::new(StateManager::new(Arc::new(MemorySwapStore::new()), 100));
        let bridge = Arc::new(bridge);
        let chains = Arc::new(ChainManager::from_bridges(vec![
            bridge.clone() as Arc<dyn crate::chain::ChainBridge>
        ]));
        Harness {
            admin: AdminOps::new(state.clone(), chains),
            state,
            bridge,
        }
    }

    async fn seed_swap(state: &StateManager, chain: &str, tx: &str, index: u32, status: VerifyStatus) -> SwapKey {
        let key = SwapKey::new(chain, tx, index).unwrap();
        let mut swap = SwapRecord::new(&key, "250", status, now());
        swap.memo = "value exceeds threshold".to_string();
        state.add_swap(&swap).await.unwrap();
        key
    }

    /// Swap failed after a settlement attempt with nonce 5 that never landed
    async fn seed_failed_settlement(h: &Harness, settle: SettleStatus) -> SwapKey {
        let key = seed_swap(&h.state, "56", "0xabc", 1, VerifyStatus::SwapFailed).await;
        add_initial_swap_result(&h.state, &swap_info("56", "0xabc", 1), 1, SettleStatus::Empty)
            .await
            .unwrap();
        let update = if settle.is_reset() {
            SwapResultUpdate::keep_status(now())
        } else {
            SwapResultUpdate::new(settle, now())
        };
        let update = update
            .with_swap_tx("0xdead")
            .with_swap_nonce(5)
            .with_memo("send failed");
        h.state.update_swap_result(&key, &update).await.unwrap();
        key
    }

    #[tokio::test]
    async fn test_approve_rejects_swap_without_big_value() {
        let h = harness(FakeBridge::new("250"));
        let key = seed_swap(&h.state, "chain1", "0xabc", 0, VerifyStatus::NotSwapped).await;

        let err = h.admin.approve_big_value("chain1", "0xabc", 0).await.unwrap_err();

        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("not_swapped")));
        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::NotSwapped);
    }

    #[tokio::test]
    async fn test_approve_big_value_readmits_swap() {
        let h = harness(FakeBridge::new("250"));
        let key = seed_swap(&h.state, "chain1", "0xabc", 0, VerifyStatus::WithBigValue).await;

        h.admin.approve_big_value("chain1", "0xabc", 0).await.unwrap();

        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::NotSwapped);
        assert_eq!(swap.memo, "");
    }

    #[tokio::test]
    async fn test_approve_missing_swap_is_not_found() {
        let h = harness(FakeBridge::new("250"));
        let err = h.admin.approve_big_value("chain1", "0xmissing", 2).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reswap_requires_higher_chain_nonce() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(5));
        let key = seed_failed_settlement(&h, SettleStatus::Failed).await;

        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("lower nonce")));

        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Failed);
        assert_eq!(res.swap_tx, "0xdead");

        h.bridge.chain_nonce.store(6, std::sync::atomic::Ordering::SeqCst);
        h.admin.force_reswap("56", "0xabc", 1).await.unwrap();

        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Empty);
        assert_eq!(res.swap_tx, "");
        assert!(res.old_swap_txs.is_empty());
        assert_eq!(res.swap_height, 0);
        assert_eq!(res.memo, "");
        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::NotSwapped);
    }

    #[tokio::test]
    async fn test_reswap_rejects_stable_settlement() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(9));
        let key = seed_failed_settlement(&h, SettleStatus::Stable).await;

        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("stable")));

        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::SwapFailed);
    }

    #[tokio::test]
    async fn test_reswap_rejects_in_flight_swap() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(9));
        let key = seed_failed_settlement(&h, SettleStatus::Failed).await;
        h.state
            .update_swap_status(&key, VerifyStatus::NotSwapped, now(), "")
            .await
            .unwrap();

        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(_)));
    }

    #[tokio::test]
    async fn test_reswap_requires_recorded_swap_tx() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(9));
        seed_swap(&h.state, "56", "0xabc", 1, VerifyStatus::SwapFailed).await;
        add_initial_swap_result(&h.state, &swap_info("56", "0xabc", 1), 1, SettleStatus::Failed)
            .await
            .unwrap();

        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("without swaptx")));
    }

    #[tokio::test]
    async fn test_reswap_rejects_unsent_tx_that_landed() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(9));
        seed_failed_settlement(&h, SettleStatus::Empty).await;
        h.bridge.put_transaction("0xdead", None, TxOutcome::Pending);

        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("exists")));
    }

    #[tokio::test]
    async fn test_reswap_of_failed_tx() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(9));
        let key = seed_failed_settlement(&h, SettleStatus::Failed).await;

        h.bridge.put_transaction("0xdead", None, TxOutcome::Pending);
        let err = h.admin.force_reswap("56", "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, RelayerError::GuardViolation(ref m) if m.contains("still")));

        h.bridge.put_transaction("0xdead", Some(120), TxOutcome::Reverted);
        h.admin.force_reswap("56", "0xabc", 1).await.unwrap();

        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Empty);
        // Nonce of the stale attempt survives the reset
        assert_eq!(res.swap_nonce, 5);
    }
}
