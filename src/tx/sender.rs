//! Settlement signing and broadcast with bounded retries

use crate::chain::{BuildTxArgs, ChainBridge, RawTransaction, SignedTransaction};
use crate::config::RelayerConfig;
use crate::coordination::results::mark_swap_result_failed;
use crate::error::{RelayerError, RelayerResult};
use crate::state::{now, StateManager, SwapKey};
use crate::status::VerifyStatus;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Which terminal failure writes landed after broadcast was given up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureRecord {
    pub swap_marked: bool,
    pub result_marked: bool,
}

impl FailureRecord {
    pub fn is_complete(&self) -> bool {
        self.swap_marked && self.result_marked
    }
}

/// Broadcast exhausted its attempts
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SendFailure {
    pub source: RelayerError,
    pub record: FailureRecord,
}

/// Signs and broadcasts settlement transactions
pub struct SettlementSender {
    state: Arc<StateManager>,
    sign_attempts: u32,
    send_attempts: u32,
    send_interval: Duration,
}

impl SettlementSender {
    pub fn new(state: Arc<StateManager>, config: &RelayerConfig) -> Self {
        Self::with_budgets(
            state,
            config.sign_attempts,
            config.send_attempts,
            Duration::from_millis(config.send_interval_ms),
        )
    }

    pub fn with_budgets(
        state: Arc<StateManager>,
        sign_attempts: u32,
        send_attempts: u32,
        send_interval: Duration,
    ) -> Self {
        Self {
            state,
            sign_attempts: sign_attempts.max(1),
            send_attempts: send_attempts.max(1),
            send_interval,
        }
    }

    /// Sign through the MPC service, retrying immediately on failure
    pub async fn sign_with_retry(
        &self,
        bridge: &dyn ChainBridge,
        raw: &RawTransaction,
        args: &BuildTxArgs,
    ) -> RelayerResult<SignedTransaction> {
        let mut last_error = None;

        for attempt in 1..=self.sign_attempts {
            match bridge.sign_transaction(raw, args).await {
                Ok(signed) => {
                    info!(
                        chain_id = %args.to_chain_id,
                        swap_id = %args.swap_id,
                        log_index = args.log_index,
                        swap_tx = %signed.tx_hash,
                        nonce = raw.nonce,
                        "sign settlement success"
                    );
                    crate::metrics::record_swap_signed(&args.to_chain_id);
                    return Ok(signed);
                }
                Err(e) => {
                    warn!(
                        swap_id = %args.swap_id,
                        "sign settlement failed (attempt {}/{}): {}",
                        attempt, self.sign_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RelayerError::Internal("no sign attempt made".to_string())))
    }

    /// Broadcast until the destination chain reports the transaction.
    ///
    /// On exhaustion both records of the swap are marked failed with the last
    /// error as memo. The sender's nonce counter only advances on success of
    /// a non-replacement transaction.
    pub async fn send_with_retry(
        &self,
        bridge: &dyn ChainBridge,
        signed: &SignedTransaction,
        args: &BuildTxArgs,
        is_replace: bool,
    ) -> Result<String, SendFailure> {
        let mut last_error = None;

        for attempt in 1..=self.send_attempts {
            match self.send_once(bridge, signed).await {
                Ok(tx_hash) => {
                    info!(
                        chain_id = %args.to_chain_id,
                        swap_id = %args.swap_id,
                        log_index = args.log_index,
                        swap_tx = %tx_hash,
                        "send settlement success (attempt {}/{})",
                        attempt, self.send_attempts
                    );
                    if !is_replace {
                        bridge.increase_nonce(&args.from, 1);
                    }
                    crate::metrics::record_swap_sent(&args.to_chain_id);
                    return Ok(tx_hash);
                }
                Err(e) => {
                    warn!(
                        swap_id = %args.swap_id,
                        swap_tx = %signed.tx_hash,
                        "send settlement failed (attempt {}/{}): {}",
                        attempt, self.send_attempts, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.send_attempts {
                tokio::time::sleep(self.send_interval).await;
            }
        }

        let source = last_error
            .unwrap_or_else(|| RelayerError::Internal("no send attempt made".to_string()));
        let record = self.mark_failed(args, &source.to_string()).await;
        crate::metrics::record_swap_failed(&args.to_chain_id);

        Err(SendFailure { source, record })
    }

    /// One broadcast attempt, judged by whether the chain knows the hash.
    ///
    /// A rejected send ("already known", "nonce too low") still succeeds when
    /// an earlier attempt put the transaction in the pool.
    async fn send_once(
        &self,
        bridge: &dyn ChainBridge,
        signed: &SignedTransaction,
    ) -> RelayerResult<String> {
        let sent = bridge.send_transaction(signed).await;
        let tx_hash = match &sent {
            Ok(hash) if !hash.is_empty() => hash.clone(),
            _ => signed.tx_hash.clone(),
        };

        match bridge.get_transaction(&tx_hash).await {
            Ok(_) => {
                if let Err(e) = &sent {
                    info!(swap_tx = %tx_hash, "send rejected but tx is known to the chain: {}", e);
                }
                Ok(tx_hash)
            }
            Err(lookup) => Err(match sent {
                Err(e) => e,
                Ok(hash) if hash.is_empty() => {
                    RelayerError::Transaction("send returned empty hash".to_string())
                }
                Ok(_) => lookup,
            }),
        }
    }

    async fn mark_failed(&self, args: &BuildTxArgs, memo: &str) -> FailureRecord {
        let key = match SwapKey::new(&args.from_chain_id, &args.swap_id, args.log_index) {
            Ok(key) => key,
            Err(e) => {
                error!(swap_id = %args.swap_id, "cannot mark failed swap: {}", e);
                return FailureRecord::default();
            }
        };

        let swap_marked = match self
            .state
            .update_swap_status(&key, VerifyStatus::SwapFailed, now(), memo)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(%key, "mark swap failed error: {}", e);
                false
            }
        };

        let result_marked = match mark_swap_result_failed(&self.state, &key, memo).await {
            Ok(()) => true,
            Err(e) => {
                error!(%key, "mark swap result failed error: {}", e);
                false
            }
        };

        FailureRecord {
            swap_marked,
            result_marked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainBridge;
    use crate::coordination::results::{add_initial_swap_result, fixtures::swap_info};
    use crate::state::{MemorySwapStore, SwapRecord};
    use crate::status::SettleStatus;

    async fn seeded_state() -> (Arc<StateManager>, SwapKey) {
        let state = Arc::new(StateManager::new(Arc::new(MemorySwapStore::new()), 100));
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();

        state
            .add_swap(&SwapRecord::new(&key, "250", VerifyStatus::NotSwapped, now()))
            .await
            .unwrap();
        add_initial_swap_result(&state, &info, 1, SettleStatus::Empty)
            .await
            .unwrap();
        (state, key)
    }

    fn build_args() -> BuildTxArgs {
        BuildTxArgs {
            from_chain_id: "56".to_string(),
            to_chain_id: "250".to_string(),
            swap_id: "0xabc".to_string(),
            log_index: 1,
            pair_id: "USDC".to_string(),
            from: "0xmpc".to_string(),
            token: "0xtoken".to_string(),
            bind: "0xalice".to_string(),
            swap_value: "1000000".to_string(),
            swap_type: 1,
            for_native: false,
            for_underlying: true,
            replace_nonce: None,
        }
    }

    fn raw() -> RawTransaction {
        RawTransaction {
            chain_id: "250".to_string(),
            to: "0xrouter".to_string(),
            value: "0".to_string(),
            input: vec![1, 2, 3],
            nonce: 5,
            gas_limit: 90_000,
            gas_price: "1".to_string(),
        }
    }

    fn signed() -> SignedTransaction {
        SignedTransaction {
            tx_hash: "0xfeed".to_string(),
            raw: vec![1, 2, 3],
        }
    }

    fn sender(state: Arc<StateManager>) -> SettlementSender {
        SettlementSender::with_budgets(state, 5, 3, Duration::from_millis(1))
    }

    fn not_found(hash: &str) -> RelayerError {
        RelayerError::TransactionNotFound {
            chain_id: "250".to_string(),
            tx_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_retries_until_success() {
        let (state, _) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        let mut calls = 0;
        bridge
            .expect_sign_transaction()
            .times(4)
            .returning(move |_, _| {
                calls += 1;
                if calls < 4 {
                    Err(RelayerError::Signer {
                        chain_id: "250".to_string(),
                        message: "mpc busy".to_string(),
                    })
                } else {
                    Ok(signed())
                }
            });

        let result = sender(state).sign_with_retry(&bridge, &raw(), &build_args()).await;
        assert_eq!(result.unwrap().tx_hash, "0xfeed");
    }

    #[tokio::test]
    async fn test_sign_exhaustion_leaves_records_untouched() {
        let (state, key) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        bridge.expect_sign_transaction().times(5).returning(|_, _| {
            Err(RelayerError::Signer {
                chain_id: "250".to_string(),
                message: "mpc offline".to_string(),
            })
        });

        let err = sender(state.clone())
            .sign_with_retry(&bridge, &raw(), &build_args())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::Signer { .. }));

        let swap = state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::NotSwapped);
    }

    #[tokio::test]
    async fn test_send_success_requires_chain_presence() {
        let (state, _) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        bridge
            .expect_send_transaction()
            .times(2)
            .returning(|s| Ok(s.tx_hash.clone()));
        let mut queried = 0;
        bridge.expect_get_transaction().times(2).returning(move |hash| {
            queried += 1;
            if queried == 1 {
                Err(not_found(hash))
            } else {
                Ok(crate::chain::TransactionInfo {
                    hash: hash.to_string(),
                    block_number: None,
                    block_time: None,
                    outcome: crate::chain::TxOutcome::Pending,
                })
            }
        });
        bridge
            .expect_increase_nonce()
            .withf(|address, delta| address.to_string() == "0xmpc" && *delta == 1)
            .times(1)
            .return_const(());

        let tx_hash = sender(state)
            .send_with_retry(&bridge, &signed(), &build_args(), false)
            .await
            .unwrap();
        assert_eq!(tx_hash, "0xfeed");
    }

    #[tokio::test]
    async fn test_replacement_does_not_advance_nonce() {
        let (state, _) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        bridge
            .expect_send_transaction()
            .times(1)
            .returning(|s| Ok(s.tx_hash.clone()));
        bridge.expect_get_transaction().times(1).returning(|hash| {
            Ok(crate::chain::TransactionInfo {
                hash: hash.to_string(),
                block_number: None,
                block_time: None,
                outcome: crate::chain::TxOutcome::Pending,
            })
        });
        bridge.expect_increase_nonce().never();

        let mut args = build_args();
        args.replace_nonce = Some(5);
        assert!(sender(state)
            .send_with_retry(&bridge, &signed(), &args, true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_send_exhaustion_marks_both_records_failed() {
        let (state, key) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        bridge
            .expect_send_transaction()
            .times(3)
            .returning(|s| Ok(s.tx_hash.clone()));
        bridge
            .expect_get_transaction()
            .times(3)
            .returning(|hash| Err(not_found(hash)));
        bridge.expect_increase_nonce().never();

        let failure = sender(state.clone())
            .send_with_retry(&bridge, &signed(), &build_args(), false)
            .await
            .unwrap_err();

        assert!(failure.record.is_complete());
        let memo = failure.source.to_string();
        assert_eq!(memo, not_found("0xfeed").to_string());

        let swap = state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::SwapFailed);
        assert_eq!(swap.memo, memo);

        let result = state.find_swap_result(&key).await.unwrap();
        assert_eq!(result.status, SettleStatus::Failed);
        assert_eq!(result.memo, memo);
    }

    #[tokio::test]
    async fn test_failure_record_reports_missing_records() {
        let state = Arc::new(StateManager::new(Arc::new(MemorySwapStore::new()), 100));
        let mut bridge = MockChainBridge::new();
        bridge.expect_send_transaction().times(3).returning(|_| {
            Err(RelayerError::ChainConnection {
                chain_id: "250".to_string(),
                message: "connection refused".to_string(),
            })
        });
        bridge
            .expect_get_transaction()
            .times(3)
            .returning(|hash| Err(not_found(hash)));
        bridge.expect_increase_nonce().never();

        let failure = sender(state)
            .send_with_retry(&bridge, &signed(), &build_args(), false)
            .await
            .unwrap_err();

        assert_eq!(failure.record, FailureRecord::default());
        assert!(matches!(failure.source, RelayerError::ChainConnection { .. }));
    }

    #[tokio::test]
    async fn test_rejected_resend_of_pooled_tx_succeeds() {
        let (state, key) = seeded_state().await;
        let mut bridge = MockChainBridge::new();
        let mut sends = 0;
        bridge.expect_send_transaction().times(2).returning(move |s| {
            sends += 1;
            if sends == 1 {
                Ok(s.tx_hash.clone())
            } else {
                Err(RelayerError::Transaction("already known".to_string()))
            }
        });
        // Node lags on the first lookup, then reports the pooled tx
        let mut lookups = 0;
        bridge
            .expect_get_transaction()
            .withf(|hash| hash.to_string() == "0xfeed")
            .times(2)
            .returning(move |hash| {
                lookups += 1;
                if lookups == 1 {
                    Err(not_found(hash))
                } else {
                    Ok(crate::chain::TransactionInfo {
                        hash: hash.to_string(),
                        block_number: None,
                        block_time: None,
                        outcome: crate::chain::TxOutcome::Pending,
                    })
                }
            });
        bridge.expect_increase_nonce().times(1).return_const(());

        let tx_hash = sender(state.clone())
            .send_with_retry(&bridge, &signed(), &build_args(), false)
            .await
            .unwrap();
        assert_eq!(tx_hash, "0xfeed");

        let swap = state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::NotSwapped);
        let result = state.find_swap_result(&key).await.unwrap();
        assert_eq!(result.status, SettleStatus::Empty);
        assert_eq!(result.memo, "");
    }
}
