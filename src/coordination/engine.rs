//! Settlement engine: drives verified swaps to a stable payout

use super::results::{
    mark_swap_result_failed, mark_swap_result_stable, update_swap_result_progress, update_swap_tx,
    MatchTx, MISSING_RESULT_MEMO,
};
use crate::chain::{BuildTxArgs, ChainBridge, ChainManager, TxOutcome};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::state::{now, KeyedLock, StateManager, SwapKey, SwapRecord, SwapResultRecord};
use crate::status::{SettleStatus, VerifyStatus};
use crate::tx::SettlementSender;

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

pub struct SwapEngine {
    state: Arc<StateManager>,
    chains: Arc<ChainManager>,
    sender: SettlementSender,
    config: RelayerConfig,
    /// One settlement in flight per destination chain, so nonces are
    /// allocated in broadcast order
    lanes: KeyedLock,
    shutdown: Arc<RwLock<bool>>,
}

impl SwapEngine {
    pub fn new(state: Arc<StateManager>, chains: Arc<ChainManager>, config: RelayerConfig) -> Self {
        let sender = SettlementSender::new(state.clone(), &config);
        Self {
            state,
            chains,
            sender,
            config,
            lanes: KeyedLock::new(),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main loop running the swap and stable workers
    pub async fn run(&self) -> RelayerResult<()> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut swap_interval = interval(poll);
        let mut stable_interval = interval(poll);
        let mut health_interval =
            interval(Duration::from_secs(self.config.health_check_interval_secs.max(1)));

        info!(instance = %self.config.instance_id, "Swap engine started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = swap_interval.tick() => {
                    if let Err(e) = self.process_swaps().await {
                        error!("Error processing swaps: {}", e);
                    }
                }

                _ = stable_interval.tick() => {
                    if let Err(e) = self.process_results().await {
                        error!("Error checking swap results: {}", e);
                    }
                }

                _ = health_interval.tick() => {
                    self.chains.health_check().await;
                }
            }
        }

        info!("Swap engine stopped");
        Ok(())
    }

    /// Settle every `NotSwapped` swap inside the rescan window
    pub async fn process_swaps(&self) -> RelayerResult<usize> {
        let since = now() - self.config.rescan_window_secs;
        let swaps = self
            .state
            .find_swaps_with_status(VerifyStatus::NotSwapped, since, None)
            .await?;
        let count = swaps.len();

        futures::stream::iter(swaps)
            .for_each_concurrent(self.config.max_concurrent_swaps.max(1), |swap| async move {
                if let Err(e) = self.process_swap(&swap).await {
                    match e {
                        RelayerError::GuardViolation(_) => debug!(key = %swap.key, "skip swap: {}", e),
                        _ => warn!(key = %swap.key, "process swap failed: {}", e),
                    }
                }
            })
            .await;

        Ok(count)
    }

    async fn process_swap(&self, swap: &SwapRecord) -> RelayerResult<()> {
        let key = swap.swap_key();
        if swap.status != VerifyStatus::NotSwapped {
            return Err(RelayerError::guard(format!(
                "swap status is {}, not {}",
                swap.status,
                VerifyStatus::NotSwapped
            )));
        }

        let bridge = self.chains.get_bridge(&swap.to_chain_id)?;
        let res = match self.state.find_swap_result(&key).await {
            Ok(res) => res,
            Err(e) if e.is_not_found() => {
                warn!(%key, "{}", MISSING_RESULT_MEMO);
                return self
                    .state
                    .update_swap_status(&key, VerifyStatus::SwapFailed, now(), MISSING_RESULT_MEMO)
                    .await;
            }
            Err(e) => return Err(e),
        };

        if !res.swap_tx.is_empty() {
            return self.recover_unsent(&key, &res, bridge.as_ref()).await;
        }
        if res.status != SettleStatus::Empty {
            return Err(RelayerError::guard(format!(
                "swap result status is {}, not {}",
                res.status,
                SettleStatus::Empty
            )));
        }

        let lane = self.lanes.acquire(&swap.to_chain_id).await;
        let settled = self.settle(&key, &res, bridge.as_ref()).await;
        drop(lane);
        self.lanes.release(&swap.to_chain_id);
        settled
    }

    /// Build, sign and broadcast the settlement; callers hold the chain lane
    async fn settle(
        &self,
        key: &SwapKey,
        res: &SwapResultRecord,
        bridge: &dyn ChainBridge,
    ) -> RelayerResult<()> {
        let args = BuildTxArgs::for_result(res, bridge.mpc_address());
        let raw = bridge.build_raw_transaction(&args).await?;
        let signed = self.sender.sign_with_retry(bridge, &raw, &args).await?;

        update_swap_tx(&self.state, key, &signed.tx_hash, raw.nonce, &args.swap_value).await?;

        let tx_hash = self
            .sender
            .send_with_retry(bridge, &signed, &args, args.is_replace())
            .await
            .map_err(|failure| {
                if !failure.record.is_complete() {
                    error!(%key, record = ?failure.record, "swap failure not fully recorded");
                }
                failure.source
            })?;

        let mtx = MatchTx {
            swap_tx: tx_hash,
            swap_value: args.swap_value.clone(),
            swap_type: args.swap_type,
            swap_nonce: raw.nonce,
            ..Default::default()
        };
        update_swap_result_progress(&self.state, key, mtx).await?;
        self.state
            .update_swap_status(key, VerifyStatus::Processed, now(), "")
            .await
    }

    /// A settlement was signed for this swap but its status never advanced
    async fn recover_unsent(
        &self,
        key: &SwapKey,
        res: &SwapResultRecord,
        bridge: &dyn ChainBridge,
    ) -> RelayerResult<()> {
        match bridge.get_transaction(&res.swap_tx).await {
            Ok(_) => {
                info!(%key, swap_tx = %res.swap_tx, "resume settlement found on chain");
                let mtx = MatchTx {
                    swap_tx: res.swap_tx.clone(),
                    ..Default::default()
                };
                update_swap_result_progress(&self.state, key, mtx).await?;
                self.state
                    .update_swap_status(key, VerifyStatus::Processed, now(), "")
                    .await
            }
            Err(RelayerError::TransactionNotFound { .. }) => {
                let memo = format!("settlement tx {} never reached the chain", res.swap_tx);
                warn!(%key, "{}", memo);
                self.state
                    .update_swap_status(key, VerifyStatus::SwapFailed, now(), &memo)
                    .await?;
                mark_swap_result_failed(&self.state, key, &memo).await
            }
            Err(e) => Err(e),
        }
    }

    /// Confirm settlements waiting in `NotStable`
    pub async fn process_results(&self) -> RelayerResult<usize> {
        let since = now() - self.config.rescan_window_secs;
        let results = self
            .state
            .find_swap_results_with_status(SettleStatus::NotStable, since, None)
            .await?;
        let count = results.len();

        futures::stream::iter(results)
            .for_each_concurrent(self.config.max_concurrent_swaps.max(1), |res| async move {
                if let Err(e) = self.check_result(&res).await {
                    warn!(key = %res.key, swap_tx = %res.swap_tx, "check swap result failed: {}", e);
                }
            })
            .await;

        Ok(count)
    }

    async fn check_result(&self, res: &SwapResultRecord) -> RelayerResult<()> {
        let key = res.swap_key();
        if res.swap_tx.is_empty() {
            warn!(%key, "not stable result without swaptx");
            return Ok(());
        }

        let bridge = self.chains.get_bridge(&res.to_chain_id)?;
        let tx = match bridge.get_transaction(&res.swap_tx).await {
            Ok(tx) => tx,
            Err(RelayerError::TransactionNotFound { .. }) => {
                debug!(%key, swap_tx = %res.swap_tx, "settlement not visible yet");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match tx.outcome {
            TxOutcome::Pending => Ok(()),
            TxOutcome::Reverted => {
                mark_swap_result_failed(&self.state, &key, "settlement tx reverted").await?;
                crate::metrics::record_result_failed(&res.to_chain_id);
                Ok(())
            }
            TxOutcome::Success => {
                let Some(height) = tx.block_number else {
                    return Ok(());
                };

                if res.swap_height != height {
                    let mtx = MatchTx {
                        swap_height: height,
                        swap_time: tx.block_time.unwrap_or_default(),
                        ..Default::default()
                    };
                    update_swap_result_progress(&self.state, &key, mtx).await?;
                }

                let latest = bridge.latest_block_number().await?;
                if latest >= height + bridge.confirmations() {
                    mark_swap_result_stable(&self.state, &key).await?;
                    let latency = (now() - res.tx_time as i64).max(0) as f64;
                    crate::metrics::record_result_stable(&res.to_chain_id, latency);
                }
                Ok(())
            }
        }
    }

    /// Stop the engine loop
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Swap engine shutdown initiated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeBridge;
    use crate::coordination::intake::SwapIntake;
    use crate::coordination::results::fixtures::swap_info;
    use crate::state::MemorySwapStore;
    use std::collections::HashMap;

    fn config() -> RelayerConfig {
        RelayerConfig {
            instance_id: "test".to_string(),
            poll_interval_ms: 10,
            sign_attempts: 2,
            send_attempts: 3,
            send_interval_ms: 1,
            max_concurrent_swaps: 4,
            max_count_of_results: 100,
            rescan_window_secs: 3600,
            health_check_interval_secs: 30,
        }
    }

    struct Harness {
        store: Arc<MemorySwapStore>,
        state: Arc<StateManager>,
        bridge: Arc<FakeBridge>,
        engine: SwapEngine,
        intake: SwapIntake,
    }

    fn harness(bridge: FakeBridge) -> Harness {
        let store = Arc::new(MemorySwapStore::new());
        let state = Arc::new(StateManager::new(store.clone(), 100));
        let bridge = Arc::new(bridge);
        let chains = Arc::new(ChainManager::from_bridges(vec![
            bridge.clone() as Arc<dyn ChainBridge>
        ]));
        Harness {
            store,
            engine: SwapEngine::new(state.clone(), chains, config()),
            intake: SwapIntake::with_thresholds(state.clone(), HashMap::new()),
            state,
            bridge,
        }
    }

    #[tokio::test]
    async fn test_swap_settles_and_becomes_stable() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(7));
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();
        h.intake.register(&info).await.unwrap();

        assert_eq!(h.engine.process_swaps().await.unwrap(), 1);

        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::Processed);
        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::NotStable);
        assert_eq!(res.swap_tx, "0xsettle-0xabc-7");
        assert_eq!(res.swap_nonce, 7);
        assert_eq!(res.swap_value, "1000000");
        assert_eq!(h.bridge.local_nonce(), 8);

        // Mined at block 100, three confirmations required
        h.bridge.put_transaction(&res.swap_tx, Some(100), TxOutcome::Success);
        h.engine.process_results().await.unwrap();
        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::NotStable);
        assert_eq!(res.swap_height, 100);
        assert_eq!(res.swap_time, 1_700_000_100);

        h.bridge.set_block_number(103);
        h.engine.process_results().await.unwrap();
        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Stable);
    }

    #[tokio::test]
    async fn test_dropped_broadcast_fails_both_records() {
        let h = harness(FakeBridge::new("250").dropping_sends());
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();
        h.intake.register(&info).await.unwrap();

        h.engine.process_swaps().await.unwrap();

        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::SwapFailed);
        assert!(swap.memo.contains("not found"));
        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Failed);
        assert_eq!(res.memo, swap.memo);
        assert_eq!(h.bridge.sent.lock().unwrap().len(), 3);
        assert_eq!(h.bridge.local_nonce(), 0);

        // Nothing left for the next round
        assert_eq!(h.engine.process_swaps().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reverted_settlement_is_failed() {
        let h = harness(FakeBridge::new("250"));
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();
        h.intake.register(&info).await.unwrap();
        h.engine.process_swaps().await.unwrap();

        let res = h.state.find_swap_result(&key).await.unwrap();
        h.bridge.put_transaction(&res.swap_tx, Some(100), TxOutcome::Reverted);
        h.engine.process_results().await.unwrap();

        let res = h.state.find_swap_result(&key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Failed);
        assert_eq!(res.memo, "settlement tx reverted");
    }

    #[tokio::test]
    async fn test_held_swap_is_not_settled() {
        let h = harness(FakeBridge::new("250"));
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();
        h.intake.register(&info).await.unwrap();
        h.state
            .update_swap_status(&key, VerifyStatus::WithBigValue, now(), "held")
            .await
            .unwrap();

        assert_eq!(h.engine.process_swaps().await.unwrap(), 0);
        assert!(h.bridge.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsent_settlement_recovery() {
        let h = harness(FakeBridge::new("250"));
        let lost = swap_info("56", "0x01", 1);
        let landed = swap_info("56", "0x02", 1);
        h.intake.register(&lost).await.unwrap();
        h.intake.register(&landed).await.unwrap();

        let lost_key = lost.swap_key().unwrap();
        let landed_key = landed.swap_key().unwrap();
        update_swap_tx(&h.state, &lost_key, "0xlost", 0, "1000000").await.unwrap();
        update_swap_tx(&h.state, &landed_key, "0xlanded", 1, "1000000").await.unwrap();
        h.bridge.put_transaction("0xlanded", None, TxOutcome::Pending);

        h.engine.process_swaps().await.unwrap();

        let swap = h.state.find_swap(&lost_key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::SwapFailed);
        let res = h.state.find_swap_result(&lost_key).await.unwrap();
        assert_eq!(res.status, SettleStatus::Failed);
        assert_eq!(res.swap_tx, "0xlost");

        let swap = h.state.find_swap(&landed_key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::Processed);
        let res = h.state.find_swap_result(&landed_key).await.unwrap();
        assert_eq!(res.status, SettleStatus::NotStable);
        assert!(h.bridge.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_chain_settlements_take_distinct_nonces() {
        let h = harness(FakeBridge::new("250").with_chain_nonce(7));
        let first = swap_info("56", "0x01", 1);
        let second = swap_info("56", "0x02", 1);
        h.intake.register(&first).await.unwrap();
        h.intake.register(&second).await.unwrap();

        assert_eq!(h.engine.process_swaps().await.unwrap(), 2);

        let a = h.state.find_swap_result(&first.swap_key().unwrap()).await.unwrap();
        let b = h.state.find_swap_result(&second.swap_key().unwrap()).await.unwrap();
        assert_eq!(a.status, SettleStatus::NotStable);
        assert_eq!(b.status, SettleStatus::NotStable);
        assert_ne!(a.swap_nonce, b.swap_nonce);

        let mut nonces = vec![a.swap_nonce, b.swap_nonce];
        nonces.sort();
        assert_eq!(nonces, vec![7, 8]);
        assert_eq!(h.bridge.local_nonce(), 9);
        assert_eq!(h.engine.lanes.len(), 0);
    }

    #[tokio::test]
    async fn test_swap_without_result_is_parked_then_readmitted() {
        let h = harness(FakeBridge::new("250"));
        let info = swap_info("56", "0xabc", 1);
        let key = info.swap_key().unwrap();

        h.store.set_result_inserts_down(true);
        let err = h.intake.register(&info).await.unwrap_err();
        assert!(err.is_store_unavailable());
        h.store.set_result_inserts_down(false);

        h.engine.process_swaps().await.unwrap();
        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::SwapFailed);
        assert_eq!(swap.memo, MISSING_RESULT_MEMO);
        assert!(h.bridge.sent.lock().unwrap().is_empty());
        assert_eq!(h.engine.process_swaps().await.unwrap(), 0);

        // Detector hands the swap over again
        assert_eq!(h.intake.register(&info).await.unwrap(), VerifyStatus::NotSwapped);
        h.engine.process_swaps().await.unwrap();
        let swap = h.state.find_swap(&key).await.unwrap();
        assert_eq!(swap.status, VerifyStatus::Processed);
    }
}
