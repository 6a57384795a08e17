//! State manager: the swap store facade used by workers and admin actions

use super::records::{SwapKey, SwapRecord, SwapResultRecord};
use super::repository::{ResultFilter, StatusQuery, SwapRepository};
use super::updates::{merge_result_update, result_status_fields, swap_status_fields, SwapResultUpdate};
use crate::error::{RelayerError, RelayerResult};
use crate::status::{SettleStatus, VerifyStatus};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Exclusive regions keyed by an arbitrary string
#[derive(Debug, Default)]
pub struct KeyedLock {
    regions: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the region for `key` is free and enter it
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let region = self.regions.entry(key.to_string()).or_default().clone();
        region.lock_owned().await
    }

    /// Forget the region once nobody holds or waits on it
    pub fn release(&self, key: &str) {
        self.regions
            .remove_if(key, |_, region| Arc::strong_count(region) == 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.regions.len()
    }
}

/// Swap store facade
///
/// Derives keys, applies the per-status memo rules and serializes the
/// `NotStable` verification transition per source transaction.
pub struct StateManager {
    repo: Arc<dyn SwapRepository>,
    retry_regions: KeyedLock,
    max_results: usize,
}

impl StateManager {
    pub fn new(repo: Arc<dyn SwapRepository>, max_results: usize) -> Self {
        Self {
            repo,
            retry_regions: KeyedLock::new(),
            max_results,
        }
    }

    pub async fn health_check(&self) -> RelayerResult<()> {
        self.repo.health_check().await
    }

    /// Track a new swap
    pub async fn add_swap(&self, swap: &SwapRecord) -> RelayerResult<()> {
        ensure_key(&swap.key, &swap.swap_key())?;

        match self.repo.insert_swap(swap).await {
            Ok(()) => {
                info!(
                    chain_id = %swap.from_chain_id,
                    tx_id = %swap.tx_id,
                    log_index = swap.log_index,
                    "add swap success"
                );
                Ok(())
            }
            Err(e) => {
                debug!(
                    chain_id = %swap.from_chain_id,
                    tx_id = %swap.tx_id,
                    log_index = swap.log_index,
                    "add swap failed: {}", e
                );
                Err(e)
            }
        }
    }

    /// Move a swap to `status`.
    ///
    /// Every status write for a source transaction runs inside its exclusive
    /// region. The `NotStable` transition re-reads the stored status there and
    /// silently does nothing unless that status can still be retried or
    /// reverified.
    pub async fn update_swap_status(
        &self,
        key: &SwapKey,
        status: VerifyStatus,
        timestamp: i64,
        memo: &str,
    ) -> RelayerResult<()> {
        let region = format!("{}:{}", key.chain_id, key.tx_id);
        let result = self
            .update_swap_status_exclusive(key, &region, status, timestamp, memo)
            .await;
        self.retry_regions.release(&region);

        match &result {
            Ok(()) if matches!(status, VerifyStatus::VerifyFailed | VerifyStatus::SwapFailed) => {
                warn!(%key, %status, memo, "update swap status success");
            }
            Ok(()) => info!(%key, %status, "update swap status success"),
            Err(e) => debug!(%key, %status, "update swap status failed: {}", e),
        }
        result
    }

    async fn update_swap_status_exclusive(
        &self,
        key: &SwapKey,
        region: &str,
        status: VerifyStatus,
        timestamp: i64,
        memo: &str,
    ) -> RelayerResult<()> {
        let _guard = self.retry_regions.acquire(region).await;
        let fields = swap_status_fields(status, timestamp, memo);

        if status != VerifyStatus::NotStable {
            return self.repo.update_swap(&key.render(), &fields).await;
        }

        let current = self.find_swap(key).await?;
        if !(current.status.can_retry() || current.status.can_reverify()) {
            debug!(%key, status = %current.status, "skip not stable transition");
            return Ok(());
        }
        self.repo.update_swap(&current.key, &fields).await
    }

    /// Find a swap; `log_index == 0` matches any index of the source tx
    pub async fn find_swap(&self, key: &SwapKey) -> RelayerResult<SwapRecord> {
        if key.is_any_index() {
            self.repo.first_swap(&key.chain_id, &key.tx_id).await
        } else {
            self.repo.get_swap(&key.render()).await
        }
    }

    /// Swaps in `status` updated since `since`, oldest first
    pub async fn find_swaps_with_status(
        &self,
        status: VerifyStatus,
        since: i64,
        chain_id: Option<&str>,
    ) -> RelayerResult<Vec<SwapRecord>> {
        let query = StatusQuery {
            status,
            since,
            chain_id: chain_id.map(str::to_string),
            limit: self.max_results,
        };
        self.repo.swaps_with_status(&query).await
    }

    pub async fn add_swap_result(&self, result: &SwapResultRecord) -> RelayerResult<()> {
        ensure_key(&result.key, &result.swap_key())?;

        match self.repo.insert_swap_result(result).await {
            Ok(()) => {
                info!(
                    chain_id = %result.from_chain_id,
                    tx_id = %result.tx_id,
                    log_index = result.log_index,
                    "add swap result success"
                );
                Ok(())
            }
            Err(e) => {
                debug!(
                    chain_id = %result.from_chain_id,
                    tx_id = %result.tx_id,
                    log_index = result.log_index,
                    "add swap result failed: {}", e
                );
                Err(e)
            }
        }
    }

    /// Move a swap result to `status`; `Empty` resets the settlement fields
    pub async fn update_swap_result_status(
        &self,
        key: &SwapKey,
        status: SettleStatus,
        timestamp: i64,
        memo: &str,
    ) -> RelayerResult<()> {
        let fields = result_status_fields(status, timestamp, memo);
        let result = self.repo.update_swap_result(&key.render(), &fields).await;

        match &result {
            Ok(()) => info!(%key, %status, "update swap result status success"),
            Err(e) => debug!(%key, %status, "update swap result status failed: {}", e),
        }
        result
    }

    /// Apply a sparse update request to a swap result
    pub async fn update_swap_result(
        &self,
        key: &SwapKey,
        update: &SwapResultUpdate,
    ) -> RelayerResult<()> {
        let fields = merge_result_update(update);
        let result = self.repo.update_swap_result(&key.render(), &fields).await;

        match &result {
            Ok(()) => info!(%key, updates = ?fields.field_names(), "update swap result success"),
            Err(e) => debug!(%key, updates = ?fields.field_names(), "update swap result failed: {}", e),
        }
        result
    }

    /// Find a swap result; `log_index == 0` matches any index of the source tx
    pub async fn find_swap_result(&self, key: &SwapKey) -> RelayerResult<SwapResultRecord> {
        if key.is_any_index() {
            self.repo.first_swap_result(&key.chain_id, &key.tx_id).await
        } else {
            self.repo.get_swap_result(&key.render()).await
        }
    }

    pub async fn find_swap_results_with_status(
        &self,
        status: SettleStatus,
        since: i64,
        chain_id: Option<&str>,
    ) -> RelayerResult<Vec<SwapResultRecord>> {
        let query = StatusQuery {
            status,
            since,
            chain_id: chain_id.map(str::to_string),
            limit: self.max_results,
        };
        self.repo.swap_results_with_status(&query).await
    }

    /// Paginated listing; a negative limit returns the most recent first
    pub async fn find_swap_results(
        &self,
        chain_id: &str,
        address: &str,
        offset: usize,
        limit: i64,
    ) -> RelayerResult<Vec<SwapResultRecord>> {
        let filter = ResultFilter::new(chain_id, address, offset, limit);
        self.repo.list_swap_results(&filter).await
    }
}

fn ensure_key(stored: &str, identity: &SwapKey) -> RelayerResult<()> {
    let derived = identity.render();
    if stored != derived {
        return Err(RelayerError::InvalidKey(format!(
            "record key {} does not match identity {}",
            stored, derived
        )));
    }
    Ok(())
}
