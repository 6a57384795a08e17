//! In-process swap store
//!
//! Backs tests and single-instance dry runs (`database.url = "memory"`).

use super::records::{SwapRecord, SwapResultRecord};
use super::repository::{ResultFilter, StatusQuery, SwapRepository};
use super::updates::{SwapFields, SwapResultFields};
use crate::error::{RelayerError, RelayerResult};
use crate::status::{SettleStatus, VerifyStatus};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemorySwapStore {
    swaps: RwLock<HashMap<String, SwapRecord>>,
    results: RwLock<HashMap<String, SwapResultRecord>>,
    #[cfg(test)]
    result_inserts_down: std::sync::atomic::AtomicBool,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn swap_count(&self) -> usize {
        self.swaps.read().await.len()
    }

    /// Make result inserts fail as an unreachable store would
    #[cfg(test)]
    pub fn set_result_inserts_down(&self, down: bool) {
        self.result_inserts_down
            .store(down, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn result_inserts_refused(&self) -> bool {
        self.result_inserts_down
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn result_inserts_refused(&self) -> bool {
        false
    }
}

fn not_found(key: &str) -> RelayerError {
    RelayerError::NotFound {
        key: key.to_string(),
    }
}

#[async_trait]
impl SwapRepository for MemorySwapStore {
    async fn insert_swap(&self, swap: &SwapRecord) -> RelayerResult<()> {
        let mut swaps = self.swaps.write().await;
        if swaps.contains_key(&swap.key) {
            return Err(RelayerError::DuplicateKey {
                key: swap.key.clone(),
            });
        }
        swaps.insert(swap.key.clone(), swap.clone());
        Ok(())
    }

    async fn update_swap(&self, key: &str, fields: &SwapFields) -> RelayerResult<()> {
        let mut swaps = self.swaps.write().await;
        let swap = swaps.get_mut(key).ok_or_else(|| not_found(key))?;
        fields.apply(swap);
        Ok(())
    }

    async fn get_swap(&self, key: &str) -> RelayerResult<SwapRecord> {
        self.swaps
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    async fn first_swap(&self, chain_id: &str, tx_id: &str) -> RelayerResult<SwapRecord> {
        let swaps = self.swaps.read().await;
        let mut matching: Vec<_> = swaps
            .values()
            .filter(|s| s.from_chain_id == chain_id && s.tx_id == tx_id)
            .collect();
        matching.sort_by_key(|s| s.log_index);
        matching
            .first()
            .map(|s| (*s).clone())
            .ok_or_else(|| not_found(&format!("{}:{}:*", chain_id, tx_id)))
    }

    async fn swaps_with_status(
        &self,
        query: &StatusQuery<VerifyStatus>,
    ) -> RelayerResult<Vec<SwapRecord>> {
        let swaps = self.swaps.read().await;
        let mut results: Vec<_> = swaps
            .values()
            .filter(|s| {
                s.status == query.status
                    && s.timestamp >= query.since
                    && query
                        .chain_id
                        .as_ref()
                        .map_or(true, |chain_id| &s.from_chain_id == chain_id)
            })
            .cloned()
            .collect();

        results.sort_by_key(|s| s.timestamp);
        results.truncate(query.limit);
        Ok(results)
    }

    async fn insert_swap_result(&self, result: &SwapResultRecord) -> RelayerResult<()> {
        if self.result_inserts_refused() {
            return Err(RelayerError::StoreBackend("result insert refused".to_string()));
        }
        let mut results = self.results.write().await;
        if results.contains_key(&result.key) {
            return Err(RelayerError::DuplicateKey {
                key: result.key.clone(),
            });
        }
        results.insert(result.key.clone(), result.clone());
        Ok(())
    }

    async fn update_swap_result(&self, key: &str, fields: &SwapResultFields) -> RelayerResult<()> {
        let mut results = self.results.write().await;
        let result = results.get_mut(key).ok_or_else(|| not_found(key))?;
        fields.apply(result);
        Ok(())
    }

    async fn get_swap_result(&self, key: &str) -> RelayerResult<SwapResultRecord> {
        self.results
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    async fn first_swap_result(
        &self,
        chain_id: &str,
        tx_id: &str,
    ) -> RelayerResult<SwapResultRecord> {
        let results = self.results.read().await;
        let mut matching: Vec<_> = results
            .values()
            .filter(|r| r.from_chain_id == chain_id && r.tx_id == tx_id)
            .collect();
        matching.sort_by_key(|r| r.log_index);
        matching
            .first()
            .map(|r| (*r).clone())
            .ok_or_else(|| not_found(&format!("{}:{}:*", chain_id, tx_id)))
    }

    async fn swap_results_with_status(
        &self,
        query: &StatusQuery<SettleStatus>,
    ) -> RelayerResult<Vec<SwapResultRecord>> {
        let results = self.results.read().await;
        let mut matching: Vec<_> = results
            .values()
            .filter(|r| {
                r.status == query.status
                    && r.timestamp >= query.since
                    && query
                        .chain_id
                        .as_ref()
                        .map_or(true, |chain_id| &r.from_chain_id == chain_id)
            })
            .cloned()
            .collect();

        matching.sort_by_key(|r| r.timestamp);
        matching.truncate(query.limit);
        Ok(matching)
    }

    async fn list_swap_results(&self, filter: &ResultFilter) -> RelayerResult<Vec<SwapResultRecord>> {
        let results = self.results.read().await;
        let mut matching: Vec<_> = results
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
        if filter.descending {
            matching.reverse();
        }

        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}
