//! Persistence contract for swap and swap result records

use super::records::{SwapRecord, SwapResultRecord};
use super::updates::{SwapFields, SwapResultFields};
use crate::error::RelayerResult;
use crate::status::{SettleStatus, VerifyStatus};

use async_trait::async_trait;
use ethers::types::Address;
use std::str::FromStr;

/// Wildcard accepted by listing filters
pub const ALL_FILTER: &str = "all";

/// Status scan predicate used by rescanning workers
#[derive(Debug, Clone, PartialEq)]
pub struct StatusQuery<S> {
    pub status: S,
    /// Only records whose timestamp is at or after this instant
    pub since: i64,
    pub chain_id: Option<String>,
    pub limit: usize,
}

/// Listing filter for swap results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFilter {
    pub chain_id: Option<String>,
    pub address: Option<String>,
    pub offset: usize,
    pub limit: usize,
    /// Most recent first
    pub descending: bool,
}

impl ResultFilter {
    /// Build a filter from raw listing parameters.
    ///
    /// Empty strings and `"all"` disable the corresponding filter. Hex
    /// addresses are matched lower-cased. A negative limit asks for the most
    /// recent records.
    pub fn new(chain_id: &str, address: &str, offset: usize, limit: i64) -> Self {
        let chain_id = (!chain_id.is_empty() && chain_id != ALL_FILTER).then(|| chain_id.to_string());
        let address = (!address.is_empty() && address != ALL_FILTER).then(|| {
            if is_hex_address(address) {
                address.to_lowercase()
            } else {
                address.to_string()
            }
        });

        Self {
            chain_id,
            address,
            offset,
            limit: limit.unsigned_abs() as usize,
            descending: limit < 0,
        }
    }

    pub fn matches(&self, record: &SwapResultRecord) -> bool {
        self.chain_id
            .as_ref()
            .map_or(true, |chain_id| &record.from_chain_id == chain_id)
            && self
                .address
                .as_ref()
                .map_or(true, |address| &record.from == address)
    }
}

fn is_hex_address(s: &str) -> bool {
    Address::from_str(s).is_ok()
}

/// Storage backend for swap records
///
/// Keys are the rendered form of `SwapKey`. Updates take sparse field sets,
/// never whole records.
#[async_trait]
pub trait SwapRepository: Send + Sync {
    /// Insert a swap, failing with `DuplicateKey` if it is already tracked
    async fn insert_swap(&self, swap: &SwapRecord) -> RelayerResult<()>;

    async fn update_swap(&self, key: &str, fields: &SwapFields) -> RelayerResult<()>;

    async fn get_swap(&self, key: &str) -> RelayerResult<SwapRecord>;

    /// First swap for a source transaction regardless of log index
    async fn first_swap(&self, chain_id: &str, tx_id: &str) -> RelayerResult<SwapRecord>;

    /// Swaps in a status, oldest first
    async fn swaps_with_status(
        &self,
        query: &StatusQuery<VerifyStatus>,
    ) -> RelayerResult<Vec<SwapRecord>>;

    /// Insert a swap result, failing with `DuplicateKey` if it already exists
    async fn insert_swap_result(&self, result: &SwapResultRecord) -> RelayerResult<()>;

    async fn update_swap_result(&self, key: &str, fields: &SwapResultFields) -> RelayerResult<()>;

    async fn get_swap_result(&self, key: &str) -> RelayerResult<SwapResultRecord>;

    async fn first_swap_result(&self, chain_id: &str, tx_id: &str)
        -> RelayerResult<SwapResultRecord>;

    async fn swap_results_with_status(
        &self,
        query: &StatusQuery<SettleStatus>,
    ) -> RelayerResult<Vec<SwapResultRecord>>;

    async fn list_swap_results(&self, filter: &ResultFilter) -> RelayerResult<Vec<SwapResultRecord>>;

    async fn health_check(&self) -> RelayerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_wildcards() {
        let filter = ResultFilter::new("all", "", 0, 20);
        assert_eq!(filter.chain_id, None);
        assert_eq!(filter.address, None);
        assert!(!filter.descending);
    }

    #[test]
    fn test_negative_limit_means_most_recent() {
        let filter = ResultFilter::new("56", "all", 10, -5);
        assert_eq!(filter.chain_id.as_deref(), Some("56"));
        assert_eq!(filter.limit, 5);
        assert_eq!(filter.offset, 10);
        assert!(filter.descending);
    }

    #[test]
    fn test_hex_address_lowercased() {
        let filter = ResultFilter::new("", "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01", 0, 1);
        assert_eq!(
            filter.address.as_deref(),
            Some("0xabcdef0123456789abcdef0123456789abcdef01")
        );

        let filter = ResultFilter::new("", "TerraAddr", 0, 1);
        assert_eq!(filter.address.as_deref(), Some("TerraAddr"));

        let filter = ResultFilter::new("", "0xABC", 0, 1);
        assert_eq!(filter.address.as_deref(), Some("0xABC"));
    }
}
