//! Sparse update requests and the field sets they translate to
//!
//! Stores never receive whole records on update, only the minimal set of
//! fields a transition touches. This module owns the rules for building
//! those field sets: memo clearing per status, and the settlement reset that
//! wipes a superseded attempt.

use super::records::{SwapRecord, SwapResultRecord};
use crate::status::{SettleStatus, StatusUpdate, VerifyStatus};

/// Fields written on a swap record update
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFields {
    pub status: VerifyStatus,
    pub timestamp: i64,
    pub memo: Option<String>,
}

impl SwapFields {
    pub fn apply(&self, record: &mut SwapRecord) {
        record.status = self.status;
        record.timestamp = self.timestamp;
        if let Some(memo) = &self.memo {
            record.memo = memo.clone();
        }
    }
}

/// Fields written on a swap result update; `None` leaves the stored value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwapResultFields {
    pub timestamp: i64,
    pub status: Option<SettleStatus>,
    pub memo: Option<String>,
    pub swap_tx: Option<String>,
    pub old_swap_txs: Option<Vec<String>>,
    pub swap_height: Option<u64>,
    pub swap_time: Option<u64>,
    pub swap_value: Option<String>,
    pub swap_type: Option<u32>,
    pub swap_nonce: Option<u64>,
}

impl SwapResultFields {
    /// Names of the fields this patch sets, in storage column naming
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec!["timestamp"];
        let optional = [
            ("status", self.status.is_some()),
            ("memo", self.memo.is_some()),
            ("swap_tx", self.swap_tx.is_some()),
            ("old_swap_txs", self.old_swap_txs.is_some()),
            ("swap_height", self.swap_height.is_some()),
            ("swap_time", self.swap_time.is_some()),
            ("swap_value", self.swap_value.is_some()),
            ("swap_type", self.swap_type.is_some()),
            ("swap_nonce", self.swap_nonce.is_some()),
        ];
        names.extend(optional.iter().filter(|(_, set)| *set).map(|(name, _)| *name));
        names
    }

    pub fn apply(&self, record: &mut SwapResultRecord) {
        record.timestamp = self.timestamp;
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(memo) = &self.memo {
            record.memo = memo.clone();
        }
        if let Some(swap_tx) = &self.swap_tx {
            record.swap_tx = swap_tx.clone();
        }
        if let Some(old_swap_txs) = &self.old_swap_txs {
            record.old_swap_txs = old_swap_txs.clone();
        }
        if let Some(swap_height) = self.swap_height {
            record.swap_height = swap_height;
        }
        if let Some(swap_time) = self.swap_time {
            record.swap_time = swap_time;
        }
        if let Some(swap_value) = &self.swap_value {
            record.swap_value = swap_value.clone();
        }
        if let Some(swap_type) = self.swap_type {
            record.swap_type = swap_type;
        }
        if let Some(swap_nonce) = self.swap_nonce {
            record.swap_nonce = swap_nonce;
        }
    }

    /// Force the settlement fields of a superseded attempt back to empty.
    /// The nonce is kept: force reswap compares against it.
    fn reset_settlement(&mut self) {
        self.memo = Some(String::new());
        self.swap_tx = Some(String::new());
        self.old_swap_txs = Some(Vec::new());
        self.swap_height = Some(0);
        self.swap_time = Some(0);
    }
}

/// Sparse update request for a swap result
#[derive(Debug, Clone, PartialEq)]
pub struct SwapResultUpdate {
    pub status: StatusUpdate,
    pub timestamp: i64,
    pub memo: Option<String>,
    pub swap_tx: Option<String>,
    pub old_swap_txs: Option<Vec<String>>,
    pub swap_height: Option<u64>,
    pub swap_time: Option<u64>,
    pub swap_value: Option<String>,
    pub swap_type: Option<u32>,
    pub swap_nonce: Option<u64>,
}

impl SwapResultUpdate {
    pub fn new(status: impl Into<StatusUpdate>, timestamp: i64) -> Self {
        Self {
            status: status.into(),
            timestamp,
            memo: None,
            swap_tx: None,
            old_swap_txs: None,
            swap_height: None,
            swap_time: None,
            swap_value: None,
            swap_type: None,
            swap_nonce: None,
        }
    }

    pub fn keep_status(timestamp: i64) -> Self {
        Self::new(StatusUpdate::Keep, timestamp)
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_swap_tx(mut self, swap_tx: impl Into<String>) -> Self {
        self.swap_tx = Some(swap_tx.into());
        self
    }

    pub fn with_old_swap_txs(mut self, old_swap_txs: Vec<String>) -> Self {
        self.old_swap_txs = Some(old_swap_txs);
        self
    }

    pub fn with_confirmation(mut self, swap_height: u64, swap_time: u64) -> Self {
        self.swap_height = Some(swap_height);
        self.swap_time = Some(swap_time);
        self
    }

    pub fn with_swap_value(mut self, swap_value: impl Into<String>) -> Self {
        self.swap_value = Some(swap_value.into());
        self
    }

    pub fn with_swap_type(mut self, swap_type: u32) -> Self {
        self.swap_type = Some(swap_type);
        self
    }

    pub fn with_swap_nonce(mut self, swap_nonce: u64) -> Self {
        self.swap_nonce = Some(swap_nonce);
        self
    }
}

/// Translate an update request into the minimal field set
pub fn merge_result_update(update: &SwapResultUpdate) -> SwapResultFields {
    let status = match update.status {
        StatusUpdate::Keep => None,
        StatusUpdate::Set(status) => Some(status),
    };

    let mut fields = SwapResultFields {
        timestamp: update.timestamp,
        status,
        memo: None,
        swap_tx: update.swap_tx.clone(),
        old_swap_txs: update.old_swap_txs.clone(),
        swap_height: update.swap_height,
        swap_time: update.swap_time,
        swap_value: update.swap_value.clone(),
        swap_type: update.swap_type,
        swap_nonce: update.swap_nonce,
    };

    fields.memo = match update.memo.as_deref() {
        Some(memo) if !memo.is_empty() => Some(memo.to_string()),
        _ if status.is_some_and(SettleStatus::clears_memo) => Some(String::new()),
        _ => None,
    };

    if status.is_some_and(SettleStatus::is_reset) {
        fields.reset_settlement();
    }

    fields
}

/// Field set for a swap status transition
pub fn swap_status_fields(status: VerifyStatus, timestamp: i64, memo: &str) -> SwapFields {
    let memo = if !memo.is_empty() {
        Some(memo.to_string())
    } else if status.clears_memo() {
        Some(String::new())
    } else {
        None
    };

    SwapFields {
        status,
        timestamp,
        memo,
    }
}

/// Field set for a swap result status transition
pub fn result_status_fields(status: SettleStatus, timestamp: i64, memo: &str) -> SwapResultFields {
    let mut update = SwapResultUpdate::new(status, timestamp);
    if !memo.is_empty() {
        update.memo = Some(memo.to_string());
    }
    merge_result_update(&update)
}
