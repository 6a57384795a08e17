//! Swap lifecycle statuses and the guard table that gates transitions
//!
//! Two independent status families are tracked per swap:
//! - `VerifyStatus` on the swap record (source side verification)
//! - `SettleStatus` on the swap result record (destination side settlement)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verification status of a swap record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    /// Detected, verification in progress
    Verifying,
    /// Seen on source chain, below confirmation threshold
    NotStable,
    VerifyFailed,
    /// Verification could not complete because the source RPC failed
    RpcQueryError,
    /// Verified and eligible for settlement
    NotSwapped,
    /// Value above the auto-approval threshold, held for an operator
    WithBigValue,
    /// Settlement tx submitted
    Processed,
    /// Settlement attempt exhausted its retries
    SwapFailed,
}

/// Settlement status of a swap result record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStatus {
    /// No settlement attempt outstanding
    Empty,
    /// Settlement tx submitted, unconfirmed
    NotStable,
    Stable,
    Failed,
}

/// Status field of a result patch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Leave the stored status untouched
    Keep,
    Set(SettleStatus),
}

impl From<SettleStatus> for StatusUpdate {
    fn from(status: SettleStatus) -> Self {
        StatusUpdate::Set(status)
    }
}

/// Transition guards attached to a status value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Guards {
    /// A rescan may re-attempt verification
    pub retry: bool,
    /// A re-verification pass may revisit the swap
    pub reverify: bool,
    /// An operator may force a resend
    pub reswap: bool,
}

const NONE: Guards = Guards {
    retry: false,
    reverify: false,
    reswap: false,
};

/// Guard lookup for verification statuses
pub fn verify_guards(status: VerifyStatus) -> Guards {
    use VerifyStatus::*;
    match status {
        Verifying | VerifyFailed | RpcQueryError => Guards {
            retry: true,
            ..NONE
        },
        NotStable => Guards {
            retry: true,
            reverify: true,
            ..NONE
        },
        Processed | SwapFailed => Guards {
            reswap: true,
            ..NONE
        },
        NotSwapped | WithBigValue => NONE,
    }
}

/// Guard lookup for settlement statuses
pub fn settle_guards(status: SettleStatus) -> Guards {
    use SettleStatus::*;
    match status {
        Empty | Failed => Guards {
            reswap: true,
            ..NONE
        },
        NotStable => Guards {
            retry: true,
            ..NONE
        },
        Stable => NONE,
    }
}

impl VerifyStatus {
    pub const ALL: [VerifyStatus; 8] = [
        VerifyStatus::Verifying,
        VerifyStatus::NotStable,
        VerifyStatus::VerifyFailed,
        VerifyStatus::RpcQueryError,
        VerifyStatus::NotSwapped,
        VerifyStatus::WithBigValue,
        VerifyStatus::Processed,
        VerifyStatus::SwapFailed,
    ];

    pub fn can_retry(self) -> bool {
        verify_guards(self).retry
    }

    pub fn can_reverify(self) -> bool {
        verify_guards(self).reverify
    }

    pub fn can_reswap(self) -> bool {
        verify_guards(self).reswap
    }

    /// An empty memo on transition into these statuses clears the stored memo
    pub fn clears_memo(self) -> bool {
        matches!(
            self,
            VerifyStatus::Verifying | VerifyStatus::NotStable | VerifyStatus::NotSwapped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerifyStatus::Verifying => "verifying",
            VerifyStatus::NotStable => "not_stable",
            VerifyStatus::VerifyFailed => "verify_failed",
            VerifyStatus::RpcQueryError => "rpc_query_error",
            VerifyStatus::NotSwapped => "not_swapped",
            VerifyStatus::WithBigValue => "with_big_value",
            VerifyStatus::Processed => "processed",
            VerifyStatus::SwapFailed => "swap_failed",
        }
    }
}

impl SettleStatus {
    pub const ALL: [SettleStatus; 4] = [
        SettleStatus::Empty,
        SettleStatus::NotStable,
        SettleStatus::Stable,
        SettleStatus::Failed,
    ];

    pub fn can_retry(self) -> bool {
        settle_guards(self).retry
    }

    pub fn can_reswap(self) -> bool {
        settle_guards(self).reswap
    }

    /// The reset status wipes the settlement fields of a result
    pub fn is_reset(self) -> bool {
        self == SettleStatus::Empty
    }

    /// An empty memo on transition into these statuses clears the stored memo
    pub fn clears_memo(self) -> bool {
        matches!(self, SettleStatus::Empty | SettleStatus::NotStable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SettleStatus::Empty => "empty",
            SettleStatus::NotStable => "not_stable",
            SettleStatus::Stable => "stable",
            SettleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SettleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VerifyStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown swap status: {}", s))
    }
}

impl FromStr for SettleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettleStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown swap result status: {}", s))
    }
}
