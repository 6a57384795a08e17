//! Settlement transaction submission with local nonce tracking

mod nonce;
mod sender;

pub use nonce::NonceManager;
pub use sender::{FailureRecord, SendFailure, SettlementSender};
