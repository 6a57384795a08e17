//! Settlement coordination
//!
//! - `intake`: verified swaps enter the pipeline
//! - `engine`: swap and stable workers
//! - `results`: settlement record bookkeeping

mod engine;
pub mod intake;
pub mod results;

pub use engine::SwapEngine;
pub use intake::SwapIntake;
pub use results::MatchTx;
