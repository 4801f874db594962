//! L2 Consensus - proof-of-block-inclusion rollup selection
//!
//! Architecture:
//! - Candidates are ranked by L1 proof height, then nonce, then hash
//! - Each gossip round elects one winner on top of the previous head
//! - Each L1 block may include published rollups; the best one becomes the L2 head

pub mod chain;
pub mod round;
pub mod types;

pub use chain::{extract_rollups, update_state};
pub use round::{find_round_winner, find_winner};
pub use types::*;
