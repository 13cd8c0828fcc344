//! Block allocation and piece assembly.
//!
//! A [`PieceManager`] is shared by every peer connection of a download.
//! Connections talk to it through four operations:
//!
//! - [`claim_next_block`](PieceManager::claim_next_block) - reserve the next
//!   block to request, rarest piece first
//! - [`submit_block`](PieceManager::submit_block) - hand in a received block
//! - [`release_claims`](PieceManager::release_claims) - give back everything a
//!   connection holds, on close
//! - [`is_complete`](PieceManager::is_complete)
//!
//! Claims expire after `claim_timeout`; a reaper task returns expired blocks
//! to the pool.

mod claim;
mod error;
mod manager;
mod state;

pub use claim::{BlockClaim, ConnectionId};
pub use error::PieceError;
pub use manager::{PieceManager, PieceManagerConfig, SubmitOutcome};
pub use state::PieceStatus;
