//! Contract blocks: disjoint ranges of test-data keys handed to data generators.
//!
//! Generators draw fresh block numbers from the [BlockAllocator] and submit them once the block
//! is populated. Consumers read the [ActiveBlockInfo] whose watermark tells up to which block
//! number everything is populated.
mod accessor;
mod active;
mod allocator;

pub use accessor::{BlockAccessError, BlockAccessor};
pub use active::ActiveBlockInfo;
pub use allocator::BlockAllocator;

use thiserror::Error;

/// Number of a contract block
pub type BlockNumber = u64;

/// Misuse of the allocator, the allocator state is never changed by a failing call
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// The block was never issued or has been submitted already
    #[error("Not a waiting block, block number = {0}")]
    NotWaiting(BlockNumber),
    /// The block is already active
    #[error("Already active block: {0}")]
    AlreadyActive(BlockNumber),
    /// Blocks must hold at least one record
    #[error("Contract block size must not be zero")]
    ZeroBlockSize,
    /// Text did not describe an [ActiveBlockInfo]
    #[error("Malformed active block info: `{0}`")]
    MalformedBlockInfo(String),
}
