use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

use tracing::debug;

use super::{ActiveBlockInfo, BlockError, BlockNumber};

#[derive(Debug, Default)]
struct AllocatorState {
    /// Next block number to issue
    next_block: BlockNumber,
    /// Issued and not yet submitted
    waiting: BTreeSet<BlockNumber>,
    active: ActiveBlockInfo,
}

/// Hands out contract block numbers and tracks which blocks are populated.
///
/// A block is either unissued, waiting (issued to a generator) or active (submitted). Numbers are
/// issued in increasing order and never twice. All operations are atomic with respect to each
/// other.
#[derive(Debug, Default)]
pub struct BlockAllocator {
    state: Mutex<AllocatorState>,
}

impl BlockAllocator {
    /// An allocator which has not issued any block yet
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator for a table which already holds `records` contracts in blocks of
    /// `block_size` records.
    ///
    /// All complete blocks are active. A trailing partial block stays waiting, it is considered
    /// issued to the generator which never finished it.
    pub fn from_existing_records(records: u64, block_size: u64) -> Result<Self, BlockError> {
        if block_size == 0 {
            return Err(BlockError::ZeroBlockSize);
        }
        let complete = records / block_size;
        let mut state = AllocatorState {
            next_block: complete,
            waiting: BTreeSet::new(),
            active: ActiveBlockInfo::from_active_blocks(0..complete),
        };
        if records % block_size != 0 {
            state.waiting.insert(complete);
            state.next_block += 1;
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        #[allow(clippy::unwrap_used)]
        self.state.lock().unwrap()
    }

    /// Issue the next unused block number
    pub fn get_new_block(&self) -> BlockNumber {
        let mut state = self.state();
        let block = state.next_block;
        state.next_block += 1;
        state.waiting.insert(block);
        debug!(block, "Issued block");
        block
    }

    /// Mark a waiting block as populated
    pub fn submit(&self, block: BlockNumber) -> Result<(), BlockError> {
        let mut state = self.state();
        if !state.waiting.contains(&block) {
            return Err(BlockError::NotWaiting(block));
        }
        state.active.activate(block)?;
        state.waiting.remove(&block);
        debug!(block, watermark = ?state.active.watermark(), "Submitted block");
        Ok(())
    }

    /// Consistent snapshot of the active blocks
    pub fn active_block_info(&self) -> ActiveBlockInfo {
        self.state().active.clone()
    }

    /// Blocks issued but not submitted yet
    pub fn waiting_blocks(&self) -> Vec<BlockNumber> {
        self.state().waiting.iter().copied().collect()
    }

    /// Number of blocks issued so far
    pub fn issued_blocks(&self) -> u64 {
        self.state().next_block
    }
}
