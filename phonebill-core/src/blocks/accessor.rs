use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{ActiveBlockInfo, BlockAllocator, BlockError, BlockNumber};
use crate::protocol::{ControllerClient, Message, ProtocolError};

/// Errors of a [BlockAccessor]
#[derive(Debug, Error)]
pub enum BlockAccessError {
    /// The allocator refused the operation
    #[error(transparent)]
    Block(#[from] BlockError),
    /// Talking to the controller failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Access to the block allocator, either in process or through the controller.
///
/// Generators and consumers are written against this trait so they run unchanged next to the
/// allocator or in a remote worker.
#[async_trait]
pub trait BlockAccessor: Send + Sync {
    /// Draw a fresh block number
    async fn get_new_block(&self) -> Result<BlockNumber, BlockAccessError>;

    /// Report a drawn block as populated
    async fn submit(&self, block: BlockNumber) -> Result<(), BlockAccessError>;

    /// Snapshot of the populated blocks
    async fn active_block_info(&self) -> Result<ActiveBlockInfo, BlockAccessError>;
}

#[async_trait]
impl BlockAccessor for BlockAllocator {
    async fn get_new_block(&self) -> Result<BlockNumber, BlockAccessError> {
        Ok(BlockAllocator::get_new_block(self))
    }

    async fn submit(&self, block: BlockNumber) -> Result<(), BlockAccessError> {
        Ok(BlockAllocator::submit(self, block)?)
    }

    async fn active_block_info(&self) -> Result<ActiveBlockInfo, BlockAccessError> {
        Ok(BlockAllocator::active_block_info(self))
    }
}

#[async_trait]
impl<R, W> BlockAccessor for ControllerClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn get_new_block(&self) -> Result<BlockNumber, BlockAccessError> {
        let body = self.request(Message::GetNewBlock, &[]).await?;
        let block = first_line(Message::GetNewBlock, &body)?
            .parse::<BlockNumber>()
            .map_err(|e| ProtocolError::malformed(Message::GetNewBlock, e.to_string()))?;
        Ok(block)
    }

    async fn submit(&self, block: BlockNumber) -> Result<(), BlockAccessError> {
        self.notify(Message::SubmitBlock, &[block.to_string()])
            .await?;
        Ok(())
    }

    async fn active_block_info(&self) -> Result<ActiveBlockInfo, BlockAccessError> {
        let body = self.request(Message::GetActiveBlockInfo, &[]).await?;
        let info = first_line(Message::GetActiveBlockInfo, &body)?
            .parse::<ActiveBlockInfo>()
            .map_err(|e| {
                ProtocolError::malformed(Message::GetActiveBlockInfo, e.to_string())
            })?;
        Ok(info)
    }
}

fn first_line(message: Message, body: &[String]) -> Result<&str, ProtocolError> {
    body.first()
        .map(String::as_str)
        .ok_or_else(|| ProtocolError::malformed(message, "empty reply"))
}
