use std::{collections::BTreeSet, fmt::Display, str::FromStr};

use super::{BlockError, BlockNumber};

/// Which blocks are populated and may be read.
///
/// The watermark is the largest block number `W` such that every block `0..=W` is active, or
/// `None` if block 0 is not active yet. Active blocks above the watermark are listed separately.
///
/// The text form is `count,watermark[,block...]` with `-1` standing for no watermark, e.g.
/// `5,2,5,8` for the active blocks `0, 1, 2, 5, 8`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveBlockInfo {
    number_of_active_blocks: u64,
    watermark: Option<BlockNumber>,
    above_watermark: BTreeSet<BlockNumber>,
}

impl ActiveBlockInfo {
    /// No active blocks at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Info for an arbitrary set of active blocks, duplicates are ignored
    pub fn from_active_blocks(blocks: impl IntoIterator<Item = BlockNumber>) -> Self {
        let above_watermark: BTreeSet<_> = blocks.into_iter().collect();
        let mut info = Self {
            number_of_active_blocks: above_watermark.len() as u64,
            watermark: None,
            above_watermark,
        };
        info.advance();
        info
    }

    /// Largest block number up to which all blocks are active
    pub fn watermark(&self) -> Option<BlockNumber> {
        self.watermark
    }

    /// Number of active blocks, below and above the watermark
    pub fn number_of_active_blocks(&self) -> u64 {
        self.number_of_active_blocks
    }

    /// Active blocks above the watermark in ascending order
    pub fn above_watermark(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.above_watermark.iter().copied()
    }

    /// Whether `block` is active
    pub fn is_active(&self, block: BlockNumber) -> bool {
        self.watermark.is_some_and(|w| block <= w) || self.above_watermark.contains(&block)
    }

    /// Mark `block` as active and move the watermark forward as far as possible
    pub(crate) fn activate(&mut self, block: BlockNumber) -> Result<(), BlockError> {
        if self.is_active(block) {
            return Err(BlockError::AlreadyActive(block));
        }
        self.above_watermark.insert(block);
        self.number_of_active_blocks += 1;
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        loop {
            let next = self.watermark.map_or(0, |w| w + 1);
            if !self.above_watermark.remove(&next) {
                return;
            }
            self.watermark = Some(next);
        }
    }
}

impl Display for ActiveBlockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},", self.number_of_active_blocks)?;
        match self.watermark {
            Some(w) => write!(f, "{w}")?,
            None => f.write_str("-1")?,
        }
        for block in self.above_watermark.iter() {
            write!(f, ",{block}")?;
        }
        Ok(())
    }
}

impl FromStr for ActiveBlockInfo {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BlockError::MalformedBlockInfo(s.to_string());
        let mut fields = s.split(',').map(str::trim);
        let number_of_active_blocks = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        let watermark = match fields.next().ok_or_else(malformed)? {
            "-1" => None,
            f => Some(f.parse::<BlockNumber>().map_err(|_| malformed())?),
        };
        let above_watermark = fields
            .map(|f| f.parse::<BlockNumber>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|_| malformed())?;
        Ok(Self {
            number_of_active_blocks,
            watermark,
            above_watermark,
        })
    }
}
