//! Stand-in workloads which exercise the coordination without a database
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::{BatchJob, OnlineWorkload, WorkloadError, WorkloadFactory};
use crate::{
    blocks::{ActiveBlockInfo, BlockAccessor, BlockNumber},
    config::{BenchConfig, OnlineApp},
};

/// Populates fresh contract blocks: draws a block, fills it and submits it
pub struct ContractInserter {
    accessor: Arc<dyn BlockAccessor>,
    block_size: u64,
}

impl ContractInserter {
    /// Inserter drawing blocks of `block_size` contracts from `accessor`
    pub fn new(accessor: Arc<dyn BlockAccessor>, block_size: u64) -> Self {
        Self {
            accessor,
            block_size,
        }
    }
}

#[async_trait]
impl OnlineWorkload for ContractInserter {
    async fn execute(&mut self) -> Result<(), WorkloadError> {
        let block = self.accessor.get_new_block().await?;
        let first_key = block * self.block_size;
        debug!(block, first_key, records = self.block_size, "Inserting contracts");
        self.accessor.submit(block).await?;
        Ok(())
    }
}

/// Pick a random populated block, `None` if nothing is populated yet
pub fn pick_active_block(info: &ActiveBlockInfo, rng: &mut impl Rng) -> Option<BlockNumber> {
    let below = info.watermark().map_or(0, |w| w + 1);
    let above: Vec<BlockNumber> = info.above_watermark().collect();
    let total = below + above.len() as u64;
    if total == 0 {
        return None;
    }
    let index = rng.gen_range(0..total);
    if index < below {
        Some(index)
    } else {
        above.get((index - below) as usize).copied()
    }
}

/// Touches records of populated contract blocks only
pub struct HistoryReader {
    accessor: Arc<dyn BlockAccessor>,
    rng: StdRng,
}

impl HistoryReader {
    /// Reader choosing among the blocks known to `accessor`
    pub fn new(accessor: Arc<dyn BlockAccessor>, seed: u64) -> Self {
        Self {
            accessor,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl OnlineWorkload for HistoryReader {
    async fn execute(&mut self) -> Result<(), WorkloadError> {
        let info = self.accessor.active_block_info().await?;
        match pick_active_block(&info, &mut self.rng) {
            Some(block) => debug!(block, "Updating history of block"),
            None => debug!("No populated block yet"),
        }
        Ok(())
    }
}

/// Online workloads without a database: the delete/insert app populates blocks, every other app
/// reads populated ones
#[derive(Debug, Default)]
pub struct SyntheticWorkloads;

impl WorkloadFactory for SyntheticWorkloads {
    fn create(
        &self,
        app: OnlineApp,
        instance: u32,
        accessor: Arc<dyn BlockAccessor>,
        config: &BenchConfig,
    ) -> Box<dyn OnlineWorkload> {
        match app {
            OnlineApp::MasterDeleteInsert => Box::new(ContractInserter::new(
                accessor,
                config.contract_block_size(),
            )),
            _ => Box::new(HistoryReader::new(accessor, instance as u64)),
        }
    }
}

/// A billing batch which only advances through a fixed number of steps
#[derive(Debug)]
pub struct SyntheticBilling {
    steps: u32,
    step_delay: Duration,
    done: AtomicU32,
    aborted: AtomicBool,
}

impl SyntheticBilling {
    /// Batch of `steps` steps taking `step_delay` each
    pub fn new(steps: u32, step_delay: Duration) -> Self {
        Self {
            steps,
            step_delay,
            done: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BatchJob for SyntheticBilling {
    async fn execute(&self, config: &BenchConfig) -> Result<(), WorkloadError> {
        debug!(target_month = %config.target_month, steps = self.steps, "Billing started");
        for _ in 0..self.steps {
            if self.aborted.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(self.step_delay).await;
            self.done.fetch_add(1, Ordering::Release);
        }
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn status(&self) -> String {
        format!(
            "Billing in progress, {}/{} steps.",
            self.done.load(Ordering::Acquire),
            self.steps
        )
    }

    fn final_message(&self) -> String {
        let done = self.done.load(Ordering::Acquire);
        if self.aborted.load(Ordering::Acquire) {
            format!("Aborted after {done}/{} steps.", self.steps)
        } else {
            format!("Finished {done} steps.")
        }
    }
}
