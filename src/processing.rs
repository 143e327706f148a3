use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::block_processor::transform;
use crate::checkpoint::Checkpoint;
use crate::config::RetryPolicy;
use crate::database::BlockStore;
use crate::error::{Error, Result};
use crate::models::Block;
use crate::rpc::{ChainSource, RawBlock, Verbosity};

/// Where the pipeline is between two steps.
#[derive(Debug)]
pub enum State {
    ComputeTarget,
    Fetch { target: u64, tip: u64 },
    Transform { target: u64, tip: u64, hash: String, raw: RawBlock },
    Load { block: Block, tip: u64 },
    Idle,
}

impl State {
    /// States where no fetch or write is in flight, so stopping here loses nothing.
    fn is_boundary(&self) -> bool {
        matches!(self, State::ComputeTarget | State::Idle)
    }
}

/// Moves blocks from the node into the store one height at a time.
pub struct Pipeline<C, S> {
    chain: C,
    store: S,
    checkpoint: Checkpoint,
    poll_interval: Duration,
    retry: RetryPolicy,
    caught_up: bool,
}

impl<C: ChainSource, S: BlockStore> Pipeline<C, S> {
    pub fn new(
        chain: C,
        store: S,
        checkpoint: Checkpoint,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            store,
            checkpoint,
            poll_interval,
            retry,
            caught_up: false,
        }
    }

    /// Runs until `shutdown` fires or a non-retryable error occurs.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let mut state = State::ComputeTarget;
        let mut failures = 0u32;

        loop {
            if state.is_boundary() && shutdown.is_cancelled() {
                info!("Shutdown requested, stopping at a block boundary.");
                return Ok(());
            }

            if let State::Idle = state {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Shutdown requested while idle.");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            let loading = matches!(state, State::Load { .. });
            state = match self.step(state).await {
                Ok(next) => {
                    if loading || matches!(next, State::Idle) {
                        failures = 0;
                    }
                    next
                }
                Err(Error::Conflict(height)) => {
                    warn!("Block {height} was loaded by another writer, recomputing target.");
                    State::ComputeTarget
                }
                Err(e) if e.is_transient() && failures + 1 < self.retry.max_attempts => {
                    failures += 1;
                    let delay = self.retry.backoff(failures);
                    warn!(
                        attempt = failures,
                        max_attempts = self.retry.max_attempts,
                        "{e}; retrying in {delay:?}"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested during retry backoff.");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    State::ComputeTarget
                }
                Err(e) => {
                    error!("Indexer stopped: {e}");
                    return Err(e);
                }
            };
        }
    }

    /// Performs one transition of the state machine.
    pub async fn step(&mut self, state: State) -> Result<State> {
        match state {
            State::ComputeTarget => self.compute_target().await,
            State::Fetch { target, tip } => {
                let hash = self.chain.get_block_hash(target).await?;
                let raw = self.chain.get_block(&hash, Verbosity::WithPrevout).await?;
                Ok(State::Transform {
                    target,
                    tip,
                    hash,
                    raw,
                })
            }
            State::Transform {
                target,
                tip,
                hash,
                raw,
            } => {
                let block = transform(raw)?;
                if block.height != target || block.block_hash != hash {
                    return Err(Error::integrity(format!(
                        "asked for block {target} ({hash}) but got {} ({})",
                        block.height, block.block_hash
                    )));
                }
                Ok(State::Load { block, tip })
            }
            State::Load { block, tip } => {
                self.store.load_block(&block).await?;
                self.caught_up = false;
                report_progress(&block, tip);
                Ok(State::ComputeTarget)
            }
            State::Idle => Ok(State::ComputeTarget),
        }
    }

    async fn compute_target(&mut self) -> Result<State> {
        let info = self.chain.get_chain_info().await?;
        let highest = self.checkpoint.highest_loaded_height(&self.store).await?;

        match self.checkpoint.plan(info.tip_height, highest) {
            Some(target) => {
                debug!(target, tip = info.tip_height, "next block");
                Ok(State::Fetch {
                    target,
                    tip: info.tip_height,
                })
            }
            None => {
                let highest = highest.map_or_else(|| "none".to_string(), |h| h.to_string());
                if self.caught_up {
                    debug!(tip = info.tip_height, %highest, "still up to date");
                } else {
                    info!(
                        "Database is up to date: node height={}, highest block in the database={}",
                        info.tip_height, highest
                    );
                    self.caught_up = true;
                }
                Ok(State::Idle)
            }
        }
    }
}

fn report_progress(block: &Block, tip: u64) {
    let percent = block.height as f64 / tip.max(1) as f64 * 100.0;
    info!(
        "Block {} written to db {{ blocktime: {} }} // {{ {} / {} }} // -> {:.2}% Complete",
        block.height,
        block.time,
        block.height,
        tip,
        percent.min(100.0)
    );
}
