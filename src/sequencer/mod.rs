// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Gap-tolerant sequencing of blocks.

Every block carries a packet index that should increase by a constant step
(inferred from the first increase seen). Missing blocks are replaced by
zero-filled blocks so that the time axis of the output stays uniform. Jumps
backwards, or by something that isn't a multiple of the step, can't be
repaired and abandon the file group.
 */


use log::{debug, warn};
use thiserror::Error;

use crate::context::ContextError;

/// Somewhere for the sequencer to put blocks. Ring slots are
/// `bi % Nb_host`.
pub trait BlockStager {
    /// Fill ring slot `slot` with zeros.
    fn stage_zeros(&mut self, slot: usize) -> Result<(), ContextError>;

    /// Block `bi` filled the last slot of a device buffer; process the
    /// buffer.
    fn submit(&mut self, bi: usize) -> Result<(), ContextError>;
}

/// What to do with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Read the block into ring slot `slot`, then call
    /// [`BlockSequencer::commit`].
    Consume { slot: usize, bi: usize },

    /// Ignore the block.
    Skip,
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Packet index went backwards from {previous} to {new}")]
    Backward { previous: i64, new: i64 },

    #[error("Packet index jumped from {previous} to {new}, which isn't a multiple of the step {step}")]
    Misaligned { previous: i64, new: i64, step: i64 },

    #[error("Block {bi} was admitted, but not yet committed")]
    Uncommitted { bi: usize },

    #[error(transparent)]
    Stage(#[from] ContextError),
}

#[derive(Debug, Clone)]
pub struct BlockSequencer {
    /// Nb
    blocks_per_buffer: usize,

    /// Nb_host
    host_blocks: usize,

    /// The packet index of the last committed block.
    pktidx: Option<i64>,

    /// The step between consecutive packet indices.
    dpktidx: Option<i64>,

    /// The index of the next block, over all files of the group.
    bi: usize,

    /// The packet index of an admitted block that hasn't been committed.
    pending: Option<i64>,

    zero_blocks: usize,
    skipped_blocks: usize,
}

impl BlockSequencer {
    pub fn new(blocks_per_buffer: usize, host_blocks: usize) -> BlockSequencer {
        BlockSequencer {
            blocks_per_buffer: blocks_per_buffer.max(1),
            host_blocks: host_blocks.max(1),
            pktidx: None,
            dpktidx: None,
            bi: 0,
            pending: None,
            zero_blocks: 0,
            skipped_blocks: 0,
        }
    }

    /// The packet index of the last committed block.
    pub fn pktidx(&self) -> Option<i64> {
        self.pktidx
    }

    pub fn dpktidx(&self) -> Option<i64> {
        self.dpktidx
    }

    /// The number of blocks staged so far (genuine and zero-filled).
    pub fn blocks_staged(&self) -> usize {
        self.bi
    }

    pub fn zero_blocks(&self) -> usize {
        self.zero_blocks
    }

    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }

    /// Blocks staged that don't yet fill a device buffer.
    pub fn partial_blocks(&self) -> usize {
        self.bi % self.blocks_per_buffer
    }

    fn slot(&self) -> usize {
        self.bi % self.host_blocks
    }

    /// Decide what to do with a block that has packet index `pktidx`. Any
    /// missing blocks before it are zero-filled (and submitted) first.
    /// Backward and misaligned jumps leave the state untouched.
    pub fn admit<S: BlockStager>(
        &mut self,
        pktidx: i64,
        stager: &mut S,
    ) -> Result<Admission, SequenceError> {
        if self.pending.is_some() {
            return Err(SequenceError::Uncommitted { bi: self.bi });
        }
        let previous = match self.pktidx {
            None => {
                self.pending = Some(pktidx);
                return Ok(Admission::Consume {
                    slot: self.slot(),
                    bi: self.bi,
                });
            }
            Some(p) => p,
        };

        let step = pktidx - previous;
        if self.dpktidx.is_none() && step > 0 {
            debug!("Packet index step is {step}");
            self.dpktidx = Some(step);
        }

        if Some(step) == self.dpktidx {
            self.pending = Some(pktidx);
            return Ok(Admission::Consume {
                slot: self.slot(),
                bi: self.bi,
            });
        }
        if step == 0 {
            warn!("Packet index {pktidx} repeated; skipping the block");
            self.skipped_blocks += 1;
            return Ok(Admission::Skip);
        }
        if step < 0 {
            return Err(SequenceError::Backward {
                previous,
                new: pktidx,
            });
        }
        // A positive step always sets dpktidx above.
        let dpktidx = self.dpktidx.unwrap_or(step);
        if step % dpktidx != 0 {
            return Err(SequenceError::Misaligned {
                previous,
                new: pktidx,
                step: dpktidx,
            });
        }

        let missing = (step / dpktidx - 1) as usize;
        warn!("Packet index jumped from {previous} to {pktidx}; zero-filling {missing} blocks");
        for _ in 0..missing {
            stager.stage_zeros(self.slot())?;
            if self.bi % self.blocks_per_buffer == self.blocks_per_buffer - 1 {
                stager.submit(self.bi)?;
            }
            self.bi += 1;
            self.pktidx = Some(self.pktidx.unwrap_or(previous) + dpktidx);
            self.zero_blocks += 1;
        }

        self.pending = Some(pktidx);
        Ok(Admission::Consume {
            slot: self.slot(),
            bi: self.bi,
        })
    }

    /// The admitted block is in its slot. Submits the device buffer if the
    /// block filled it.
    pub fn commit<S: BlockStager>(&mut self, stager: &mut S) -> Result<(), SequenceError> {
        let pktidx = match self.pending.take() {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.bi % self.blocks_per_buffer == self.blocks_per_buffer - 1 {
            if let Err(e) = stager.submit(self.bi) {
                self.pending = Some(pktidx);
                return Err(e.into());
            }
        }
        self.pktidx = Some(pktidx);
        self.bi += 1;
        Ok(())
    }

    /// Forget an admitted block that couldn't be read.
    pub fn abandon(&mut self) {
        self.pending = None;
    }
}
