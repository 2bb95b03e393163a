// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The double-buffering control loop.
//!
//! While the backend processes one device buffer, the host ring fills with
//! the next blocks. Whenever a device buffer's worth of blocks is staged,
//! the driver waits for the backend to finish the previous buffer, copies
//! the new blocks across and starts processing them.


use log::{debug, trace};

use crate::{
    context::{ContextError, ProcessingContext},
    sequencer::BlockStager,
};

pub struct PipelineDriver<'c, 'a> {
    ctx: &'c mut ProcessingContext<'a>,

    /// Device buffers submitted so far.
    submitted: usize,
}

impl<'c, 'a> PipelineDriver<'c, 'a> {
    pub fn new(ctx: &'c mut ProcessingContext<'a>) -> PipelineDriver<'c, 'a> {
        PipelineDriver { ctx, submitted: 0 }
    }

    /// The host buffer of a ring slot, to read a block into.
    pub fn block_mut(&mut self, slot: usize) -> Result<&mut [u8], ContextError> {
        self.ctx.block_mut(slot)
    }

    pub fn context(&self) -> &ProcessingContext<'a> {
        self.ctx
    }

    pub fn buffers_submitted(&self) -> usize {
        self.submitted
    }

    /// Wait for the last device buffer. `partial_blocks` staged blocks that
    /// don't fill a device buffer are discarded. Returns the number of device
    /// buffers processed.
    pub fn finish(self, partial_blocks: usize) -> Result<usize, ContextError> {
        self.ctx.wait_for_completion()?;
        if partial_blocks > 0 {
            debug!(
                "Discarding {partial_blocks} blocks that don't fill a device buffer of {}",
                self.ctx.blocks_per_buffer()
            );
        }
        Ok(self.submitted)
    }
}

impl BlockStager for PipelineDriver<'_, '_> {
    fn stage_zeros(&mut self, slot: usize) -> Result<(), ContextError> {
        self.ctx.zero_block(slot)
    }

    fn submit(&mut self, bi: usize) -> Result<(), ContextError> {
        let nb = self.ctx.blocks_per_buffer();
        let first_slot = (bi + 1 - nb) % self.ctx.host_blocks();
        // The previous buffer must be done (and dumped) before the device
        // buffer is overwritten.
        self.ctx.wait_for_completion()?;
        self.ctx.copy_blocks(first_slot)?;
        self.ctx.start_processing()?;
        self.submitted += 1;
        trace!("Submitted device buffer {} (blocks ending at {bi})", self.submitted);
        Ok(())
    }
}
