// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to channelise, detect and integrate voltages.

mod cpu;
mod error;

pub use cpu::CpuBackend;
pub use error::ComputeError;

use serde::{Deserialize, Serialize};

use crate::context::{Geometry, HostOutputs, OutputProduct, PowerBuffer};

/// The direction of the channelising FFTs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FftDirection {
    #[default]
    Forward,
    Inverse,
}

/// Everything a backend needs to know to set itself up.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendPlan {
    pub geometry: Geometry,

    /// Nb: blocks per device buffer.
    pub blocks_per_buffer: usize,

    /// Bytes per block, as stored on the host.
    pub block_len: usize,

    pub products: Vec<OutputProduct>,

    /// One weight per antenna, if incoherent sums are wanted.
    pub ics_weights: Option<Vec<f32>>,
}

/// Called by a backend around every dump of a product's integrations into its
/// host power buffer.
pub trait DumpHandler: Send {
    /// Called just before the host power buffer of `product` is overwritten.
    /// On return, nothing else may be reading that buffer.
    fn before_dump(&mut self, product: usize);

    /// Called just after the host power buffer of `product` has been filled.
    /// This shouldn't block on writing the data.
    fn after_dump(&mut self, product: usize, power: &PowerBuffer, ics: Option<&PowerBuffer>);

    /// Wait for any outstanding work and close all outputs. Returns the
    /// number of products that had an output failure.
    fn finish(&mut self) -> usize;
}

/// A device that runs the FFT and accumulate pipeline.
///
/// Work is asynchronous: [`ComputeBackend::start_processing`] returns once
/// the device buffer is queued, and the host outputs are only handed back by
/// [`ComputeBackend::reclaim_outputs`] after
/// [`ComputeBackend::wait_for_completion`].
pub trait ComputeBackend: Send {
    /// Allocate device buffers and FFT plans. Any previous allocation must
    /// have been released.
    fn initialise(&mut self, plan: &BackendPlan) -> Result<(), ComputeError>;

    /// Copy host blocks into the device buffer, starting at `dst_block`.
    /// Sub-8-bit samples are expanded as they are copied.
    fn copy_blocks(&mut self, blocks: &[&[u8]], dst_block: usize) -> Result<(), ComputeError>;

    /// Channelise the device buffer. On error, the outputs are kept by the
    /// backend and can be reclaimed.
    fn start_processing(
        &mut self,
        direction: FftDirection,
        outputs: HostOutputs,
    ) -> Result<(), ComputeError>;

    /// The number of output products done with the current device buffer.
    fn check_for_completion(&self) -> usize;

    /// Block until the current device buffer has been processed.
    fn wait_for_completion(&mut self) -> Result<(), ComputeError>;

    /// Hand back the host outputs, if the backend holds them and is idle.
    fn reclaim_outputs(&mut self) -> Option<HostOutputs>;

    /// Discard partially accumulated integrations.
    fn reset_integration(&mut self) -> Result<(), ComputeError>;

    /// Free everything. This may be called more than once.
    fn release(&mut self);
}

/// Get a compute backend for a device. Only the CPU is available; any device
/// index selects it.
pub fn new_compute_backend(device: usize) -> Box<dyn ComputeBackend> {
    if device != 0 {
        log::debug!("Device {device} requested; using the CPU");
    }
    log::info!("Compute backend: {}", get_cpu_info());
    Box::new(CpuBackend::new())
}

/// Get a formatted string with information on the CPU used for processing.
fn get_cpu_info() -> String {
    let threads = rayon::current_num_threads();

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        // Non-exhaustive but perhaps most-interesting CPU features.
        let avx = std::arch::is_x86_feature_detected!("avx");
        let avx2 = std::arch::is_x86_feature_detected!("avx2");
        let extra = match (avx2, avx) {
            (true, _) => "AVX2 available",
            (false, true) => "AVX available",
            (false, false) => "AVX unavailable!",
        };
        format!("{} CPU ({extra}), {threads} threads", std::env::consts::ARCH)
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    format!("{} CPU, {threads} threads", std::env::consts::ARCH)
}
