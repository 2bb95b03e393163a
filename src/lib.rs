// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
A streaming spectrometer. Blocks of raw complex voltages are channelised with
FFTs, detected, integrated and written out as filterbank spectra (flat files,
FBH5 containers or UDP packets).
 */

mod cli;
pub mod compute;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod io;
mod params;
pub mod pipeline;
pub mod sequencer;

#[cfg(test)]
mod tests;

// Re-exports.
pub use cli::{Rawspec, RawspecError};
pub use compute::{ComputeBackend, CpuBackend, DumpHandler, FftDirection};
pub use context::{ContextConfig, Geometry, PolMode, ProcessingContext, ProductParams};
pub use dispatch::OutputDispatcher;
pub use io::{read::RawHeader, write::OutputSink};
pub use pipeline::PipelineDriver;
pub use sequencer::BlockSequencer;

use crossbeam_utils::atomic::AtomicCell;

lazy_static::lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}
