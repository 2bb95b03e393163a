// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from compute backends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Couldn't allocate {bytes} bytes for the {what}")]
    OutOfMemory { what: &'static str, bytes: usize },

    #[error("The compute backend hasn't been initialised")]
    NotInitialised,

    #[error("The compute backend is still processing the previous buffer")]
    Busy,

    #[error("Expected {expected} blocks of {block_len} bytes to copy, but got {got} (starting at device block {dst_block})")]
    BadCopy {
        expected: usize,
        got: usize,
        block_len: usize,
        dst_block: usize,
    },

    #[error("The host power buffer of output product {product} is still being read by an output worker")]
    HostBufferBusy { product: usize },

    #[error("The compute stream stopped unexpectedly")]
    StreamDied,

    #[error("Couldn't start the compute stream: {0}")]
    Spawn(#[from] std::io::Error),
}
