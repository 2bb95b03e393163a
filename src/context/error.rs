// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{compute::ComputeError, constants::MAX_OUTPUTS};

/// Problems with the requested geometry or output products. None of these
/// involve any allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{0} must be positive")]
    Zero(&'static str),

    #[error("{bits} bits per sample isn't supported; only 4, 8 and 16 are")]
    BitsPerSample { bits: usize },

    #[error("{num} output products were requested, but at most {MAX_OUTPUTS} are allowed")]
    TooManyProducts { num: usize },

    #[error("Output product {index}: the FFT length ({fft_len}) and the number of spectra to integrate ({num_integrations}) must both be set or both be zero")]
    PartialProduct {
        index: usize,
        fft_len: usize,
        num_integrations: usize,
    },

    #[error("Output polarisation mode {npolout} isn't supported; use 1, 4 or -4")]
    BadPolMode { npolout: i32 },

    #[error("Output product {index}: full-polarisation output needs 2 input polarisations, but there are {num_pols}")]
    PolModeNeedsTwoPols { index: usize, num_pols: usize },

    #[error("The largest FFT length ({max_fft_len}) isn't a multiple of the samples per block ({samples_per_block})")]
    BlocksPerBuffer {
        max_fft_len: usize,
        samples_per_block: usize,
    },

    #[error("Output product {index}: the FFT length ({fft_len}) doesn't divide the {buffer_samples} samples in a device buffer")]
    FftLenDoesNotDivide {
        index: usize,
        fft_len: usize,
        buffer_samples: usize,
    },

    #[error("Output product {index}: an integration of {integration_samples} samples isn't an exact multiple or divisor of the {buffer_samples} samples in a device buffer")]
    NonIntegralDumps {
        index: usize,
        integration_samples: usize,
        buffer_samples: usize,
    },

    #[error("Host block buffers ({nb_host}) must be a positive multiple of the device buffer's blocks ({nb})")]
    HostBlocks { nb: usize, nb_host: usize },

    #[error("{num_chans} coarse channels can't be evenly split between {num_ants} antennas")]
    AntennaChannels { num_chans: usize, num_ants: usize },

    #[error("{num_weights} incoherent-sum weights were given, but there are only {num_ants} antennas")]
    TooManyWeights { num_weights: usize, num_ants: usize },

    #[error("{supplied} host block buffers were supplied, but {expected} of at least {block_len} bytes are needed")]
    SuppliedBlocks {
        supplied: usize,
        expected: usize,
        block_len: usize,
    },
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The backend couldn't set itself up; none of the context's buffers are
    /// kept.
    #[error("Couldn't allocate processing resources: {0}")]
    Allocation(#[source] ComputeError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("Host block slot {slot} is out of range; there are {nb_host} slots")]
    BadSlot { slot: usize, nb_host: usize },

    #[error("The context has been cleaned up; it must be initialised again")]
    Released,
}
