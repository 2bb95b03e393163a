// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all rawspec-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::rawspec::RawspecArgsError;
use crate::{
    compute::ComputeError,
    context::{ContextError, GeometryError},
    io::{
        read::RawReadError,
        write::{filterbank::FilterbankError, SpectraWriteError},
    },
    params::ParamsError,
    sequencer::SequenceError,
};

/// The *only* publicly visible error from rawspec. Each message carries a hint
/// about where to look, unless it's "generic".
#[derive(Error, Debug)]
pub enum RawspecError {
    /// Bad command-line arguments.
    #[error("{0}\n\nSee `rawspec --help` for the available options.")]
    Args(String),

    /// An error related to reading GUPPI RAW files.
    #[error("{0}\n\nCheck that the RAW files are complete and their headers describe their blocks.")]
    RawRead(String),

    /// The output products don't fit the data.
    #[error("{0}\n\nThe FFT and integration lengths must fit the samples in each block.")]
    Geometry(String),

    /// An error from the compute backend.
    #[error("{0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv).")]
    Compute(String),

    /// An error related to writing spectra.
    #[error("{0}\n\nCheck the output destination (--dest) and its permissions.")]
    Output(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files use the same names as the long command-line options.")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<RawspecArgsError> for RawspecError {
    fn from(e: RawspecArgsError) -> Self {
        Self::Args(e.to_string())
    }
}

impl From<ParamsError> for RawspecError {
    fn from(e: ParamsError) -> Self {
        let s = e.to_string();
        match e {
            ParamsError::ChannelRange { .. } | ParamsError::AntennaOutOfRange { .. } => {
                Self::Args(s)
            }
            ParamsError::OutputFailures { .. } => Self::Output(s),
            ParamsError::RawRead(e) => Self::from(e),
            ParamsError::Context(e) => Self::from(e),
            ParamsError::Sequence(e) => Self::from(e),
            ParamsError::Write(e) => Self::from(e),
        }
    }
}

impl From<GeometryError> for RawspecError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e.to_string())
    }
}

impl From<ContextError> for RawspecError {
    fn from(e: ContextError) -> Self {
        let s = e.to_string();
        match e {
            ContextError::Geometry(e) => Self::from(e),
            ContextError::Allocation(_) | ContextError::Compute(_) => Self::Compute(s),
            ContextError::BadSlot { .. } | ContextError::Released => Self::Generic(s),
        }
    }
}

impl From<ComputeError> for RawspecError {
    fn from(e: ComputeError) -> Self {
        Self::Compute(e.to_string())
    }
}

impl From<SequenceError> for RawspecError {
    fn from(e: SequenceError) -> Self {
        match e {
            SequenceError::Stage(e) => Self::from(e),
            SequenceError::Backward { .. }
            | SequenceError::Misaligned { .. }
            | SequenceError::Uncommitted { .. } => Self::RawRead(e.to_string()),
        }
    }
}

impl From<RawReadError> for RawspecError {
    fn from(e: RawReadError) -> Self {
        let s = e.to_string();
        match e {
            RawReadError::IO(e) => Self::from(e),
            _ => Self::RawRead(s),
        }
    }
}

impl From<SpectraWriteError> for RawspecError {
    fn from(e: SpectraWriteError) -> Self {
        let s = e.to_string();
        match e {
            SpectraWriteError::BadDestination(_) | SpectraWriteError::Fbh5Unavailable => {
                Self::Args(s)
            }
            _ => Self::Output(s),
        }
    }
}

impl From<FilterbankError> for RawspecError {
    fn from(e: FilterbankError) -> Self {
        Self::Output(e.to_string())
    }
}

impl From<std::io::Error> for RawspecError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
