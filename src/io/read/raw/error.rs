// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error-handling code associated with reading from GUPPI RAW files.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RawReadError {
    #[error("No RAW files were found for stem '{0}' (expected e.g. '{0}.0000.raw')")]
    NoFiles(PathBuf),

    #[error("RAW header in '{file}' has no END record within {max} bytes")]
    NoEndRecord { file: String, max: usize },

    #[error("RAW header in '{file}' was truncated")]
    TruncatedHeader { file: String },

    #[error("RAW header in '{file}' is missing the required key {key}")]
    MissingKey { file: String, key: &'static str },

    #[error("RAW header in '{file}' has an invalid value for {key}: '{value}'")]
    BadValue {
        file: String,
        key: &'static str,
        value: String,
    },

    #[error("RAW header in '{file}' has NBITS={nbits}; only 4, 8 and 16 are supported")]
    UnsupportedNbits { file: String, nbits: usize },

    #[error("RAW header in '{file}' has BLOCSIZE={blocsize}, but its geometry implies {expected} bytes per block")]
    BlockSizeMismatch {
        file: String,
        blocsize: usize,
        expected: usize,
    },

    #[error("Block in '{file}' was truncated: expected {expected} bytes, got {got}")]
    ShortBlock {
        file: String,
        expected: usize,
        got: usize,
    },

    #[error("The requested byte range {start}..{end} is outside of the {blocsize}-byte block")]
    BadBlockRange {
        start: usize,
        end: usize,
        blocsize: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
