// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with writing out spectra.

use std::path::PathBuf;

use thiserror::Error;

use super::filterbank::FilterbankError;

#[derive(Error, Debug)]
pub enum SpectraWriteError {
    #[error("Couldn't create '{file}': {err}")]
    Create { file: String, err: std::io::Error },

    #[error(
        "Couldn't create directory '{0}' for output files. Do you have write permissions set?"
    )]
    NewDirectory(PathBuf),

    #[error("Invalid network destination '{0}'; expected host:port")]
    BadDestination(String),

    #[error("Couldn't set up a UDP socket for {dest}: {err}")]
    Socket { dest: String, err: std::io::Error },

    #[error("Couldn't send a packet to {dest}: {err}")]
    Send { dest: String, err: std::io::Error },

    #[error("FBH5 output was requested, but this build doesn't have the \"hdf5\" feature")]
    Fbh5Unavailable,

    #[error("Got {len} floats, which isn't a whole number of {spectrum_len}-float spectra")]
    PartialSpectrum { len: usize, spectrum_len: usize },

    #[error("Power buffer doesn't have the expected layout: {0}")]
    Layout(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Filterbank(#[from] FilterbankError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
