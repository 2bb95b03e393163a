// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Filterbank data in an HDF5 container ("FBH5").
//!
//! The file has the attributes `CLASS = "FILTERBANK"` and `VERSION = "2.0"`,
//! and a single `f32` dataset `data` with dimensions (time, feed, frequency).
//! The time axis is unlimited and grows with every integration written. The
//! filterbank header keywords are attached to the dataset as attributes.

use std::path::{Path, PathBuf};

use hdf5::types::VarLenUnicode;
use log::{debug, trace};
use ndarray::{s, ArrayView3};

use super::{FilterbankHeader, OutputSink, SpectraWriteError, WriteCount};

/// Filters applied to the `data` dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fbh5Compression {
    /// Apply the byte-shuffle filter.
    pub shuffle: bool,

    /// Apply deflate (gzip) compression at this level.
    pub deflate: Option<u8>,
}

impl Default for Fbh5Compression {
    fn default() -> Self {
        Fbh5Compression {
            shuffle: true,
            deflate: Some(4),
        }
    }
}

/// The chunk shape for the `data` dataset, following the conventional
/// filterbank chunking for high frequency resolution, high time resolution
/// and intermediate products.
/// Chunks always hold a single feed.
pub fn chunk_shape(nfpc: usize, nchans: usize) -> (usize, usize, usize) {
    let nchans = nchans.max(1);
    if nfpc >= 1 << 20 {
        (1, 1, nchans.min(1 << 20))
    } else if nfpc < 1 << 10 {
        (2048, 1, nchans.min(512))
    } else {
        (10, 1, nchans.min(1 << 16))
    }
}

fn str_attr(loc: &hdf5::Location, name: &str, value: &str) -> hdf5::Result<()> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|e| hdf5::Error::from(e.to_string()))?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)
}

fn int_attr(loc: &hdf5::Location, name: &str, value: i32) -> hdf5::Result<()> {
    loc.new_attr::<i32>().create(name)?.write_scalar(&value)
}

fn double_attr(loc: &hdf5::Location, name: &str, value: f64) -> hdf5::Result<()> {
    loc.new_attr::<f64>().create(name)?.write_scalar(&value)
}

pub struct Fbh5Sink {
    path: PathBuf,
    // Keep the file open for as long as the dataset is being written.
    _file: hdf5::File,
    dataset: hdf5::Dataset,
    nifs: usize,
    nchans: usize,
    /// The number of integrations in the dataset.
    ntints: usize,
    /// Floats that don't yet make up a whole integration.
    pending: Vec<f32>,
}

impl Fbh5Sink {
    pub fn create(
        path: &Path,
        header: &FilterbankHeader,
        nfpc: usize,
        compression: Fbh5Compression,
    ) -> Result<Fbh5Sink, SpectraWriteError> {
        let nifs = header.nifs.max(1) as usize;
        let nchans = header.nchans.max(1) as usize;
        let file = hdf5::File::create(path)?;
        str_attr(&file, "CLASS", "FILTERBANK")?;
        str_attr(&file, "VERSION", "2.0")?;

        let chunk = chunk_shape(nfpc, nchans);
        debug!(
            "Creating FBH5 dataset in {} with chunks {chunk:?} and {compression:?}",
            path.display()
        );
        let mut builder = file
            .new_dataset::<f32>()
            .chunk(chunk)
            .shape((0.., nifs, nchans));
        if compression.shuffle {
            builder = builder.shuffle();
        }
        if let Some(level) = compression.deflate {
            builder = builder.deflate(level);
        }
        let dataset = builder.create("data")?;

        for (name, value) in [
            ("machine_id", header.machine_id),
            ("telescope_id", header.telescope_id),
            ("data_type", header.data_type),
            ("nchans", header.nchans),
            ("nfpc", nfpc as i32),
            ("nbeams", header.nbeams),
            ("ibeam", header.ibeam),
            ("nbits", header.nbits),
            ("nifs", header.nifs),
        ] {
            int_attr(&dataset, name, value)?;
        }
        for (name, value) in [
            ("src_raj", header.src_raj),
            ("src_dej", header.src_dej),
            ("az_start", header.az_start),
            ("za_start", header.za_start),
            ("fch1", header.fch1),
            ("foff", header.foff),
            ("tstart", header.tstart),
            ("tsamp", header.tsamp),
        ] {
            double_attr(&dataset, name, value)?;
        }
        str_attr(&dataset, "source_name", &header.source_name)?;
        str_attr(&dataset, "rawdatafile", &header.rawdatafile)?;

        let labels = ["time", "feed_id", "frequency"]
            .into_iter()
            .map(|l| {
                l.parse::<VarLenUnicode>()
                    .map_err(|e| hdf5::Error::from(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        dataset
            .new_attr_builder()
            .with_data(labels.as_slice())
            .create("DIMENSION_LABELS")?;

        Ok(Fbh5Sink {
            path: path.to_path_buf(),
            _file: file,
            dataset,
            nifs,
            nchans,
            ntints: 0,
            pending: vec![],
        })
    }

    fn append(&mut self, data: &[f32]) -> Result<(), SpectraWriteError> {
        let integration_len = self.nifs * self.nchans;
        let new_tints = data.len() / integration_len;
        let view = ArrayView3::from_shape((new_tints, self.nifs, self.nchans), data)
            .map_err(|e| hdf5::Error::from(e.to_string()))?;
        let end = self.ntints + new_tints;
        self.dataset.resize((end, self.nifs, self.nchans))?;
        self.dataset
            .write_slice(view, s![self.ntints..end, .., ..])?;
        self.ntints = end;
        Ok(())
    }
}

impl OutputSink for Fbh5Sink {
    fn write(&mut self, data: &[f32]) -> Result<WriteCount, SpectraWriteError> {
        let integration_len = self.nifs * self.nchans;
        if self.pending.is_empty() && data.len() % integration_len == 0 {
            self.append(data)?;
        } else {
            self.pending.extend_from_slice(data);
            let whole = self.pending.len() / integration_len * integration_len;
            if whole > 0 {
                let pending = std::mem::take(&mut self.pending);
                self.append(&pending[..whole])?;
                self.pending = pending[whole..].to_vec();
            }
        }
        Ok(WriteCount {
            bytes: data.len() * 4,
            packets: 0,
        })
    }

    fn finish(&mut self) -> Result<(), SpectraWriteError> {
        if !self.pending.is_empty() {
            return Err(SpectraWriteError::PartialSpectrum {
                len: self.pending.len(),
                spectrum_len: self.nifs * self.nchans,
            });
        }
        trace!(
            "Closing {} with {} integrations",
            self.path.display(),
            self.ntints
        );
        self.dataset.file()?.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
