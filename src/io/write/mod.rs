// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to handle writing out spectra.

mod error;
#[cfg(feature = "hdf5")]
pub mod fbh5;
pub mod filterbank;
pub mod network;

pub use error::SpectraWriteError;
pub use filterbank::{FilterbankFileSink, FilterbankHeader};
pub use network::NetworkSink;

use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::debug;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// How much was written by a single call to [`OutputSink::write`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCount {
    pub bytes: usize,
    pub packets: usize,
}

/// Something that integrated spectra can be written to.
pub trait OutputSink: Send {
    /// Write a contiguous run of floats. For multi-spectrum writes, the data
    /// are ordered by spectrum, then output polarisation, then channel.
    fn write(&mut self, data: &[f32]) -> Result<WriteCount, SpectraWriteError>;

    /// Flush anything buffered and close the sink.
    fn finish(&mut self) -> Result<(), SpectraWriteError>;

    /// A human-readable name for the sink (e.g. its file path).
    fn describe(&self) -> String;
}

#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq)]
/// All write-supported file formats.
pub enum OutputFormat {
    /// A flat SIGPROC-style filterbank file.
    #[strum(serialize = "fil")]
    Filterbank,

    /// Filterbank data in an HDF5 container.
    #[strum(serialize = "h5")]
    Fbh5,
}

lazy_static::lazy_static! {
    pub(crate) static ref OUTPUT_FORMAT_EXTENSIONS: String = OutputFormat::iter().join(", ");
}

/// Where the spectra of all products go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDestination {
    Directory(PathBuf),
    Network { host: String, port: u16 },
}

impl OutputDestination {
    /// Anything of the form `host:port` that isn't an existing directory is
    /// treated as a network destination.
    pub fn parse(s: &str) -> Result<OutputDestination, SpectraWriteError> {
        if !Path::new(s).is_dir() {
            if let Some((host, port)) = s.rsplit_once(':') {
                if host.is_empty() || host.contains('/') {
                    return Err(SpectraWriteError::BadDestination(s.to_string()));
                }
                let port = port
                    .parse()
                    .map_err(|_| SpectraWriteError::BadDestination(s.to_string()))?;
                return Ok(OutputDestination::Network {
                    host: host.to_string(),
                    port,
                });
            }
        }
        Ok(OutputDestination::Directory(PathBuf::from(s)))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, OutputDestination::Network { .. })
    }
}

impl std::fmt::Display for OutputDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputDestination::Directory(d) => write!(f, "{}", d.display()),
            OutputDestination::Network { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// What an output file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// All antennas (or the only antenna) of a product.
    Combined,
    /// One antenna of an antenna-split product.
    Antenna(usize),
    /// The incoherent sum over antennas.
    IncoherentSum,
}

/// The path of an output file, e.g. `dir/stem-ant002.rawspec.0001.fil`.
pub fn output_path(
    dir: &Path,
    stem_name: &str,
    kind: OutputKind,
    index: usize,
    format: OutputFormat,
) -> PathBuf {
    let name = match kind {
        OutputKind::Combined => format!("{stem_name}.rawspec.{index:04}.{format}"),
        OutputKind::Antenna(a) => format!("{stem_name}-ant{a:03}.rawspec.{index:04}.{format}"),
        OutputKind::IncoherentSum => format!("{stem_name}-ics.rawspec.{index:04}.{format}"),
    };
    dir.join(name)
}

/// Make sure an output directory exists.
pub fn ensure_directory(dir: &Path) -> Result<(), SpectraWriteError> {
    if !dir.exists() {
        debug!("Creating output directory {}", dir.display());
        std::fs::DirBuilder::new()
            .recursive(true)
            .create(dir)
            .map_err(|_| SpectraWriteError::NewDirectory(dir.to_path_buf()))?;
    }
    Ok(())
}

/// Create a file sink of the requested format. `nfpc` (fine channels per
/// coarse channel) is only recorded by containers.
pub fn create_file_sink(
    path: &Path,
    header: &FilterbankHeader,
    format: OutputFormat,
    nfpc: usize,
) -> Result<Box<dyn OutputSink>, SpectraWriteError> {
    debug!("Opening {}", path.display());
    match format {
        OutputFormat::Filterbank => Ok(Box::new(FilterbankFileSink::create(path, header)?)),
        OutputFormat::Fbh5 => {
            cfg_if::cfg_if! {
                if #[cfg(feature = "hdf5")] {
                    Ok(Box::new(fbh5::Fbh5Sink::create(
                        path,
                        header,
                        nfpc,
                        fbh5::Fbh5Compression::default(),
                    )?))
                } else {
                    let _ = nfpc;
                    Err(SpectraWriteError::Fbh5Unavailable)
                }
            }
        }
    }
}
