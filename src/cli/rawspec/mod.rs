// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.


use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use super::common::{
    display_warnings, InfoPrinter, Warn, ARG_FILE_HELP, DEST_HELP, FFT_LENGTHS_HELP,
    INTEGRATIONS_HELP, RATE_HELP,
};
use crate::{
    compute::FftDirection,
    constants::{
        DEFAULT_FFT_LENGTHS, DEFAULT_INTEGRATION_LENGTHS, DEFAULT_NETWORK_RATE_GBPS, MAX_OUTPUTS,
    },
    context::{PolMode, ProductParams},
    io::write::{OutputDestination, OutputFormat},
    params::RawspecParams,
    RawspecError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct RawspecArgs {
    #[clap(long = "args-file", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// The stems of GUPPI RAW file groups, e.g. "obs" for obs.0000.raw,
    /// obs.0001.raw, etc. A file of a group may also be given.
    #[clap(name = "STEMS", parse(from_os_str))]
    #[serde(default)]
    pub(super) stems: Vec<PathBuf>,

    #[clap(
        short = 'f',
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        help = FFT_LENGTHS_HELP.as_str(),
        help_heading = "OUTPUT PRODUCTS"
    )]
    pub(super) ffts: Option<Vec<usize>>,

    #[clap(
        short = 't',
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        help = INTEGRATIONS_HELP.as_str(),
        help_heading = "OUTPUT PRODUCTS"
    )]
    pub(super) ints: Option<Vec<usize>>,

    /// The output polarisation mode of each product: 1 (total power), 4 (full
    /// Stokes) or -4 (XX, YY, Re(XY*), Im(XY*)). A single value applies to
    /// all products. Default: 1
    #[clap(
        short = 'p',
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        allow_hyphen_values = true,
        help_heading = "OUTPUT PRODUCTS"
    )]
    pub(super) pols: Option<Vec<i32>>,

    /// Use inverse FFTs rather than forward FFTs.
    #[clap(long, help_heading = "OUTPUT PRODUCTS")]
    #[serde(default)]
    pub(super) inverse: bool,

    /// The first coarse channel to process. Default: 0
    #[clap(short = 's', long, help_heading = "INPUT DATA")]
    pub(super) schan: Option<usize>,

    /// The number of coarse channels to process. Default: all channels from
    /// --schan onwards
    #[clap(short = 'n', long, help_heading = "INPUT DATA")]
    pub(super) nchan: Option<usize>,

    /// Only process this antenna of antenna-stacked data.
    #[clap(short = 'a', long, help_heading = "INPUT DATA")]
    pub(super) ant: Option<usize>,

    /// The input samples are complex conjugated.
    #[clap(long, help_heading = "INPUT DATA")]
    #[serde(default)]
    pub(super) conjugate: bool,

    #[clap(short = 'd', long, help = DEST_HELP.as_str(), help_heading = "OUTPUT")]
    pub(super) dest: Option<String>,

    /// Write a file per antenna of antenna-stacked data.
    #[clap(short = 'S', long, help_heading = "OUTPUT")]
    #[serde(default)]
    pub(super) splitant: bool,

    /// Also write the incoherent sum over antennas, weighting antennas with
    /// these values (comma separated). Antennas without a weight get 1.0.
    #[clap(
        short = 'i',
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        allow_hyphen_values = true,
        help_heading = "OUTPUT"
    )]
    pub(super) ics: Option<Vec<f32>>,

    /// Write FBH5 (.h5) files rather than SIGPROC filterbank (.fil) files.
    #[clap(short = 'j', long, help_heading = "OUTPUT")]
    #[serde(default)]
    pub(super) fbh5: bool,

    #[clap(short = 'r', long, help = RATE_HELP.as_str(), help_heading = "OUTPUT")]
    pub(super) rate: Option<f64>,

    /// The index of the first product in output file names. Default: 0
    #[clap(short = 'o', long, help_heading = "OUTPUT")]
    pub(super) outidx: Option<usize>,

    /// The index of the compute device to use. Default: 0
    #[clap(short = 'g', long, help_heading = "COMPUTE")]
    pub(super) gpu: Option<usize>,

    /// The number of blocks in each device buffer. Default: enough blocks for
    /// the longest FFT
    #[clap(long, help_heading = "COMPUTE")]
    pub(super) nb: Option<usize>,

    /// The number of blocks in the host ring. Must be a multiple of --nb.
    /// Default: the same as --nb
    #[clap(long, help_heading = "COMPUTE")]
    pub(super) nb_host: Option<usize>,
}

impl RawspecArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<RawspecArgs, RawspecError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let RawspecArgs {
                args_file: _,
                stems,
                ffts,
                ints,
                pols,
                inverse,
                schan,
                nchan,
                ant,
                conjugate,
                dest,
                splitant,
                ics,
                fbh5,
                rate,
                outidx,
                gpu,
                nb,
                nb_host,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(RawspecArgs {
                args_file: None,
                stems: if cli_args.stems.is_empty() {
                    stems
                } else {
                    cli_args.stems
                },
                ffts: cli_args.ffts.or(ffts),
                ints: cli_args.ints.or(ints),
                pols: cli_args.pols.or(pols),
                inverse: cli_args.inverse || inverse,
                schan: cli_args.schan.or(schan),
                nchan: cli_args.nchan.or(nchan),
                ant: cli_args.ant.or(ant),
                conjugate: cli_args.conjugate || conjugate,
                dest: cli_args.dest.or(dest),
                splitant: cli_args.splitant || splitant,
                ics: cli_args.ics.or(ics),
                fbh5: cli_args.fbh5 || fbh5,
                rate: cli_args.rate.or(rate),
                outidx: cli_args.outidx.or(outidx),
                gpu: cli_args.gpu.or(gpu),
                nb: cli_args.nb.or(nb),
                nb_host: cli_args.nb_host.or(nb_host),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<RawspecParams, RawspecError> {
        debug!("{:#?}", self);

        let Self {
            args_file: _,
            stems,
            ffts,
            ints,
            pols,
            inverse,
            schan,
            nchan,
            ant,
            conjugate,
            dest,
            splitant,
            ics,
            fbh5,
            rate,
            outidx,
            gpu,
            nb,
            nb_host,
        } = self;

        let stems = Vec1::try_from_vec(stems).map_err(|_| RawspecArgsError::NoStems)?;

        let (ffts, ints) = match (ffts, ints) {
            (None, None) => (
                DEFAULT_FFT_LENGTHS.to_vec(),
                DEFAULT_INTEGRATION_LENGTHS.to_vec(),
            ),
            (Some(f), Some(t)) if f.len() == t.len() => (f, t),
            (f, t) => {
                return Err(RawspecArgsError::MismatchedLengths {
                    ffts: f.map(|f| f.len()).unwrap_or(0),
                    ints: t.map(|t| t.len()).unwrap_or(0),
                }
                .into())
            }
        };
        if ffts.len() > MAX_OUTPUTS {
            return Err(RawspecArgsError::TooManyProducts { num: ffts.len() }.into());
        }
        if let Some(i) = ffts.iter().chain(ints.iter()).position(|&n| n == 0) {
            return Err(RawspecArgsError::ZeroLength {
                index: i % ffts.len(),
            }
            .into());
        }

        let pols = pols.unwrap_or_else(|| vec![1]);
        let pol_modes: Vec<PolMode> = match pols.len() {
            1 => vec![pols[0]; ffts.len()],
            n if n == ffts.len() => pols,
            n => {
                return Err(RawspecArgsError::MismatchedPols {
                    num_pols: n,
                    num_products: ffts.len(),
                }
                .into())
            }
        }
        .into_iter()
        .map(|p| PolMode::from_npolout(p).map_err(|_| RawspecArgsError::BadPol(p)))
        .collect::<Result<_, _>>()?;

        let products: Vec<ProductParams> = ffts
            .iter()
            .zip(ints.iter())
            .zip(pol_modes)
            .map(|((&fft_len, &num_integrations), pol_mode)| ProductParams {
                fft_len,
                num_integrations,
                pol_mode,
            })
            .collect();

        let dest = OutputDestination::parse(dest.as_deref().unwrap_or("."))?;
        if dest.is_network() {
            if splitant {
                return Err(RawspecArgsError::NetworkSplit.into());
            }
            if ics.is_some() {
                return Err(RawspecArgsError::NetworkIcs.into());
            }
            if fbh5 {
                return Err(RawspecArgsError::NetworkFbh5.into());
            }
        }
        if ant.is_some() && splitant {
            return Err(RawspecArgsError::AntWithSplit.into());
        }
        let rate_gbps = rate.unwrap_or(DEFAULT_NETWORK_RATE_GBPS);
        if !rate_gbps.is_finite() || rate_gbps <= 0.0 {
            return Err(RawspecArgsError::BadRate(rate_gbps).into());
        }
        let format = if fbh5 {
            if cfg!(not(feature = "hdf5")) {
                return Err(crate::io::write::SpectraWriteError::Fbh5Unavailable.into());
            }
            OutputFormat::Fbh5
        } else {
            OutputFormat::Filterbank
        };
        if nb == Some(0) || nb_host == Some(0) {
            return Err(RawspecArgsError::ZeroBlocks.into());
        }
        let device = gpu.unwrap_or(0);
        if device != 0 {
            format!("Only the CPU backend is available; ignoring device index {device}").warn();
        }
        if ics.is_some() && ant.is_some() {
            "The incoherent sum of a single antenna is just that antenna".warn();
        }

        let params = RawspecParams {
            stems,
            products,
            schan: schan.unwrap_or(0),
            nchan,
            antenna: ant,
            split_antennas: splitant,
            ics_weights: ics,
            dest,
            format,
            device,
            rate_gbps,
            output_index: outidx.unwrap_or(0),
            conjugate,
            direction: if inverse {
                FftDirection::Inverse
            } else {
                FftDirection::Forward
            },
            blocks_per_buffer: nb,
            host_blocks: nb_host,
        };
        print_plan(&params);
        display_warnings();

        Ok(params)
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), RawspecError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        params.run()?;
        Ok(())
    }
}

fn print_plan(params: &RawspecParams) {
    let mut printer = InfoPrinter::new("Input data".into());
    printer.push_block(
        params
            .stems
            .iter()
            .map(|s| s.display().to_string().into())
            .collect(),
    );
    let mut selection = vec![format!("First coarse channel: {}", params.schan).into()];
    if let Some(n) = params.nchan {
        selection.push(format!("Coarse channels: {n}").into());
    }
    if let Some(a) = params.antenna {
        selection.push(format!("Antenna: {a}").into());
    }
    printer.push_block(selection);
    printer.display();

    let mut printer = InfoPrinter::new("Output products".into());
    for (i, p) in params.products.iter().enumerate() {
        printer.push_line(
            format!(
                "{}: {} fine channels per coarse channel, {} spectra per integration, npolout {}",
                params.output_index + i,
                p.fft_len,
                p.num_integrations,
                p.pol_mode.npolout()
            )
            .into(),
        );
    }
    let mut dest = vec![format!("Destination: {}", params.dest).into()];
    if params.dest.is_network() {
        dest.push(format!("Total rate: {} Gbps", params.rate_gbps).into());
    } else {
        dest.push(format!("Format: {}", params.format).into());
    }
    if params.split_antennas {
        dest.push("Splitting antennas".into());
    }
    if let Some(w) = &params.ics_weights {
        dest.push(format!("Incoherent sum weights: [{}]", w.iter().join(", ")).into());
    }
    printer.push_block(dest);
    printer.display();
}

#[derive(thiserror::Error, Debug)]
pub(super) enum RawspecArgsError {
    #[error("No RAW file stems were specified")]
    NoStems,

    #[error("Got {ffts} FFT lengths but {ints} integration lengths; there must be one of each per output product")]
    MismatchedLengths { ffts: usize, ints: usize },

    #[error("{num} output products were requested, but at most {MAX_OUTPUTS} are supported")]
    TooManyProducts { num: usize },

    #[error("Output product {index} has a zero FFT or integration length")]
    ZeroLength { index: usize },

    #[error("Got {num_pols} polarisation modes for {num_products} output products; give either one or one per product")]
    MismatchedPols { num_pols: usize, num_products: usize },

    #[error("Invalid output polarisation mode {0}; valid modes are 1, 4 and -4")]
    BadPol(i32),

    #[error("Antennas can't be split when sending spectra over the network")]
    NetworkSplit,

    #[error("Incoherent sums can't be sent over the network")]
    NetworkIcs,

    #[error("FBH5 output can't be sent over the network")]
    NetworkFbh5,

    #[error("--ant and --splitant can't be used together")]
    AntWithSplit,

    #[error("The network rate must be a positive number of Gbps, not {0}")]
    BadRate(f64),

    #[error("Block counts (--nb, --nb-host) must be positive")]
    ZeroBlocks,
}
