// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turning groups of RAW files into spectra.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_utils::atomic::AtomicCell;
use hifitime::Epoch;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info, warn};
use thiserror::Error;
use vec1::Vec1;

use super::ChannelSelection;
use crate::{
    compute::{new_compute_backend, FftDirection},
    context::{ContextConfig, ContextError, Geometry, ProcessingContext, ProductParams},
    dispatch::{apportion_rates, OutputDispatcher, PowerLayout, PowerSinks, ProductSinks},
    io::{
        read::{RawFileGroup, RawHeader, RawReadError},
        write::{
            create_file_sink, ensure_directory, output_path, FilterbankHeader, NetworkSink,
            OutputDestination, OutputFormat, OutputKind, OutputSink, SpectraWriteError,
        },
    },
    pipeline::PipelineDriver,
    sequencer::{Admission, BlockSequencer, SequenceError},
    PROGRESS_BARS,
};

#[derive(Error, Debug)]
pub(crate) enum ParamsError {
    #[error("Coarse channels {schan}..{} were requested, but only {available} are available", schan + nchan)]
    ChannelRange {
        schan: usize,
        nchan: usize,
        available: usize,
    },

    #[error("Antenna {ant} was requested, but the data only has {nants} antennas")]
    AntennaOutOfRange { ant: usize, nants: usize },

    #[error("{num} output product(s) had errors; their output is incomplete")]
    OutputFailures { num: usize },

    #[error(transparent)]
    RawRead(#[from] RawReadError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Write(#[from] SpectraWriteError),
}

/// Everything needed to process RAW file groups.
#[derive(Debug, Clone)]
pub(crate) struct RawspecParams {
    /// The file-group stems to process, in order.
    pub(crate) stems: Vec1<PathBuf>,

    /// The requested output products. Their FFT and integration lengths are
    /// always set.
    pub(crate) products: Vec<ProductParams>,

    /// The first coarse channel to process.
    pub(crate) schan: usize,

    /// The number of coarse channels to process; all the rest if `None`.
    pub(crate) nchan: Option<usize>,

    /// Only process this antenna.
    pub(crate) antenna: Option<usize>,

    /// Write a file per antenna.
    pub(crate) split_antennas: bool,

    /// Incoherent-sum weights, if summing is enabled.
    pub(crate) ics_weights: Option<Vec<f32>>,

    pub(crate) dest: OutputDestination,
    pub(crate) format: OutputFormat,
    pub(crate) device: usize,

    /// The total network output rate [Gbps].
    pub(crate) rate_gbps: f64,

    /// The index of the first output product in file names.
    pub(crate) output_index: usize,

    pub(crate) conjugate: bool,
    pub(crate) direction: FftDirection,
    pub(crate) blocks_per_buffer: Option<usize>,
    pub(crate) host_blocks: Option<usize>,
}

/// What happened to a file group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StemSummary {
    pub(crate) blocks: usize,
    pub(crate) zero_blocks: usize,
    pub(crate) skipped_blocks: usize,
    pub(crate) buffers: usize,

    /// Output products that failed.
    pub(crate) failures: usize,
}

impl RawspecParams {
    /// Process every stem. Stems whose files can't be read, or whose geometry
    /// doesn't suit the requested products, are skipped; output failures are
    /// reported once everything has been processed.
    pub(crate) fn run(&self) -> Result<(), ParamsError> {
        if let OutputDestination::Directory(dir) = &self.dest {
            ensure_directory(dir)?;
        }

        let exit_soon = Arc::new(AtomicCell::new(false));
        let mut ctx: Option<ProcessingContext<'static>> = None;
        let mut failures = 0;
        for stem in &self.stems {
            match self.process_stem(stem, &mut ctx, &exit_soon) {
                Ok(summary) => failures += summary.failures,
                Err(ParamsError::RawRead(e)) => {
                    warn!("Skipping {}: {e}", stem.display());
                }
                Err(ParamsError::Context(ContextError::Geometry(e))) => {
                    warn!("Skipping {}: {e}", stem.display());
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(mut ctx) = ctx {
            ctx.cleanup()?;
        }

        if failures > 0 {
            return Err(ParamsError::OutputFailures { num: failures });
        }
        if exit_soon.load() {
            return Err(ParamsError::OutputFailures { num: 1 });
        }
        Ok(())
    }

    /// Process one file group, reusing (or rebuilding) the processing
    /// context.
    pub(crate) fn process_stem(
        &self,
        stem: &Path,
        ctx: &mut Option<ProcessingContext<'static>>,
        exit_soon: &Arc<AtomicCell<bool>>,
    ) -> Result<StemSummary, ParamsError> {
        let mut group = RawFileGroup::open(stem)?;
        let first_file = group.files()[0].display().to_string();
        let first_header = match group.next_header()? {
            Some(h) => h,
            None => {
                warn!("{} has no blocks", first_file);
                return Ok(StemSummary::default());
            }
        };
        first_header.check_geometry(&first_file)?;
        if first_header.mjd > 0.0 {
            let start = Epoch::from_mjd_utc(first_header.mjd);
            info!("{}: observation started at {start}", stem.display());
        }

        let selection =
            ChannelSelection::new(&first_header, self.schan, self.nchan, self.antenna)?;
        let config = self.context_config(&first_header, &selection);
        match ctx.as_mut() {
            Some(c) if c.config() == &config => c.reset_integration()?,
            Some(c) => {
                debug!("Geometry changed; reinitialising the processing context");
                if let Err(e) = c.reinitialise(config) {
                    // A failed reinitialisation leaves the context released.
                    *ctx = None;
                    return Err(e.into());
                }
            }
            None => {
                *ctx = Some(ProcessingContext::new(
                    config,
                    new_compute_backend(self.device),
                )?)
            }
        }
        let ctx = ctx.as_mut().ok_or(ContextError::Released)?;

        let dispatcher = self.open_outputs(&group, &first_header, &selection, ctx, exit_soon);
        ctx.set_dump_handler(Box::new(dispatcher))?;

        let progress = ProgressBar::with_draw_target(
            None,
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}: {pos} blocks ({elapsed_precise})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
        .with_message(stem.display().to_string());

        let mut seq = BlockSequencer::new(ctx.blocks_per_buffer(), ctx.host_blocks());
        let mut driver = PipelineDriver::new(ctx);
        let range = selection.byte_range(first_header.bytes_per_channel());
        let mut next = Some(first_header.clone());
        loop {
            let header = match next.take() {
                Some(h) => h,
                None => match group.next_header() {
                    Ok(Some(h)) => h,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Abandoning the rest of {}: {e}", stem.display());
                        break;
                    }
                },
            };
            let file = group.current_file().display().to_string();
            if let Err(e) = check_consistent(&first_header, &header, &file) {
                warn!("Abandoning the rest of {}: {e}", stem.display());
                break;
            }

            match seq.admit(header.pktidx, &mut driver) {
                Ok(Admission::Consume { slot, .. }) => {
                    let read = group.read_block(&header, range.clone(), driver.block_mut(slot)?);
                    if let Err(e) = read {
                        seq.abandon();
                        warn!("Abandoning the rest of {}: {e}", stem.display());
                        break;
                    }
                    seq.commit(&mut driver)?;
                }
                Ok(Admission::Skip) => {
                    if let Err(e) = group.skip_block(&header) {
                        warn!("Abandoning the rest of {}: {e}", stem.display());
                        break;
                    }
                }
                Err(SequenceError::Stage(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("Abandoning the rest of {}: {e}", stem.display());
                    break;
                }
            }
            progress.set_position(seq.blocks_staged() as u64);
        }
        let buffers = driver.finish(seq.partial_blocks())?;
        progress.finish();

        let failures = match ctx.take_dump_handler()? {
            Some(mut handler) => handler.finish(),
            None => 0,
        };
        let summary = StemSummary {
            blocks: seq.blocks_staged(),
            zero_blocks: seq.zero_blocks(),
            skipped_blocks: seq.skipped_blocks(),
            buffers,
            failures,
        };
        info!(
            "{}: {} blocks ({} zero-filled, {} skipped) in {} device buffers",
            stem.display(),
            summary.blocks,
            summary.zero_blocks,
            summary.skipped_blocks,
            summary.buffers
        );
        Ok(summary)
    }

    fn context_config(&self, header: &RawHeader, selection: &ChannelSelection) -> ContextConfig {
        ContextConfig {
            geometry: Geometry {
                num_pols: header.npol,
                num_coarse_chans: selection.count,
                samples_per_block: header.samples_per_block(),
                bits_per_sample: header.nbits,
                num_antennas: selection.num_antennas,
                input_conjugated: self.conjugate,
                device: self.device,
            },
            products: self.products.clone(),
            blocks_per_buffer: self.blocks_per_buffer,
            host_blocks: self.host_blocks,
            ics_weights: self.ics_weights.clone(),
            direction: self.direction,
        }
    }

    /// Open the sinks of every product. Sinks that can't be opened are
    /// reported and left out; the run is then marked as failed.
    fn open_outputs(
        &self,
        group: &RawFileGroup,
        header: &RawHeader,
        selection: &ChannelSelection,
        ctx: &ProcessingContext,
        exit_soon: &Arc<AtomicCell<bool>>,
    ) -> OutputDispatcher {
        let geometry = ctx.geometry();
        let stem_name = group
            .stem()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "rawspec".to_string());
        let rawdatafile = group.files()[0]
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let num_integrations: Vec<usize> =
            ctx.products().iter().map(|p| p.num_integrations()).collect();
        let rates = apportion_rates(self.rate_gbps, &num_integrations);

        let mut dispatcher = OutputDispatcher::new(Arc::clone(exit_soon));
        for (i, product) in ctx.products().iter().enumerate() {
            let nifs = product.pol_mode().num_products();
            let make_header = |first_chan: usize, num_chans: usize| {
                FilterbankHeader::from_raw(
                    header,
                    &rawdatafile,
                    first_chan,
                    num_chans,
                    product.fft_len(),
                    product.num_integrations(),
                    nifs,
                )
            };
            let open = |kind: OutputKind, fb_header: FilterbankHeader| {
                let result: Result<Box<dyn OutputSink>, SpectraWriteError> = match &self.dest {
                    OutputDestination::Directory(dir) => {
                        let path =
                            output_path(dir, &stem_name, kind, self.output_index + i, self.format);
                        create_file_sink(&path, &fb_header, self.format, product.fft_len())
                    }
                    OutputDestination::Network { host, port } => {
                        NetworkSink::connect(host, *port, fb_header, Some(rates[i]))
                            .map(|s| Box::new(s) as Box<dyn OutputSink>)
                    }
                };
                match result {
                    Ok(sink) => {
                        debug!("Product {i}: opened {}", sink.describe());
                        Some(sink)
                    }
                    Err(e) => {
                        error!("Product {i}: {e}");
                        exit_soon.store(true);
                        None
                    }
                }
            };

            let chans_per_ant = selection.chans_per_antenna();
            let power = if self.split_antennas {
                PowerSinks::PerAntenna(
                    (0..geometry.num_antennas)
                        .map(|a| {
                            open(
                                OutputKind::Antenna(a),
                                make_header(selection.first + a * chans_per_ant, chans_per_ant),
                            )
                        })
                        .collect(),
                )
            } else {
                match open(
                    OutputKind::Combined,
                    make_header(selection.first, selection.count),
                ) {
                    Some(sink) => PowerSinks::Combined(sink),
                    None => PowerSinks::Nothing,
                }
            };
            let ics = if self.ics_weights.is_some() {
                open(
                    OutputKind::IncoherentSum,
                    make_header(selection.first, chans_per_ant),
                )
            } else {
                None
            };

            dispatcher.add_product(PowerLayout::new(product, geometry), ProductSinks { power, ics });
        }
        dispatcher
    }
}

/// Blocks after the first must have the same shape.
fn check_consistent(first: &RawHeader, header: &RawHeader, file: &str) -> Result<(), RawReadError> {
    header.check_geometry(file)?;
    if header.blocsize != first.blocsize
        || header.obsnchan != first.obsnchan
        || header.npol != first.npol
        || header.nbits != first.nbits
    {
        return Err(RawReadError::BlockSizeMismatch {
            file: file.to_string(),
            blocsize: header.blocsize,
            expected: first.blocsize,
        });
    }
    Ok(())
}
