// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The CPU compute backend.
//!
//! Work runs on a dedicated "stream" thread so that the caller can keep
//! reading blocks while a device buffer is processed. Within the stream,
//! coarse channels are channelised in parallel with rayon.

use std::{
    ops::Range,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, trace, warn};
use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use super::{BackendPlan, ComputeBackend, ComputeError, FftDirection};
use crate::context::{HostOutputs, OutputProduct, PolMode};

enum Job {
    Process {
        data: Vec<u8>,
        direction: FftDirection,
        outputs: HostOutputs,
    },
    Reset,
}

enum Done {
    Processed {
        data: Vec<u8>,
        outputs: HostOutputs,
        result: Result<(), ComputeError>,
    },
    Reset,
}

struct Stream {
    jobs: Sender<Job>,
    done: Receiver<Done>,
    handle: JoinHandle<()>,
}

/// Runs the FFT and accumulate pipeline on the CPU.
pub struct CpuBackend {
    plan: Option<Arc<BackendPlan>>,

    /// The "device" input buffer. `None` while the stream has it.
    staging: Option<Vec<u8>>,

    stream: Option<Stream>,
    in_flight: bool,

    /// Host outputs handed back by the stream, or kept after a failed start.
    held: Option<HostOutputs>,

    /// The number of products done with the current buffer.
    completed: Arc<AtomicCell<usize>>,
}

impl CpuBackend {
    pub fn new() -> CpuBackend {
        CpuBackend {
            plan: None,
            staging: None,
            stream: None,
            in_flight: false,
            held: None,
            completed: Arc::new(AtomicCell::new(0)),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes per real or imaginary component once copied to the device buffer.
/// 4-bit samples are expanded to 8 bits.
fn device_sample_bytes(bits_per_sample: usize) -> usize {
    if bits_per_sample == 16 {
        2
    } else {
        1
    }
}

fn device_block_len(plan: &BackendPlan) -> usize {
    let g = &plan.geometry;
    g.num_coarse_chans * g.samples_per_block * g.num_pols * 2 * device_sample_bytes(g.bits_per_sample)
}

/// Expand 4-bit complex samples (real in the high nibble, imaginary in the
/// low nibble, both two's complement) to one signed byte per component.
pub(super) fn expand_4bit(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.iter().zip(dst.chunks_exact_mut(2)) {
        let re = (*s as i8) >> 4;
        let im = ((*s << 4) as i8) >> 4;
        d[0] = re as u8;
        d[1] = im as u8;
    }
}

fn try_zeroed(len: usize, what: &'static str) -> Result<Vec<f32>, ComputeError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ComputeError::OutOfMemory {
            what,
            bytes: len * std::mem::size_of::<f32>(),
        })?;
    v.resize(len, 0.0);
    Ok(v)
}

impl ComputeBackend for CpuBackend {
    fn initialise(&mut self, plan: &BackendPlan) -> Result<(), ComputeError> {
        if self.plan.is_some() {
            self.release();
        }
        let plan = Arc::new(plan.clone());
        let staging_len = device_block_len(&plan) * plan.blocks_per_buffer;
        let mut staging = Vec::new();
        staging
            .try_reserve_exact(staging_len)
            .map_err(|_| ComputeError::OutOfMemory {
                what: "device input buffer",
                bytes: staging_len,
            })?;
        staging.resize(staging_len, 0);

        let mut accumulators = Vec::with_capacity(plan.products.len());
        for product in &plan.products {
            accumulators.push(Accumulator::new(product, &plan)?);
        }
        let state = StreamState {
            plan: Arc::clone(&plan),
            planner: FftPlanner::new(),
            accumulators,
        };

        let (jobs_tx, jobs_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let completed = Arc::clone(&self.completed);
        let handle = thread::Builder::new()
            .name("compute".to_string())
            .spawn(move || stream_loop(state, jobs_rx, done_tx, completed))?;

        debug!(
            "CPU backend ready: {} byte device buffer, {} products",
            staging_len,
            plan.products.len()
        );
        self.completed.store(plan.products.len());
        self.plan = Some(plan);
        self.staging = Some(staging);
        self.stream = Some(Stream {
            jobs: jobs_tx,
            done: done_rx,
            handle,
        });
        self.in_flight = false;
        Ok(())
    }

    fn copy_blocks(&mut self, blocks: &[&[u8]], dst_block: usize) -> Result<(), ComputeError> {
        let plan = self.plan.as_ref().ok_or(ComputeError::NotInitialised)?;
        let staging = self.staging.as_mut().ok_or(ComputeError::Busy)?;
        let bad_copy = || ComputeError::BadCopy {
            expected: plan.blocks_per_buffer.saturating_sub(dst_block),
            got: blocks.len(),
            block_len: plan.block_len,
            dst_block,
        };
        if dst_block + blocks.len() > plan.blocks_per_buffer
            || blocks.iter().any(|b| b.len() != plan.block_len)
        {
            return Err(bad_copy());
        }

        let dev_len = device_block_len(plan);
        let expand = plan.geometry.bits_per_sample == 4;
        for (src, dst) in blocks
            .iter()
            .zip(staging[dst_block * dev_len..].chunks_exact_mut(dev_len))
        {
            if expand {
                expand_4bit(src, dst);
            } else {
                dst.copy_from_slice(src);
            }
        }
        Ok(())
    }

    fn start_processing(
        &mut self,
        direction: FftDirection,
        outputs: HostOutputs,
    ) -> Result<(), ComputeError> {
        let stream = match self.stream.as_ref() {
            Some(s) => s,
            None => {
                self.held = Some(outputs);
                return Err(ComputeError::NotInitialised);
            }
        };
        let data = match self.staging.take() {
            Some(d) if !self.in_flight => d,
            other => {
                self.staging = other;
                self.held = Some(outputs);
                return Err(ComputeError::Busy);
            }
        };

        self.completed.store(0);
        if let Err(e) = stream.jobs.send(Job::Process {
            data,
            direction,
            outputs,
        }) {
            if let Job::Process { data, outputs, .. } = e.into_inner() {
                self.staging = Some(data);
                self.held = Some(outputs);
            }
            return Err(ComputeError::StreamDied);
        }
        self.in_flight = true;
        Ok(())
    }

    fn check_for_completion(&self) -> usize {
        match (&self.plan, self.in_flight) {
            (Some(plan), false) => plan.products.len(),
            (Some(_), true) => self.completed.load(),
            (None, _) => 0,
        }
    }

    fn wait_for_completion(&mut self) -> Result<(), ComputeError> {
        if !self.in_flight {
            return Ok(());
        }
        let stream = self.stream.as_ref().ok_or(ComputeError::NotInitialised)?;
        loop {
            match stream.done.recv() {
                Ok(Done::Processed {
                    data,
                    outputs,
                    result,
                }) => {
                    self.staging = Some(data);
                    self.held = Some(outputs);
                    self.in_flight = false;
                    return result;
                }
                Ok(Done::Reset) => continue,
                Err(_) => {
                    self.in_flight = false;
                    return Err(ComputeError::StreamDied);
                }
            }
        }
    }

    fn reclaim_outputs(&mut self) -> Option<HostOutputs> {
        if self.in_flight {
            None
        } else {
            self.held.take()
        }
    }

    fn reset_integration(&mut self) -> Result<(), ComputeError> {
        self.wait_for_completion()?;
        let stream = match self.stream.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };
        stream
            .jobs
            .send(Job::Reset)
            .map_err(|_| ComputeError::StreamDied)?;
        match stream.done.recv() {
            Ok(Done::Reset) => Ok(()),
            _ => Err(ComputeError::StreamDied),
        }
    }

    fn release(&mut self) {
        if let Some(Stream { jobs, done, handle }) = self.stream.take() {
            drop(jobs);
            // Let the stream finish whatever it's doing.
            while done.recv().is_ok() {}
            if handle.join().is_err() {
                warn!("The compute stream panicked");
            }
        }
        self.plan = None;
        self.staging = None;
        self.held = None;
        self.in_flight = false;
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Integration state of one output product.
struct Accumulator {
    product: OutputProduct,

    /// The integration in progress, ordered by detected product, then coarse
    /// channel, then fine channel.
    integration: Vec<f32>,

    /// Completed integrations waiting for the next dump.
    dump: Vec<f32>,

    /// 0..Na
    spectra_accumulated: usize,

    /// 0..Nds
    integration_slot: usize,
}

impl Accumulator {
    fn new(product: &OutputProduct, plan: &BackendPlan) -> Result<Accumulator, ComputeError> {
        let power_len = product.power_len(&plan.geometry);
        Ok(Accumulator {
            product: *product,
            integration: try_zeroed(power_len / product.spectra_per_dump, "integration buffer")?,
            dump: try_zeroed(power_len, "dump buffer")?,
            spectra_accumulated: 0,
            integration_slot: 0,
        })
    }

    fn reset(&mut self) {
        self.integration.fill(0.0);
        self.spectra_accumulated = 0;
        self.integration_slot = 0;
    }
}

struct StreamState {
    plan: Arc<BackendPlan>,
    planner: FftPlanner<f32>,
    accumulators: Vec<Accumulator>,
}

fn stream_loop(
    mut state: StreamState,
    jobs: Receiver<Job>,
    done: Sender<Done>,
    completed: Arc<AtomicCell<usize>>,
) {
    for job in jobs {
        let reply = match job {
            Job::Process {
                data,
                direction,
                mut outputs,
            } => {
                let result = state.process(&data, direction, &mut outputs, &completed);
                Done::Processed {
                    data,
                    outputs,
                    result,
                }
            }
            Job::Reset => {
                for acc in state.accumulators.iter_mut() {
                    acc.reset();
                }
                Done::Reset
            }
        };
        if done.send(reply).is_err() {
            break;
        }
    }
    trace!("Compute stream finished");
}

/// Where samples are in the device buffer.
#[derive(Clone, Copy)]
struct SampleLayout {
    num_pols: usize,
    samples_per_block: usize,
    sample_bytes: usize,
    block_len: usize,
    conjugate: bool,
}

impl SampleLayout {
    /// The complex sample of coarse channel `chan`, time `t` (counted over
    /// the whole buffer) and polarisation `pol`.
    fn sample(&self, data: &[u8], chan: usize, t: usize, pol: usize) -> Complex32 {
        let block = t / self.samples_per_block;
        let tt = t % self.samples_per_block;
        let offset = block * self.block_len
            + ((chan * self.samples_per_block + tt) * self.num_pols + pol) * 2 * self.sample_bytes;
        let (re, im) = if self.sample_bytes == 2 {
            (
                i16::from_le_bytes([data[offset], data[offset + 1]]) as f32,
                i16::from_le_bytes([data[offset + 2], data[offset + 3]]) as f32,
            )
        } else {
            (data[offset] as i8 as f32, data[offset + 1] as i8 as f32)
        };
        let s = Complex32::new(re, im);
        if self.conjugate {
            s.conj()
        } else {
            s
        }
    }
}

/// Detect the channelised voltages of one fine channel into `out` (one value
/// per detected product).
fn detect(pol_mode: PolMode, x: Complex32, y: Option<Complex32>, out: &mut [f32; 4]) {
    let xx = x.norm_sqr();
    match (pol_mode, y) {
        (PolMode::TotalPower, None) => out[0] = xx,
        (PolMode::TotalPower, Some(y)) => out[0] = xx + y.norm_sqr(),
        (PolMode::FullStokes, Some(y)) => {
            let yy = y.norm_sqr();
            let xy = x * y.conj();
            out[0] = xx + yy;
            out[1] = xx - yy;
            out[2] = 2.0 * xy.re;
            out[3] = -2.0 * xy.im;
        }
        (PolMode::FullPol, Some(y)) => {
            let xy = x * y.conj();
            out[0] = xx;
            out[1] = y.norm_sqr();
            out[2] = xy.re;
            out[3] = xy.im;
        }
        // Full-pol modes are rejected for single-pol data at initialisation.
        (_, None) => out[0] = xx,
    }
}

/// Channelise and detect FFTs `ffts` of one coarse channel, summing them.
/// The result is ordered by detected product, then fine channel, with the
/// lowest frequency first.
fn channel_power(
    data: &[u8],
    chan: usize,
    ffts: Range<usize>,
    fft: &dyn Fft<f32>,
    layout: SampleLayout,
    pol_mode: PolMode,
) -> Vec<f32> {
    let nt = fft.len();
    let npp = pol_mode.num_products();
    let mut out = vec![0.0; npp * nt];
    let mut bufs = vec![vec![Complex32::default(); nt]; layout.num_pols];
    let mut scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];
    let mut detected = [0.0; 4];

    for f in ffts {
        for (pol, buf) in bufs.iter_mut().enumerate() {
            for (t, s) in buf.iter_mut().enumerate() {
                *s = layout.sample(data, chan, f * nt + t, pol);
            }
            fft.process_with_scratch(buf, &mut scratch);
        }
        for k in 0..nt {
            let shifted = (k + nt / 2) % nt;
            detect(pol_mode, bufs[0][k], bufs.get(1).map(|b| b[k]), &mut detected);
            for (pp, d) in detected.iter().take(npp).enumerate() {
                out[pp * nt + shifted] += d;
            }
        }
    }
    out
}

/// Sum antennas with weights. `power` is ordered (rows, antenna, channel);
/// `ics` is ordered (rows, channel).
pub(super) fn incoherent_sum(power: &[f32], ics: &mut [f32], weights: &[f32], ant_stride: usize) {
    let row_len = weights.len() * ant_stride;
    for (out, row) in ics
        .chunks_exact_mut(ant_stride)
        .zip(power.chunks_exact(row_len))
    {
        out.fill(0.0);
        for (w, ant) in weights.iter().zip(row.chunks_exact(ant_stride)) {
            for (o, p) in out.iter_mut().zip(ant) {
                *o += w * p;
            }
        }
    }
}

impl StreamState {
    fn process(
        &mut self,
        data: &[u8],
        direction: FftDirection,
        outputs: &mut HostOutputs,
        completed: &AtomicCell<usize>,
    ) -> Result<(), ComputeError> {
        let plan = Arc::clone(&self.plan);
        let g = &plan.geometry;
        let layout = SampleLayout {
            num_pols: g.num_pols,
            samples_per_block: g.samples_per_block,
            sample_bytes: device_sample_bytes(g.bits_per_sample),
            block_len: device_block_len(&plan),
            conjugate: g.input_conjugated,
        };
        let buffer_samples = plan.blocks_per_buffer * g.samples_per_block;

        for (i, acc) in self.accumulators.iter_mut().enumerate() {
            let nt = acc.product.fft_len();
            let na = acc.product.num_integrations();
            let pol_mode = acc.product.pol_mode();
            let fft = match direction {
                FftDirection::Forward => self.planner.plan_fft_forward(nt),
                FftDirection::Inverse => self.planner.plan_fft_inverse(nt),
            };
            let num_ffts = buffer_samples / nt;
            let nc = g.num_coarse_chans;
            let npp = pol_mode.num_products();

            let mut f = 0;
            while f < num_ffts {
                let batch = (na - acc.spectra_accumulated).min(num_ffts - f);
                let partials: Vec<Vec<f32>> = (0..nc)
                    .into_par_iter()
                    .map(|c| channel_power(data, c, f..f + batch, fft.as_ref(), layout, pol_mode))
                    .collect();
                for (c, partial) in partials.iter().enumerate() {
                    for pp in 0..npp {
                        let dst = &mut acc.integration[(pp * nc + c) * nt..][..nt];
                        for (d, p) in dst.iter_mut().zip(&partial[pp * nt..(pp + 1) * nt]) {
                            *d += p;
                        }
                    }
                }
                acc.spectra_accumulated += batch;
                f += batch;

                if acc.spectra_accumulated == na {
                    let len = acc.integration.len();
                    acc.dump[acc.integration_slot * len..][..len].copy_from_slice(&acc.integration);
                    acc.integration.fill(0.0);
                    acc.spectra_accumulated = 0;
                    acc.integration_slot += 1;
                    if acc.integration_slot == acc.product.spectra_per_dump {
                        dump(i, acc, &plan, outputs)?;
                        acc.integration_slot = 0;
                    }
                }
            }
            completed.store(i + 1);
        }
        Ok(())
    }
}

/// Move the completed integrations of a product into its host buffers,
/// calling the handler either side.
fn dump(
    product: usize,
    acc: &Accumulator,
    plan: &BackendPlan,
    outputs: &mut HostOutputs,
) -> Result<(), ComputeError> {
    let HostOutputs {
        power,
        ics,
        handler,
    } = outputs;
    if let Some(h) = handler.as_mut() {
        h.before_dump(product);
    }

    let host = power
        .get_mut(product)
        .and_then(|b| b.get_mut())
        .ok_or(ComputeError::HostBufferBusy { product })?;
    host.copy_from_slice(&acc.dump);

    if let (Some(Some(sum)), Some(weights)) = (ics.get_mut(product), plan.ics_weights.as_ref()) {
        let sum = sum
            .get_mut()
            .ok_or(ComputeError::HostBufferBusy { product })?;
        let ant_stride = plan.geometry.chans_per_antenna() * acc.product.fft_len();
        incoherent_sum(&acc.dump, sum, weights, ant_stride);
    }
    trace!("Dumped output product {product}");

    if let Some(h) = handler.as_mut() {
        h.after_dump(
            product,
            &power[product],
            ics.get(product).and_then(|b| b.as_ref()),
        );
    }
    Ok(())
}
