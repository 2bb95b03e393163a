// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The processing context.

A context holds the (immutable) input geometry, the parameters of each output
product, the host-side block ring and the host power buffers, and a compute
backend that does the channelisation. Everything is sized and allocated up
front by [`ProcessingContext::new`]; nothing is resized afterwards. Changing
the geometry means cleaning up and initialising again.
 */

mod error;
#[cfg(test)]
mod tests;

pub use error::{ContextError, GeometryError};

use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::{
    compute::{BackendPlan, ComputeBackend, ComputeError, DumpHandler, FftDirection},
    constants::{DEFAULT_FFT_LENGTHS, DEFAULT_INTEGRATION_LENGTHS, MAX_OUTPUTS},
};

/// What detected quantities an output product holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolMode {
    /// |X|² + |Y|² (or |X|² for a single polarisation).
    #[default]
    TotalPower,

    /// Stokes I, Q, U and V.
    FullStokes,

    /// XX*, YY*, Re(XY*) and Im(XY*).
    FullPol,
}

impl PolMode {
    /// Convert from the conventional "Npolout" value: 1, 4 or -4.
    pub fn from_npolout(npolout: i32) -> Result<PolMode, GeometryError> {
        match npolout {
            1 => Ok(PolMode::TotalPower),
            4 => Ok(PolMode::FullStokes),
            -4 => Ok(PolMode::FullPol),
            _ => Err(GeometryError::BadPolMode { npolout }),
        }
    }

    pub fn npolout(self) -> i32 {
        match self {
            PolMode::TotalPower => 1,
            PolMode::FullStokes => 4,
            PolMode::FullPol => -4,
        }
    }

    /// The number of detected products per fine channel.
    pub fn num_products(self) -> usize {
        self.npolout().unsigned_abs() as usize
    }
}

/// The shape of the input data. This doesn't change for the lifetime of a
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Np: polarisations per sample (1 or 2).
    pub num_pols: usize,

    /// Nc: coarse channels per block, over all antennas.
    pub num_coarse_chans: usize,

    /// Ntpb: time samples per coarse channel per block.
    pub samples_per_block: usize,

    /// Nbps: bits per real or imaginary component.
    pub bits_per_sample: usize,

    /// Nant: antennas whose channels are stacked in a block.
    pub num_antennas: usize,

    /// Are the input samples the complex conjugates of the true voltages?
    pub input_conjugated: bool,

    /// Which compute device to use.
    pub device: usize,
}

impl Geometry {
    /// The number of bytes in one block.
    pub fn block_len(&self) -> usize {
        self.num_coarse_chans * self.samples_per_block * self.num_pols * 2 * self.bits_per_sample
            / 8
    }

    /// The number of coarse channels belonging to each antenna.
    pub fn chans_per_antenna(&self) -> usize {
        self.num_coarse_chans / self.num_antennas.max(1)
    }

    fn validate(&self) -> Result<(), GeometryError> {
        for (value, name) in [
            (self.num_pols, "The number of polarisations"),
            (self.num_coarse_chans, "The number of coarse channels"),
            (self.samples_per_block, "The number of samples per block"),
            (self.num_antennas, "The number of antennas"),
        ] {
            if value == 0 {
                return Err(GeometryError::Zero(name));
            }
        }
        if !matches!(self.bits_per_sample, 4 | 8 | 16) {
            return Err(GeometryError::BitsPerSample {
                bits: self.bits_per_sample,
            });
        }
        if self.num_coarse_chans % self.num_antennas != 0 {
            return Err(GeometryError::AntennaChannels {
                num_chans: self.num_coarse_chans,
                num_ants: self.num_antennas,
            });
        }
        Ok(())
    }
}

/// The requested parameters of an output product. An FFT length and
/// integration length of zero means "unused".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProductParams {
    /// Nt: the FFT length, i.e. the fine channels per coarse channel.
    pub fft_len: usize,

    /// Na: the number of spectra summed into each integration.
    pub num_integrations: usize,

    pub pol_mode: PolMode,
}

impl ProductParams {
    fn is_unset(&self) -> bool {
        self.fft_len == 0 && self.num_integrations == 0
    }
}

/// An output product with its derived sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputProduct {
    pub params: ProductParams,

    /// Nds: the integrations collected before each dump. If an integration
    /// spans several device buffers, this is 1.
    pub spectra_per_dump: usize,

    /// The number of device buffers an integration spans (1 unless an
    /// integration is longer than a device buffer).
    pub buffers_per_integration: usize,
}

impl OutputProduct {
    pub fn fft_len(&self) -> usize {
        self.params.fft_len
    }

    pub fn num_integrations(&self) -> usize {
        self.params.num_integrations
    }

    pub fn pol_mode(&self) -> PolMode {
        self.params.pol_mode
    }

    /// Floats in one detected product of one spectrum (all coarse channels).
    pub fn spectrum_len(&self, geometry: &Geometry) -> usize {
        geometry.num_coarse_chans * self.fft_len()
    }

    /// Floats in the product's host power buffer.
    pub fn power_len(&self, geometry: &Geometry) -> usize {
        self.spectra_per_dump * self.spectrum_len(geometry) * self.pol_mode().num_products()
    }

    /// Floats in the product's incoherent-sum buffer.
    pub fn ics_len(&self, geometry: &Geometry) -> usize {
        self.power_len(geometry) / geometry.num_antennas.max(1)
    }
}

/// Everything needed to set up a [`ProcessingContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    pub geometry: Geometry,

    /// The requested output products. If all of them are unset, the default
    /// products are used.
    pub products: Vec<ProductParams>,

    /// Nb: blocks per device buffer. Derived from the largest FFT if not
    /// given.
    pub blocks_per_buffer: Option<usize>,

    /// Nb_host: blocks in the host ring. Defaults to Nb.
    pub host_blocks: Option<usize>,

    /// If set, incoherently sum antennas with these weights. Antennas without
    /// a weight get 1.0.
    pub ics_weights: Option<Vec<f32>>,

    pub direction: FftDirection,
}

/// The derived sizes of a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSizing {
    pub products: Vec1<OutputProduct>,
    pub blocks_per_buffer: usize,
    pub host_blocks: usize,
}

impl ContextConfig {
    /// Validate the configuration and derive all sizes.
    pub fn resolve(&self) -> Result<ContextSizing, GeometryError> {
        let geometry = &self.geometry;
        geometry.validate()?;
        let requested = resolve_products(&self.products, geometry.num_pols)?;

        let ntpb = geometry.samples_per_block;
        let max_fft_len = requested.iter().map(|p| p.fft_len).fold(0, usize::max);
        let nb = match self.blocks_per_buffer {
            Some(0) => return Err(GeometryError::Zero("The number of blocks per device buffer")),
            Some(nb) => nb,
            None if max_fft_len >= ntpb => {
                if max_fft_len % ntpb != 0 {
                    return Err(GeometryError::BlocksPerBuffer {
                        max_fft_len,
                        samples_per_block: ntpb,
                    });
                }
                max_fft_len / ntpb
            }
            None => 1,
        };
        let nb_host = self.host_blocks.unwrap_or(nb);
        if nb_host < nb || nb_host % nb != 0 {
            return Err(GeometryError::HostBlocks { nb, nb_host });
        }

        let buffer_samples = nb * ntpb;
        let mut sized = Vec::with_capacity(requested.len());
        for (index, params) in requested.iter().enumerate() {
            sized.push(size_product(index, *params, buffer_samples)?);
        }
        let products = Vec1::try_from_vec(sized)
            .map_err(|_| GeometryError::Zero("The number of output products"))?;

        if let Some(weights) = &self.ics_weights {
            if weights.len() > geometry.num_antennas {
                return Err(GeometryError::TooManyWeights {
                    num_weights: weights.len(),
                    num_ants: geometry.num_antennas,
                });
            }
        }

        Ok(ContextSizing {
            products,
            blocks_per_buffer: nb,
            host_blocks: nb_host,
        })
    }

    /// The incoherent-sum weights for every antenna, if summing is enabled.
    pub fn full_ics_weights(&self) -> Option<Vec<f32>> {
        let num_ants = self.geometry.num_antennas;
        self.ics_weights.as_ref().map(|w| {
            (0..num_ants)
                .map(|a| w.get(a).copied().unwrap_or(1.0))
                .collect()
        })
    }
}

/// Check the requested products, dropping unset ones. If nothing is left,
/// use the defaults.
fn resolve_products(
    products: &[ProductParams],
    num_pols: usize,
) -> Result<Vec1<ProductParams>, GeometryError> {
    if products.len() > MAX_OUTPUTS {
        return Err(GeometryError::TooManyProducts {
            num: products.len(),
        });
    }
    for (index, p) in products.iter().enumerate() {
        if (p.fft_len == 0) != (p.num_integrations == 0) {
            return Err(GeometryError::PartialProduct {
                index,
                fft_len: p.fft_len,
                num_integrations: p.num_integrations,
            });
        }
    }

    let set: Vec<ProductParams> = products.iter().filter(|p| !p.is_unset()).copied().collect();
    let set = match Vec1::try_from_vec(set) {
        Ok(set) => set,
        Err(_) => {
            debug!("No output products were set; using the defaults");
            let pol_mode = products.first().map(|p| p.pol_mode).unwrap_or_default();
            let mut defaults = Vec1::new(ProductParams {
                fft_len: DEFAULT_FFT_LENGTHS[0],
                num_integrations: DEFAULT_INTEGRATION_LENGTHS[0],
                pol_mode,
            });
            for (&fft_len, &num_integrations) in DEFAULT_FFT_LENGTHS
                .iter()
                .zip(DEFAULT_INTEGRATION_LENGTHS.iter())
                .skip(1)
            {
                defaults.push(ProductParams {
                    fft_len,
                    num_integrations,
                    pol_mode,
                });
            }
            defaults
        }
    };

    for (index, p) in set.iter().enumerate() {
        if p.pol_mode != PolMode::TotalPower && num_pols != 2 {
            return Err(GeometryError::PolModeNeedsTwoPols { index, num_pols });
        }
    }
    Ok(set)
}

fn size_product(
    index: usize,
    params: ProductParams,
    buffer_samples: usize,
) -> Result<OutputProduct, GeometryError> {
    if buffer_samples % params.fft_len != 0 {
        return Err(GeometryError::FftLenDoesNotDivide {
            index,
            fft_len: params.fft_len,
            buffer_samples,
        });
    }
    let integration_samples = params.fft_len * params.num_integrations;
    let non_integral = GeometryError::NonIntegralDumps {
        index,
        integration_samples,
        buffer_samples,
    };
    let (spectra_per_dump, buffers_per_integration) = if integration_samples <= buffer_samples {
        if buffer_samples % integration_samples != 0 {
            return Err(non_integral);
        }
        (buffer_samples / integration_samples, 1)
    } else {
        if integration_samples % buffer_samples != 0 {
            return Err(non_integral);
        }
        (1, integration_samples / buffer_samples)
    };
    Ok(OutputProduct {
        params,
        spectra_per_dump,
        buffers_per_integration,
    })
}

/// A host buffer of detected power. The backend writes into it only when it
/// is the sole owner; output workers hold shared handles while they read.
#[derive(Debug)]
pub struct PowerBuffer(Arc<Vec<f32>>);

impl PowerBuffer {
    pub(crate) fn zeroed(len: usize) -> Result<PowerBuffer, ComputeError> {
        let mut v = Vec::new();
        v.try_reserve_exact(len)
            .map_err(|_| ComputeError::OutOfMemory {
                what: "host power buffer",
                bytes: len * std::mem::size_of::<f32>(),
            })?;
        v.resize(len, 0.0);
        Ok(PowerBuffer(Arc::new(v)))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Another handle to the same data, for a reader.
    pub fn share(&self) -> PowerBuffer {
        PowerBuffer(Arc::clone(&self.0))
    }

    /// Is anything else holding a handle to this buffer?
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    /// Mutable access, only available while no reader holds a handle.
    pub fn get_mut(&mut self) -> Option<&mut [f32]> {
        Arc::get_mut(&mut self.0).map(|v| v.as_mut_slice())
    }

    /// Zero the buffer. If readers still hold it, they keep the old data and
    /// this buffer gets fresh storage.
    fn clear(&mut self) {
        match Arc::get_mut(&mut self.0) {
            Some(v) => v.fill(0.0),
            None => {
                trace!("Power buffer still shared; replacing it");
                self.0 = Arc::new(vec![0.0; self.0.len()]);
            }
        }
    }
}

/// The host-side outputs of the pipeline. These are lent to the backend
/// while it processes a device buffer and handed back when it completes.
pub struct HostOutputs {
    /// One power buffer per output product.
    pub power: Vec<PowerBuffer>,

    /// One incoherent-sum buffer per output product, if summing is enabled.
    pub ics: Vec<Option<PowerBuffer>>,

    /// Called around every dump.
    pub handler: Option<Box<dyn DumpHandler>>,
}

impl HostOutputs {
    fn clear(&mut self) {
        for b in self.power.iter_mut() {
            b.clear();
        }
        for b in self.ics.iter_mut().flatten() {
            b.clear();
        }
    }
}

enum BlockBuffers<'a> {
    Owned(Vec<Vec<u8>>),
    Borrowed(&'a mut [Vec<u8>]),
}

impl BlockBuffers<'_> {
    fn slots(&self) -> &[Vec<u8>] {
        match self {
            BlockBuffers::Owned(v) => v,
            BlockBuffers::Borrowed(v) => v,
        }
    }

    fn slots_mut(&mut self) -> &mut [Vec<u8>] {
        match self {
            BlockBuffers::Owned(v) => v,
            BlockBuffers::Borrowed(v) => v,
        }
    }
}

/// The processing engine's state: sizes, host buffers and a compute backend.
pub struct ProcessingContext<'a> {
    config: ContextConfig,
    sizing: ContextSizing,
    block_len: usize,
    blocks: BlockBuffers<'a>,

    /// `None` while lent to the backend.
    outputs: Option<HostOutputs>,

    backend: Box<dyn ComputeBackend>,
    released: bool,
}

impl<'a> ProcessingContext<'a> {
    /// Validate the configuration, allocate host buffers and set up the
    /// backend.
    pub fn new(
        config: ContextConfig,
        backend: Box<dyn ComputeBackend>,
    ) -> Result<ProcessingContext<'a>, ContextError> {
        Self::initialise(config, backend, BlockBuffers::Owned(vec![]))
    }

    /// Like [`ProcessingContext::new`], but the host block ring is supplied
    /// by the caller. There must be at least Nb_host buffers, each at least
    /// one block long.
    pub fn with_blocks(
        config: ContextConfig,
        backend: Box<dyn ComputeBackend>,
        blocks: &'a mut [Vec<u8>],
    ) -> Result<ProcessingContext<'a>, ContextError> {
        Self::initialise(config, backend, BlockBuffers::Borrowed(blocks))
    }

    fn initialise(
        config: ContextConfig,
        mut backend: Box<dyn ComputeBackend>,
        mut blocks: BlockBuffers<'a>,
    ) -> Result<ProcessingContext<'a>, ContextError> {
        let (sizing, outputs) = allocate(&config, &mut blocks, backend.as_mut())?;
        Ok(ProcessingContext {
            block_len: config.geometry.block_len(),
            config,
            sizing,
            blocks,
            outputs: Some(outputs),
            backend,
            released: false,
        })
    }

    /// Release everything and initialise again with a new configuration.
    /// Caller-supplied block buffers are kept. If this fails, the context
    /// stays released.
    pub fn reinitialise(&mut self, config: ContextConfig) -> Result<(), ContextError> {
        self.cleanup()?;
        let (sizing, outputs) = allocate(&config, &mut self.blocks, self.backend.as_mut())?;
        self.block_len = config.geometry.block_len();
        self.config = config;
        self.sizing = sizing;
        self.outputs = Some(outputs);
        self.released = false;
        Ok(())
    }

    /// Wait for the backend, then release all buffers and backend
    /// resources. The context can't be used again until it is
    /// reinitialised.
    pub fn cleanup(&mut self) -> Result<(), ContextError> {
        if self.released {
            return Ok(());
        }
        let result = self.wait_for_completion();
        self.backend.release();
        self.outputs = None;
        if let BlockBuffers::Owned(v) = &mut self.blocks {
            v.clear();
            v.shrink_to_fit();
        }
        self.released = true;
        result
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.config.geometry
    }

    pub fn products(&self) -> &Vec1<OutputProduct> {
        &self.sizing.products
    }

    /// Nb.
    pub fn blocks_per_buffer(&self) -> usize {
        self.sizing.blocks_per_buffer
    }

    /// Nb_host.
    pub fn host_blocks(&self) -> usize {
        self.sizing.host_blocks
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    fn check_slot(&self, slot: usize) -> Result<(), ContextError> {
        if self.released {
            return Err(ContextError::Released);
        }
        if slot >= self.host_blocks() {
            return Err(ContextError::BadSlot {
                slot,
                nb_host: self.host_blocks(),
            });
        }
        Ok(())
    }

    /// The host block buffer in a ring slot.
    pub fn block_mut(&mut self, slot: usize) -> Result<&mut [u8], ContextError> {
        self.check_slot(slot)?;
        let block_len = self.block_len;
        Ok(&mut self.blocks.slots_mut()[slot][..block_len])
    }

    pub fn block(&self, slot: usize) -> Result<&[u8], ContextError> {
        self.check_slot(slot)?;
        Ok(&self.blocks.slots()[slot][..self.block_len])
    }

    /// Fill a ring slot with zeros (a synthesised block).
    pub fn zero_block(&mut self, slot: usize) -> Result<(), ContextError> {
        self.block_mut(slot)?.fill(0);
        Ok(())
    }

    /// Copy the Nb ring slots starting at `first_slot` to the device buffer.
    pub fn copy_blocks(&mut self, first_slot: usize) -> Result<(), ContextError> {
        let nb = self.blocks_per_buffer();
        self.check_slot(first_slot)?;
        self.check_slot(first_slot + nb - 1)?;
        let block_len = self.block_len;
        let blocks: Vec<&[u8]> = self.blocks.slots()[first_slot..first_slot + nb]
            .iter()
            .map(|b| &b[..block_len])
            .collect();
        trace!("Copying ring slots {first_slot}..{} to the device", first_slot + nb);
        self.backend.copy_blocks(&blocks, 0)?;
        Ok(())
    }

    /// Start channelising the device buffer. Returns as soon as the work is
    /// queued.
    pub fn start_processing(&mut self) -> Result<(), ContextError> {
        if self.released {
            return Err(ContextError::Released);
        }
        let outputs = self.outputs.take().ok_or(ComputeError::Busy)?;
        if let Err(e) = self.backend.start_processing(self.config.direction, outputs) {
            self.outputs = self.backend.reclaim_outputs();
            return Err(e.into());
        }
        Ok(())
    }

    /// How many output products have finished with the current device
    /// buffer.
    pub fn check_for_completion(&self) -> usize {
        self.backend.check_for_completion()
    }

    /// Block until the backend is idle, and take back the host outputs.
    pub fn wait_for_completion(&mut self) -> Result<(), ContextError> {
        if self.released {
            return Ok(());
        }
        let result = self.backend.wait_for_completion();
        if let Some(outputs) = self.backend.reclaim_outputs() {
            self.outputs = Some(outputs);
        }
        result?;
        Ok(())
    }

    /// Discard partial integrations and zero the power buffers, without
    /// reallocating anything.
    pub fn reset_integration(&mut self) -> Result<(), ContextError> {
        if self.released {
            return Err(ContextError::Released);
        }
        self.wait_for_completion()?;
        self.backend.reset_integration()?;
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.clear();
        }
        Ok(())
    }

    /// Install the dump handler, returning the previous one.
    pub fn set_dump_handler(
        &mut self,
        handler: Box<dyn DumpHandler>,
    ) -> Result<Option<Box<dyn DumpHandler>>, ContextError> {
        self.wait_for_completion()?;
        let outputs = self.outputs.as_mut().ok_or(ContextError::Released)?;
        Ok(outputs.handler.replace(handler))
    }

    /// Remove the dump handler, once the backend is idle.
    pub fn take_dump_handler(&mut self) -> Result<Option<Box<dyn DumpHandler>>, ContextError> {
        self.wait_for_completion()?;
        Ok(self.outputs.as_mut().and_then(|o| o.handler.take()))
    }

    /// The host power buffer of a product. Not available while the backend
    /// holds the outputs.
    pub fn power_buffer(&self, product: usize) -> Option<&PowerBuffer> {
        self.outputs.as_ref().and_then(|o| o.power.get(product))
    }

    /// The incoherent-sum buffer of a product, if summing is enabled.
    pub fn ics_buffer(&self, product: usize) -> Option<&PowerBuffer> {
        self.outputs
            .as_ref()
            .and_then(|o| o.ics.get(product))
            .and_then(|b| b.as_ref())
    }
}

/// Size everything, allocate the host buffers and set up the backend. On
/// failure nothing is kept.
fn allocate(
    config: &ContextConfig,
    blocks: &mut BlockBuffers<'_>,
    backend: &mut dyn ComputeBackend,
) -> Result<(ContextSizing, HostOutputs), ContextError> {
    let sizing = config.resolve()?;
    let geometry = config.geometry;
    let block_len = geometry.block_len();
    let nb_host = sizing.host_blocks;

    match blocks {
        BlockBuffers::Owned(owned) => {
            let mut new = Vec::with_capacity(nb_host);
            for _ in 0..nb_host {
                let mut block = Vec::new();
                block.try_reserve_exact(block_len).map_err(|_| {
                    ContextError::Allocation(ComputeError::OutOfMemory {
                        what: "host block buffer",
                        bytes: block_len,
                    })
                })?;
                block.resize(block_len, 0);
                new.push(block);
            }
            *owned = new;
        }
        BlockBuffers::Borrowed(supplied) => {
            if supplied.len() < nb_host || supplied.iter().any(|b| b.len() < block_len) {
                return Err(GeometryError::SuppliedBlocks {
                    supplied: supplied.len(),
                    expected: nb_host,
                    block_len,
                }
                .into());
            }
        }
    }

    let mut power = Vec::with_capacity(sizing.products.len());
    let mut ics = Vec::with_capacity(sizing.products.len());
    for p in sizing.products.iter() {
        power.push(PowerBuffer::zeroed(p.power_len(&geometry)).map_err(ContextError::Allocation)?);
        ics.push(match config.ics_weights {
            Some(_) => {
                Some(PowerBuffer::zeroed(p.ics_len(&geometry)).map_err(ContextError::Allocation)?)
            }
            None => None,
        });
    }

    let plan = BackendPlan {
        geometry,
        blocks_per_buffer: sizing.blocks_per_buffer,
        block_len,
        products: sizing.products.iter().copied().collect(),
        ics_weights: config.full_ics_weights(),
    };
    if let Err(e) = backend.initialise(&plan) {
        backend.release();
        if let BlockBuffers::Owned(owned) = blocks {
            owned.clear();
        }
        return Err(ContextError::Allocation(e));
    }

    debug!(
        "Initialised a processing context: Nb = {}, Nb_host = {}, block = {} bytes",
        sizing.blocks_per_buffer, nb_host, block_len
    );
    for (i, p) in sizing.products.iter().enumerate() {
        debug!(
            "Output product {i}: Nt = {}, Na = {}, Npolout = {}, Nds = {}, {} floats per dump",
            p.fft_len(),
            p.num_integrations(),
            p.pol_mode().npolout(),
            p.spectra_per_dump,
            p.power_len(&geometry)
        );
    }

    Ok((
        sizing,
        HostOutputs {
            power,
            ics,
            handler: None,
        },
    ))
}

impl Drop for ProcessingContext<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.backend.wait_for_completion();
            self.backend.release();
        }
    }
}
