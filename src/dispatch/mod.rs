// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Getting dumped spectra out of the processing loop.

Each output product gets its own writer thread. When a product's power buffer
is ready, a worker is spawned with a shared view of the buffer and that
product's sinks; before the buffer is next written to, the worker is joined.
Only one worker per product ever runs at a time.
 */


use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error, info, trace};
use ndarray::ArrayView4;
use scopeguard::defer_on_unwind;

use crate::{
    compute::DumpHandler,
    context::{Geometry, OutputProduct, PowerBuffer},
    io::write::{OutputSink, SpectraWriteError, WriteCount},
};

/// How a product's power buffer is laid out: spectra, then output
/// polarisations, then antennas, then the channels of one antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLayout {
    pub num_spectra: usize,
    pub num_pols: usize,
    pub num_antennas: usize,

    /// Fine channels per antenna.
    pub ant_stride: usize,
}

impl PowerLayout {
    pub fn new(product: &OutputProduct, geometry: &Geometry) -> PowerLayout {
        PowerLayout {
            num_spectra: product.spectra_per_dump,
            num_pols: product.pol_mode().num_products(),
            num_antennas: geometry.num_antennas,
            ant_stride: geometry.chans_per_antenna() * product.fft_len(),
        }
    }

    pub fn pol_stride(&self) -> usize {
        self.num_antennas * self.ant_stride
    }

    pub fn spectra_stride(&self) -> usize {
        self.num_pols * self.pol_stride()
    }

    pub fn len(&self) -> usize {
        self.num_spectra * self.spectra_stride()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn view<'a>(&self, power: &'a [f32]) -> Result<ArrayView4<'a, f32>, SpectraWriteError> {
        Ok(ArrayView4::from_shape(
            (
                self.num_spectra,
                self.num_pols,
                self.num_antennas,
                self.ant_stride,
            ),
            power,
        )?)
    }
}

/// Where a product's (non-ICS) spectra go.
pub enum PowerSinks {
    /// Every dump is written whole.
    Combined(Box<dyn OutputSink>),

    /// One sink per antenna. Antennas without a sink aren't written.
    PerAntenna(Vec<Option<Box<dyn OutputSink>>>),

    /// No sink could be opened.
    Nothing,
}

pub struct ProductSinks {
    pub power: PowerSinks,

    /// The incoherent sum over antennas.
    pub ics: Option<Box<dyn OutputSink>>,
}

impl ProductSinks {
    /// Are there no sinks left to write to?
    fn is_empty(&self) -> bool {
        let no_power = match &self.power {
            PowerSinks::Combined(_) => false,
            PowerSinks::PerAntenna(sinks) => sinks.iter().all(Option::is_none),
            PowerSinks::Nothing => true,
        };
        no_power && self.ics.is_none()
    }

    fn for_each_sink(&mut self, mut f: impl FnMut(&mut Box<dyn OutputSink>)) {
        match &mut self.power {
            PowerSinks::Combined(s) => f(s),
            PowerSinks::PerAntenna(sinks) => sinks.iter_mut().flatten().for_each(&mut f),
            PowerSinks::Nothing => (),
        }
        if let Some(s) = self.ics.as_mut() {
            f(s);
        }
    }
}

/// Running totals for one product.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DumpStats {
    /// Dumps written to every remaining sink without an error.
    pub dumps: usize,
    pub spectra: usize,
    pub bytes: usize,
    pub packets: usize,

    /// Dumps that arrived after all of the product's sinks had failed.
    pub dropped: usize,

    /// Time spent by writer threads.
    pub write_time: Duration,
}

impl DumpStats {
    /// The write rate in Gbit/s.
    pub fn gbps(&self) -> f64 {
        let secs = self.write_time.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 * 8.0 / secs / 1e9
        } else {
            0.0
        }
    }
}

/// A sink that failed to write and was dropped.
struct SinkFailure {
    sink: String,
    error: SpectraWriteError,
}

impl std::fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.sink, self.error)
    }
}

type WorkerOutput = (ProductSinks, WriteCount, Vec<SinkFailure>, Duration);

struct ProductOutput {
    layout: PowerLayout,

    /// `None` while a worker owns the sinks, or after the worker panicked.
    sinks: Option<ProductSinks>,

    worker: Option<JoinHandle<WorkerOutput>>,
    stats: DumpStats,
    failed: bool,
}

/// Writes dumped spectra with per-product worker threads.
pub struct OutputDispatcher {
    products: Vec<ProductOutput>,

    /// Set when anything goes wrong; the caller should stop soon.
    exit_soon: Arc<AtomicCell<bool>>,
}

impl OutputDispatcher {
    pub fn new(exit_soon: Arc<AtomicCell<bool>>) -> OutputDispatcher {
        OutputDispatcher {
            products: vec![],
            exit_soon,
        }
    }

    /// Register the next output product. Products must be added in the order
    /// of the processing context's products.
    pub fn add_product(&mut self, layout: PowerLayout, sinks: ProductSinks) {
        self.products.push(ProductOutput {
            layout,
            sinks: Some(sinks),
            worker: None,
            stats: DumpStats::default(),
            failed: false,
        });
    }

    pub fn num_products(&self) -> usize {
        self.products.len()
    }

    pub fn stats(&self, product: usize) -> Option<&DumpStats> {
        self.products.get(product).map(|p| &p.stats)
    }

    pub fn exit_soon(&self) -> bool {
        self.exit_soon.load()
    }

    /// Is a writer thread running (or finished but not yet joined) for this
    /// product?
    pub fn is_writing(&self, product: usize) -> bool {
        self.products
            .get(product)
            .map(|p| p.worker.is_some())
            .unwrap_or(false)
    }

    fn fail(&self, product: usize, e: &dyn std::fmt::Display) {
        error!("Output product {product}: {e}");
        self.exit_soon.store(true);
    }

    /// Wait for a product's writer thread, if there is one.
    fn join(&mut self, product: usize) {
        let handle = match self.products.get_mut(product).and_then(|p| p.worker.take()) {
            Some(h) => h,
            None => return,
        };
        match handle.join() {
            Ok((sinks, count, failures, elapsed)) => {
                let p = &mut self.products[product];
                if failures.is_empty() {
                    p.stats.dumps += 1;
                    p.stats.spectra += p.layout.num_spectra;
                } else {
                    p.failed = true;
                }
                p.stats.bytes += count.bytes;
                p.stats.packets += count.packets;
                p.stats.write_time += elapsed;
                p.sinks = Some(sinks);
                for failure in &failures {
                    self.fail(product, failure);
                }
            }
            Err(_) => {
                self.products[product].failed = true;
                self.fail(product, &"the writer thread panicked");
            }
        }
    }
}

/// Write to a sink, dropping it if the write fails.
fn write_or_drop(
    slot: &mut Option<Box<dyn OutputSink>>,
    data: &[f32],
    failures: &mut Vec<SinkFailure>,
) -> WriteCount {
    let result = match slot {
        Some(sink) => sink.write(data).map_err(|error| SinkFailure {
            sink: sink.describe(),
            error,
        }),
        None => return WriteCount::default(),
    };
    match result {
        Ok(count) => count,
        Err(failure) => {
            failures.push(failure);
            *slot = None;
            WriteCount::default()
        }
    }
}

/// Write one dump to a product's sinks. Sinks that fail are dropped and
/// reported; the others are still written.
fn write_dump(
    sinks: &mut ProductSinks,
    layout: &PowerLayout,
    power: &[f32],
    ics: Option<&[f32]>,
) -> (WriteCount, Vec<SinkFailure>) {
    let mut total = WriteCount::default();
    let mut failures = vec![];
    let mut add = |count: WriteCount| {
        total.bytes += count.bytes;
        total.packets += count.packets;
    };

    let mut power_failure = None;
    match &mut sinks.power {
        PowerSinks::Combined(sink) => match sink.write(power) {
            Ok(count) => add(count),
            Err(error) => {
                power_failure = Some(SinkFailure {
                    sink: sink.describe(),
                    error,
                })
            }
        },

        PowerSinks::PerAntenna(ant_sinks) => match layout.view(power) {
            Ok(view) => {
                for spectrum in view.outer_iter() {
                    for pol in spectrum.outer_iter() {
                        for (ant, slot) in pol.outer_iter().zip(ant_sinks.iter_mut()) {
                            let count = match ant.as_slice() {
                                Some(s) => write_or_drop(slot, s, &mut failures),
                                None => write_or_drop(slot, &ant.to_vec(), &mut failures),
                            };
                            add(count);
                        }
                    }
                }
            }
            Err(error) => {
                power_failure = Some(SinkFailure {
                    sink: "per-antenna outputs".to_string(),
                    error,
                })
            }
        },

        PowerSinks::Nothing => (),
    }
    if let Some(failure) = power_failure {
        failures.push(failure);
        sinks.power = PowerSinks::Nothing;
    }

    if let Some(ics) = ics {
        add(write_or_drop(&mut sinks.ics, ics, &mut failures));
    }
    (total, failures)
}

impl DumpHandler for OutputDispatcher {
    fn before_dump(&mut self, product: usize) {
        self.join(product);
    }

    fn after_dump(&mut self, product: usize, power: &PowerBuffer, ics: Option<&PowerBuffer>) {
        let p = match self.products.get_mut(product) {
            Some(p) => p,
            None => {
                trace!("No sinks for product {product}; dump ignored");
                return;
            }
        };
        let mut sinks = match p.sinks.take() {
            Some(s) if !s.is_empty() => s,
            unusable => {
                p.sinks = unusable;
                p.stats.dropped += 1;
                return;
            }
        };

        let layout = p.layout;
        let power = power.share();
        let ics = ics.map(|b| b.share());
        let exit_soon = Arc::clone(&self.exit_soon);
        let spawn_result = thread::Builder::new()
            .name(format!("output {product}"))
            .spawn(move || {
                defer_on_unwind! { exit_soon.store(true); }
                let start = Instant::now();
                let (count, failures) = write_dump(
                    &mut sinks,
                    &layout,
                    power.as_slice(),
                    ics.as_ref().map(|b| b.as_slice()),
                );
                (sinks, count, failures, start.elapsed())
            });
        match spawn_result {
            Ok(handle) => self.products[product].worker = Some(handle),
            Err(e) => {
                self.products[product].failed = true;
                self.fail(product, &e);
            }
        }
    }

    fn finish(&mut self) -> usize {
        for product in 0..self.products.len() {
            self.join(product);
            let mut failed = false;
            if let Some(mut sinks) = self.products[product].sinks.take() {
                sinks.for_each_sink(|sink| {
                    if let Err(e) = sink.finish() {
                        error!("Couldn't finish {}: {e}", sink.describe());
                        failed = true;
                    }
                });
            }
            if failed {
                self.products[product].failed = true;
                self.exit_soon.store(true);
            }

            let stats = self.products[product].stats;
            info!(
                "Product {product}: wrote {} dumps ({} spectra, {} bytes, {} packets) in {:.3}s ({:.3} Gbps)",
                stats.dumps,
                stats.spectra,
                stats.bytes,
                stats.packets,
                stats.write_time.as_secs_f64(),
                stats.gbps()
            );
            if stats.dropped > 0 {
                debug!("Product {product}: {} dumps dropped after a failure", stats.dropped);
            }
        }
        self.products.iter().filter(|p| p.failed).count()
    }
}

impl Drop for OutputDispatcher {
    fn drop(&mut self) {
        for p in &mut self.products {
            if let Some(h) = p.worker.take() {
                let _ = h.join();
            }
        }
    }
}

/// Split a total network data rate between products so that every product
/// finishes sending a dump in the same time: product `i` gets
/// `total / (Na_i * sum_j(1 / Na_j))`, where `Na` is the number of
/// integrations per dump.
pub fn apportion_rates(total_gbps: f64, num_integrations: &[usize]) -> Vec<f64> {
    let inverse_sum: f64 = num_integrations
        .iter()
        .map(|&na| 1.0 / na.max(1) as f64)
        .sum();
    num_integrations
        .iter()
        .map(|&na| total_gbps / (na.max(1) as f64 * inverse_sum))
        .collect()
}
