// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;
use crate::compute::CpuBackend;

fn geometry() -> Geometry {
    Geometry {
        num_pols: 2,
        num_coarse_chans: 8,
        samples_per_block: 1024,
        bits_per_sample: 8,
        num_antennas: 1,
        input_conjugated: false,
        device: 0,
    }
}

fn product(fft_len: usize, num_integrations: usize) -> ProductParams {
    ProductParams {
        fft_len,
        num_integrations,
        pol_mode: PolMode::TotalPower,
    }
}

fn config(products: Vec<ProductParams>) -> ContextConfig {
    ContextConfig {
        geometry: geometry(),
        products,
        blocks_per_buffer: None,
        host_blocks: None,
        ics_weights: None,
        direction: FftDirection::Forward,
    }
}

/// A backend that can never get its resources.
struct NoMemoryBackend;

impl ComputeBackend for NoMemoryBackend {
    fn initialise(&mut self, _: &BackendPlan) -> Result<(), ComputeError> {
        Err(ComputeError::OutOfMemory {
            what: "device buffer",
            bytes: 1 << 40,
        })
    }

    fn copy_blocks(&mut self, _: &[&[u8]], _: usize) -> Result<(), ComputeError> {
        Err(ComputeError::NotInitialised)
    }

    fn start_processing(&mut self, _: FftDirection, _: HostOutputs) -> Result<(), ComputeError> {
        Err(ComputeError::NotInitialised)
    }

    fn check_for_completion(&self) -> usize {
        0
    }

    fn wait_for_completion(&mut self) -> Result<(), ComputeError> {
        Ok(())
    }

    fn reclaim_outputs(&mut self) -> Option<HostOutputs> {
        None
    }

    fn reset_integration(&mut self) -> Result<(), ComputeError> {
        Ok(())
    }

    fn release(&mut self) {}
}

#[test]
fn test_pol_mode_values() {
    for npolout in [1, 4, -4] {
        assert_eq!(PolMode::from_npolout(npolout).unwrap().npolout(), npolout);
    }
    assert_eq!(PolMode::FullPol.num_products(), 4);
    assert_eq!(PolMode::TotalPower.num_products(), 1);
    assert_eq!(
        PolMode::from_npolout(2),
        Err(GeometryError::BadPolMode { npolout: 2 })
    );
}

#[test]
fn test_integral_spectra_per_dump() {
    let sizing = config(vec![product(8, 16)]).resolve().unwrap();
    assert_eq!(sizing.blocks_per_buffer, 1);
    assert_eq!(sizing.host_blocks, 1);
    let p = sizing.products.first();
    assert_eq!(p.spectra_per_dump, 8);
    assert_eq!(p.buffers_per_integration, 1);
    assert_eq!(p.power_len(&geometry()), 8 * 8 * 8);
    assert_eq!(geometry().block_len(), 8 * 1024 * 2 * 2);

    let result = config(vec![product(8, 3)]).resolve();
    assert!(matches!(
        result,
        Err(GeometryError::NonIntegralDumps {
            index: 0,
            integration_samples: 24,
            buffer_samples: 1024
        })
    ));
}

#[test]
fn test_spectra_per_dump_is_exact_across_products() {
    for fft_shift in 0..=12 {
        let fft_len = 1 << fft_shift;
        for num_integrations in [1, 2, 3, 5, 6, 8, 12, 16, 100, 128, 1024, 3072, 4096] {
            let result = config(vec![product(fft_len, num_integrations)]).resolve();
            let buffer_samples = match &result {
                Ok(sizing) => sizing.blocks_per_buffer * 1024,
                Err(_) => 1024.max(fft_len),
            };
            let spectra_per_buffer = buffer_samples / fft_len;
            let divides = spectra_per_buffer % num_integrations == 0
                || num_integrations % spectra_per_buffer == 0;

            match result {
                Ok(sizing) => {
                    assert!(divides, "Nt={fft_len} Na={num_integrations}");
                    let p = sizing.products.first();
                    assert_eq!(
                        p.spectra_per_dump * num_integrations * fft_len,
                        p.buffers_per_integration * buffer_samples,
                        "Nt={fft_len} Na={num_integrations}"
                    );
                    if p.buffers_per_integration == 1 {
                        assert_eq!(p.spectra_per_dump * num_integrations, spectra_per_buffer);
                    } else {
                        assert_eq!(p.spectra_per_dump, 1);
                        assert_eq!(p.buffers_per_integration * spectra_per_buffer, num_integrations);
                    }
                }
                Err(e) => {
                    assert!(!divides, "Nt={fft_len} Na={num_integrations}: {e}");
                    assert!(matches!(e, GeometryError::NonIntegralDumps { index: 0, .. }));
                }
            }
        }
    }
}

#[test]
fn test_default_products() {
    let sizing = config(vec![product(0, 0), product(0, 0)]).resolve().unwrap();
    assert_eq!(sizing.products.len(), 3);
    assert_eq!(sizing.blocks_per_buffer, 1024);

    let p = &sizing.products;
    assert_eq!(p[0].fft_len(), 1 << 20);
    assert_eq!(p[0].spectra_per_dump, 1);
    assert_eq!(p[0].buffers_per_integration, 51);
    assert_eq!(p[1].spectra_per_dump, 1024);
    assert_eq!(p[2].spectra_per_dump, 1);
    assert_eq!(p[2].buffers_per_integration, 3);

    // No products at all also gives the defaults.
    assert_eq!(config(vec![]).resolve().unwrap().products.len(), 3);
}

#[test]
fn test_unset_products_are_dropped() {
    let sizing = config(vec![product(0, 0), product(64, 4)]).resolve().unwrap();
    assert_eq!(sizing.products.len(), 1);
    assert_eq!(sizing.products[0].fft_len(), 64);
    assert_eq!(sizing.products[0].spectra_per_dump, 4);
}

#[test]
fn test_bad_products() {
    assert_eq!(
        config(vec![product(8, 0)]).resolve(),
        Err(GeometryError::PartialProduct {
            index: 0,
            fft_len: 8,
            num_integrations: 0
        })
    );
    assert_eq!(
        config(vec![product(8, 1); 5]).resolve(),
        Err(GeometryError::TooManyProducts { num: 5 })
    );

    let mut c = config(vec![ProductParams {
        fft_len: 8,
        num_integrations: 1,
        pol_mode: PolMode::FullStokes,
    }]);
    assert!(c.resolve().is_ok());
    c.geometry.num_pols = 1;
    assert_eq!(
        c.resolve(),
        Err(GeometryError::PolModeNeedsTwoPols {
            index: 0,
            num_pols: 1
        })
    );

    assert!(matches!(
        config(vec![product(1536, 1)]).resolve(),
        Err(GeometryError::BlocksPerBuffer { .. })
    ));
    assert!(matches!(
        config(vec![product(8, 1), product(24, 1)]).resolve(),
        Err(GeometryError::FftLenDoesNotDivide { index: 1, .. })
    ));
}

#[test]
fn test_block_counts() {
    let mut c = config(vec![product(2048, 1), product(8, 1)]);
    let sizing = c.resolve().unwrap();
    assert_eq!(sizing.blocks_per_buffer, 2);
    assert_eq!(sizing.products[1].spectra_per_dump, 256);

    c.host_blocks = Some(4);
    assert_eq!(c.resolve().unwrap().host_blocks, 4);
    c.host_blocks = Some(3);
    assert_eq!(
        c.resolve(),
        Err(GeometryError::HostBlocks { nb: 2, nb_host: 3 })
    );
    c.host_blocks = Some(1);
    assert!(c.resolve().is_err());

    // An explicit Nb must still hold whole FFTs.
    c.host_blocks = None;
    c.blocks_per_buffer = Some(4);
    assert_eq!(c.resolve().unwrap().blocks_per_buffer, 4);
    c.blocks_per_buffer = Some(0);
    assert!(matches!(c.resolve(), Err(GeometryError::Zero(_))));
}

#[test]
fn test_geometry_checks() {
    let mut c = config(vec![product(8, 1)]);
    c.geometry.bits_per_sample = 2;
    assert_eq!(c.resolve(), Err(GeometryError::BitsPerSample { bits: 2 }));

    let mut c = config(vec![product(8, 1)]);
    c.geometry.num_antennas = 3;
    assert_eq!(
        c.resolve(),
        Err(GeometryError::AntennaChannels {
            num_chans: 8,
            num_ants: 3
        })
    );

    let mut c = config(vec![product(8, 1)]);
    c.geometry.samples_per_block = 0;
    assert!(matches!(c.resolve(), Err(GeometryError::Zero(_))));

    let mut c = config(vec![product(8, 1)]);
    c.geometry.num_antennas = 2;
    c.ics_weights = Some(vec![1.0, 2.0, 3.0]);
    assert_eq!(
        c.resolve(),
        Err(GeometryError::TooManyWeights {
            num_weights: 3,
            num_ants: 2
        })
    );
    c.ics_weights = Some(vec![0.5]);
    assert_eq!(c.full_ics_weights(), Some(vec![0.5, 1.0]));
}

#[test]
fn test_allocation_failure_is_distinct() {
    let result = ProcessingContext::new(config(vec![product(8, 1)]), Box::new(NoMemoryBackend));
    assert!(matches!(result, Err(ContextError::Allocation(_))));

    let result = ProcessingContext::new(config(vec![product(8, 3)]), Box::new(NoMemoryBackend));
    assert!(matches!(result, Err(ContextError::Geometry(_))));
}

#[test]
fn test_buffers_are_sized() {
    let mut c = config(vec![product(8, 16), product(64, 2)]);
    c.geometry.num_antennas = 2;
    c.ics_weights = Some(vec![]);
    let ctx = ProcessingContext::new(c, Box::new(CpuBackend::new())).unwrap();
    assert_eq!(ctx.block_len(), 8 * 1024 * 2 * 2);
    assert_eq!(ctx.block(0).unwrap().len(), ctx.block_len());
    assert_eq!(ctx.power_buffer(0).unwrap().len(), 8 * 8 * 8);
    assert_eq!(ctx.ics_buffer(0).unwrap().len(), 8 * 8 * 8 / 2);
    assert_eq!(ctx.power_buffer(1).unwrap().len(), 8 * 8 * 64);
    assert!(ctx.power_buffer(1).unwrap().as_slice().iter().all(|&p| p == 0.0));
    assert!(ctx.power_buffer(2).is_none());
}

#[test]
fn test_borrowed_blocks() {
    let c = config(vec![product(8, 1)]);
    let block_len = c.geometry.block_len();

    let mut too_few: Vec<Vec<u8>> = vec![];
    let result = ProcessingContext::with_blocks(c.clone(), Box::new(CpuBackend::new()), &mut too_few);
    assert!(matches!(
        result,
        Err(ContextError::Geometry(GeometryError::SuppliedBlocks { .. }))
    ));

    let mut blocks = vec![vec![0; block_len]; 2];
    {
        let mut ctx =
            ProcessingContext::with_blocks(c, Box::new(CpuBackend::new()), &mut blocks).unwrap();
        ctx.block_mut(0).unwrap().fill(7);
        assert!(matches!(
            ctx.block_mut(1),
            Err(ContextError::BadSlot { slot: 1, nb_host: 1 })
        ));
        ctx.cleanup().unwrap();
    }
    // The caller's buffers outlive the context.
    assert!(blocks[0].iter().all(|&b| b == 7));
    assert!(blocks[1].iter().all(|&b| b == 0));
}

#[test]
fn test_cleanup_and_reinitialise() {
    let mut ctx =
        ProcessingContext::new(config(vec![product(8, 1)]), Box::new(CpuBackend::new())).unwrap();
    ctx.zero_block(0).unwrap();
    ctx.cleanup().unwrap();
    assert!(matches!(ctx.block_mut(0), Err(ContextError::Released)));
    assert!(ctx.power_buffer(0).is_none());
    // Cleaning up twice is harmless.
    ctx.cleanup().unwrap();

    let mut c = config(vec![product(2048, 1)]);
    c.geometry.num_coarse_chans = 4;
    ctx.reinitialise(c).unwrap();
    assert_eq!(ctx.blocks_per_buffer(), 2);
    assert_eq!(ctx.host_blocks(), 2);
    assert_eq!(ctx.block_len(), 4 * 1024 * 2 * 2);
    assert_eq!(ctx.power_buffer(0).unwrap().len(), 4 * 2048);
    ctx.zero_block(1).unwrap();

    // A failed reinitialisation leaves the context released.
    assert!(ctx.reinitialise(config(vec![product(8, 3)])).is_err());
    assert!(matches!(ctx.zero_block(0), Err(ContextError::Released)));
}

#[test]
fn test_power_buffer_sharing() {
    let mut buffer = PowerBuffer::zeroed(4).unwrap();
    buffer.get_mut().unwrap()[1] = 2.0;
    let reader = buffer.share();
    assert!(buffer.is_shared());
    assert!(buffer.get_mut().is_none());
    assert_eq!(reader.as_slice(), [0.0, 2.0, 0.0, 0.0]);

    // Clearing a shared buffer leaves the reader's data alone.
    buffer.clear();
    assert_eq!(reader.as_slice(), [0.0, 2.0, 0.0, 0.0]);
    assert_eq!(buffer.as_slice(), [0.0; 4]);
    assert!(!buffer.is_shared());
    drop(reader);
    assert!(buffer.get_mut().is_some());
}
