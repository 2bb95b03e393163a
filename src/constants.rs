// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.
 */

use static_assertions::{const_assert, const_assert_eq};

/// The maximum number of output products that can be produced from a single
/// pass over the input data.
pub const MAX_OUTPUTS: usize = 4;

/// FFT lengths used when the user doesn't specify any output products.
pub const DEFAULT_FFT_LENGTHS: [usize; 3] = [1 << 20, 1 << 3, 1 << 10];

/// Integration lengths (number of spectra summed) used when the user doesn't
/// specify any output products.
pub const DEFAULT_INTEGRATION_LENGTHS: [usize; 3] = [51, 128, 3072];

const_assert_eq!(DEFAULT_FFT_LENGTHS.len(), DEFAULT_INTEGRATION_LENGTHS.len());
const_assert!(DEFAULT_FFT_LENGTHS.len() <= MAX_OUTPUTS);

/// The size of a single RAW header record ("card") [bytes].
pub const RAW_CARD_SIZE: usize = 80;

/// RAW headers are never searched beyond this many bytes.
pub const MAX_RAW_HDR_SIZE: usize = 25600;

/// When DIRECTIO is set in a RAW header, the data following the header is
/// aligned to this many bytes.
pub const DIRECTIO_ALIGNMENT: usize = 512;

/// The maximum number of spectrum bytes (floats) carried by a single UDP
/// packet.
pub const MAX_PACKET_DATA_SIZE: usize = 8192;

/// Network pacing sleeps shorter than this are not worth doing [nanoseconds].
pub const PACING_THRESHOLD_NS: u64 = 100_000;

/// The default aggregate network output rate [Gbps].
pub const DEFAULT_NETWORK_RATE_GBPS: f64 = 6.0;

/// Filterbank headers produced here always carry this machine ID.
pub const FILTERBANK_MACHINE_ID: i32 = 20;

/// Spectra are always written as 32-bit floats.
pub const FILTERBANK_NBITS: i32 = 32;

/// The longest string a filterbank header may hold.
pub const FILTERBANK_MAX_STRING: usize = 80;

/// Seconds in a day.
pub const SECONDS_PER_DAY: f64 = 86400.0;

const_assert_eq!(MAX_RAW_HDR_SIZE % RAW_CARD_SIZE, 0);
const_assert_eq!(MAX_PACKET_DATA_SIZE % std::mem::size_of::<f32>(), 0);
