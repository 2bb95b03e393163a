// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameters for a `rawspec` run.
//!
//! The code here mirrors the code within the `cli` module; `cli` is unparsed,
//! user-facing code, whereas parameters have been checked and are ready to be
//! used directly.

mod rawspec;

pub(crate) use rawspec::{ParamsError, RawspecParams};

use std::ops::Range;

use crate::io::read::RawHeader;

/// The contiguous run of coarse channels taken from every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelSelection {
    /// The index of the first selected channel within the block.
    pub(crate) first: usize,

    pub(crate) count: usize,

    /// The number of antennas the selected channels are stacked over.
    pub(crate) num_antennas: usize,
}

impl ChannelSelection {
    /// Select channels from blocks described by `header`. `schan` is relative
    /// to the start of the selected antenna's channels, if an antenna was
    /// picked.
    pub(crate) fn new(
        header: &RawHeader,
        schan: usize,
        nchan: Option<usize>,
        antenna: Option<usize>,
    ) -> Result<ChannelSelection, ParamsError> {
        let nants = header.nants.max(1);
        let chans_per_ant = header.obsnchan / nants;
        let (base, available) = match antenna {
            Some(ant) if ant >= nants => {
                return Err(ParamsError::AntennaOutOfRange { ant, nants });
            }
            Some(ant) => (ant * chans_per_ant, chans_per_ant),
            None => (0, header.obsnchan),
        };

        let count = nchan.unwrap_or_else(|| available.saturating_sub(schan));
        if count == 0 || schan + count > available {
            return Err(ParamsError::ChannelRange {
                schan,
                nchan: count,
                available,
            });
        }

        // Only whole antennas keep their stacking.
        let num_antennas = match antenna {
            Some(_) => 1,
            None if chans_per_ant > 0 && schan % chans_per_ant == 0 && count % chans_per_ant == 0 => {
                count / chans_per_ant
            }
            None => 1,
        };

        Ok(ChannelSelection {
            first: base + schan,
            count,
            num_antennas,
        })
    }

    pub(crate) fn chans_per_antenna(&self) -> usize {
        self.count / self.num_antennas.max(1)
    }

    /// The bytes of a block holding the selected channels.
    pub(crate) fn byte_range(&self, bytes_per_channel: usize) -> Range<usize> {
        self.first * bytes_per_channel..(self.first + self.count) * bytes_per_channel
    }
}
