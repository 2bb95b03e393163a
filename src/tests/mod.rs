// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests: synthetic GUPPI RAW data.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

/// Format a single 80-byte RAW header card.
pub(crate) fn card(key: &str, value: &str) -> String {
    let mut card = format!("{key:<8}= {value}");
    card.truncate(80);
    format!("{card:<80}")
}

/// The geometry and metadata of a synthetic observation.
#[derive(Debug, Clone)]
pub(crate) struct RawObs {
    pub(crate) obsnchan: usize,
    pub(crate) npol: usize,
    pub(crate) ntpb: usize,
    pub(crate) nbits: usize,
    pub(crate) nants: usize,
    pub(crate) directio: bool,
    pub(crate) obsfreq: f64,
    pub(crate) obsbw: f64,
    pub(crate) tbin: f64,
}

impl Default for RawObs {
    fn default() -> Self {
        Self {
            obsnchan: 4,
            npol: 2,
            ntpb: 64,
            nbits: 8,
            nants: 1,
            directio: false,
            obsfreq: 1420.0,
            obsbw: 4.0,
            tbin: 1e-6,
        }
    }
}

impl RawObs {
    pub(crate) fn blocsize(&self) -> usize {
        2 * self.npol * self.obsnchan * self.ntpb * self.nbits / 8
    }

    pub(crate) fn header(&self, pktidx: i64) -> Vec<u8> {
        let cards = [
            card("BLOCSIZE", &self.blocsize().to_string()),
            card("NPOL", &self.npol.to_string()),
            card("OBSNCHAN", &self.obsnchan.to_string()),
            card("NBITS", &self.nbits.to_string()),
            card("OBSFREQ", &self.obsfreq.to_string()),
            card("OBSBW", &self.obsbw.to_string()),
            card("TBIN", &self.tbin.to_string()),
            card("DIRECTIO", if self.directio { "1" } else { "0" }),
            card("PKTIDX", &pktidx.to_string()),
            card("NANTS", &self.nants.to_string()),
            card("RA_STR", "'12:34:56.7'"),
            card("DEC_STR", "'-30:12:34.5'"),
            card("STT_IMJD", "59000"),
            card("STT_SMJD", "43200"),
            card("SRC_NAME", "'TEST_SRC'"),
            card("TELESCOP", "'GBT'"),
            format!("{:<80}", "END"),
        ];
        let mut bytes = cards.concat().into_bytes();
        if self.directio {
            let padded = (bytes.len() + 511) / 512 * 512;
            bytes.resize(padded, 0);
        }
        bytes
    }

    /// Write a RAW file containing a block for every packet index. Each block
    /// is filled with its own index in the group (as an 8-bit value) so that
    /// tests can tell blocks apart.
    pub(crate) fn write_file(&self, path: &Path, pktidxs: &[i64]) -> PathBuf {
        let mut f = File::create(path).unwrap();
        for (i, &pktidx) in pktidxs.iter().enumerate() {
            f.write_all(&self.header(pktidx)).unwrap();
            f.write_all(&vec![(i + 1) as u8; self.blocsize()]).unwrap();
        }
        path.to_path_buf()
    }
}
