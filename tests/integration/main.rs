// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod args;
mod spectra;

use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use byteorder::{LittleEndian, ReadBytesExt};

use rawspec::io::write::FilterbankHeader;

fn rawspec() -> Command {
    Command::cargo_bin("rawspec").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

fn card(key: &str, value: &str) -> String {
    format!("{:<80}", format!("{key:<8}= {value}"))
}

/// Write a GUPPI RAW file with 4 coarse channels, 2 polarisations and 64
/// 8-bit time samples per block. Every sample of the nth block is (n+1, n+1).
fn write_raw(path: &Path, pktidxs: &[i64]) {
    let blocsize = 2 * 2 * 4 * 64;
    let mut f = File::create(path).unwrap();
    for (i, pktidx) in pktidxs.iter().enumerate() {
        let header = [
            card("BLOCSIZE", &blocsize.to_string()),
            card("NPOL", "2"),
            card("OBSNCHAN", "4"),
            card("NBITS", "8"),
            card("OBSFREQ", "1420.0"),
            card("OBSBW", "4.0"),
            card("TBIN", "1e-6"),
            card("PKTIDX", &pktidx.to_string()),
            card("SRC_NAME", "'TEST_SRC'"),
            card("STT_IMJD", "59000"),
            card("STT_SMJD", "0"),
            format!("{:<80}", "END"),
        ]
        .concat();
        f.write_all(header.as_bytes()).unwrap();
        f.write_all(&vec![(i + 1) as u8; blocsize]).unwrap();
    }
}

/// Read a filterbank file's header and all of its spectra.
fn read_fil(path: &Path) -> (FilterbankHeader, Vec<f32>) {
    let mut reader = BufReader::new(File::open(path).unwrap());
    let (header, _) = FilterbankHeader::read(&mut reader).unwrap();
    let mut bytes = vec![];
    reader.read_to_end(&mut bytes).unwrap();
    let mut data = vec![0.0; bytes.len() / 4];
    bytes
        .as_slice()
        .read_f32_into::<LittleEndian>(&mut data)
        .unwrap();
    (header, data)
}
