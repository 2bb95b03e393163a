// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use tempfile::tempdir;

use crate::*;

#[test]
fn test_total_power_spectra() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("obs");
    write_raw(&dir.path().join("obs.0000.raw"), &[0, 1, 2]);
    let out = dir.path().join("out");

    let cmd = rawspec()
        .args([
            stem.to_str().unwrap(),
            "-f",
            "16",
            "-t",
            "4",
            "-d",
            out.to_str().unwrap(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "rawspec failed on test data: {:?}", get_cmd_output(cmd));

    let (header, data) = read_fil(&out.join("obs.rawspec.0000.fil"));
    assert_eq!(header.nchans, 64);
    assert_eq!(header.nifs, 1);
    assert_eq!(header.source_name, "TEST_SRC");
    assert_abs_diff_eq!(header.tstart, 59000.0);
    assert_abs_diff_eq!(header.tsamp, 64e-6);

    // Constant voltages put all power at DC, the centre of each coarse
    // channel.
    assert_eq!(data.len(), 3 * 64);
    for (i_spectrum, spectrum) in data.chunks_exact(64).enumerate() {
        let v = (i_spectrum + 1) as f32;
        for (i, &p) in spectrum.iter().enumerate() {
            let expected = if i % 16 == 8 { 4096.0 * v * v } else { 0.0 };
            assert_abs_diff_eq!(p, expected, epsilon = 1e-2);
        }
    }
}

#[test]
fn test_full_stokes_and_two_products() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("obs");
    write_raw(&dir.path().join("obs.0000.raw"), &[0, 1]);
    let out = dir.path().join("out");

    let cmd = rawspec()
        .args([
            stem.to_str().unwrap(),
            "-f",
            "16,64",
            "-t",
            "4,2",
            "-p",
            "4,1",
            "-o",
            "2",
            "-d",
            out.to_str().unwrap(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));

    let (stokes, stokes_data) = read_fil(&out.join("obs.rawspec.0002.fil"));
    assert_eq!(stokes.nifs, 4);
    assert_eq!(stokes_data.len(), 2 * 4 * 64);

    // 2 blocks of 64 samples give 2 spectra of length 64, integrated together.
    let (coarse, coarse_data) = read_fil(&out.join("obs.rawspec.0003.fil"));
    assert_eq!(coarse.nchans, 4 * 64);
    assert_eq!(coarse.nifs, 1);
    assert_eq!(coarse_data.len(), 4 * 64);
}

#[test]
fn test_multiple_stems() {
    let dir = tempdir().unwrap();
    write_raw(&dir.path().join("a.0000.raw"), &[0]);
    write_raw(&dir.path().join("b.0000.raw"), &[0, 1]);
    let out = dir.path().join("out");

    let cmd = rawspec()
        .args([
            dir.path().join("a").to_str().unwrap(),
            dir.path().join("b").to_str().unwrap(),
            "-f",
            "16",
            "-t",
            "4",
            "-d",
            out.to_str().unwrap(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));

    let (_, a) = read_fil(&out.join("a.rawspec.0000.fil"));
    let (_, b) = read_fil(&out.join("b.rawspec.0000.fil"));
    assert_eq!(a.len(), 64);
    assert_eq!(b.len(), 2 * 64);
}
