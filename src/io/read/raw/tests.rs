// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests for reading from GUPPI RAW files.

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::tempdir;

use super::*;
use crate::tests::{card, RawObs};

fn header_from_lines(lines: &str) -> Vec<u8> {
    let mut bytes = String::new();
    for line in lines.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line.split_once('=').unwrap();
        bytes.push_str(&card(key.trim(), value.trim()));
    }
    bytes.push_str(&format!("{:<80}", "END"));
    bytes.into_bytes()
}

#[test]
fn test_parse_header() {
    let bytes = header_from_lines(indoc! {"
        BLOCSIZE = 131072
        NPOL = 2
        OBSNCHAN = 64
        NBITS = 8
        OBSFREQ = 1501.4648
        OBSBW = -187.5
        TBIN = 3.41333333333E-07
        PKTIDX = 1024
        RA_STR = '12:34:56.7'
        DEC_STR = '-30:12:34.5'
        STT_IMJD = 58000
        STT_SMJD = 43200
        SRC_NAME = 'VOYAGER1'
        TELESCOP = 'GBT'
    "});
    let hdr = RawHeader::parse(&bytes).unwrap();
    assert_eq!(hdr.blocsize, 131072);
    assert_eq!(hdr.npol, 2);
    assert_eq!(hdr.obsnchan, 64);
    assert_eq!(hdr.nbits, 8);
    assert_eq!(hdr.pktidx, 1024);
    assert_abs_diff_eq!(hdr.obsbw, -187.5);
    assert_abs_diff_eq!(hdr.ra_hours, 12.0 + 34.0 / 60.0 + 56.7 / 3600.0, epsilon = 1e-12);
    assert_abs_diff_eq!(hdr.dec_degrees, -(30.0 + 12.0 / 60.0 + 34.5 / 3600.0), epsilon = 1e-12);
    assert_abs_diff_eq!(hdr.mjd, 58000.5);
    assert_eq!(hdr.src_name, "VOYAGER1");
    assert_eq!(hdr.telescop, "GBT");
    // Defaults.
    assert_eq!(hdr.beam_id, -1);
    assert_eq!(hdr.nbeam, -1);
    assert_eq!(hdr.nants, 1);
    assert!(!hdr.directio);
    assert_eq!(hdr.header_size, 15 * 80);
    assert_eq!(hdr.samples_per_block(), 131072 / (64 * 2 * 2));
    assert!(hdr.check_geometry("test").is_ok());
}

#[test]
fn test_npol_4_means_2_pols() {
    let bytes = header_from_lines(indoc! {"
        BLOCSIZE = 4096
        NPOL = 4
        OBSNCHAN = 4
        OBSFREQ = 1400
        OBSBW = 4
        TBIN = 1e-6
        PKTIDX = 0
    "});
    let hdr = RawHeader::parse(&bytes).unwrap();
    assert_eq!(hdr.npol, 2);
    assert_eq!(hdr.src_name, "Unknown");
    assert_eq!(hdr.telescop, "Unknown");
}

#[test]
fn test_missing_required_keys_are_errors() {
    let bytes = header_from_lines(indoc! {"
        BLOCSIZE = 4096
        NPOL = 2
        OBSNCHAN = 4
        OBSFREQ = 1400
        OBSBW = 4
        PKTIDX = 0
    "});
    match RawHeader::parse(&bytes) {
        Err(RawReadError::MissingKey { key: "TBIN", .. }) => (),
        other => panic!("unexpected result: {other:?}"),
    }

    let bytes = header_from_lines(indoc! {"
        BLOCSIZE = 4096
        NPOL = 2
        OBSNCHAN = 4
        OBSFREQ = 1400
        OBSBW = 4
        TBIN = 1e-6
        PKTIDX = -1
    "});
    assert!(matches!(
        RawHeader::parse(&bytes),
        Err(RawReadError::BadValue { key: "PKTIDX", .. })
    ));

    let bytes = header_from_lines(indoc! {"
        BLOCSIZE = 4096
        NPOL = 2
        OBSNCHAN = 4
        NBITS = 2
        OBSFREQ = 1400
        OBSBW = 4
        TBIN = 1e-6
        PKTIDX = 0
    "});
    assert!(matches!(
        RawHeader::parse(&bytes),
        Err(RawReadError::UnsupportedNbits { nbits: 2, .. })
    ));
}

#[test]
fn test_header_without_end_is_an_error() {
    let mut bytes = card("BLOCSIZE", "4096").into_bytes();
    assert!(matches!(
        RawHeader::parse(&bytes),
        Err(RawReadError::TruncatedHeader { .. })
    ));

    bytes = std::iter::repeat(card("COMMENT", "'padding'"))
        .take(MAX_RAW_HDR_SIZE / RAW_CARD_SIZE + 1)
        .collect::<String>()
        .into_bytes();
    assert!(matches!(
        RawHeader::parse(&bytes),
        Err(RawReadError::NoEndRecord { .. })
    ));
}

#[test]
fn test_block_geometry_mismatch() {
    let obs = RawObs::default();
    let mut hdr = RawHeader::parse(&obs.header(0)).unwrap();
    assert!(hdr.check_geometry("test").is_ok());
    hdr.blocsize += 3;
    assert!(matches!(
        hdr.check_geometry("test"),
        Err(RawReadError::BlockSizeMismatch { .. })
    ));
}

#[test]
fn test_parse_sexagesimal() {
    assert_abs_diff_eq!(parse_sexagesimal("12:30:00").unwrap(), 12.5);
    assert_abs_diff_eq!(parse_sexagesimal("-00:30:00").unwrap(), -0.5);
    assert_abs_diff_eq!(parse_sexagesimal("+45").unwrap(), 45.0);
    assert!(parse_sexagesimal("1:2:3:4").is_none());
    assert!(parse_sexagesimal("ab:cd").is_none());
}

#[test]
fn test_stem_handling() {
    assert_eq!(
        stem_from_path(Path::new("/data/obs.0003.raw")),
        PathBuf::from("/data/obs")
    );
    assert_eq!(stem_from_path(Path::new("/data/obs")), PathBuf::from("/data/obs"));
    assert_eq!(
        stem_from_path(Path::new("/data/obs.raw")),
        PathBuf::from("/data/obs.raw")
    );
    assert_eq!(
        raw_file_path(Path::new("/data/obs"), 12),
        PathBuf::from("/data/obs.0012.raw")
    );
}

#[test]
fn test_file_group_reads_across_files() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("guppi");
    let obs = RawObs {
        directio: true,
        ..Default::default()
    };
    obs.write_file(&raw_file_path(&stem, 0), &[0, 64]);
    obs.write_file(&raw_file_path(&stem, 1), &[128]);
    // Not part of the group; there's no 0002 file.
    obs.write_file(&raw_file_path(&stem, 3), &[192]);

    let mut group = RawFileGroup::open(&raw_file_path(&stem, 0)).unwrap();
    assert_eq!(group.stem(), stem.as_path());
    assert_eq!(group.files().len(), 2);

    let blocsize = obs.blocsize();
    let mut block = vec![0; blocsize];
    let mut pktidxs = vec![];
    let mut first_bytes = vec![];
    while let Some(hdr) = group.next_header().unwrap() {
        assert!(hdr.directio);
        assert_eq!(hdr.header_size % 512, 0);
        pktidxs.push(hdr.pktidx);
        group.read_block(&hdr, 0..blocsize, &mut block).unwrap();
        first_bytes.push(block[0]);
    }
    assert_eq!(pktidxs, [0, 64, 128]);
    // The helper fills each block with its index within its file (+1).
    assert_eq!(first_bytes, [1, 2, 1]);
}

#[test]
fn test_partial_block_reads_and_skips() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("guppi");
    let obs = RawObs::default();
    obs.write_file(&raw_file_path(&stem, 0), &[0, 64, 128]);

    let mut group = RawFileGroup::open(&stem).unwrap();
    let hdr = group.next_header().unwrap().unwrap();
    group.skip_block(&hdr).unwrap();

    let hdr = group.next_header().unwrap().unwrap();
    assert_eq!(hdr.pktidx, 64);
    let chan_bytes = hdr.bytes_per_channel();
    let mut dst = vec![0; chan_bytes];
    group
        .read_block(&hdr, chan_bytes..2 * chan_bytes, &mut dst)
        .unwrap();
    assert!(dst.iter().all(|&b| b == 2));

    // A bad range doesn't move the reader.
    let mut too_big = vec![0; hdr.blocsize + 1];
    assert!(matches!(
        group.read_block(&hdr, 0..hdr.blocsize + 1, &mut too_big),
        Err(RawReadError::BadBlockRange { .. })
    ));

    let hdr = group.next_header().unwrap().unwrap();
    assert_eq!(hdr.pktidx, 128);
}

#[test]
fn test_short_block_is_detected() {
    let dir = tempdir().unwrap();
    let stem = dir.path().join("short");
    let obs = RawObs::default();
    let path = raw_file_path(&stem, 0);
    let mut bytes = obs.header(0);
    bytes.extend(vec![1; obs.blocsize() / 2]);
    std::fs::write(&path, bytes).unwrap();

    let mut group = RawFileGroup::open(&stem).unwrap();
    let hdr = group.next_header().unwrap().unwrap();
    let mut block = vec![0; obs.blocsize()];
    match group.read_block(&hdr, 0..obs.blocsize(), &mut block) {
        Err(RawReadError::ShortBlock { expected, got, .. }) => {
            assert_eq!(expected, obs.blocsize());
            assert_eq!(got, obs.blocsize() / 2);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_missing_stem() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        RawFileGroup::open(&dir.path().join("nothing")),
        Err(RawReadError::NoFiles(_))
    ));
}
