// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use byteorder::{LittleEndian, ReadBytesExt};
use tempfile::tempdir;

use super::*;
use crate::{io::write::network::padded_header_len, tests::RawObs};

fn test_header() -> FilterbankHeader {
    FilterbankHeader {
        telescope_id: 6,
        src_raj: 12.0 + 34.0 / 60.0 + 56.7 / 3600.0,
        src_dej: -(30.0 + 12.0 / 60.0 + 34.5 / 3600.0),
        fch1: 1420.0,
        foff: -0.01,
        nchans: 1024,
        nbeams: 1,
        ibeam: 0,
        tstart: 59000.5,
        tsamp: 1.048576,
        nifs: 1,
        source_name: "VOYAGER1".to_string(),
        rawdatafile: "guppi_59000_12345_VOYAGER1_0001.0000.raw".to_string(),
        ..Default::default()
    }
}

fn assert_headers_match(a: &FilterbankHeader, b: &FilterbankHeader) {
    assert_abs_diff_eq!(a.src_raj, b.src_raj, epsilon = 1e-10);
    assert_abs_diff_eq!(a.src_dej, b.src_dej, epsilon = 1e-10);
    let mut a = a.clone();
    a.src_raj = b.src_raj;
    a.src_dej = b.src_dej;
    assert_eq!(&a, b);
}

#[test]
fn test_sexagesimal_packing() {
    let ra = 12.0 + 34.0 / 60.0 + 56.7 / 3600.0;
    assert_abs_diff_eq!(ddd_to_dms(ra), 123456.7, epsilon = 1e-8);
    assert_abs_diff_eq!(dms_to_ddd(123456.7), ra, epsilon = 1e-12);

    let dec = -(30.0 + 12.0 / 60.0 + 34.5 / 3600.0);
    assert_abs_diff_eq!(ddd_to_dms(dec), -301234.5, epsilon = 1e-8);
    assert_abs_diff_eq!(dms_to_ddd(-301234.5), dec, epsilon = 1e-12);

    assert_abs_diff_eq!(ddd_to_dms(0.0), 0.0);
    assert_abs_diff_eq!(dms_to_ddd(ddd_to_dms(-0.5)), -0.5, epsilon = 1e-12);
}

#[test]
fn test_header_round_trip() {
    let header = test_header();
    let bytes = header.to_bytes().unwrap();
    let (decoded, consumed) = FilterbankHeader::from_bytes(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_headers_match(&decoded, &header);
    assert_abs_diff_eq!(decoded.fch1, 1420.0);
    assert_abs_diff_eq!(decoded.foff, -0.01);
}

#[test]
fn test_header_keyword_order() {
    let bytes = test_header().to_bytes().unwrap();
    let text = String::from_utf8_lossy(&bytes);
    let position = |k: &str| text.find(k).unwrap();
    let order = [
        "HEADER_START",
        "machine_id",
        "telescope_id",
        "src_raj",
        "src_dej",
        "az_start",
        "za_start",
        "data_type",
        "fch1",
        "foff",
        "nchans",
        "nbeams",
        "ibeam",
        "nbits",
        "tstart",
        "tsamp",
        "nifs",
        "source_name",
        "rawdatafile",
        "HEADER_END",
    ];
    for pair in order.windows(2) {
        assert!(position(pair[0]) < position(pair[1]), "{pair:?}");
    }
    // Zero-valued frame flags are left out.
    assert!(!text.contains("barycentric"));
    assert!(!text.contains("pulsarcentric"));

    let header = FilterbankHeader {
        barycentric: 1,
        ..test_header()
    };
    let bytes = header.to_bytes().unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("barycentric"));
    let (decoded, _) = FilterbankHeader::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.barycentric, 1);
}

#[test]
fn test_padded_header() {
    let header = test_header();
    let unpadded = header.to_bytes().unwrap().len();

    // Exact padding to a 16-byte boundary.
    let min_len = padded_header_len(unpadded);
    assert_eq!(min_len % 16, 0);
    let padded = header.to_padded_bytes(min_len).unwrap();
    assert_eq!(padded.len(), min_len);
    let (decoded, consumed) = FilterbankHeader::from_bytes(&padded).unwrap();
    assert_eq!(consumed, min_len);
    assert_headers_match(&decoded, &header);

    // Padding that needs several dummy entries.
    for extra in [99, 100, 117, 118, 250, 1000] {
        let padded = header.to_padded_bytes(unpadded + extra).unwrap();
        assert_eq!(padded.len(), unpadded + extra, "extra = {extra}");
        let (decoded, _) = FilterbankHeader::from_bytes(&padded).unwrap();
        assert_eq!(decoded.rawdatafile, header.rawdatafile);
    }

    // Too small a shortfall for a dummy entry grows in 16-byte steps.
    let padded = header.to_padded_bytes(unpadded + 5).unwrap();
    assert_eq!(padded.len(), unpadded + 21);

    // Nothing to do.
    let padded = header.to_padded_bytes(unpadded - 1).unwrap();
    assert_eq!(padded.len(), unpadded);
}

#[test]
fn test_bad_headers() {
    let mut bytes = vec![];
    write_string(&mut bytes, "NOT_A_HEADER").unwrap();
    assert!(matches!(
        FilterbankHeader::from_bytes(&bytes),
        Err(FilterbankError::NoHeaderStart(_))
    ));

    let mut bytes = vec![];
    write_string(&mut bytes, HEADER_START).unwrap();
    write_entry(&mut bytes, "mystery", &HeaderValue::Int(3)).unwrap();
    assert!(matches!(
        FilterbankHeader::from_bytes(&bytes),
        Err(FilterbankError::UnknownKeyword(k)) if k == "mystery"
    ));

    let mut bytes = vec![];
    write_string(&mut bytes, HEADER_START).unwrap();
    write_entry(&mut bytes, "nchans", &HeaderValue::Int(3)).unwrap();
    assert!(matches!(
        FilterbankHeader::from_bytes(&bytes),
        Err(FilterbankError::IO(_))
    ));
}

#[test]
fn test_long_strings_are_truncated() {
    let header = FilterbankHeader {
        source_name: "x".repeat(200),
        ..test_header()
    };
    let (decoded, _) = FilterbankHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded.source_name.len(), FILTERBANK_MAX_STRING);
}

#[test]
fn test_telescope_ids() {
    assert_eq!(telescope_id("GBT"), 6);
    assert_eq!(telescope_id("Green Bank"), 6);
    assert_eq!(telescope_id("parkes"), 4);
    assert_eq!(telescope_id("ATA"), 9);
    assert_eq!(telescope_id("MeerKAT"), 64);
    assert_eq!(telescope_id("FAST"), 21);
    assert_eq!(telescope_id("Unknown"), 0);
}

#[test]
fn test_header_from_raw() {
    let obs = RawObs::default();
    let raw = RawHeader::parse(&obs.header(0)).unwrap();
    let header = FilterbankHeader::from_raw(&raw, "obs.0000.raw", 0, 4, 8, 16, 1);
    assert_eq!(header.machine_id, 20);
    assert_eq!(header.telescope_id, 6);
    assert_eq!(header.data_type, 1);
    assert_eq!(header.nbits, 32);
    assert_eq!(header.nchans, 32);
    assert_eq!(header.nifs, 1);
    // 1 MHz coarse channels, 8 fine channels each.
    assert_abs_diff_eq!(header.foff, 0.125);
    assert_abs_diff_eq!(header.fch1, 1418.0);
    assert_abs_diff_eq!(header.tsamp, 1e-6 * 128.0, epsilon = 1e-15);
    assert_abs_diff_eq!(header.tstart, 59000.5);
    assert_eq!(header.source_name, "TEST_SRC");
    assert_eq!(header.rawdatafile, "obs.0000.raw");

    // A subset starting at the third channel.
    let header = FilterbankHeader::from_raw(&raw, "obs.0000.raw", 2, 1, 8, 16, 4);
    assert_eq!(header.nchans, 8);
    assert_eq!(header.nifs, 4);
    assert_abs_diff_eq!(header.fch1, 1420.0);

    // Antenna-stacked channels share one band.
    let obs = RawObs {
        obsnchan: 8,
        nants: 2,
        ..Default::default()
    };
    let raw = RawHeader::parse(&obs.header(0)).unwrap();
    let header = FilterbankHeader::from_raw(&raw, "obs.0000.raw", 0, 8, 8, 16, 1);
    assert_eq!(header.nchans, 64);
    assert_abs_diff_eq!(header.foff, 0.125);
    assert_abs_diff_eq!(header.fch1, 1418.0);
}

#[test]
fn test_file_sink() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.fil");
    let header = test_header();
    let mut sink = FilterbankFileSink::create(&path, &header).unwrap();
    let count = sink.write(&[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(count.bytes, 12);
    sink.write(&[4.0]).unwrap();
    sink.finish().unwrap();
    assert_eq!(sink.describe(), path.display().to_string());
    drop(sink);

    let bytes = std::fs::read(&path).unwrap();
    let (decoded, consumed) = FilterbankHeader::from_bytes(&bytes).unwrap();
    assert_headers_match(&decoded, &header);
    let mut data = &bytes[consumed..];
    let mut floats = vec![];
    while let Ok(f) = data.read_f32::<LittleEndian>() {
        floats.push(f);
    }
    assert_eq!(floats, [1.0, 2.0, 3.0, 4.0]);
}
