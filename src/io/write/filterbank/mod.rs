// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write SIGPROC-style filterbank headers, and a sink that
//! writes flat filterbank files.
//!
//! A header is a sequence of keywords, each a little-endian `i32` length
//! followed by ASCII bytes. Most keywords are followed by a value: an `i32`,
//! an `f64` or another length-prefixed string. Sky positions are stored as
//! doubles packed as `±DDMMSS.sss` (or `±HHMMSS.sss`). The header starts with
//! `HEADER_START` and ends with `HEADER_END`; spectra follow as 32-bit floats.

#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::trace;
use thiserror::Error;

use super::{OutputSink, SpectraWriteError, WriteCount};
use crate::{
    constants::{FILTERBANK_MACHINE_ID, FILTERBANK_MAX_STRING, FILTERBANK_NBITS},
    io::read::RawHeader,
};

const HEADER_START: &str = "HEADER_START";
const HEADER_END: &str = "HEADER_END";
const RAWDATAFILE: &str = "rawdatafile";

/// The number of bytes a `rawdatafile` entry takes in addition to its string.
const RAWDATAFILE_ENTRY_OVERHEAD: usize = 4 + RAWDATAFILE.len() + 4;

#[derive(Error, Debug)]
pub enum FilterbankError {
    #[error("Filterbank header doesn't start with HEADER_START (got '{0}')")]
    NoHeaderStart(String),

    #[error("Unrecognised filterbank header keyword '{0}'")]
    UnknownKeyword(String),

    #[error("Filterbank header string has length {0}; the maximum is {FILTERBANK_MAX_STRING}")]
    BadStringLength(i32),

    #[error("Filterbank header string is not valid ASCII/UTF-8")]
    NotUtf8,

    #[error("Filterbank header value for '{keyword}' has the wrong type")]
    WrongType { keyword: String },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// A decoded header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i32),
    Double(f64),
    /// Hours or degrees; packed as `±DDMMSS.sss` when encoded.
    Angle(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Int,
    Double,
    Angle,
    Str,
}

fn keyword_kind(keyword: &str) -> Option<ValueKind> {
    match keyword {
        "telescope_id" | "machine_id" | "data_type" | "barycentric" | "pulsarcentric"
        | "nbits" | "nsamples" | "nchans" | "nifs" | "nbeams" | "ibeam" => Some(ValueKind::Int),
        "az_start" | "za_start" | "fch1" | "foff" | "tstart" | "tsamp" | "refdm" | "period" => {
            Some(ValueKind::Double)
        }
        "src_raj" | "src_dej" => Some(ValueKind::Angle),
        "source_name" | "rawdatafile" => Some(ValueKind::Str),
        _ => None,
    }
}

/// Convert decimal degrees (or hours) to the packed `DDMMSS.sss` form.
pub fn ddd_to_dms(ddd: f64) -> f64 {
    let sign = if ddd < 0.0 { -1.0 } else { 1.0 };
    let ddd = ddd.abs();
    let dd = ddd.trunc();
    let minutes = (ddd - dd) * 60.0;
    let mm = minutes.trunc();
    let ss = (minutes - mm) * 60.0;
    sign * (dd * 10000.0 + mm * 100.0 + ss)
}

/// Convert the packed `DDMMSS.sss` form back to decimal degrees (or hours).
pub fn dms_to_ddd(dms: f64) -> f64 {
    let sign = if dms < 0.0 { -1.0 } else { 1.0 };
    let dms = dms.abs();
    let dd = (dms / 10000.0).trunc();
    let rest = dms - dd * 10000.0;
    let mm = (rest / 100.0).trunc();
    let ss = rest - mm * 100.0;
    sign * (dd + mm / 60.0 + ss / 3600.0)
}

/// Map a telescope name to its SIGPROC ID. Unknown telescopes get 0 ("fake").
pub fn telescope_id(name: &str) -> i32 {
    let name = name.trim().to_uppercase();
    match name.as_str() {
        "ARECIBO" | "AO" => 1,
        "OOTY" => 2,
        "NANCAY" => 3,
        "PARKES" | "PKS" | "MURRIYANG" => 4,
        "JODRELL" | "JODRELL BANK" | "LOVELL" => 5,
        "GBT" | "GREEN BANK" | "GREENBANK" => 6,
        "GMRT" => 7,
        "EFFELSBERG" => 8,
        "ATA" | "HCRO" => 9,
        "LOFAR" => 11,
        "VLA" => 12,
        "CHIME" => 20,
        "FAST" => 21,
        "MEERKAT" | "MKAT" => 64,
        "KAT-7" | "KAT7" => 65,
        _ => 0,
    }
}

/// The metadata written at the start of a filterbank file (or packet).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterbankHeader {
    pub machine_id: i32,
    pub telescope_id: i32,
    pub data_type: i32,
    /// Only written when non-zero.
    pub barycentric: i32,
    /// Only written when non-zero.
    pub pulsarcentric: i32,
    /// Right ascension [hours].
    pub src_raj: f64,
    /// Declination [degrees].
    pub src_dej: f64,
    pub az_start: f64,
    pub za_start: f64,
    /// Frequency of the first channel [MHz].
    pub fch1: f64,
    /// Channel width [MHz].
    pub foff: f64,
    pub nchans: i32,
    pub nbeams: i32,
    pub ibeam: i32,
    pub nbits: i32,
    /// Start time [MJD].
    pub tstart: f64,
    /// Sample time [seconds].
    pub tsamp: f64,
    pub nifs: i32,
    pub source_name: String,
    pub rawdatafile: String,
}

impl Default for FilterbankHeader {
    fn default() -> Self {
        FilterbankHeader {
            machine_id: FILTERBANK_MACHINE_ID,
            telescope_id: 0,
            data_type: 1,
            barycentric: 0,
            pulsarcentric: 0,
            src_raj: 0.0,
            src_dej: 0.0,
            az_start: 0.0,
            za_start: 0.0,
            fch1: 0.0,
            foff: 0.0,
            nchans: 0,
            nbeams: 1,
            ibeam: 0,
            nbits: FILTERBANK_NBITS,
            tstart: 0.0,
            tsamp: 0.0,
            nifs: 1,
            source_name: String::new(),
            rawdatafile: String::new(),
        }
    }
}

impl FilterbankHeader {
    /// Derive the header of an output product from a RAW header.
    ///
    /// `first_chan` is the index of the first coarse channel in the output
    /// and `num_chans` is the number of coarse channels it holds. Channel
    /// frequencies are relative to one antenna's band, so antenna-stacked
    /// channels repeat the same frequencies.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        raw: &RawHeader,
        rawdatafile: &str,
        first_chan: usize,
        num_chans: usize,
        fft_len: usize,
        num_accumulations: usize,
        nifs: usize,
    ) -> FilterbankHeader {
        let chans_per_ant = (raw.obsnchan / raw.nants.max(1)).max(1);
        let chan_bw = raw.obsbw / chans_per_ant as f64;
        let foff = chan_bw / fft_len as f64;
        let first_local = (first_chan % chans_per_ant) as f64;
        let first_centre = raw.obsfreq - raw.obsbw / 2.0 + (first_local + 0.5) * chan_bw;
        let fch1 = first_centre - (fft_len / 2) as f64 * foff;

        FilterbankHeader {
            telescope_id: telescope_id(&raw.telescop),
            src_raj: raw.ra_hours,
            src_dej: raw.dec_degrees,
            fch1,
            foff,
            nchans: (num_chans * fft_len) as i32,
            nbeams: raw.nbeam,
            ibeam: raw.beam_id,
            tstart: raw.mjd,
            tsamp: raw.tbin * (fft_len * num_accumulations) as f64,
            nifs: nifs as i32,
            source_name: raw.src_name.clone(),
            rawdatafile: rawdatafile.to_string(),
            ..Default::default()
        }
    }

    /// The header entries in the order they are written.
    pub fn entries(&self) -> Vec<(&'static str, HeaderValue)> {
        use HeaderValue::*;

        let mut entries = vec![
            ("machine_id", Int(self.machine_id)),
            ("telescope_id", Int(self.telescope_id)),
            ("src_raj", Angle(self.src_raj)),
            ("src_dej", Angle(self.src_dej)),
            ("az_start", Double(self.az_start)),
            ("za_start", Double(self.za_start)),
            ("data_type", Int(self.data_type)),
            ("fch1", Double(self.fch1)),
            ("foff", Double(self.foff)),
            ("nchans", Int(self.nchans)),
            ("nbeams", Int(self.nbeams)),
            ("ibeam", Int(self.ibeam)),
            ("nbits", Int(self.nbits)),
            ("tstart", Double(self.tstart)),
            ("tsamp", Double(self.tsamp)),
            ("nifs", Int(self.nifs)),
        ];
        if self.barycentric != 0 {
            entries.push(("barycentric", Int(self.barycentric)));
        }
        if self.pulsarcentric != 0 {
            entries.push(("pulsarcentric", Int(self.pulsarcentric)));
        }
        entries.push(("source_name", Str(self.source_name.clone())));
        entries.push((RAWDATAFILE, Str(self.rawdatafile.clone())));
        entries
    }

    fn apply(&mut self, keyword: &str, value: HeaderValue) -> Result<(), FilterbankError> {
        use HeaderValue::*;

        let wrong_type = || FilterbankError::WrongType {
            keyword: keyword.to_string(),
        };
        match (keyword, value) {
            ("machine_id", Int(v)) => self.machine_id = v,
            ("telescope_id", Int(v)) => self.telescope_id = v,
            ("data_type", Int(v)) => self.data_type = v,
            ("barycentric", Int(v)) => self.barycentric = v,
            ("pulsarcentric", Int(v)) => self.pulsarcentric = v,
            ("nchans", Int(v)) => self.nchans = v,
            ("nbeams", Int(v)) => self.nbeams = v,
            ("ibeam", Int(v)) => self.ibeam = v,
            ("nbits", Int(v)) => self.nbits = v,
            ("nifs", Int(v)) => self.nifs = v,
            ("src_raj", Angle(v)) => self.src_raj = v,
            ("src_dej", Angle(v)) => self.src_dej = v,
            ("az_start", Double(v)) => self.az_start = v,
            ("za_start", Double(v)) => self.za_start = v,
            ("fch1", Double(v)) => self.fch1 = v,
            ("foff", Double(v)) => self.foff = v,
            ("tstart", Double(v)) => self.tstart = v,
            ("tsamp", Double(v)) => self.tsamp = v,
            ("source_name", Str(v)) => self.source_name = v,
            // With padded headers, the last one is the real one.
            ("rawdatafile", Str(v)) => self.rawdatafile = v,
            // Known keywords that aren't kept.
            ("nsamples" | "refdm" | "period", _) => (),
            _ => return Err(wrong_type()),
        }
        Ok(())
    }

    /// Encode the header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FilterbankError> {
        let mut bytes = vec![];
        write_string(&mut bytes, HEADER_START)?;
        for (keyword, value) in self.entries() {
            write_entry(&mut bytes, keyword, &value)?;
        }
        write_string(&mut bytes, HEADER_END)?;
        Ok(bytes)
    }

    /// Encode the header, inserting dummy `rawdatafile` entries before the
    /// real one until the header is at least `min_len` bytes long. A dummy
    /// entry can't be shorter than its keyword overhead, so when the shortfall
    /// is smaller than that it is grown in steps of 16 bytes; the padding is
    /// otherwise exact.
    pub fn to_padded_bytes(&self, min_len: usize) -> Result<Vec<u8>, FilterbankError> {
        let unpadded = self.to_bytes()?;
        if unpadded.len() >= min_len {
            return Ok(unpadded);
        }

        let mut shortfall = min_len - unpadded.len();
        while shortfall < RAWDATAFILE_ENTRY_OVERHEAD {
            shortfall += 16;
        }

        let mut bytes = Vec::with_capacity(unpadded.len() + shortfall);
        write_string(&mut bytes, HEADER_START)?;
        for (keyword, value) in self.entries() {
            if keyword == RAWDATAFILE {
                for pad_len in padding_lengths(shortfall) {
                    let dummy = HeaderValue::Str(" ".repeat(pad_len));
                    write_entry(&mut bytes, RAWDATAFILE, &dummy)?;
                }
            }
            write_entry(&mut bytes, keyword, &value)?;
        }
        write_string(&mut bytes, HEADER_END)?;
        Ok(bytes)
    }

    /// Decode a header from the start of `reader`. The number of bytes
    /// consumed is returned alongside the header.
    pub fn read<R: Read>(reader: &mut R) -> Result<(FilterbankHeader, usize), FilterbankError> {
        let (first, mut consumed) = read_string(reader)?;
        if first != HEADER_START {
            return Err(FilterbankError::NoHeaderStart(first));
        }

        let mut header = FilterbankHeader::default();
        loop {
            let (keyword, n) = read_string(reader)?;
            consumed += n;
            if keyword == HEADER_END {
                break;
            }
            let kind =
                keyword_kind(&keyword).ok_or_else(|| FilterbankError::UnknownKeyword(keyword.clone()))?;
            let value = match kind {
                ValueKind::Int => {
                    consumed += 4;
                    HeaderValue::Int(reader.read_i32::<LittleEndian>()?)
                }
                ValueKind::Double => {
                    consumed += 8;
                    HeaderValue::Double(reader.read_f64::<LittleEndian>()?)
                }
                ValueKind::Angle => {
                    consumed += 8;
                    HeaderValue::Angle(dms_to_ddd(reader.read_f64::<LittleEndian>()?))
                }
                ValueKind::Str => {
                    let (s, n) = read_string(reader)?;
                    consumed += n;
                    HeaderValue::Str(s)
                }
            };
            header.apply(&keyword, value)?;
        }
        trace!("Decoded a {consumed}-byte filterbank header");

        Ok((header, consumed))
    }

    /// Decode a header from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<(FilterbankHeader, usize), FilterbankError> {
        let mut cursor = bytes;
        Self::read(&mut cursor)
    }
}

/// Split `shortfall` bytes into the string lengths of dummy `rawdatafile`
/// entries. `shortfall` must be at least one entry's overhead.
fn padding_lengths(mut shortfall: usize) -> Vec<usize> {
    let max_entry = RAWDATAFILE_ENTRY_OVERHEAD + FILTERBANK_MAX_STRING;
    let mut lengths = vec![];
    while shortfall > 0 {
        let entry = if shortfall <= max_entry {
            shortfall
        } else if shortfall - max_entry >= RAWDATAFILE_ENTRY_OVERHEAD {
            max_entry
        } else {
            // Leave enough for one more minimal entry.
            shortfall - RAWDATAFILE_ENTRY_OVERHEAD
        };
        lengths.push(entry - RAWDATAFILE_ENTRY_OVERHEAD);
        shortfall -= entry;
    }
    lengths
}

fn write_string(bytes: &mut Vec<u8>, s: &str) -> Result<(), FilterbankError> {
    if s.len() > FILTERBANK_MAX_STRING {
        return Err(FilterbankError::BadStringLength(s.len() as i32));
    }
    bytes.write_i32::<LittleEndian>(s.len() as i32)?;
    bytes.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_entry(
    bytes: &mut Vec<u8>,
    keyword: &str,
    value: &HeaderValue,
) -> Result<(), FilterbankError> {
    write_string(bytes, keyword)?;
    match value {
        HeaderValue::Int(v) => bytes.write_i32::<LittleEndian>(*v)?,
        HeaderValue::Double(v) => bytes.write_f64::<LittleEndian>(*v)?,
        HeaderValue::Angle(v) => bytes.write_f64::<LittleEndian>(ddd_to_dms(*v))?,
        HeaderValue::Str(s) => write_string(bytes, truncate(s))?,
    }
    Ok(())
}

/// Strings longer than a header allows are cut short.
fn truncate(s: &str) -> &str {
    if s.len() <= FILTERBANK_MAX_STRING {
        return s;
    }
    let mut end = FILTERBANK_MAX_STRING;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_string<R: Read>(reader: &mut R) -> Result<(String, usize), FilterbankError> {
    let len = reader.read_i32::<LittleEndian>()?;
    if !(0..=FILTERBANK_MAX_STRING as i32).contains(&len) {
        return Err(FilterbankError::BadStringLength(len));
    }
    let mut buf = vec![0; len as usize];
    reader.read_exact(&mut buf)?;
    let s = String::from_utf8(buf).map_err(|_| FilterbankError::NotUtf8)?;
    Ok((s, 4 + len as usize))
}

/// Writes a header followed by spectra to a flat file.
pub struct FilterbankFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    scratch: Vec<u8>,
}

impl FilterbankFileSink {
    pub fn create(path: &Path, header: &FilterbankHeader) -> Result<Self, SpectraWriteError> {
        let file = File::create(path).map_err(|err| SpectraWriteError::Create {
            file: path.display().to_string(),
            err,
        })?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header.to_bytes()?)?;
        Ok(FilterbankFileSink {
            path: path.to_path_buf(),
            writer,
            scratch: vec![],
        })
    }
}

impl OutputSink for FilterbankFileSink {
    fn write(&mut self, data: &[f32]) -> Result<WriteCount, SpectraWriteError> {
        self.scratch.resize(data.len() * 4, 0);
        LittleEndian::write_f32_into(data, &mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        Ok(WriteCount {
            bytes: self.scratch.len(),
            packets: 0,
        })
    }

    fn finish(&mut self) -> Result<(), SpectraWriteError> {
        trace!("Closing {}", self.path.display());
        self.writer.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
