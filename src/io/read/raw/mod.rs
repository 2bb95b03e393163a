// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read GUPPI RAW files.
//!
//! A RAW file is a sequence of (header, block) pairs. Each header is a run of
//! 80-byte ASCII "cards" (`KEYWORD = value`) terminated by an `END` card. If
//! `DIRECTIO` is non-zero, the block that follows the header starts on a
//! 512-byte boundary. An observation is usually split over several files that
//! share a stem, e.g. `obs.0000.raw`, `obs.0001.raw`, ...; these are read as a
//! single stream of blocks by [`RawFileGroup`].

mod error;
#[cfg(test)]
mod tests;

pub use error::RawReadError;

use std::{
    fs::File,
    io::{BufReader, Read},
    ops::Range,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use vec1::Vec1;

use crate::constants::{DIRECTIO_ALIGNMENT, MAX_RAW_HDR_SIZE, RAW_CARD_SIZE, SECONDS_PER_DAY};

/// The parsed contents of a single RAW block header.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHeader {
    /// The size of the data block following this header [bytes].
    pub blocsize: usize,

    /// The number of polarisations in the data. A value of 4 in the file
    /// (i.e. "full Stokes" from some backends) is taken to mean 2 complex
    /// polarisations.
    pub npol: usize,

    /// The number of coarse channels in the block (over all antennas).
    pub obsnchan: usize,

    /// The number of bits per real or imaginary component.
    pub nbits: usize,

    /// Centre frequency of the band [MHz].
    pub obsfreq: f64,

    /// Bandwidth of the band [MHz]. May be negative for inverted bands.
    pub obsbw: f64,

    /// The sample time [seconds].
    pub tbin: f64,

    /// Is the block aligned for direct I/O?
    pub directio: bool,

    /// The packet index of the first sample of this block.
    pub pktidx: i64,

    pub beam_id: i32,
    pub nbeam: i32,

    /// The number of antennas whose channels are stacked in the block.
    pub nants: usize,

    /// Right ascension [hours].
    pub ra_hours: f64,

    /// Declination [degrees].
    pub dec_degrees: f64,

    /// The observation start time as an MJD.
    pub mjd: f64,

    pub src_name: String,
    pub telescop: String,

    /// The number of bytes occupied by the header, including any direct I/O
    /// padding.
    pub header_size: usize,
}

impl RawHeader {
    /// Parse a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<RawHeader, RawReadError> {
        let mut cursor = bytes;
        read_header(&mut cursor, "<memory>")?.ok_or_else(|| RawReadError::TruncatedHeader {
            file: "<memory>".to_string(),
        })
    }

    /// The number of time samples per channel held in one block.
    pub fn samples_per_block(&self) -> usize {
        let bytes_per_sample = 2 * self.npol * self.nbits / 8;
        if self.obsnchan == 0 || bytes_per_sample == 0 {
            return 0;
        }
        self.blocsize / (self.obsnchan * bytes_per_sample)
    }

    /// Check that the block size agrees with the channel, polarisation and
    /// sample geometry of the header.
    pub fn check_geometry(&self, file: &str) -> Result<(), RawReadError> {
        let expected = 2 * self.npol * self.obsnchan * self.samples_per_block() * self.nbits / 8;
        if expected == 0 || expected != self.blocsize {
            return Err(RawReadError::BlockSizeMismatch {
                file: file.to_string(),
                blocsize: self.blocsize,
                expected,
            });
        }
        Ok(())
    }

    /// The number of bytes one coarse channel occupies within a block.
    pub fn bytes_per_channel(&self) -> usize {
        if self.obsnchan == 0 {
            0
        } else {
            self.blocsize / self.obsnchan
        }
    }
}

/// Parse a sexagesimal string ("[-]HH:MM:SS.s" or "[-]DD:MM:SS.s") into
/// decimal units. Missing minute or second fields are taken as zero.
pub fn parse_sexagesimal(s: &str) -> Option<f64> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let mut parts = s.split(':');
    let whole: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = match parts.next() {
        Some(m) => m.trim().parse().ok()?,
        None => 0.0,
    };
    let seconds: f64 = match parts.next() {
        Some(sec) => sec.trim().parse().ok()?,
        None => 0.0,
    };
    if parts.next().is_some() {
        return None;
    }
    let value = whole + minutes / 60.0 + seconds / 3600.0;
    Some(if negative { -value } else { value })
}

/// A single `KEYWORD = value` record.
fn parse_card(card: &[u8]) -> Option<(String, String)> {
    let card = std::str::from_utf8(card).ok()?;
    let (key, value) = card.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = match value.strip_prefix('\'') {
        Some(quoted) => match quoted.find('\'') {
            Some(end) => quoted[..end].trim(),
            None => quoted.trim(),
        },
        None => value,
    };
    Some((key.to_string(), value.to_string()))
}

fn is_end_card(card: &[u8]) -> bool {
    card.starts_with(b"END") && card[3..].iter().all(|&b| b == b' ' || b == 0)
}

/// Read until `buf` is full or EOF is hit, returning the number of bytes
/// read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct Cards<'a> {
    file: &'a str,
    pairs: Vec<(String, String)>,
}

impl Cards<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn bad_value(&self, key: &'static str, value: &str) -> RawReadError {
        RawReadError::BadValue {
            file: self.file.to_string(),
            key,
            value: value.to_string(),
        }
    }

    fn int(&self, key: &'static str) -> Result<Option<i64>, RawReadError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.parse::<i64>() {
                Ok(i) => Ok(Some(i)),
                Err(_) => match v.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
                    _ => Err(self.bad_value(key, v)),
                },
            },
        }
    }

    fn float(&self, key: &'static str) -> Result<Option<f64>, RawReadError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.bad_value(key, v)),
        }
    }

    fn required_int(&self, key: &'static str) -> Result<i64, RawReadError> {
        self.int(key)?.ok_or_else(|| RawReadError::MissingKey {
            file: self.file.to_string(),
            key,
        })
    }

    /// A strictly positive count.
    fn required_count(&self, key: &'static str) -> Result<usize, RawReadError> {
        let v = self.required_int(key)?;
        if v <= 0 {
            return Err(self.bad_value(key, &v.to_string()));
        }
        Ok(v as usize)
    }

    fn required_nonzero_float(&self, key: &'static str) -> Result<f64, RawReadError> {
        let v = self.float(key)?.ok_or_else(|| RawReadError::MissingKey {
            file: self.file.to_string(),
            key,
        })?;
        if v == 0.0 {
            return Err(self.bad_value(key, &v.to_string()));
        }
        Ok(v)
    }

    fn sexagesimal(&self, key: &'static str) -> Result<Option<f64>, RawReadError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => parse_sexagesimal(v)
                .map(Some)
                .ok_or_else(|| self.bad_value(key, v)),
        }
    }

    fn into_header(self, header_size: usize, directio: bool) -> Result<RawHeader, RawReadError> {
        let blocsize = self.required_count("BLOCSIZE")?;
        let npol = match self.required_count("NPOL")? {
            4 => 2,
            n => n,
        };
        let obsnchan = self.required_count("OBSNCHAN")?;
        let nbits = match self.int("NBITS")?.unwrap_or(8) {
            n @ (4 | 8 | 16) => n as usize,
            n => {
                return Err(RawReadError::UnsupportedNbits {
                    file: self.file.to_string(),
                    nbits: n.max(0) as usize,
                })
            }
        };
        let obsfreq = self.required_nonzero_float("OBSFREQ")?;
        let obsbw = self.required_nonzero_float("OBSBW")?;
        let tbin = self.required_nonzero_float("TBIN")?;
        let pktidx = self.required_int("PKTIDX")?;
        if pktidx == -1 {
            return Err(self.bad_value("PKTIDX", "-1"));
        }

        let ra_hours = match self.sexagesimal("RA_STR")? {
            Some(ra) => ra,
            None => self.float("RA")?.unwrap_or(0.0) / 15.0,
        };
        let dec_degrees = match self.sexagesimal("DEC_STR")? {
            Some(dec) => dec,
            None => self.float("DEC")?.unwrap_or(0.0),
        };
        let imjd = self.int("STT_IMJD")?.unwrap_or(0) as f64;
        let smjd = self.int("STT_SMJD")?.unwrap_or(0) as f64;
        let offs = self.float("STT_OFFS")?.unwrap_or(0.0);
        let mjd = imjd + (smjd + offs) / SECONDS_PER_DAY;

        Ok(RawHeader {
            blocsize,
            npol,
            obsnchan,
            nbits,
            obsfreq,
            obsbw,
            tbin,
            directio,
            pktidx,
            beam_id: self.int("BEAM_ID")?.unwrap_or(-1) as i32,
            nbeam: self.int("NBEAM")?.unwrap_or(-1) as i32,
            nants: self.int("NANTS")?.filter(|&n| n > 0).unwrap_or(1) as usize,
            ra_hours,
            dec_degrees,
            mjd,
            src_name: self.get("SRC_NAME").unwrap_or("Unknown").to_string(),
            telescop: self.get("TELESCOP").unwrap_or("Unknown").to_string(),
            header_size,
        })
    }
}

/// Read a header from `reader`, leaving the reader at the start of the
/// block. `Ok(None)` is returned if the reader is already at EOF.
fn read_header<R: Read>(reader: &mut R, file: &str) -> Result<Option<RawHeader>, RawReadError> {
    let mut card = [0; RAW_CARD_SIZE];
    let mut pairs = vec![];
    let mut size = 0;
    loop {
        if size >= MAX_RAW_HDR_SIZE {
            return Err(RawReadError::NoEndRecord {
                file: file.to_string(),
                max: MAX_RAW_HDR_SIZE,
            });
        }
        match read_fully(reader, &mut card)? {
            0 if size == 0 => return Ok(None),
            RAW_CARD_SIZE => (),
            _ => {
                return Err(RawReadError::TruncatedHeader {
                    file: file.to_string(),
                })
            }
        }
        size += RAW_CARD_SIZE;
        if is_end_card(&card) {
            break;
        }
        if let Some(pair) = parse_card(&card) {
            pairs.push(pair);
        }
    }

    let cards = Cards { file, pairs };
    let directio = cards.int("DIRECTIO")?.unwrap_or(0) != 0;
    if directio {
        let padding = (DIRECTIO_ALIGNMENT - size % DIRECTIO_ALIGNMENT) % DIRECTIO_ALIGNMENT;
        let skipped = std::io::copy(&mut reader.by_ref().take(padding as u64), &mut std::io::sink())?;
        if skipped as usize != padding {
            return Err(RawReadError::TruncatedHeader {
                file: file.to_string(),
            });
        }
        size += padding;
    }
    trace!("Read a {size}-byte RAW header from {file}");

    cards.into_header(size, directio).map(Some)
}

/// Strip a `.NNNN.raw` suffix from a path, if present.
pub(crate) fn stem_from_path(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(without_raw) = s.strip_suffix(".raw") {
        if let Some((stem, seq)) = without_raw.rsplit_once('.') {
            if seq.len() == 4 && seq.bytes().all(|b| b.is_ascii_digit()) {
                return PathBuf::from(stem);
            }
        }
    }
    path.to_path_buf()
}

/// The path of the `seq`th file belonging to `stem`.
pub(crate) fn raw_file_path(stem: &Path, seq: usize) -> PathBuf {
    PathBuf::from(format!("{}.{seq:04}.raw", stem.display()))
}

/// All of the RAW files that share a stem, read as one stream of blocks.
pub struct RawFileGroup {
    stem: PathBuf,
    files: Vec1<PathBuf>,
    file_index: usize,
    reader: BufReader<File>,
}

impl RawFileGroup {
    /// Find all of the files belonging to `stem` (either a bare stem or the
    /// path of one of its files) and open the first one.
    pub fn open(stem: &Path) -> Result<RawFileGroup, RawReadError> {
        let stem = stem_from_path(stem);
        let files: Vec<PathBuf> = (0..)
            .map(|seq| raw_file_path(&stem, seq))
            .take_while(|p| p.is_file())
            .collect();
        let files = Vec1::try_from_vec(files).map_err(|_| RawReadError::NoFiles(stem.clone()))?;
        debug!("Found {} RAW file(s) for stem {}", files.len(), stem.display());
        let reader = BufReader::new(File::open(files.first())?);

        Ok(RawFileGroup {
            stem,
            files,
            file_index: 0,
            reader,
        })
    }

    pub fn stem(&self) -> &Path {
        &self.stem
    }

    pub fn files(&self) -> &[PathBuf] {
        self.files.as_slice()
    }

    /// The file currently being read.
    pub fn current_file(&self) -> &Path {
        &self.files[self.file_index]
    }

    /// Read the next header, moving on to the group's next file when the
    /// current one is exhausted. `Ok(None)` means the group has no more
    /// blocks.
    pub fn next_header(&mut self) -> Result<Option<RawHeader>, RawReadError> {
        loop {
            let file = self.current_file().display().to_string();
            if let Some(header) = read_header(&mut self.reader, &file)? {
                return Ok(Some(header));
            }
            if self.file_index + 1 == self.files.len() {
                return Ok(None);
            }
            self.file_index += 1;
            debug!("Opening {}", self.current_file().display());
            self.reader = BufReader::new(File::open(self.current_file())?);
        }
    }

    /// Read the bytes `range` of the block following `header` into `dst`,
    /// leaving the reader positioned at the next header.
    pub fn read_block(
        &mut self,
        header: &RawHeader,
        range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<(), RawReadError> {
        if range.end > header.blocsize || range.start > range.end || range.len() != dst.len() {
            return Err(RawReadError::BadBlockRange {
                start: range.start,
                end: range.end,
                blocsize: header.blocsize,
            });
        }

        self.reader.seek_relative(range.start as i64)?;
        let got = read_fully(&mut self.reader, dst)?;
        if got != dst.len() {
            return Err(RawReadError::ShortBlock {
                file: self.current_file().display().to_string(),
                expected: header.blocsize,
                got: range.start + got,
            });
        }
        self.reader
            .seek_relative((header.blocsize - range.end) as i64)?;
        Ok(())
    }

    /// Move past the block following `header` without reading it.
    pub fn skip_block(&mut self, header: &RawHeader) -> Result<(), RawReadError> {
        self.reader.seek_relative(header.blocsize as i64)?;
        Ok(())
    }
}
