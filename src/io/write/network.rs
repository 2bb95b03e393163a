// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sending spectra as UDP packets.
//!
//! Every packet is a (padded) filterbank header describing the packet's
//! channel range and start time, followed by one or more spectra restricted
//! to that channel range. Wide spectra are split over several packets by
//! channel; narrow spectra are grouped several to a packet.

use std::{
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use super::{FilterbankHeader, OutputSink, SpectraWriteError, WriteCount};
use crate::constants::{MAX_PACKET_DATA_SIZE, PACING_THRESHOLD_NS, SECONDS_PER_DAY};

/// Keeps a sender at or below a target data rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    rate_gbps: f64,
}

impl Pacer {
    pub fn new(rate_gbps: f64) -> Pacer {
        Pacer { rate_gbps }
    }

    pub fn rate_gbps(&self) -> f64 {
        self.rate_gbps
    }

    /// How long to sleep after `bytes_sent` bytes went out `elapsed` after
    /// the start of a dump. Short sleeps are not worth doing and aren't
    /// requested.
    pub fn delay(&self, bytes_sent: usize, elapsed: Duration) -> Option<Duration> {
        // Bits divided by Gbit/s gives nanoseconds.
        let due_ns = bytes_sent as f64 * 8.0 / self.rate_gbps;
        let sleep_ns = due_ns - elapsed.as_nanos() as f64;
        if sleep_ns > PACING_THRESHOLD_NS as f64 {
            Some(Duration::from_nanos(sleep_ns as u64))
        } else {
            None
        }
    }
}

/// The number of channels and spectra carried by each packet.
pub(crate) fn packet_plan(nchans: usize, nifs: usize, num_spectra: usize) -> (usize, usize) {
    let floats_per_packet = MAX_PACKET_DATA_SIZE / 4;
    let chans = (floats_per_packet / nifs.max(1)).clamp(1, nchans.max(1));
    let spectra = (floats_per_packet / (chans * nifs.max(1))).clamp(1, num_spectra.max(1));
    (chans, spectra)
}

/// The shortest padded header length that puts spectra on a 16-byte
/// boundary.
pub(crate) fn padded_header_len(unpadded: usize) -> usize {
    (unpadded + 19 + 15) / 16 * 16
}

pub struct NetworkSink {
    socket: UdpSocket,
    addr: SocketAddr,
    header: FilterbankHeader,
    min_header_len: usize,
    pacer: Option<Pacer>,
    spectra_sent: u64,
    packet: Vec<u8>,
}

impl NetworkSink {
    /// Set up a socket that sends to `host:port`. Packets are paced to
    /// `rate_gbps` if it's given.
    pub fn connect(
        host: &str,
        port: u16,
        header: FilterbankHeader,
        rate_gbps: Option<f64>,
    ) -> Result<NetworkSink, SpectraWriteError> {
        let dest = format!("{host}:{port}");
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| SpectraWriteError::Socket {
                dest: dest.clone(),
                err,
            })?
            .next()
            .ok_or_else(|| SpectraWriteError::BadDestination(dest.clone()))?;
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(|err| SpectraWriteError::Socket {
            dest: dest.clone(),
            err,
        })?;
        let min_header_len = padded_header_len(header.to_bytes()?.len());
        debug!("Sending spectra to {addr} (headers padded to {min_header_len} bytes)");

        Ok(NetworkSink {
            socket,
            addr,
            header,
            min_header_len,
            pacer: rate_gbps.map(Pacer::new),
            spectra_sent: 0,
            packet: vec![],
        })
    }
}

impl OutputSink for NetworkSink {
    fn write(&mut self, data: &[f32]) -> Result<WriteCount, SpectraWriteError> {
        let nchans = self.header.nchans.max(0) as usize;
        let nifs = self.header.nifs.max(0) as usize;
        let spectrum_len = nchans * nifs;
        if spectrum_len == 0 || data.len() % spectrum_len != 0 {
            return Err(SpectraWriteError::PartialSpectrum {
                len: data.len(),
                spectrum_len,
            });
        }
        let num_spectra = data.len() / spectrum_len;
        let (chans_per_packet, spectra_per_packet) = packet_plan(nchans, nifs, num_spectra);

        let start = Instant::now();
        let mut count = WriteCount::default();
        for s0 in (0..num_spectra).step_by(spectra_per_packet) {
            let ns = spectra_per_packet.min(num_spectra - s0);
            for c0 in (0..nchans).step_by(chans_per_packet) {
                let nc = chans_per_packet.min(nchans - c0);

                let mut header = self.header.clone();
                header.fch1 = self.header.fch1 + c0 as f64 * self.header.foff;
                header.nchans = nc as i32;
                header.tstart = self.header.tstart
                    + (self.spectra_sent + s0 as u64) as f64 * self.header.tsamp / SECONDS_PER_DAY;
                self.packet = header.to_padded_bytes(self.min_header_len)?;

                let payload_start = self.packet.len();
                self.packet.resize(payload_start + ns * nifs * nc * 4, 0);
                let mut offset = payload_start;
                for s in s0..s0 + ns {
                    for p in 0..nifs {
                        let first = (s * nifs + p) * nchans + c0;
                        LittleEndian::write_f32_into(
                            &data[first..first + nc],
                            &mut self.packet[offset..offset + nc * 4],
                        );
                        offset += nc * 4;
                    }
                }

                self.socket
                    .send_to(&self.packet, self.addr)
                    .map_err(|err| SpectraWriteError::Send {
                        dest: self.addr.to_string(),
                        err,
                    })?;
                count.bytes += self.packet.len();
                count.packets += 1;

                if let Some(delay) = self
                    .pacer
                    .and_then(|p| p.delay(count.bytes, start.elapsed()))
                {
                    std::thread::sleep(delay);
                }
            }
        }
        self.spectra_sent += num_spectra as u64;
        trace!(
            "Sent {} spectra in {} packets to {}",
            num_spectra,
            count.packets,
            self.addr
        );

        Ok(count)
    }

    fn finish(&mut self) -> Result<(), SpectraWriteError> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.addr)
    }
}
