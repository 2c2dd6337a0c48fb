use std::io::{self, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codes::{Marker, MarkerStream};

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("marker receiver socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to write marker log: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of the receiver log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMarker {
    pub received_at: String,
    pub stream: &'static str,
    pub code: String,
    pub label: String,
    pub sender_timestamp_ns: u64,
}

/// Listens for marker datagrams and logs each one as a CSV row.
pub struct MarkerReceiver<W: Write> {
    socket: UdpSocket,
    log: csv::Writer<W>,
    received: usize,
    malformed: usize,
}

impl<W: Write> MarkerReceiver<W> {
    pub fn bind(addr: SocketAddr, out: W) -> Result<Self, ReceiverError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        info!(addr = %socket.local_addr()?, "marker receiver listening");
        Ok(Self {
            socket,
            log: csv::Writer::from_writer(out),
            received: 0,
            malformed: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ReceiverError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Waits for one datagram (up to the read timeout). Malformed payloads
    /// are skipped and return `None`.
    pub fn receive_one(&mut self) -> Result<Option<ReceivedMarker>, ReceiverError> {
        let mut buf = [0u8; 512];
        let n = match self.socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        let Some((stream, marker)) = Marker::decode(&text) else {
            self.malformed += 1;
            warn!(payload = %text, "ignoring malformed marker datagram");
            return Ok(None);
        };
        let row = to_row(stream, &marker);
        self.log.serialize(&row)?;
        self.log.flush()?;
        self.received += 1;
        debug!(code = %row.code, "{}", row.label);
        Ok(Some(row))
    }

    /// Receives until `stop` is raised. Returns the number of markers logged.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<usize, ReceiverError> {
        while !stop.load(Ordering::Relaxed) {
            self.receive_one()?;
        }
        info!(
            received = self.received,
            malformed = self.malformed,
            "marker receiver stopped"
        );
        Ok(self.received)
    }

    pub fn into_inner(self) -> Result<W, ReceiverError> {
        self.log
            .into_inner()
            .map_err(|e| ReceiverError::Io(e.into_error()))
    }
}

fn to_row(stream: MarkerStream, marker: &Marker) -> ReceivedMarker {
    ReceivedMarker {
        received_at: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        stream: stream.name(),
        code: marker.code.wire(),
        label: marker.code.label(),
        sender_timestamp_ns: marker.timestamp_ns,
    }
}
