use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::codes::{Marker, MarkerStream};

/// Marker delivery failure. Never fatal to a run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect marker stream {stream}: {source}")]
    Connect {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to send marker {code} on {stream}: {source}")]
    Send {
        stream: &'static str,
        code: String,
        #[source]
        source: io::Error,
    },
}

/// Low-latency, best-effort link to the recording system.
pub trait SyncTransport: Send + 'static {
    type Handle: Send;

    fn connect(&mut self, stream: MarkerStream) -> Result<Self::Handle, TransportError>;
    fn send(&mut self, handle: &mut Self::Handle, marker: &Marker) -> Result<(), TransportError>;
}

/// Sends each marker as one datagram to a fixed address.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    target: SocketAddr,
}

#[derive(Debug)]
pub struct UdpHandle {
    socket: UdpSocket,
    stream: MarkerStream,
}

impl UdpTransport {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl SyncTransport for UdpTransport {
    type Handle = UdpHandle;

    fn connect(&mut self, stream: MarkerStream) -> Result<UdpHandle, TransportError> {
        let bind: SocketAddr = if self.target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let connect_err = |source| TransportError::Connect {
            stream: stream.name(),
            source,
        };
        let socket = UdpSocket::bind(bind).map_err(connect_err)?;
        socket.connect(self.target).map_err(connect_err)?;
        Ok(UdpHandle { socket, stream })
    }

    fn send(&mut self, handle: &mut UdpHandle, marker: &Marker) -> Result<(), TransportError> {
        handle
            .socket
            .send(marker.encode().as_bytes())
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                stream: handle.stream.name(),
                code: marker.code.wire(),
                source,
            })
    }
}

/// Accepts everything, delivers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl SyncTransport for NullTransport {
    type Handle = ();

    fn connect(&mut self, _stream: MarkerStream) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&mut self, _handle: &mut (), _marker: &Marker) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Keeps delivered markers in memory. Failures can be switched on to
/// exercise the degraded paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    delivered: Arc<Mutex<Vec<(MarkerStream, Marker)>>>,
    refuse_connect: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        let t = Self::default();
        t.refuse_connect.store(true, Ordering::SeqCst);
        t
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.refuse_connect.store(!reachable, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(MarkerStream, Marker)> {
        self.delivered
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn delivered_on(&self, stream: MarkerStream) -> Vec<Marker> {
        self.delivered()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, m)| m)
            .collect()
    }
}

impl SyncTransport for MemoryTransport {
    type Handle = MarkerStream;

    fn connect(&mut self, stream: MarkerStream) -> Result<MarkerStream, TransportError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                stream: stream.name(),
                source: io::Error::new(io::ErrorKind::NotConnected, "no marker stream"),
            });
        }
        Ok(stream)
    }

    fn send(&mut self, handle: &mut MarkerStream, marker: &Marker) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send {
                stream: handle.name(),
                code: marker.code.wire(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "stream went away"),
            });
        }
        if let Ok(mut v) = self.delivered.lock() {
            v.push((*handle, *marker));
        }
        Ok(())
    }
}
