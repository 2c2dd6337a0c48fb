pub mod bus;
pub mod codes;
pub mod receiver;
pub mod transport;

pub use bus::{BusOptions, BusStats, MarkerBus};
pub use codes::{Marker, MarkerCode, MarkerStream};
pub use receiver::{MarkerReceiver, ReceivedMarker, ReceiverError};
pub use transport::{MemoryTransport, NullTransport, SyncTransport, TransportError, UdpTransport};
