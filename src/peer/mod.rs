pub mod connection;
pub mod ice;
pub mod transport;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use transport::{ConnectivityReporter, PeerTransport, TransportFactory};
pub use types::{ConnectivityState, SdpKind, SessionDescription};
