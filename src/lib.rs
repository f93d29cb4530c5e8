//! # Peer Link Authentication Library
//!
//! Mutual challenge-response authentication for a peer-to-peer link,
//! layered over a pluggable, packet-oriented transport abstraction. Before
//! application data flows, a client and a server prove to each other that
//! they hold the same 32-byte pre-shared key by exchanging fresh random
//! challenges and SHA-256 digests over them.
//!
//! The transport underneath the handshake is abstracted away: the protocol
//! state machine only sees a [`transport::TransportHandle`], and any medium
//! that can move framed bytes (datagram socket, serial link, wireless L2)
//! can sit below it. A UDP loopback transport ships as the reference
//! implementation.

pub mod cli;
pub mod crypto;
pub mod error;
pub mod message;
mod protocol;
pub mod session;
pub mod transport;

pub use crypto::SharedKey;
pub use error::AuthError;
pub use session::{
    AuthOptParams, AuthSession, AuthStatus, InstanceId, SessionFlags, StatusCallback,
    NUM_AUTH_INSTANCES,
};
pub use transport::{
    DirectSender, LowerTransport, TransportEvent, TransportHandle, TransportParams, TransportType,
    UdpParams,
};

/// The current version of the authentication library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values for the reference program
pub mod defaults {
    use std::net::Ipv4Addr;

    /// UDP port the server listens on
    pub const SERVER_RECV_PORT: u16 = 12300;

    /// UDP port the client listens on
    pub const CLIENT_RECV_PORT: u16 = 12400;

    /// Loopback address both endpoints bind to
    pub const LOOPBACK_ADDR: Ipv4Addr = Ipv4Addr::LOCALHOST;
}
