//! # Command-Line Interface Module
//!
//! Argument parsing for the reference authentication program. The binary
//! runs one side of the handshake per invocation: exactly one of `-s`
//! (server) or `-c` (client) is required, and the UDP loopback wiring is
//! derived from the chosen role unless overridden.
//!
//! ## Usage Examples
//!
//! ```bash
//! # In one terminal, wait for a client
//! peer-auth -s
//!
//! # In another, authenticate against it
//! peer-auth -c
//!
//! # Both sides with an explicit pre-shared key
//! peer-auth -s --shared-key 0011..eeff
//! peer-auth -c --shared-key 0011..eeff
//! ```

use std::net::Ipv4Addr;

use clap::{
    builder::styling::{AnsiColor, Styles},
    ArgGroup, Parser,
};

use crate::crypto::SharedKey;
use crate::defaults;
use crate::error::AuthError;
use crate::session::{AuthOptParams, SessionFlags};
use crate::transport::UdpParams;

/// Help styling for the reference program: cyan section headers to set
/// the Role/Transport/Logging groups apart, green flag literals, and blue
/// placeholders so values read differently from the flags themselves.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default())
        .usage(AnsiColor::Cyan.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Blue.on_default())
}

/// Authenticate one end of a peer-to-peer link over UDP loopback.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
#[command(group(ArgGroup::new("role").required(true).args(["server", "client"])))]
pub struct Args {
    /// Run as the authentication server (waits for the client challenge)
    #[arg(short = 's', long, help_heading = "Role")]
    pub server: bool,

    /// Run as the authentication client (initiates the handshake)
    #[arg(short = 'c', long, help_heading = "Role")]
    pub client: bool,

    /// Pre-shared key as 64 hex characters
    ///
    /// Overrides the built-in default key for this session. Both sides
    /// must be given the same key for the handshake to succeed.
    #[arg(short = 'k', long, help_heading = "Authentication")]
    pub shared_key: Option<String>,

    /// Local UDP port to receive on
    ///
    /// Defaults to the role's well-known port: 12300 for the server,
    /// 12400 for the client.
    #[arg(long, help_heading = "Transport")]
    pub recv_port: Option<u16>,

    /// Peer UDP port to send to
    ///
    /// Defaults to the opposite role's well-known port.
    #[arg(long, help_heading = "Transport")]
    pub send_port: Option<u16>,

    /// Local IPv4 address to receive on
    #[arg(long, default_value_t = defaults::LOOPBACK_ADDR, help_heading = "Transport")]
    pub recv_addr: Ipv4Addr,

    /// Peer IPv4 address to send to
    #[arg(long, default_value_t = defaults::LOOPBACK_ADDR, help_heading = "Transport")]
    pub send_addr: Ipv4Addr,

    /// Silence user-facing output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity.
    ///
    /// Can be used multiple times: -v for debug, -vv for trace.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Detailed log destination: a file path, or "stderr"
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,
}

impl Args {
    /// Session flags for the selected role and method.
    pub fn session_flags(&self) -> SessionFlags {
        let role = if self.server {
            SessionFlags::SERVER
        } else {
            SessionFlags::CLIENT
        };
        role | SessionFlags::METHOD_CHALLENGE_RESPONSE
    }

    /// Optional session parameters from the key override, if given.
    pub fn opt_params(&self) -> Result<Option<AuthOptParams>, AuthError> {
        self.shared_key
            .as_deref()
            .map(|value| -> Result<AuthOptParams, AuthError> {
                Ok(AuthOptParams::ChallengeResponse {
                    shared_key: SharedKey::from_hex(value)?,
                })
            })
            .transpose()
    }

    /// UDP transport wiring for the selected role.
    ///
    /// The server receives on its well-known port and sends to the
    /// client's, the client the other way around, unless either port is
    /// overridden explicitly.
    pub fn udp_params(&self) -> UdpParams {
        let (default_recv, default_send) = if self.server {
            (defaults::SERVER_RECV_PORT, defaults::CLIENT_RECV_PORT)
        } else {
            (defaults::CLIENT_RECV_PORT, defaults::SERVER_RECV_PORT)
        };
        UdpParams {
            recv_addr: self.recv_addr,
            recv_port: self.recv_port.unwrap_or(default_recv),
            send_addr: self.send_addr,
            send_port: self.send_port.unwrap_or(default_send),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The role ports cross-wire: each side sends to the other's
    /// receive port.
    #[test]
    fn test_udp_params_cross_wired() {
        let server = Args::parse_from(["peer-auth", "-s"]);
        let params = server.udp_params();
        assert_eq!(params.recv_port, defaults::SERVER_RECV_PORT);
        assert_eq!(params.send_port, defaults::CLIENT_RECV_PORT);

        let client = Args::parse_from(["peer-auth", "-c"]);
        let params = client.udp_params();
        assert_eq!(params.recv_port, defaults::CLIENT_RECV_PORT);
        assert_eq!(params.send_port, defaults::SERVER_RECV_PORT);
    }

    /// Exactly one role flag is accepted.
    #[test]
    fn test_role_flags_exclusive() {
        assert!(Args::try_parse_from(["peer-auth"]).is_err());
        assert!(Args::try_parse_from(["peer-auth", "-s", "-c"]).is_err());
        assert!(Args::try_parse_from(["peer-auth", "-s"]).is_ok());
    }

    /// Port overrides take precedence over the role defaults.
    #[test]
    fn test_port_overrides() {
        let args = Args::parse_from(["peer-auth", "-c", "--recv-port", "9000", "--send-port", "9001"]);
        let params = args.udp_params();
        assert_eq!(params.recv_port, 9000);
        assert_eq!(params.send_port, 9001);
    }

    /// A malformed key override is rejected before the session starts.
    #[test]
    fn test_bad_shared_key_rejected() {
        let args = Args::parse_from(["peer-auth", "-c", "--shared-key", "beef"]);
        assert!(args.opt_params().is_err());

        let args = Args::parse_from(["peer-auth", "-c"]);
        assert!(args.opt_params().unwrap().is_none());
    }

    /// Session flags carry the role plus the challenge-response method.
    #[test]
    fn test_session_flags() {
        let args = Args::parse_from(["peer-auth", "-s"]);
        let flags = args.session_flags();
        assert!(flags.contains(SessionFlags::SERVER));
        assert!(flags.contains(SessionFlags::METHOD_CHALLENGE_RESPONSE));
        assert!(!flags.contains(SessionFlags::CLIENT));
    }
}
