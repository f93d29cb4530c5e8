//! # Wire Message Framing
//!
//! Every frame exchanged by the handshake is a fixed-layout, byte-packed
//! record: a two-byte start-of-header magic (little-endian `0x65A2`), one
//! message id byte, and a body whose length is fixed by the id. There is no
//! length field; the id alone determines how many bytes a receiver must
//! accumulate before decoding.
//!
//! ## Frame layouts
//!
//! | id | body | total |
//! |---|---|---|
//! | `0x01` client challenge | 32-byte nonce | 35 |
//! | `0x02` server challenge response | 32-byte digest, 32-byte nonce | 67 |
//! | `0x03` client challenge response | 32-byte digest | 35 |
//! | `0x04` result | 1 byte (`0x00` success) | 4 |
//!
//! Datagram transports deliver one complete frame per packet and use
//! [`frame_span`] to validate it before handing the bytes to [`assemble`].
//! Stream transports may split frames; the receive queue's blocking pop lets
//! the protocol worker coalesce partial reads by expected size.

use bytes::{BufMut, Bytes, BytesMut};

use crate::crypto::{CHALLENGE_LEN, RESPONSE_LEN};
use crate::transport::TransportHandle;

/// Start-of-header magic prefixing every frame, `0xA2 0x65` on the wire.
pub const SOH: u16 = 0x65A2;

/// Byte length of the frame header (magic plus message id).
pub const HEADER_LEN: usize = 3;

/// Message ids carried in the third header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgId {
    /// Client opens the handshake with its random challenge.
    ClientChallenge = 0x01,

    /// Server answers with the digest of the client challenge and its own
    /// random challenge.
    ServerChallengeResponse = 0x02,

    /// Client answers the server challenge with the matching digest.
    ClientChallengeResponse = 0x03,

    /// Final verdict, sent by the server on completion or by the client when
    /// it rejects the server's response.
    Result = 0x04,
}

impl MsgId {
    /// Map a raw id byte to a message id.
    pub const fn from_byte(b: u8) -> Option<MsgId> {
        match b {
            0x01 => Some(MsgId::ClientChallenge),
            0x02 => Some(MsgId::ServerChallengeResponse),
            0x03 => Some(MsgId::ClientChallengeResponse),
            0x04 => Some(MsgId::Result),
            _ => None,
        }
    }

    /// Fixed body length for this id.
    pub const fn body_len(self) -> usize {
        match self {
            MsgId::ClientChallenge => CHALLENGE_LEN,
            MsgId::ServerChallengeResponse => RESPONSE_LEN + CHALLENGE_LEN,
            MsgId::ClientChallengeResponse => RESPONSE_LEN,
            MsgId::Result => 1,
        }
    }

    /// Fixed total frame length for this id, header included.
    pub const fn frame_len(self) -> usize {
        HEADER_LEN + self.body_len()
    }
}

fn put_header(buf: &mut BytesMut, id: MsgId) {
    buf.put_u16_le(SOH);
    buf.put_u8(id as u8);
}

/// Encode message 1: the client's random challenge.
pub fn encode_client_challenge(nonce: &[u8; CHALLENGE_LEN]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MsgId::ClientChallenge.frame_len());
    put_header(&mut buf, MsgId::ClientChallenge);
    buf.put_slice(nonce);
    buf.freeze()
}

/// Encode message 2: the digest of the client challenge followed by the
/// server's own challenge.
pub fn encode_server_response(
    digest: &[u8; RESPONSE_LEN],
    challenge: &[u8; CHALLENGE_LEN],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(MsgId::ServerChallengeResponse.frame_len());
    put_header(&mut buf, MsgId::ServerChallengeResponse);
    buf.put_slice(digest);
    buf.put_slice(challenge);
    buf.freeze()
}

/// Encode message 3: the digest of the server challenge.
pub fn encode_client_response(digest: &[u8; RESPONSE_LEN]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MsgId::ClientChallengeResponse.frame_len());
    put_header(&mut buf, MsgId::ClientChallengeResponse);
    buf.put_slice(digest);
    buf.freeze()
}

/// Encode message 4: the one-byte verdict, `0x00` for success.
pub fn encode_result(result: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(MsgId::Result.frame_len());
    put_header(&mut buf, MsgId::Result);
    buf.put_u8(result);
    buf.freeze()
}

/// Validate the header at the start of `buf` and return its message id.
///
/// Returns `None` when the buffer is shorter than a header, the magic does
/// not match, or the id byte is unknown. Callers decide whether the id is
/// the one their protocol state expects.
pub fn parse_header(buf: &[u8]) -> Option<MsgId> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let soh = u16::from_le_bytes([buf[0], buf[1]]);
    if soh != SOH {
        return None;
    }
    MsgId::from_byte(buf[2])
}

/// Decoded body of message 2.
pub struct ServerChallengeResponse {
    /// Digest the server computed over the client challenge.
    pub digest: [u8; RESPONSE_LEN],

    /// The server's own challenge, to be hashed by the client.
    pub challenge: [u8; CHALLENGE_LEN],
}

/// Decode message 1 into the client's challenge nonce.
pub fn decode_client_challenge(frame: &[u8]) -> Option<[u8; CHALLENGE_LEN]> {
    if parse_header(frame)? != MsgId::ClientChallenge
        || frame.len() != MsgId::ClientChallenge.frame_len()
    {
        return None;
    }
    let mut nonce = [0u8; CHALLENGE_LEN];
    nonce.copy_from_slice(&frame[HEADER_LEN..]);
    Some(nonce)
}

/// Decode message 2 into its digest and challenge halves.
pub fn decode_server_response(frame: &[u8]) -> Option<ServerChallengeResponse> {
    if parse_header(frame)? != MsgId::ServerChallengeResponse
        || frame.len() != MsgId::ServerChallengeResponse.frame_len()
    {
        return None;
    }
    let mut digest = [0u8; RESPONSE_LEN];
    let mut challenge = [0u8; CHALLENGE_LEN];
    digest.copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + RESPONSE_LEN]);
    challenge.copy_from_slice(&frame[HEADER_LEN + RESPONSE_LEN..]);
    Some(ServerChallengeResponse { digest, challenge })
}

/// Decode message 4 into its verdict byte.
pub fn decode_result(frame: &[u8]) -> Option<u8> {
    if parse_header(frame)? != MsgId::Result || frame.len() != MsgId::Result.frame_len() {
        return None;
    }
    Some(frame[HEADER_LEN])
}

/// Locate a complete frame inside an inbound buffer.
///
/// Scans for the start-of-header magic, validates the id byte, and checks
/// that the full fixed-length body is present. Returns the offset of the
/// frame and its total length, or `None` when no complete frame exists.
pub fn frame_span(buf: &[u8]) -> Option<(usize, usize)> {
    let soh = SOH.to_le_bytes();
    for start in 0..buf.len().saturating_sub(HEADER_LEN - 1) {
        if buf[start] != soh[0] || buf[start + 1] != soh[1] {
            continue;
        }
        let Some(id) = MsgId::from_byte(buf[start + 2]) else {
            continue;
        };
        if buf.len() - start >= id.frame_len() {
            return Some((start, id.frame_len()));
        }
    }
    None
}

/// Push validated inbound bytes into the handle's receive queue.
///
/// Lower transports call this from their receive worker once framing has
/// been checked; the protocol worker pops the bytes through the handle's
/// blocking receive. Returns the number of bytes accepted by the queue.
pub fn assemble(hdl: &TransportHandle, buf: &[u8]) -> usize {
    hdl.put_recv(buf)
}
