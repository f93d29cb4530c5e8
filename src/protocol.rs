//! # Challenge-Response Protocol Worker
//!
//! Drives the four-message handshake over an attached transport handle:
//!
//! 1. client → server: random client challenge
//! 2. server → client: digest of the client challenge, plus the server's
//!    own challenge
//! 3. client → server: digest of the server challenge
//! 4. server → client: one-byte result
//!
//! Each digest is `SHA-256(challenge || shared_key)`; a peer can only
//! produce it by holding the key, and fresh nonces keep a recorded
//! handshake from being replayed.
//!
//! The worker communicates its progress exclusively through the session's
//! status callback. Receives block in 3-second windows; a timeout loops
//! back into another receive while the cancellation flag is clear, so the
//! window doubles as the cancellation polling cadence. Any decode error
//! (bad magic, unexpected id) is fatal and the peer is not informed; the
//! one deliberate exception is the client's unsolicited failure result
//! when message 2 carries the wrong digest.

use std::sync::Arc;

use tracing::{debug, error};

use crate::crypto;
use crate::error::AuthError;
use crate::message::{self, MsgId, HEADER_LEN};
use crate::session::{AuthStatus, Role, SessionShared};
use crate::transport::TransportHandle;

/// Window for a single blocking receive.
pub(crate) const RECV_TIMEOUT_MS: u64 = 3_000;

/// Protocol worker entry point, spawned by `AuthSession::start`.
pub(crate) async fn run(shared: Arc<SessionShared>) {
    shared.set_status(AuthStatus::Started);

    let Some(transport) = shared.transport() else {
        error!("instance {}: no transport attached", shared.instance());
        shared.set_status(AuthStatus::Failed);
        return;
    };

    let outcome = match shared.role() {
        Role::Client => client_handshake(&shared, &transport).await,
        Role::Server => server_handshake(&shared, &transport).await,
    };

    let status = match outcome {
        Ok(()) => AuthStatus::Successful,
        Err(AuthError::AuthFailure) => AuthStatus::AuthenticationFailed,
        Err(AuthError::Canceled) => AuthStatus::Canceled,
        Err(e) => {
            error!("instance {}: handshake failed: {}", shared.instance(), e);
            AuthStatus::Failed
        }
    };

    debug!("instance {}: handshake worker done: {}", shared.instance(), status);
    shared.set_status(status);
}

/// Send one frame, checking the cancellation flag first.
///
/// A short or failed send is fatal for the session; there are no retries
/// mid-protocol.
async fn send_frame(
    shared: &SessionShared,
    hdl: &TransportHandle,
    frame: &[u8],
) -> Result<(), AuthError> {
    if shared.cancelled() {
        return Err(AuthError::Canceled);
    }
    let sent = hdl.send(frame).await?;
    if sent != frame.len() {
        return Err(AuthError::Transport(format!(
            "short send: {} of {} bytes",
            sent,
            frame.len()
        )));
    }
    Ok(())
}

/// Receive exactly `buf.len()` bytes, accumulating across short reads.
///
/// Timeouts retry while the cancellation flag is clear; the flag is
/// checked after every receive, whether it returned bytes or timed out.
async fn recv_exact(
    shared: &SessionShared,
    hdl: &TransportHandle,
    buf: &mut [u8],
) -> Result<(), AuthError> {
    let mut filled = 0;
    while filled < buf.len() {
        match hdl.recv(&mut buf[filled..], RECV_TIMEOUT_MS).await {
            Ok(n) => {
                if shared.cancelled() {
                    return Err(AuthError::Canceled);
                }
                filled += n;
            }
            Err(AuthError::Timeout) => {
                if shared.cancelled() {
                    return Err(AuthError::Canceled);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Client side of the handshake.
async fn client_handshake(
    shared: &SessionShared,
    hdl: &TransportHandle,
) -> Result<(), AuthError> {
    let challenge = crypto::generate_nonce()?;
    send_frame(shared, hdl, &message::encode_client_challenge(&challenge)).await?;
    debug!("client: challenge sent");

    let mut frame = [0u8; MsgId::ServerChallengeResponse.frame_len()];
    recv_exact(shared, hdl, &mut frame).await?;
    let Some(response) = message::decode_server_response(&frame) else {
        error!("client: invalid server challenge response");
        return Err(AuthError::Transport("invalid server challenge response".into()));
    };

    // The server proves key possession by echoing our challenge's digest.
    let expected = crypto::challenge_hash(&challenge, shared.key());
    if !crypto::digest_eq(&expected, &response.digest) {
        error!("client: server response digest mismatch");
        // The mirror of the server's explicit verdict: tell the server its
        // response was rejected, then give up.
        if let Err(e) = send_frame(shared, hdl, &message::encode_result(1)).await {
            error!("client: failed to send failure result: {}", e);
        }
        return Err(AuthError::AuthFailure);
    }

    // Prove our own key possession against the server's challenge.
    let digest = crypto::challenge_hash(&response.challenge, shared.key());
    send_frame(shared, hdl, &message::encode_client_response(&digest)).await?;
    debug!("client: challenge response sent, waiting for verdict");
    shared.set_status(AuthStatus::InProcess);

    let mut verdict = [0u8; MsgId::Result.frame_len()];
    recv_exact(shared, hdl, &mut verdict).await?;
    let Some(result) = message::decode_result(&verdict) else {
        error!("client: invalid result message");
        return Err(AuthError::Transport("invalid result message".into()));
    };
    if result != 0 {
        error!("client: server rejected our response, result {}", result);
        return Err(AuthError::AuthFailure);
    }

    debug!("client: authentication with server successful");
    Ok(())
}

/// Server side of the handshake.
async fn server_handshake(
    shared: &SessionShared,
    hdl: &TransportHandle,
) -> Result<(), AuthError> {
    let challenge = crypto::generate_nonce()?;

    let mut frame = [0u8; MsgId::ClientChallenge.frame_len()];
    recv_exact(shared, hdl, &mut frame).await?;
    let Some(client_challenge) = message::decode_client_challenge(&frame) else {
        error!("server: invalid client challenge");
        return Err(AuthError::Transport("invalid client challenge".into()));
    };
    debug!("server: client challenge received");

    let digest = crypto::challenge_hash(&client_challenge, shared.key());
    send_frame(
        shared,
        hdl,
        &message::encode_server_response(&digest, &challenge),
    )
    .await?;
    shared.set_status(AuthStatus::InProcess);

    // Read the header of the next message on its own: a result id here
    // means the client rejected our response in the previous step.
    let mut header = [0u8; HEADER_LEN];
    recv_exact(shared, hdl, &mut header).await?;
    match message::parse_header(&header) {
        Some(MsgId::Result) => {
            let mut result = [0u8; 1];
            match recv_exact(shared, hdl, &mut result).await {
                Ok(()) => {
                    if result[0] == 0 {
                        error!("server: unexpected success result from client");
                    }
                }
                Err(AuthError::Canceled) => return Err(AuthError::Canceled),
                Err(e) => error!("server: failed to read client result body: {}", e),
            }
            error!("server: client rejected our challenge response");
            Err(AuthError::AuthFailure)
        }
        Some(MsgId::ClientChallengeResponse) => {
            let mut response = [0u8; crypto::RESPONSE_LEN];
            recv_exact(shared, hdl, &mut response).await?;

            let expected = crypto::challenge_hash(&challenge, shared.key());
            let matched = crypto::digest_eq(&expected, &response);
            let result = u8::from(!matched);
            send_frame(shared, hdl, &message::encode_result(result)).await?;

            if matched {
                debug!("server: authentication with client successful");
                Ok(())
            } else {
                error!("server: client response digest mismatch");
                Err(AuthError::AuthFailure)
            }
        }
        _ => {
            error!("server: invalid header while waiting for client response");
            Err(AuthError::Transport("invalid client response header".into()))
        }
    }
}
