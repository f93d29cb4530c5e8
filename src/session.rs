//! # Authentication Session Lifecycle
//!
//! An [`AuthSession`] represents one authentication attempt between two
//! peers. The caller configures it with a role, a method, an optional
//! shared-key override, and a status callback, attaches a transport handle,
//! and starts it. The session spawns an owned protocol worker; every status
//! change is reported synchronously on that worker through the callback,
//! ending with exactly one terminal status.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──▶ attach_transport ──▶ start ──▶ (worker runs) ──▶ terminal status
//!                                  │                            │
//!                                  └── cancel (any time) ───────┘
//! ```
//!
//! Cancellation is best-effort: the worker observes the flag before each
//! send and after each receive completes, so a blocked receive finishes or
//! times out before the flag takes effect.

use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::crypto::SharedKey;
use crate::error::AuthError;
use crate::protocol;
use crate::transport::TransportHandle;

/// Number of authentication instances the library supports at once.
///
/// Transport instance pools are sized by this constant.
pub const NUM_AUTH_INSTANCES: usize = 2;

/// Identifier of an authentication instance.
///
/// A process can run a small, fixed number of concurrent sessions; each is
/// addressed by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceId {
    /// First authentication instance.
    Instance1,

    /// Second authentication instance.
    Instance2,
}

impl InstanceId {
    /// Zero-based index of this instance, for pool addressing.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index() + 1)
    }
}

/// Session configuration flags.
///
/// A valid flag set contains exactly one of [`SessionFlags::CLIENT`] and
/// [`SessionFlags::SERVER`] plus exactly one method bit. Anything else is
/// rejected with [`AuthError::InvalidParam`] at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags(u32);

impl SessionFlags {
    /// This endpoint initiates the handshake.
    pub const CLIENT: SessionFlags = SessionFlags(0x0001);

    /// This endpoint answers the handshake.
    pub const SERVER: SessionFlags = SessionFlags(0x0002);

    /// Authenticate with the challenge-response method.
    pub const METHOD_CHALLENGE_RESPONSE: SessionFlags = SessionFlags(0x0004);

    /// Authenticate with the TLS-style method. Declared for the wire
    /// surface but not implemented.
    pub const METHOD_TLS: SessionFlags = SessionFlags(0x0008);

    const ALL: u32 = 0x000F;

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn validate(self) -> Result<(Role, Method), AuthError> {
        if self.0 & !Self::ALL != 0 {
            return Err(AuthError::InvalidParam("unknown session flag bits"));
        }
        let role = match (self.contains(Self::CLIENT), self.contains(Self::SERVER)) {
            (true, false) => Role::Client,
            (false, true) => Role::Server,
            _ => return Err(AuthError::InvalidParam("exactly one of client or server required")),
        };
        let method = match (
            self.contains(Self::METHOD_CHALLENGE_RESPONSE),
            self.contains(Self::METHOD_TLS),
        ) {
            (true, false) => Method::ChallengeResponse,
            (false, true) => Method::Tls,
            _ => return Err(AuthError::InvalidParam("exactly one auth method required")),
        };
        Ok((role, method))
    }
}

impl BitOr for SessionFlags {
    type Output = SessionFlags;

    fn bitor(self, rhs: SessionFlags) -> SessionFlags {
        SessionFlags(self.0 | rhs.0)
    }
}

/// Which side of the handshake this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates with the first challenge.
    Client,

    /// Waits for the client's challenge.
    Server,
}

/// Authentication method for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Mutual challenge-response over a pre-shared key.
    ChallengeResponse,

    /// TLS-style certificate authentication. Not implemented.
    Tls,
}

/// Optional method-specific parameters, tagged by method.
#[derive(Debug, Clone)]
pub enum AuthOptParams {
    /// Challenge-response parameters: a shared key that replaces the
    /// built-in default for this session.
    ChallengeResponse {
        /// The 32-byte pre-shared key to authenticate with.
        shared_key: SharedKey,
    },
}

/// Session status reported through the status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The protocol worker is up.
    Started,

    /// The handshake is past its first exchange.
    InProcess,

    /// The cancellation flag was observed. Terminal.
    Canceled,

    /// A transport, framing, or crypto failure ended the session. Terminal.
    Failed,

    /// The handshake completed and the peer was rejected, or the peer
    /// rejected us. Terminal.
    AuthenticationFailed,

    /// Both sides authenticated. Terminal.
    Successful,
}

impl AuthStatus {
    /// Whether this status ends the session.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthStatus::Canceled
                | AuthStatus::Failed
                | AuthStatus::AuthenticationFailed
                | AuthStatus::Successful
        )
    }

    /// Human-readable label for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            AuthStatus::Started => "Authentication started",
            AuthStatus::InProcess => "In process",
            AuthStatus::Canceled => "Canceled",
            AuthStatus::Failed => "Failure",
            AuthStatus::AuthenticationFailed => "Authentication Failed",
            AuthStatus::Successful => "Authentication Successful",
        }
    }
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked on every status change, with the instance it belongs
/// to. Runs synchronously on the protocol worker; callers that need to
/// wake an external waiter send through a channel from inside the closure.
pub type StatusCallback = Box<dyn Fn(InstanceId, AuthStatus) + Send + Sync>;

/// State shared between the session object, its protocol worker, and
/// `cancel` callers.
pub(crate) struct SessionShared {
    instance: InstanceId,
    role: Role,
    key: SharedKey,
    transport: Mutex<Option<Arc<TransportHandle>>>,
    status: Mutex<AuthStatus>,
    cancel: AtomicBool,
    status_cb: StatusCallback,
}

impl SessionShared {
    pub(crate) fn instance(&self) -> InstanceId {
        self.instance
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn key(&self) -> &SharedKey {
        &self.key
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn transport(&self) -> Option<Arc<TransportHandle>> {
        self.transport.lock().expect("transport lock poisoned").clone()
    }

    /// Record a status change and fire the callback.
    ///
    /// The status field is updated before the callback runs. Once a
    /// terminal status is recorded, later changes are ignored, so the
    /// callback fires with a terminal value exactly once.
    pub(crate) fn set_status(&self, status: AuthStatus) {
        {
            let mut current = self.status.lock().expect("status lock poisoned");
            if current.is_terminal() {
                debug!(
                    "instance {}: ignoring status {} after terminal {}",
                    self.instance, status, *current
                );
                return;
            }
            *current = status;
        }
        (self.status_cb)(self.instance, status);
    }
}

/// One authentication attempt between two peers.
///
/// See the module documentation for the lifecycle. The transport handle is
/// borrowed for the session's lifetime and must outlive the worker; call
/// [`AuthSession::deinit`] only after a terminal status has been reported.
pub struct AuthSession {
    shared: Arc<SessionShared>,
    worker: Option<JoinHandle<()>>,
}

impl AuthSession {
    /// Create a session.
    ///
    /// `flags` selects the role and method; `opt_params` may carry a
    /// shared-key override for the challenge-response method. Invalid flag
    /// combinations and the unimplemented TLS-style method fail with
    /// [`AuthError::InvalidParam`].
    pub fn new(
        instance: InstanceId,
        status_cb: StatusCallback,
        opt_params: Option<AuthOptParams>,
        flags: SessionFlags,
    ) -> Result<AuthSession, AuthError> {
        let (role, method) = flags.validate()?;
        if method == Method::Tls {
            error!("TLS-style authentication method is not implemented");
            return Err(AuthError::InvalidParam("TLS-style method not implemented"));
        }

        let key = match opt_params {
            Some(AuthOptParams::ChallengeResponse { shared_key }) => shared_key,
            None => SharedKey::default(),
        };

        Ok(AuthSession {
            shared: Arc::new(SessionShared {
                instance,
                role,
                key,
                transport: Mutex::new(None),
                status: Mutex::new(AuthStatus::Started),
                cancel: AtomicBool::new(false),
                status_cb,
            }),
            worker: None,
        })
    }

    /// Attach the transport this session authenticates over.
    pub fn attach_transport(&self, hdl: Arc<TransportHandle>) {
        *self
            .shared
            .transport
            .lock()
            .expect("transport lock poisoned") = Some(hdl);
    }

    /// Spawn the protocol worker. A session starts at most once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), AuthError> {
        if self.worker.is_some() {
            return Err(AuthError::InvalidParam("session already started"));
        }
        if self.shared.transport().is_none() {
            return Err(AuthError::InvalidParam("no transport attached"));
        }
        debug!(
            "starting {:?} session on instance {}",
            self.shared.role, self.shared.instance
        );
        self.worker = Some(tokio::spawn(protocol::run(Arc::clone(&self.shared))));
        Ok(())
    }

    /// Request cancellation and immediately report `Canceled`.
    ///
    /// The worker stops at its next cancellation check; an in-flight
    /// receive completes or times out first.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.set_status(AuthStatus::Canceled);
    }

    /// Current session status.
    pub fn status(&self) -> AuthStatus {
        *self.shared.status.lock().expect("status lock poisoned")
    }

    /// Tear the session down after it reached a terminal status.
    ///
    /// Fails with [`AuthError::InvalidParam`] while the worker is still
    /// running; cancel first and wait for the terminal callback.
    pub async fn deinit(&mut self) -> Result<(), AuthError> {
        if !self.status().is_terminal() {
            return Err(AuthError::InvalidParam("session has not reached a terminal status"));
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("protocol worker did not exit cleanly: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_cb() -> StatusCallback {
        Box::new(|_, _| {})
    }

    /// Exactly one role bit and one method bit are required.
    #[test]
    fn test_flag_validation() {
        let ok = SessionFlags::CLIENT | SessionFlags::METHOD_CHALLENGE_RESPONSE;
        assert!(ok.validate().is_ok());

        let both_roles =
            SessionFlags::CLIENT | SessionFlags::SERVER | SessionFlags::METHOD_CHALLENGE_RESPONSE;
        assert!(both_roles.validate().is_err());

        let no_role = SessionFlags::METHOD_CHALLENGE_RESPONSE;
        assert!(no_role.validate().is_err());

        let both_methods = SessionFlags::SERVER
            | SessionFlags::METHOD_CHALLENGE_RESPONSE
            | SessionFlags::METHOD_TLS;
        assert!(both_methods.validate().is_err());

        let no_method = SessionFlags::SERVER;
        assert!(no_method.validate().is_err());

        assert!(SessionFlags(0x8000).validate().is_err());
    }

    /// The TLS-style method is declared but rejected at creation.
    #[test]
    fn test_tls_method_rejected() {
        let result = AuthSession::new(
            InstanceId::Instance1,
            noop_cb(),
            None,
            SessionFlags::CLIENT | SessionFlags::METHOD_TLS,
        );
        assert!(matches!(result, Err(AuthError::InvalidParam(_))));
    }

    /// Status labels come from the fixed, human-readable set.
    #[test]
    fn test_status_labels() {
        assert_eq!(AuthStatus::Started.as_str(), "Authentication started");
        assert_eq!(AuthStatus::InProcess.as_str(), "In process");
        assert_eq!(AuthStatus::Canceled.as_str(), "Canceled");
        assert_eq!(AuthStatus::Failed.as_str(), "Failure");
        assert_eq!(AuthStatus::AuthenticationFailed.as_str(), "Authentication Failed");
        assert_eq!(AuthStatus::Successful.as_str(), "Authentication Successful");
    }

    /// Only the four ending states are terminal.
    #[test]
    fn test_terminal_statuses() {
        assert!(!AuthStatus::Started.is_terminal());
        assert!(!AuthStatus::InProcess.is_terminal());
        assert!(AuthStatus::Canceled.is_terminal());
        assert!(AuthStatus::Failed.is_terminal());
        assert!(AuthStatus::AuthenticationFailed.is_terminal());
        assert!(AuthStatus::Successful.is_terminal());
    }

    /// A terminal status latches: later updates neither change the status
    /// nor fire the callback again.
    #[test]
    fn test_terminal_status_latches() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb_log = Arc::clone(&log);
        let session = AuthSession::new(
            InstanceId::Instance1,
            Box::new(move |_, status| cb_log.lock().unwrap().push(status)),
            None,
            SessionFlags::CLIENT | SessionFlags::METHOD_CHALLENGE_RESPONSE,
        )
        .unwrap();

        session.shared.set_status(AuthStatus::InProcess);
        session.shared.set_status(AuthStatus::Successful);
        session.shared.set_status(AuthStatus::Failed);
        session.shared.set_status(AuthStatus::Canceled);

        assert_eq!(session.status(), AuthStatus::Successful);
        assert_eq!(
            *log.lock().unwrap(),
            vec![AuthStatus::InProcess, AuthStatus::Successful]
        );
    }

    /// Cancel reports `Canceled` immediately, without a worker running.
    #[test]
    fn test_cancel_emits_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb_log = Arc::clone(&log);
        let session = AuthSession::new(
            InstanceId::Instance2,
            Box::new(move |instance, status| {
                assert_eq!(instance, InstanceId::Instance2);
                cb_log.lock().unwrap().push(status);
            }),
            None,
            SessionFlags::SERVER | SessionFlags::METHOD_CHALLENGE_RESPONSE,
        )
        .unwrap();

        session.cancel();
        assert!(session.shared.cancelled());
        assert_eq!(session.status(), AuthStatus::Canceled);
        assert_eq!(*log.lock().unwrap(), vec![AuthStatus::Canceled]);
    }

    /// Starting without a transport is a caller error.
    #[tokio::test]
    async fn test_start_requires_transport() {
        let mut session = AuthSession::new(
            InstanceId::Instance1,
            noop_cb(),
            None,
            SessionFlags::CLIENT | SessionFlags::METHOD_CHALLENGE_RESPONSE,
        )
        .unwrap();
        assert!(matches!(
            session.start(),
            Err(AuthError::InvalidParam(_))
        ));
    }
}
